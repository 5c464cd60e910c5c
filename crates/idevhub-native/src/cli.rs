//! Capability backed by the libimobiledevice command-line tools

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use idevhub_core::prelude::*;
use idevhub_core::{DeviceSnapshot, LogMessage};

use crate::capability::{Capability, CapabilityLoader, ChangeEmitter, LogSink, LogStreamId};
use crate::devices::{device_name, list_udids};
use crate::install;
use crate::syslog::SyslogStream;
use crate::tool_availability::{Tool, ToolAvailability, ToolOverrides};

/// Default minimum time between two `idevice_id` runs
pub const DEFAULT_REFRESH: Duration = Duration::from_millis(1000);

/// Options for the command-line backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliOptions {
    pub tools: ToolOverrides,

    /// Minimum time between device list refreshes. Ticks in between only
    /// pump log lines.
    pub refresh: Duration,
}

impl Default for CliOptions {
    fn default() -> Self {
        Self {
            tools: ToolOverrides::default(),
            refresh: DEFAULT_REFRESH,
        }
    }
}

/// Loads a [`CliCapability`] after checking that the tools are usable
#[derive(Debug, Clone, Default)]
pub struct CliLoader {
    options: CliOptions,
}

impl CliLoader {
    pub fn new(options: CliOptions) -> Self {
        Self { options }
    }
}

impl CapabilityLoader for CliLoader {
    type Output = CliCapability;

    async fn load(&self) -> Result<CliCapability> {
        let tools = ToolAvailability::check(&self.options.tools);

        if let Some(message) = tools.unavailable_message() {
            return Err(Error::unsupported(message));
        }

        let idevice_id = tools.require(Tool::IdeviceId)?;
        debug!("Checking {} runs", idevice_id.display());
        let attached = list_udids(idevice_id)
            .await
            .map_err(|e| Error::init(format!("idevice_id failed to run: {}", e)))?;
        info!("Device tools ready, {} device(s) attached", attached.len());

        Ok(CliCapability::new(tools, self.options.refresh)
            .with_snapshot(DeviceSnapshot::new(attached)))
    }
}

#[derive(Default)]
struct CliState {
    snapshot: DeviceSnapshot,
    names: HashMap<String, String>,
    last_refresh: Option<Instant>,
    emitter: Option<ChangeEmitter>,
    streams: HashMap<LogStreamId, SyslogStream>,
}

/// Device capability that shells out to libimobiledevice
pub struct CliCapability {
    tools: ToolAvailability,
    refresh: Duration,
    state: Mutex<CliState>,
    next_stream: AtomicU64,
}

impl std::fmt::Debug for CliCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("CliCapability")
            .field("tools", &self.tools)
            .field("refresh", &self.refresh)
            .field("devices", &state.snapshot.len())
            .field("streams", &state.streams.len())
            .finish()
    }
}

impl CliCapability {
    pub fn new(tools: ToolAvailability, refresh: Duration) -> Self {
        Self {
            tools,
            refresh,
            state: Mutex::new(CliState::default()),
            next_stream: AtomicU64::new(1),
        }
    }

    /// Start from a known device set instead of an empty one
    ///
    /// Names are still resolved by the first refresh, which does not count
    /// the seeded devices as a change.
    pub fn with_snapshot(self, snapshot: DeviceSnapshot) -> Self {
        self.lock().snapshot = snapshot;
        self
    }

    fn lock(&self) -> MutexGuard<'_, CliState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A tool the host is missing makes the operation unsupported
    fn require_tool(&self, tool: Tool) -> Result<&Path> {
        self.tools
            .require(tool)
            .map_err(|_| Error::unsupported(format!("{} is not installed", tool.binary_name())))
    }

    fn refresh_due(&self) -> bool {
        self.lock()
            .last_refresh
            .map_or(true, |at| at.elapsed() >= self.refresh)
    }

    async fn refresh_devices(&self) {
        let Some(idevice_id) = self.tools.path(Tool::IdeviceId) else {
            return;
        };

        let mut devices = match list_udids(idevice_id).await {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Device refresh failed: {}", e);
                self.lock().last_refresh = Some(Instant::now());
                return;
            }
        };

        let unnamed: Vec<String> = {
            let state = self.lock();
            devices
                .iter()
                .filter(|d| !state.names.contains_key(&d.udid))
                .map(|d| d.udid.clone())
                .collect()
        };

        let mut resolved = HashMap::new();
        if let Some(idevice_name) = self.tools.path(Tool::IdeviceName) {
            for udid in unnamed {
                match device_name(idevice_name, &udid).await {
                    Ok(Some(name)) => {
                        resolved.insert(udid, name);
                    }
                    Ok(None) => {}
                    Err(e) => debug!("Name lookup for {} failed: {}", udid, e),
                }
            }
        }

        let (snapshot, emitter) = {
            let mut state = self.lock();
            state.names.extend(resolved);

            // Forget names of devices that went away
            let present: HashSet<&str> = devices.iter().map(|d| d.udid.as_str()).collect();
            state.names.retain(|udid, _| present.contains(udid.as_str()));

            for device in &mut devices {
                device.name = state.names.get(&device.udid).cloned();
            }

            let snapshot = DeviceSnapshot::new(devices);
            let changed = !state.snapshot.same_devices(&snapshot);
            state.snapshot = snapshot.clone();
            state.last_refresh = Some(Instant::now());

            let emitter = if changed { state.emitter.clone() } else { None };
            (snapshot, emitter)
        };

        if let Some(emit) = emitter {
            info!("Device list changed: {} device(s) attached", snapshot.len());
            emit(snapshot);
        }
    }

    /// Hand buffered syslog lines to their sinks, outside the state lock
    fn pump_logs(&self) {
        let batches: Vec<(LogSink, Vec<LogMessage>)> = {
            let mut state = self.lock();
            state
                .streams
                .values_mut()
                .filter_map(|stream| {
                    let pending = stream.take_pending();
                    (!pending.is_empty()).then(|| (stream.sink(), pending))
                })
                .collect()
        };

        for (sink, messages) in batches {
            for message in messages {
                sink(message);
            }
        }
    }
}

impl Capability for CliCapability {
    async fn tick(&self) {
        if self.refresh_due() {
            self.refresh_devices().await;
        }
        self.pump_logs();
    }

    fn devices(&self) -> DeviceSnapshot {
        self.lock().snapshot.clone()
    }

    async fn install_app(&self, udid: &str, bundle: &Path) -> Result<()> {
        let installer = self.require_tool(Tool::Installer)?;
        install::install_app(installer, udid, bundle).await
    }

    fn stream_logs(&self, udid: &str, sink: LogSink) -> Result<LogStreamId> {
        let tool = self.require_tool(Tool::Syslog)?;
        let stream = SyslogStream::spawn(tool, udid, sink)?;
        let id = LogStreamId(self.next_stream.fetch_add(1, Ordering::Relaxed));
        self.lock().streams.insert(id, stream);
        debug!("Registered {} for {}", id, udid);
        Ok(id)
    }

    fn stop_logs(&self, id: LogStreamId) {
        let removed = self.lock().streams.remove(&id);
        if let Some(stream) = removed {
            debug!("Removed {} for {}", id, stream.udid());
        }
    }

    fn set_emitter(&self, emitter: ChangeEmitter) {
        self.lock().emitter = Some(emitter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_default_options() {
        let options = CliOptions::default();
        assert_eq!(options.refresh, DEFAULT_REFRESH);
        assert_eq!(options.tools, ToolOverrides::default());
    }

    #[tokio::test]
    async fn test_load_without_tools_is_unsupported() {
        let loader = CliLoader::new(CliOptions {
            tools: ToolOverrides {
                idevice_id: Some("/nonexistent/idevice_id".into()),
                ..Default::default()
            },
            ..Default::default()
        });

        let err = loader.load().await.unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));
    }

    #[tokio::test]
    async fn test_missing_tools_make_operations_unsupported() {
        let capability = CliCapability::new(ToolAvailability::default(), DEFAULT_REFRESH);

        let err = capability
            .install_app("abc", Path::new("/tmp/Foo.app"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));

        let sink: LogSink = Arc::new(|_: LogMessage| {});
        let err = capability.stream_logs("abc", sink).unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));
    }

    #[tokio::test]
    async fn test_tick_without_enumerator_keeps_empty_snapshot() {
        let capability = CliCapability::new(ToolAvailability::default(), DEFAULT_REFRESH);
        capability.tick().await;
        assert!(capability.devices().is_empty());
    }

    #[test]
    fn test_stop_unknown_stream_is_ignored() {
        let capability = CliCapability::new(ToolAvailability::default(), DEFAULT_REFRESH);
        capability.stop_logs(LogStreamId(42));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_refresh_emits_on_change() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("idevice_id");
        std::fs::write(&script, "#!/bin/sh\necho '00008101-000123456789001E (USB)'\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let tools = ToolAvailability {
            idevice_id: Some(script),
            ..Default::default()
        };
        let capability = CliCapability::new(tools, Duration::from_secs(60));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        capability.set_emitter(Arc::new(move |snapshot: DeviceSnapshot| {
            seen_clone.lock().unwrap().push(snapshot);
        }));

        capability.tick().await;
        // Second tick is inside the refresh window and must not re-run the tool
        capability.tick().await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("00008101-000123456789001E"));
        assert_eq!(capability.devices().len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_loaded_capability_starts_with_attached_devices() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("idevice_id");
        std::fs::write(&script, "#!/bin/sh\necho '00008101-000123456789001E (USB)'\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let loader = CliLoader::new(CliOptions {
            tools: ToolOverrides {
                idevice_id: Some(script),
                ..Default::default()
            },
            ..Default::default()
        });
        let capability = loader.load().await.unwrap();
        assert!(capability.devices().contains("00008101-000123456789001E"));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        capability.set_emitter(Arc::new(move |snapshot: DeviceSnapshot| {
            seen_clone.lock().unwrap().push(snapshot);
        }));

        // Same device set as the seed, so no change is reported
        capability.tick().await;
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(capability.devices().len(), 1);
    }
}
