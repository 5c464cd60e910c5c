//! Test utilities for capability consumers
//!
//! Provides a scriptable in-process [`FakeCapability`] and a [`FakeLoader`]
//! that counts load attempts and can be told to fail or stall.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use idevhub_core::prelude::*;
use idevhub_core::{Device, DeviceSnapshot, LogMessage};

use crate::capability::{Capability, CapabilityLoader, ChangeEmitter, LogSink, LogStreamId};

/// Creates a test device with a name.
pub fn test_device(udid: &str, name: &str) -> Device {
    Device::new(udid).with_name(name)
}

/// Creates a snapshot from bare UDIDs.
pub fn test_snapshot(udids: &[&str]) -> DeviceSnapshot {
    udids.iter().map(|udid| Device::new(*udid)).collect::<Vec<_>>().into()
}

#[derive(Default)]
struct FakeState {
    /// What is plugged in; published on the next tick
    attached: DeviceSnapshot,
    /// What `devices()` reports
    published: DeviceSnapshot,
    emitter: Option<ChangeEmitter>,
    streams: HashMap<LogStreamId, (String, LogSink)>,
    queued_logs: VecDeque<(String, String)>,
    installs: Vec<(String, PathBuf)>,
    install_error: Option<String>,
    stream_error: Option<String>,
}

struct FakeInner {
    state: Mutex<FakeState>,
    ticks: AtomicUsize,
    emitters_set: AtomicUsize,
    next_stream: AtomicU64,
}

/// In-process capability driven entirely by the test
///
/// Like the real backend, attached devices only become visible through
/// `devices()` once a tick has run. Clones share state, so a test can keep one handle while the hub owns
/// another.
#[derive(Clone)]
pub struct FakeCapability {
    inner: Arc<FakeInner>,
}

impl std::fmt::Debug for FakeCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeCapability").finish_non_exhaustive()
    }
}

impl Default for FakeCapability {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCapability {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FakeInner {
                state: Mutex::new(FakeState::default()),
                ticks: AtomicUsize::new(0),
                emitters_set: AtomicUsize::new(0),
                next_stream: AtomicU64::new(1),
            }),
        }
    }

    /// Devices attached from the start; the first tick publishes them
    pub fn with_devices(self, devices: DeviceSnapshot) -> Self {
        self.lock().attached = devices;
        self
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the attached device set; the next tick emits it
    pub fn set_devices(&self, devices: DeviceSnapshot) {
        self.lock().attached = devices;
    }

    /// Queue a log line for `udid`; the next tick delivers it
    pub fn push_log(&self, udid: &str, line: &str) {
        self.lock()
            .queued_logs
            .push_back((udid.to_string(), line.to_string()));
    }

    /// Make every following install fail with `message`
    pub fn fail_installs(&self, message: &str) {
        self.lock().install_error = Some(message.to_string());
    }

    /// Make every following `stream_logs` fail with `message`
    pub fn fail_streams(&self, message: &str) {
        self.lock().stream_error = Some(message.to_string());
    }

    pub fn tick_count(&self) -> usize {
        self.inner.ticks.load(Ordering::SeqCst)
    }

    pub fn emitters_set(&self) -> usize {
        self.inner.emitters_set.load(Ordering::SeqCst)
    }

    pub fn active_streams(&self) -> usize {
        self.lock().streams.len()
    }

    pub fn installs(&self) -> Vec<(String, PathBuf)> {
        self.lock().installs.clone()
    }
}

impl Capability for FakeCapability {
    async fn tick(&self) {
        self.inner.ticks.fetch_add(1, Ordering::SeqCst);

        let (change, deliveries) = {
            let mut state = self.lock();

            let change = if state.attached != state.published {
                state.published = state.attached.clone();
                state
                    .emitter
                    .clone()
                    .map(|emit| (emit, state.published.clone()))
            } else {
                None
            };

            let queued: Vec<_> = state.queued_logs.drain(..).collect();
            let mut deliveries = Vec::new();
            for (udid, line) in queued {
                let sinks = state
                    .streams
                    .values()
                    .filter(|(target, _)| *target == udid)
                    .map(|(_, sink)| sink.clone());
                for sink in sinks {
                    deliveries.push((sink, LogMessage::new(udid.clone(), line.clone())));
                }
            }

            (change, deliveries)
        };

        if let Some((emit, snapshot)) = change {
            emit(snapshot);
        }
        for (sink, message) in deliveries {
            sink(message);
        }
    }

    fn devices(&self) -> DeviceSnapshot {
        self.lock().published.clone()
    }

    async fn install_app(&self, udid: &str, bundle: &Path) -> Result<()> {
        let mut state = self.lock();
        if let Some(message) = state.install_error.clone() {
            return Err(Error::device(message));
        }
        state.installs.push((udid.to_string(), bundle.to_path_buf()));
        Ok(())
    }

    fn stream_logs(&self, udid: &str, sink: LogSink) -> Result<LogStreamId> {
        let mut state = self.lock();
        if let Some(message) = state.stream_error.clone() {
            return Err(Error::device(message));
        }
        let id = LogStreamId(self.inner.next_stream.fetch_add(1, Ordering::SeqCst));
        state.streams.insert(id, (udid.to_string(), sink));
        Ok(id)
    }

    fn stop_logs(&self, id: LogStreamId) {
        self.lock().streams.remove(&id);
    }

    fn set_emitter(&self, emitter: ChangeEmitter) {
        self.inner.emitters_set.fetch_add(1, Ordering::SeqCst);
        self.lock().emitter = Some(emitter);
    }
}

struct LoaderState {
    failures: VecDeque<Error>,
}

/// Loader handing out clones of one [`FakeCapability`]
#[derive(Clone)]
pub struct FakeLoader {
    capability: FakeCapability,
    delay: Duration,
    loads: Arc<AtomicUsize>,
    state: Arc<Mutex<LoaderState>>,
}

impl FakeLoader {
    pub fn new(capability: FakeCapability) -> Self {
        Self {
            capability,
            delay: Duration::ZERO,
            loads: Arc::new(AtomicUsize::new(0)),
            state: Arc::new(Mutex::new(LoaderState {
                failures: VecDeque::new(),
            })),
        }
    }

    /// Stall every load for `delay` before resolving
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the next load with `error`; later loads succeed again
    pub fn fail_next(&self, error: Error) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .failures
            .push_back(error);
    }

    /// Number of load attempts so far
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn capability(&self) -> &FakeCapability {
        &self.capability
    }
}

impl CapabilityLoader for FakeLoader {
    type Output = FakeCapability;

    async fn load(&self) -> Result<FakeCapability> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let failure = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .failures
            .pop_front();

        match failure {
            Some(error) => Err(error),
            None => Ok(self.capability.clone()),
        }
    }
}
