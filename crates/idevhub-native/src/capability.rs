//! The device capability interface
//!
//! A capability is the native side of the hub: it enumerates devices, installs
//! apps and forwards device logs. The hub never talks to devices directly; it
//! only drives a capability through these traits.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use idevhub_core::prelude::*;
use idevhub_core::{DeviceSnapshot, LogMessage};

/// Receives the new snapshot whenever a tick detects a device connect or disconnect
pub type ChangeEmitter = Arc<dyn Fn(DeviceSnapshot) + Send + Sync>;

/// Receives every log line forwarded for one device
pub type LogSink = Arc<dyn Fn(LogMessage) + Send + Sync>;

/// Identifies one registered log handler on a capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogStreamId(pub u64);

impl std::fmt::Display for LogStreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "log-stream-{}", self.0)
    }
}

/// A resolved handle to the native device layer
#[trait_variant::make(Capability: Send)]
pub trait LocalCapability {
    /// Pump pending native work.
    ///
    /// Surfaces device connect/disconnect through the emitter and delivers
    /// buffered log lines to their sinks. Has no other observable result.
    async fn tick(&self);

    /// Current device set as of the last tick
    fn devices(&self) -> DeviceSnapshot;

    /// Install the app bundle at `bundle` on the device `udid`
    async fn install_app(&self, udid: &str, bundle: &Path) -> Result<()>;

    /// Start forwarding log lines from `udid` to `sink`
    fn stream_logs(&self, udid: &str, sink: LogSink) -> Result<LogStreamId>;

    /// Stop a log stream; unknown ids are ignored
    fn stop_logs(&self, id: LogStreamId);

    /// Wire the change-notification source. Called once, right after loading.
    fn set_emitter(&self, emitter: ChangeEmitter);
}

/// Asynchronously produces a [`Capability`]
pub trait CapabilityLoader: Send + Sync + 'static {
    type Output: Capability + Sync + 'static;

    /// Load the capability.
    ///
    /// Fails with [`Error::Unsupported`] when the host cannot provide it and
    /// with [`Error::Init`] when loading itself fails.
    fn load(&self) -> impl Future<Output = Result<Self::Output>> + Send;
}
