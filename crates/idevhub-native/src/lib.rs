//! # idevhub-native - Device Capability Layer
//!
//! Defines the capability interface the hub drives, and a concrete capability
//! backed by the libimobiledevice command-line tools.
//!
//! Depends on [`idevhub_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### Capability Interface
//! - [`Capability`] - Tick, enumerate, install, stream logs
//! - [`CapabilityLoader`] - Asynchronously produce a capability
//! - [`ChangeEmitter`], [`LogSink`], [`LogStreamId`] - Callback plumbing
//!
//! ### Command-Line Backend
//! - [`CliLoader`] / [`CliCapability`] - `idevice_id`, `idevice_name`,
//!   `ideviceinstaller` and `idevicesyslog` driven through `tokio::process`
//! - [`ToolAvailability`] - Locate the tools on `PATH` or via overrides
//! - [`parse_device_list()`] - Parse `idevice_id -l` output

pub mod capability;
pub mod cli;
pub mod devices;
pub mod install;
pub mod syslog;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;
pub mod tool_availability;

// Public API re-exports
pub use capability::{
    Capability, CapabilityLoader, ChangeEmitter, LocalCapability, LogSink, LogStreamId,
};
pub use cli::{CliCapability, CliLoader, CliOptions, DEFAULT_REFRESH};
pub use devices::parse_device_list;
pub use syslog::SyslogStream;
pub use tool_availability::{Tool, ToolAvailability, ToolOverrides};
