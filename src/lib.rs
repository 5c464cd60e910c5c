//! idevhub - iOS device tracker, log streamer and app installer
//!
//! Front end over [`idevhub_app::DeviceHub`] driving the libimobiledevice
//! command-line tools.

pub mod commands;
pub mod output;

pub use commands::{build_hub, CliHub};
pub use output::HubEvent;
