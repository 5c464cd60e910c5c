//! NDJSON event output
//!
//! Streaming commands print one JSON object per line on stdout. Every event
//! has an `event` field naming its type and a millisecond `timestamp`.
//!
//! # Example Output
//!
//! ```json
//! {"event":"devices_changed","devices":[{"udid":"00008101-000123456789001E","name":"iPhone","connection":"usb"}],"count":1,"timestamp":1704700001000}
//! {"event":"log","udid":"00008101-000123456789001E","line":"SpringBoard[58] <Notice>: ...","timestamp":1704700002000}
//! ```

use std::io::{self, Write};
use std::path::Path;

use chrono::Utc;
use idevhub_core::{Device, DeviceSnapshot, LogMessage};
use serde::Serialize;
use tracing::error;

/// Events printed by the streaming commands
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HubEvent {
    /// The attached device set, initially and after every change
    DevicesChanged {
        devices: Vec<Device>,
        count: usize,
        timestamp: i64,
    },

    /// One syslog line from a device
    Log {
        udid: String,
        line: String,
        timestamp: i64,
    },

    /// An app was installed
    Installed {
        udid: String,
        bundle: String,
        timestamp: i64,
    },

    /// A subscription or command failed
    Error {
        message: String,
        fatal: bool,
        timestamp: i64,
    },
}

impl HubEvent {
    /// Emit this event to stdout as one JSON line
    pub fn emit(&self) {
        let json = match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize event: {}", e);
                return;
            }
        };

        let mut stdout = io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{}", json) {
            error!("Failed to write event to stdout: {}", e);
            return;
        }

        if let Err(e) = stdout.flush() {
            error!("Failed to flush stdout: {}", e);
        }
    }

    fn now() -> i64 {
        Utc::now().timestamp_millis()
    }

    // ─────────────────────────────────────────────────────────
    // Convenience constructors
    // ─────────────────────────────────────────────────────────

    pub fn devices_changed(snapshot: &DeviceSnapshot) -> Self {
        Self::DevicesChanged {
            devices: snapshot.devices().to_vec(),
            count: snapshot.len(),
            timestamp: Self::now(),
        }
    }

    pub fn log(message: &LogMessage) -> Self {
        Self::Log {
            udid: message.udid.clone(),
            line: message.line.clone(),
            timestamp: message.received_at.timestamp_millis(),
        }
    }

    pub fn installed(udid: &str, bundle: &Path) -> Self {
        Self::Installed {
            udid: udid.to_string(),
            bundle: bundle.display().to_string(),
            timestamp: Self::now(),
        }
    }

    pub fn error(message: String, fatal: bool) -> Self {
        Self::Error {
            message,
            fatal,
            timestamp: Self::now(),
        }
    }
}
