//! Configuration types for idevhub
//!
//! Defines:
//! - `Settings` - Hub settings loaded from `.idevhub/config.toml`
//! - `PollSettings`, `BundleSettings`, `ToolSettings` - one per TOML section

use std::path::PathBuf;
use std::time::Duration;

use idevhub_native::{CliOptions, ToolOverrides};
use serde::{Deserialize, Serialize};

/// Hub settings from `.idevhub/config.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub poll: PollSettings,

    #[serde(default)]
    pub bundle: BundleSettings,

    #[serde(default)]
    pub tools: ToolSettings,
}

/// Run-loop pump settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PollSettings {
    /// Delay between the end of one tick and the start of the next
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
        }
    }
}

impl PollSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

fn default_interval_ms() -> u64 {
    10
}

/// App bundle validation settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BundleSettings {
    /// A bundle directory must contain at least one of these files.
    /// An empty list disables the marker check.
    #[serde(default = "default_markers")]
    pub markers: Vec<String>,
}

impl Default for BundleSettings {
    fn default() -> Self {
        Self {
            markers: default_markers(),
        }
    }
}

fn default_markers() -> Vec<String> {
    vec!["PkgInfo".to_string(), "Info.plist".to_string()]
}

/// libimobiledevice tool settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ToolSettings {
    /// Minimum time between two `idevice_id` runs
    #[serde(default = "default_refresh_ms")]
    pub refresh_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idevice_id: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idevice_name: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ideviceinstaller: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idevicesyslog: Option<PathBuf>,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            refresh_ms: default_refresh_ms(),
            idevice_id: None,
            idevice_name: None,
            ideviceinstaller: None,
            idevicesyslog: None,
        }
    }
}

fn default_refresh_ms() -> u64 {
    1000
}

impl ToolSettings {
    /// Options for the command-line capability
    pub fn cli_options(&self) -> CliOptions {
        CliOptions {
            tools: ToolOverrides {
                idevice_id: self.idevice_id.clone(),
                idevice_name: self.idevice_name.clone(),
                ideviceinstaller: self.ideviceinstaller.clone(),
                idevicesyslog: self.idevicesyslog.clone(),
            },
            refresh: Duration::from_millis(self.refresh_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.poll.interval(), Duration::from_millis(10));
        assert_eq!(settings.bundle.markers, vec!["PkgInfo", "Info.plist"]);
        assert_eq!(settings.tools.refresh_ms, 1000);
        assert!(settings.tools.idevice_id.is_none());
    }

    #[test]
    fn test_partial_section_keeps_defaults() {
        let settings: Settings = toml::from_str("[poll]\n").unwrap();
        assert_eq!(settings.poll.interval_ms, 10);
        assert_eq!(settings.bundle, BundleSettings::default());
    }

    #[test]
    fn test_cli_options_from_tool_settings() {
        let tools = ToolSettings {
            refresh_ms: 250,
            ideviceinstaller: Some(PathBuf::from("/opt/bin/ideviceinstaller")),
            ..Default::default()
        };

        let options = tools.cli_options();
        assert_eq!(options.refresh, Duration::from_millis(250));
        assert_eq!(
            options.tools.ideviceinstaller,
            Some(PathBuf::from("/opt/bin/ideviceinstaller"))
        );
        assert!(options.tools.idevice_id.is_none());
    }
}
