//! Settings parser for .idevhub/config.toml

use std::path::{Path, PathBuf};

use idevhub_core::prelude::*;

use super::types::{PollSettings, Settings};

const CONFIG_FILENAME: &str = "config.toml";
const IDEVHUB_DIR: &str = ".idevhub";

/// Per-user configuration directory (`~/.config/idevhub` on Linux)
pub fn user_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("idevhub"))
}

/// Path of the project-level config file under `project_path`
pub fn config_path(project_path: &Path) -> PathBuf {
    project_path.join(IDEVHUB_DIR).join(CONFIG_FILENAME)
}

/// Load settings for `project_path`
///
/// Reads `<project_path>/.idevhub/config.toml`, falling back to the per-user
/// `config.toml` and then to defaults.
pub fn load_settings(project_path: &Path) -> Settings {
    let project_config = config_path(project_path);
    if project_config.exists() {
        return load_settings_file(&project_config);
    }

    if let Some(user_config) = user_config_dir().map(|dir| dir.join(CONFIG_FILENAME)) {
        if user_config.exists() {
            return load_settings_file(&user_config);
        }
    }

    debug!("No config file at {:?}, using defaults", project_config);
    Settings::default()
}

/// Load one settings file; unreadable or malformed files yield defaults
pub fn load_settings_file(config_path: &Path) -> Settings {
    let settings = match std::fs::read_to_string(config_path) {
        Ok(content) => match toml::from_str::<Settings>(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", config_path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", config_path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", config_path, e);
            Settings::default()
        }
    };

    sanitize(settings)
}

fn sanitize(mut settings: Settings) -> Settings {
    if settings.poll.interval_ms == 0 {
        warn!(
            "poll.interval_ms must be at least 1, using {}",
            PollSettings::default().interval_ms
        );
        settings.poll = PollSettings::default();
    }
    if settings.tools.refresh_ms == 0 {
        debug!("tools.refresh_ms is 0, refreshing the device list on every tick");
    }
    settings
}

/// Create a commented default config file in `.idevhub/`
///
/// An existing file is left untouched. Returns the config file path.
pub fn init_config_dir(project_path: &Path) -> Result<PathBuf> {
    let idevhub_dir = project_path.join(IDEVHUB_DIR);

    if !idevhub_dir.exists() {
        std::fs::create_dir_all(&idevhub_dir)
            .map_err(|e| Error::config(format!("Failed to create .idevhub dir: {}", e)))?;
    }

    let config_path = idevhub_dir.join(CONFIG_FILENAME);
    if !config_path.exists() {
        let default_content = r#"# idevhub Configuration

[poll]
interval_ms = 10        # Delay between run-loop pumps while anything is subscribed

[bundle]
markers = ["PkgInfo", "Info.plist"]   # A .app directory must contain one of these

[tools]
refresh_ms = 1000       # Minimum time between idevice_id runs
# Optional explicit tool paths (default: looked up on PATH)
# idevice_id = "/opt/homebrew/bin/idevice_id"
# idevice_name = "/opt/homebrew/bin/idevice_name"
# ideviceinstaller = "/opt/homebrew/bin/ideviceinstaller"
# idevicesyslog = "/opt/homebrew/bin/idevicesyslog"
"#;
        std::fs::write(&config_path, default_content)
            .map_err(|e| Error::config(format!("Failed to write config.toml: {}", e)))?;
        info!("Created default config at {:?}", config_path);
    }

    Ok(config_path)
}

/// Save settings to `.idevhub/config.toml`
pub fn save_settings(project_path: &Path, settings: &Settings) -> Result<()> {
    let idevhub_dir = project_path.join(IDEVHUB_DIR);

    if !idevhub_dir.exists() {
        std::fs::create_dir_all(&idevhub_dir)
            .map_err(|e| Error::config(format!("Failed to create .idevhub dir: {}", e)))?;
    }

    let config_path = idevhub_dir.join(CONFIG_FILENAME);
    let temp_path = idevhub_dir.join(".config.toml.tmp");

    let content = toml::to_string_pretty(settings)
        .map_err(|e| Error::config(format!("Failed to serialize settings: {}", e)))?;
    let full_content = format!("# idevhub Configuration\n\n{}", content);

    // Write to temp, then rename
    std::fs::write(&temp_path, &full_content)
        .with_context(|| format!("Writing {}", temp_path.display()))?;
    std::fs::rename(&temp_path, &config_path)
        .with_context(|| format!("Replacing {}", config_path.display()))?;

    debug!("Saved settings to {:?}", config_path);
    Ok(())
}
