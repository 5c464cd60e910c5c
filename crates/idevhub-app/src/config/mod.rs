//! Configuration file parsing for idevhub
//!
//! Supports:
//! - `.idevhub/config.toml` - Project settings
//! - `<user config dir>/idevhub/config.toml` - Per-user fallback

pub mod settings;
pub mod types;

pub use settings::{
    config_path, init_config_dir, load_settings, load_settings_file, save_settings,
    user_config_dir,
};
pub use types::*;
