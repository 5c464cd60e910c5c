//! Logging configuration using tracing

use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

/// Environment variable that overrides the log filter
pub const LOG_ENV: &str = "IDEVHUB_LOG";

/// Filter used when `IDEVHUB_LOG` is unset
pub const DEFAULT_FILTER: &str =
    "idevhub=info,idevhub_core=info,idevhub_native=info,idevhub_app=info,warn";

/// Initialize the logging subsystem
///
/// Logs are written to `~/.local/share/idevhub/logs/` (platform data dir).
/// Log level is controlled by the `IDEVHUB_LOG` environment variable.
///
/// # Examples
/// ```bash
/// IDEVHUB_LOG=debug idevhub track
/// IDEVHUB_LOG=idevhub_app=trace idevhub log <UDID>
/// ```
pub fn init() -> Result<()> {
    let log_dir = get_log_directory()?;
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "idevhub.log");

    // Default to info for our crates, allow override via IDEVHUB_LOG
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .init();

    tracing::info!("idevhub starting, log directory: {}", log_dir.display());

    Ok(())
}

/// Get the log directory path
fn get_log_directory() -> Result<PathBuf> {
    let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    Ok(base.join("idevhub").join("logs"))
}

/// Get the log file path for the current day
pub fn get_current_log_file() -> Result<PathBuf> {
    let dir = get_log_directory()?;
    Ok(dir.join("idevhub.log"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_lives_under_idevhub_dir() {
        let path = get_current_log_file().unwrap();
        assert!(path.ends_with("idevhub/logs/idevhub.log"));
    }

    #[test]
    fn test_default_filter_covers_every_crate() {
        let directives: Vec<&str> = DEFAULT_FILTER.split(',').collect();
        for target in ["idevhub", "idevhub_core", "idevhub_native", "idevhub_app"] {
            assert!(directives.contains(&format!("{}=info", target).as_str()));
        }
        assert!(DEFAULT_FILTER.parse::<EnvFilter>().is_ok());
    }
}
