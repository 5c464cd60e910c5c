//! Subcommand implementations for the `idevhub` binary

use std::path::Path;

use idevhub_app::config::{self, Settings};
use idevhub_app::{CliLoader, DeviceHub};
use idevhub_core::prelude::*;
use idevhub_core::DeviceSnapshot;
use tokio::sync::mpsc;

use crate::output::HubEvent;

/// Hub driving the libimobiledevice tools
pub type CliHub = DeviceHub<CliLoader>;

/// Build a hub from settings
pub fn build_hub(settings: &Settings) -> CliHub {
    DeviceHub::with_settings(CliLoader::new(settings.tools.cli_options()), settings)
}

/// Print the attached devices once
pub async fn list(hub: &CliHub, json: bool) -> Result<()> {
    let snapshot = hub.list_devices().await.context("Listing devices")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    if snapshot.is_empty() {
        eprintln!("No devices attached.");
        return Ok(());
    }

    print!("{}", format_table(&snapshot));
    Ok(())
}

fn format_table(snapshot: &DeviceSnapshot) -> String {
    let width = snapshot
        .udids()
        .map(str::len)
        .max()
        .unwrap_or(0)
        .max("UDID".len());

    let mut table = format!("{:<width$}  {:<10}  NAME\n", "UDID", "CONNECTION");
    for device in snapshot.devices() {
        table.push_str(&format!(
            "{:<width$}  {:<10}  {}\n",
            device.udid,
            device.connection.to_string(),
            device.display_name()
        ));
    }
    table
}

/// Stream device changes as NDJSON until Ctrl-C
pub async fn track(hub: &CliHub) -> Result<()> {
    let (fail_tx, fail_rx) = mpsc::unbounded_channel();

    let subscription = hub.track_devices(move |event| match event {
        Ok(snapshot) => HubEvent::devices_changed(&snapshot).emit(),
        Err(e) => {
            let _ = fail_tx.send(e);
        }
    });

    let result = wait_for_exit(fail_rx).await;
    subscription.stop();
    result
}

/// Stream one device's log lines as NDJSON until Ctrl-C
pub async fn log(hub: &CliHub, udid: &str) -> Result<()> {
    let (fail_tx, fail_rx) = mpsc::unbounded_channel();

    let subscription = hub.stream_logs(udid, move |event| match event {
        Ok(message) => HubEvent::log(&message).emit(),
        Err(e) => {
            let _ = fail_tx.send(e);
        }
    });

    let result = wait_for_exit(fail_rx).await;
    subscription.stop();
    result
}

async fn wait_for_exit(mut failures: mpsc::UnboundedReceiver<Error>) -> Result<()> {
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Interrupted, shutting down");
            Ok(())
        }
        Some(e) = failures.recv() => {
            HubEvent::error(e.to_string(), e.is_fatal()).emit();
            Err(e)
        }
    }
}

/// Validate and install an app bundle
pub async fn install(hub: &CliHub, udid: &str, app: &Path) -> Result<()> {
    hub.install_app(udid, app)
        .await
        .with_context(|| format!("Installing {} on {}", app.display(), udid))?;
    HubEvent::installed(udid, app).emit();
    Ok(())
}

/// Write the default config file under `dir`
pub fn init(dir: &Path) -> Result<()> {
    let path = config::init_config_dir(dir)
        .with_context(|| format!("Writing config under {}", dir.display()))?;
    eprintln!("Config file: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use idevhub_core::{Connection, Device};

    #[test]
    fn test_format_table_aligns_columns() {
        let snapshot = DeviceSnapshot::new(vec![
            Device::new("00008101-000123456789001E").with_name("iPhone"),
            Device::new("00008030-000A1B2C3D4E5F60").with_connection(Connection::Network),
        ]);

        let table = format_table(&snapshot);
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("UDID"));
        assert!(lines[1].contains("USB"));
        assert!(lines[1].ends_with("iPhone"));
        assert!(lines[2].contains("Network"));
        assert_eq!(lines[1].find("USB"), lines[2].find("Network"));
    }

    #[test]
    fn test_init_writes_config() {
        let temp = tempfile::tempdir().unwrap();
        init(temp.path()).unwrap();
        assert!(config::config_path(temp.path()).exists());
    }

    #[tokio::test]
    async fn test_install_rejects_missing_bundle() {
        let hub = build_hub(&Settings::default());
        let err = install(&hub, "abc", Path::new("/missing/Runner.app"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidBundle { .. }));
        assert!(!hub.is_capability_ready());
    }
}
