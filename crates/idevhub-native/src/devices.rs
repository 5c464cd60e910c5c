//! Device enumeration using `idevice_id` and `idevice_name`

use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use idevhub_core::prelude::*;
use idevhub_core::{Connection, Device};
use regex::Regex;
use tokio::process::Command;
use tokio::time::timeout;

/// Default timeout for one enumeration command
pub const ENUMERATE_TIMEOUT: Duration = Duration::from_secs(10);

/// One `idevice_id` output line: a UDID, optionally followed by `(USB)` or `(Network)`
static DEVICE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([0-9A-Za-z-]{20,})(?:\s+\((USB|Network)\))?\s*$")
        .expect("Invalid device line regex")
});

/// List attached devices (UDID and connection only)
pub async fn list_udids(idevice_id: &Path) -> Result<Vec<Device>> {
    let stdout = run_tool(idevice_id, &["-l"]).await?;
    Ok(parse_device_list(&stdout))
}

/// Look up a device's user-assigned name
pub async fn device_name(idevice_name: &Path, udid: &str) -> Result<Option<String>> {
    let stdout = run_tool(idevice_name, &["-u", udid]).await?;
    let name = stdout.lines().next().map(str::trim).unwrap_or_default();
    Ok((!name.is_empty()).then(|| name.to_string()))
}

/// Run a tool to completion and return its stdout
async fn run_tool(tool: &Path, args: &[&str]) -> Result<String> {
    let output = timeout(
        ENUMERATE_TIMEOUT,
        Command::new(tool)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| Error::process(format!("{} timed out", tool.display())))?
    .map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::tool_not_found(tool.display().to_string())
        } else {
            Error::process(format!("Failed to run {}: {}", tool.display(), e))
        }
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    trace!("{} {:?} stdout: {}", tool.display(), args, stdout);

    if !output.status.success() {
        return Err(Error::process(format!(
            "{} exited with code {:?}: {}",
            tool.display(),
            output.status.code(),
            stderr.trim()
        )));
    }

    Ok(stdout)
}

/// Parse the output of `idevice_id -l`
///
/// Lines that are not a UDID (blank lines, warnings) are skipped. A device
/// reachable over both USB and the network is listed once, preferring USB.
pub fn parse_device_list(output: &str) -> Vec<Device> {
    let mut devices: Vec<Device> = Vec::new();

    for line in output.lines() {
        let Some(caps) = DEVICE_LINE.captures(line) else {
            if !line.trim().is_empty() {
                debug!("Ignoring idevice_id line: {}", line);
            }
            continue;
        };

        let udid = caps[1].to_string();
        let connection = match caps.get(2).map(|m| m.as_str()) {
            Some("Network") => Connection::Network,
            _ => Connection::Usb,
        };

        match devices.iter_mut().find(|d| d.udid == udid) {
            Some(existing) => {
                if connection == Connection::Usb {
                    existing.connection = Connection::Usb;
                }
            }
            None => devices.push(Device::new(udid).with_connection(connection)),
        }
    }

    devices
}
