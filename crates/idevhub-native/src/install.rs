//! App installation using `ideviceinstaller`

use std::path::Path;
use std::process::Stdio;

use idevhub_core::prelude::*;
use tokio::process::Command;

/// Install the bundle at `bundle` on `udid`
///
/// A failed install is reported as [`Error::Device`] carrying the tool's own
/// message. A missing installer is [`Error::Unsupported`].
pub async fn install_app(installer: &Path, udid: &str, bundle: &Path) -> Result<()> {
    info!("Installing {} on {}", bundle.display(), udid);

    let output = Command::new(installer)
        .args(["-u", udid, "-i"])
        .arg(bundle)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::unsupported(format!("{} is not installed", installer.display()))
            } else {
                Error::device(format!("Failed to run {}: {}", installer.display(), e))
            }
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    debug!("ideviceinstaller stdout: {}", stdout);

    if let Some(message) = failure_message(
        output.status.success(),
        output.status.code(),
        &stdout,
        &stderr,
    ) {
        warn!("Install on {} failed: {}", udid, message);
        return Err(Error::device(message));
    }

    info!("Installed {} on {}", bundle.display(), udid);
    Ok(())
}

/// Decide whether an install run failed, and with which message
///
/// `ideviceinstaller` sometimes exits 0 after printing `ERROR: ...`, so stdout
/// is checked even on success.
fn failure_message(success: bool, code: Option<i32>, stdout: &str, stderr: &str) -> Option<String> {
    let error_line = stdout
        .lines()
        .chain(stderr.lines())
        .map(str::trim)
        .find(|line| line.starts_with("ERROR"));

    if let Some(line) = error_line {
        return Some(line.to_string());
    }

    if success {
        return None;
    }

    let stderr = stderr.trim();
    let stdout = stdout.trim();
    Some(if !stderr.is_empty() {
        stderr.to_string()
    } else if !stdout.is_empty() {
        stdout.to_string()
    } else {
        format!("ideviceinstaller exited with code {:?}", code)
    })
}
