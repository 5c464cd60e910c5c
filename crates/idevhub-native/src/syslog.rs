//! Per-device log forwarding using `idevicesyslog`
//!
//! Each stream owns one `idevicesyslog -u <udid>` child. A reader task buffers
//! stdout lines; nothing reaches the sink until the capability's next tick
//! drains the buffer.

use std::path::Path;
use std::process::Stdio;

use idevhub_core::prelude::*;
use idevhub_core::LogMessage;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::capability::LogSink;

/// A running `idevicesyslog` child and its line buffer
pub struct SyslogStream {
    udid: String,
    sink: LogSink,
    lines: mpsc::UnboundedReceiver<String>,
    reader: JoinHandle<()>,
    /// Held so `kill_on_drop` reaps the child with the stream
    _child: Child,
}

impl std::fmt::Debug for SyslogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyslogStream")
            .field("udid", &self.udid)
            .field("reader_finished", &self.reader.is_finished())
            .finish()
    }
}

impl SyslogStream {
    /// Spawn `idevicesyslog` for one device
    pub fn spawn(tool: &Path, udid: &str, sink: LogSink) -> Result<Self> {
        info!("Starting log stream for {}", udid);

        let mut child = Command::new(tool)
            .args(["-u", udid])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::tool_not_found(tool.display().to_string())
                } else {
                    Error::device(format!("Failed to start log stream for {}: {}", udid, e))
                }
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::process("idevicesyslog stdout was not captured"))?;

        let (tx, lines) = mpsc::unbounded_channel();
        let reader = tokio::spawn(Self::read_lines(stdout, tx, udid.to_string()));

        Ok(Self {
            udid: udid.to_string(),
            sink,
            lines,
            reader,
            _child: child,
        })
    }

    async fn read_lines(stdout: ChildStdout, tx: mpsc::UnboundedSender<String>, udid: String) {
        let mut reader = BufReader::new(stdout).lines();
        loop {
            match reader.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("idevicesyslog for {} closed stdout", udid);
                    break;
                }
                Err(e) => {
                    warn!("Error reading idevicesyslog output for {}: {}", udid, e);
                    break;
                }
            }
        }
    }

    pub fn udid(&self) -> &str {
        &self.udid
    }

    pub fn sink(&self) -> LogSink {
        self.sink.clone()
    }

    /// Take every line buffered since the last call
    pub fn take_pending(&mut self) -> Vec<LogMessage> {
        let mut pending = Vec::new();
        while let Ok(line) = self.lines.try_recv() {
            pending.push(LogMessage::new(self.udid.clone(), line));
        }
        pending
    }
}

impl Drop for SyslogStream {
    fn drop(&mut self) {
        debug!("Stopping log stream for {}", self.udid);
        self.reader.abort();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn noop_sink() -> LogSink {
        Arc::new(|_msg: LogMessage| {})
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_lines_are_buffered_until_taken() {
        // `echo -u <udid>` stands in for idevicesyslog and prints its own arguments
        let mut stream = SyslogStream::spawn(Path::new("echo"), "abc", noop_sink()).unwrap();

        let mut pending = Vec::new();
        for _ in 0..100 {
            pending.extend(stream.take_pending());
            if !pending.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].udid, "abc");
        assert_eq!(pending[0].line, "-u abc");
        assert!(stream.take_pending().is_empty());
    }

    #[tokio::test]
    async fn test_spawn_missing_tool() {
        let err = SyslogStream::spawn(Path::new("/nonexistent/idevicesyslog"), "abc", noop_sink())
            .unwrap_err();
        assert!(matches!(err, Error::ToolNotFound { .. }));
    }
}
