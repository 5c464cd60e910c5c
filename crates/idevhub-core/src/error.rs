//! Hub error types with rich context

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Hub error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Capability Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Device capability not supported: {reason}")]
    Unsupported { reason: String },

    #[error("Failed to initialize device capability: {message}")]
    Init { message: String },

    /// Native-layer failure; the message is passed through untouched.
    #[error("{message}")]
    Device { message: String },

    #[error("Required tool not found: {tool}")]
    ToolNotFound { tool: String },

    #[error("Device tool process error: {message}")]
    Process { message: String },

    // ─────────────────────────────────────────────────────────────
    // Caller Input Errors
    // ─────────────────────────────────────────────────────────────
    #[error("{reason}: {path}")]
    InvalidBundle { path: PathBuf, reason: String },

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self::Unsupported {
            reason: reason.into(),
        }
    }

    pub fn init(message: impl Into<String>) -> Self {
        Self::Init {
            message: message.into(),
        }
    }

    pub fn device(message: impl Into<String>) -> Self {
        Self::Device {
            message: message.into(),
        }
    }

    pub fn tool_not_found(tool: impl Into<String>) -> Self {
        Self::ToolNotFound { tool: tool.into() }
    }

    pub fn process(message: impl Into<String>) -> Self {
        Self::Process {
            message: message.into(),
        }
    }

    pub fn invalid_bundle(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidBundle {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Rebuild an owned copy of a capability acquisition failure.
    ///
    /// A single failed acquisition is shared by every caller that was waiting
    /// on it, so each waiter gets its own value. Anything that is not already
    /// `Unsupported` or `Init` is reported as `Init`.
    pub fn replay(&self) -> Self {
        match self {
            Error::Unsupported { reason } => Error::unsupported(reason.clone()),
            Error::Init { message } => Error::init(message.clone()),
            Error::ToolNotFound { tool } => Error::unsupported(format!("{} is not installed", tool)),
            other => Error::init(other.to_string()),
        }
    }

    /// Check if this error should terminate the command that raised it
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Unsupported { .. } | Error::ToolNotFound { .. })
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Log a failure with a short description of what was being attempted
///
/// The error itself is propagated unchanged, so callers can still match on
/// its variant.
pub trait ResultExt<T> {
    fn context(self, doing: impl Into<String>) -> Result<T>;

    /// Like [`ResultExt::context`], building the description only on failure
    fn with_context<F>(self, doing: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, doing: impl Into<String>) -> Result<T> {
        self.with_context(|| doing.into())
    }

    fn with_context<F>(self, doing: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::warn!("{} failed: {}", doing(), err);
            err
        })
    }
}
