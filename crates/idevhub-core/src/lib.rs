//! # idevhub-core - Core Domain Types
//!
//! Foundation crate for idevhub. Provides the device domain types, the error
//! taxonomy shared by every layer, and logging setup.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, chrono, thiserror, tracing).
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`Device`] - An attached device with its UDID and connection kind
//! - [`DeviceSnapshot`] - The device set at one point in time
//! - [`LogMessage`] - One syslog line from a device
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Error enum covering capability, bundle and config failures
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use idevhub_core::prelude::*;
//! ```

pub mod error;
pub mod logging;
pub mod prelude;
pub mod types;

// Re-export commonly used types at crate root for convenience
pub use error::{Error, Result, ResultExt};
pub use types::{Connection, Device, DeviceSnapshot, LogMessage};
