//! idevhub-app - Shared-polling coordination for device access
//!
//! Implements the [`DeviceHub`]: lazy single-flight capability loading, a
//! reference-counted run-loop pump, the device-change event bus, subscription
//! lifecycles, app bundle validation, and configuration loading.

pub mod bundle;
pub mod bus;
pub mod config;
pub mod hub;
pub mod provider;
pub mod scheduler;
pub mod subscription;

// Re-export primary types
pub use bundle::BundleValidator;
pub use bus::{EventBus, Listener};
pub use config::Settings;
pub use hub::DeviceHub;
pub use provider::CapabilityProvider;
pub use scheduler::{PollScheduler, DEFAULT_POLL_INTERVAL};
pub use subscription::{Subscription, SubscriptionKind};

// Re-export core and capability types for front ends
pub use idevhub_core::{Device, DeviceSnapshot, Error, LogMessage, Result};
pub use idevhub_native::{CliLoader, CliOptions};
