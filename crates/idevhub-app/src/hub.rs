//! The device hub: one-shot queries and subscriptions over a shared capability
//!
//! [`DeviceHub`] is cheap to clone; clones share the capability slot, the pump
//! reference count and the event bus.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use idevhub_core::prelude::*;
use idevhub_core::{DeviceSnapshot, LogMessage};
use idevhub_native::{Capability, CapabilityLoader, LogSink};

use crate::bundle::BundleValidator;
use crate::bus::EventBus;
use crate::config::Settings;
use crate::provider::CapabilityProvider;
use crate::scheduler::PollScheduler;
use crate::subscription::{gated, Subscription, SubscriptionKind, SubscriptionState, Teardown};

type Callback<T> = Arc<dyn Fn(Result<T>) + Send + Sync>;

struct HubInner<L: CapabilityLoader> {
    provider: CapabilityProvider<L>,
    scheduler: PollScheduler,
    bundles: BundleValidator,
}

/// Coordinates device access for any number of subscribers
pub struct DeviceHub<L: CapabilityLoader> {
    inner: Arc<HubInner<L>>,
}

impl<L: CapabilityLoader> Clone for DeviceHub<L> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<L: CapabilityLoader> std::fmt::Debug for DeviceHub<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHub")
            .field("provider", &self.inner.provider)
            .field("scheduler", &self.inner.scheduler)
            .finish()
    }
}

impl<L: CapabilityLoader> DeviceHub<L> {
    /// Hub with default settings
    pub fn new(loader: L) -> Self {
        Self::with_settings(loader, &Settings::default())
    }

    pub fn with_settings(loader: L, settings: &Settings) -> Self {
        Self {
            inner: Arc::new(HubInner {
                provider: CapabilityProvider::new(loader, EventBus::new()),
                scheduler: PollScheduler::new(settings.poll.interval()),
                bundles: BundleValidator::from(&settings.bundle),
            }),
        }
    }

    // ─────────────────────────────────────────────────────────
    // One-shot queries
    // ─────────────────────────────────────────────────────────

    /// Currently attached devices
    ///
    /// Loads the capability if needed and pumps it once. Does not start
    /// periodic polling.
    pub async fn list_devices(&self) -> Result<DeviceSnapshot> {
        let capability = self.inner.provider.acquire().await?;
        self.inner.scheduler.tick_once(capability.as_ref()).await;
        Ok(capability.devices())
    }

    /// Install the app bundle at `bundle` on device `udid`
    ///
    /// The bundle is validated before the capability is touched, so an invalid
    /// path fails with [`Error::InvalidBundle`] without loading anything.
    /// Installer failures surface as [`Error::Device`] with the native message.
    pub async fn install_app(&self, udid: &str, bundle: impl AsRef<Path>) -> Result<()> {
        let bundle = self.inner.bundles.validate(bundle.as_ref())?;

        let capability = self.inner.provider.acquire().await?;
        self.inner.scheduler.tick_once(capability.as_ref()).await;

        info!("Installing {} on {}", bundle.display(), udid);
        capability.install_app(udid, &bundle).await
    }

    // ─────────────────────────────────────────────────────────
    // Subscriptions
    // ─────────────────────────────────────────────────────────

    /// Watch the device list
    ///
    /// Once active, `on_change` first receives the current snapshot and then
    /// every change. If the capability cannot be loaded, `on_change` receives
    /// that error once and the subscription ends. Must be called within a
    /// Tokio runtime.
    pub fn track_devices<F>(&self, on_change: F) -> Subscription
    where
        F: Fn(Result<DeviceSnapshot>) + Send + Sync + 'static,
    {
        let state = SubscriptionState::new(SubscriptionKind::DeviceList);
        let callback: Callback<DeviceSnapshot> = Arc::new(on_change);

        let hub = self.clone();
        let task_state = state.clone();
        tokio::spawn(async move { hub.activate_device_list(task_state, callback).await });

        Subscription::new(state)
    }

    /// Forward log lines from device `udid`
    ///
    /// If the capability cannot be loaded or the device refuses the stream,
    /// `on_message` receives that error once and the subscription ends. Must be
    /// called within a Tokio runtime.
    pub fn stream_logs<F>(&self, udid: impl Into<String>, on_message: F) -> Subscription
    where
        F: Fn(Result<LogMessage>) + Send + Sync + 'static,
    {
        let udid = udid.into();
        let state = SubscriptionState::new(SubscriptionKind::LogStream { udid: udid.clone() });
        let callback: Callback<LogMessage> = Arc::new(on_message);

        let hub = self.clone();
        let task_state = state.clone();
        tokio::spawn(async move { hub.activate_log_stream(task_state, udid, callback).await });

        Subscription::new(state)
    }

    async fn activate_device_list(
        self,
        state: Arc<SubscriptionState>,
        callback: Callback<DeviceSnapshot>,
    ) {
        let capability = match self.inner.provider.acquire().await {
            Ok(capability) => capability,
            Err(e) => return report_failure(&state, &callback, e),
        };

        if state.is_stopped() {
            debug!("{} stopped before activation", state.kind());
            return;
        }

        // Seed from a completed tick so the first delivery shows what is attached
        self.inner.scheduler.tick_once(capability.as_ref()).await;

        let activated = state.activate(|| {
            let deliver = gated(state.stop_flag(), callback.clone());
            let seed_source = capability.clone();
            let listener = self
                .inner
                .provider
                .bus()
                .subscribe_seeded(move || seed_source.devices(), deliver);

            self.inner.scheduler.enable(&capability);

            let scheduler = self.inner.scheduler.clone();
            Ok(Box::new(move || {
                listener.unsubscribe();
                scheduler.disable();
            }) as Teardown)
        });

        if let Err(e) = activated {
            callback(Err(e));
        }
    }

    async fn activate_log_stream(
        self,
        state: Arc<SubscriptionState>,
        udid: String,
        callback: Callback<LogMessage>,
    ) {
        let capability = match self.inner.provider.acquire().await {
            Ok(capability) => capability,
            Err(e) => return report_failure(&state, &callback, e),
        };

        let activated = state.activate(|| {
            let sink: LogSink = Arc::new(gated(state.stop_flag(), callback.clone()));
            let stream = capability.stream_logs(&udid, sink)?;

            self.inner.scheduler.enable(&capability);

            let scheduler = self.inner.scheduler.clone();
            let capability = capability.clone();
            Ok(Box::new(move || {
                capability.stop_logs(stream);
                scheduler.disable();
            }) as Teardown)
        });

        if let Err(e) = activated {
            warn!("Log stream for {} failed to start: {}", udid, e);
            callback(Err(e));
        }
    }

    // ─────────────────────────────────────────────────────────
    // Tuning and introspection
    // ─────────────────────────────────────────────────────────

    pub fn poll_interval(&self) -> Duration {
        self.inner.scheduler.interval()
    }

    /// Change the pump interval; applies from the next wait onward
    pub fn set_poll_interval(&self, interval: Duration) {
        self.inner.scheduler.set_interval(interval);
    }

    /// Active subscriptions currently holding the pump
    pub fn ref_count(&self) -> usize {
        self.inner.scheduler.ref_count()
    }

    pub fn is_polling(&self) -> bool {
        self.inner.scheduler.is_running()
    }

    pub fn is_capability_ready(&self) -> bool {
        self.inner.provider.is_ready()
    }
}

fn report_failure<T>(state: &SubscriptionState, callback: &Callback<T>, error: Error) {
    if state.fail() {
        warn!("{} subscription failed: {}", state.kind(), error);
        callback(Err(error));
    } else {
        debug!("{} stopped before acquisition failed: {}", state.kind(), error);
    }
}
