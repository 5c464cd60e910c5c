//! Subscription handles and their lifecycle
//!
//! A subscription moves through three phases:
//!
//! - **Initializing**: waiting for the capability
//! - **Active**: pump demand raised, events flowing
//! - **Stopped**: torn down, never delivers again
//!
//! Stopping is idempotent and may happen in any phase. Stopping an
//! initializing subscription means activation never happens, so the pump
//! demand is never raised for it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use idevhub_core::prelude::*;

/// What a subscription is watching
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionKind {
    DeviceList,
    LogStream { udid: String },
}

impl std::fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionKind::DeviceList => write!(f, "device list"),
            SubscriptionKind::LogStream { udid } => write!(f, "log stream for {}", udid),
        }
    }
}

/// Undoes everything activation did
pub(crate) type Teardown = Box<dyn FnOnce() + Send>;

enum Phase {
    Initializing,
    Active(Teardown),
    Stopped,
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Phase::Initializing => "initializing",
            Phase::Active(_) => "active",
            Phase::Stopped => "stopped",
        }
    }
}

/// Shared between the handle and the activation task
pub(crate) struct SubscriptionState {
    kind: SubscriptionKind,
    phase: Mutex<Phase>,
    stopped: Arc<AtomicBool>,
}

impl SubscriptionState {
    pub(crate) fn new(kind: SubscriptionKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            phase: Mutex::new(Phase::Initializing),
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn kind(&self) -> &SubscriptionKind {
        &self.kind
    }

    /// Flag that delivery paths check right before invoking a callback
    pub(crate) fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stopped.clone()
    }

    /// Move from initializing to active by running `start`
    ///
    /// `start` runs under the phase lock, so a concurrent stop either happens
    /// before it (and `start` never runs) or waits and then tears down what it
    /// set up. Returns `Ok(false)` if the subscription was already stopped. If
    /// `start` fails the subscription ends up stopped with nothing to undo.
    pub(crate) fn activate<F>(&self, start: F) -> Result<bool>
    where
        F: FnOnce() -> Result<Teardown>,
    {
        let mut phase = self.lock();
        if !matches!(*phase, Phase::Initializing) {
            debug!("{} stopped before activation", self.kind);
            return Ok(false);
        }

        match start() {
            Ok(teardown) => {
                *phase = Phase::Active(teardown);
                debug!("{} subscription active", self.kind);
                Ok(true)
            }
            Err(e) => {
                *phase = Phase::Stopped;
                self.stopped.store(true, Ordering::Release);
                Err(e)
            }
        }
    }

    /// End an initializing subscription after a failed acquisition
    ///
    /// Returns true if the caller should report the failure, i.e. the
    /// subscription had not been stopped already.
    pub(crate) fn fail(&self) -> bool {
        let mut phase = self.lock();
        if !matches!(*phase, Phase::Initializing) {
            return false;
        }
        *phase = Phase::Stopped;
        self.stopped.store(true, Ordering::Release);
        true
    }

    /// Returns true if this call did the stopping
    pub(crate) fn stop(&self) -> bool {
        // Flip the flag first so deliveries already in flight are suppressed
        self.stopped.store(true, Ordering::Release);

        let previous = std::mem::replace(&mut *self.lock(), Phase::Stopped);
        match previous {
            Phase::Active(teardown) => {
                teardown();
                debug!("{} subscription stopped", self.kind);
                true
            }
            Phase::Initializing => {
                debug!("{} subscription stopped while initializing", self.kind);
                true
            }
            Phase::Stopped => false,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        matches!(*self.lock(), Phase::Active(_))
    }

    pub(crate) fn is_stopped(&self) -> bool {
        matches!(*self.lock(), Phase::Stopped)
    }

    fn phase_name(&self) -> &'static str {
        self.lock().name()
    }
}

/// Wrap `callback` so it is skipped once `stopped` is set
pub(crate) fn gated<T, F>(stopped: Arc<AtomicBool>, callback: Arc<F>) -> impl Fn(T) + Send + Sync
where
    F: Fn(Result<T>) + Send + Sync + ?Sized,
{
    move |event: T| {
        if !stopped.load(Ordering::Acquire) {
            callback(Ok(event));
        }
    }
}

/// Handle to a live device-list or log-stream subscription
///
/// Dropping the handle stops the subscription; keep it for as long as events
/// are wanted.
#[must_use = "dropping a Subscription stops it"]
pub struct Subscription {
    state: Arc<SubscriptionState>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", self.state.kind())
            .field("phase", &self.state.phase_name())
            .finish()
    }
}

impl Subscription {
    pub(crate) fn new(state: Arc<SubscriptionState>) -> Self {
        Self { state }
    }

    pub fn kind(&self) -> &SubscriptionKind {
        self.state.kind()
    }

    /// Stop the subscription
    ///
    /// Safe to call repeatedly. No callback runs after this returns, even for
    /// an event that was already queued.
    pub fn stop(&self) {
        self.state.stop();
    }

    /// True once the subscription is receiving events
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn is_stopped(&self) -> bool {
        self.state.is_stopped()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.state.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_teardown(counter: &Arc<AtomicUsize>) -> Teardown {
        let counter = counter.clone();
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_activate_then_stop_runs_teardown_once() {
        let state = SubscriptionState::new(SubscriptionKind::DeviceList);
        let teardowns = Arc::new(AtomicUsize::new(0));

        let activated = state.activate(|| Ok(counting_teardown(&teardowns)));
        assert!(activated.unwrap());
        assert!(state.is_active());

        assert!(state.stop());
        assert!(!state.stop());
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
        assert!(state.is_stopped());
    }

    #[test]
    fn test_stop_while_initializing_skips_activation() {
        let state = SubscriptionState::new(SubscriptionKind::DeviceList);
        state.stop();

        let mut started = false;
        let activated = state.activate(|| {
            started = true;
            Ok(Box::new(|| {}) as Teardown)
        });

        assert!(!activated.unwrap());
        assert!(!started);
        assert!(state.is_stopped());
    }

    #[test]
    fn test_failed_start_stops_subscription() {
        let state = SubscriptionState::new(SubscriptionKind::LogStream {
            udid: "abc".to_string(),
        });

        let err = state
            .activate(|| Err(Error::device("No such device")))
            .unwrap_err();
        assert_eq!(err.to_string(), "No such device");
        assert!(state.is_stopped());
        assert!(state.stop_flag().load(Ordering::SeqCst));
        assert!(!state.stop());
    }

    #[test]
    fn test_fail_reports_only_when_initializing() {
        let state = SubscriptionState::new(SubscriptionKind::DeviceList);
        assert!(state.fail());
        assert!(!state.fail());

        let stopped_first = SubscriptionState::new(SubscriptionKind::DeviceList);
        stopped_first.stop();
        assert!(!stopped_first.fail());
    }

    #[test]
    fn test_gated_callback_respects_stop_flag() {
        let state = SubscriptionState::new(SubscriptionKind::DeviceList);
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        let callback = Arc::new(move |event: Result<u32>| {
            assert!(event.is_ok());
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

        let deliver = gated(state.stop_flag(), callback);
        deliver(1);
        state.stop();
        deliver(2);

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropping_handle_stops() {
        let state = SubscriptionState::new(SubscriptionKind::DeviceList);
        let teardowns = Arc::new(AtomicUsize::new(0));
        state
            .activate(|| Ok(counting_teardown(&teardowns)))
            .unwrap();

        let handle = Subscription::new(state.clone());
        handle.stop();
        drop(handle);

        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
        assert!(state.is_stopped());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(SubscriptionKind::DeviceList.to_string(), "device list");
        let kind = SubscriptionKind::LogStream {
            udid: "abc".to_string(),
        };
        assert_eq!(kind.to_string(), "log stream for abc");
    }
}
