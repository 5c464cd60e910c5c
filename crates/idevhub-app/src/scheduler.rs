//! Reference-counted run-loop pump
//!
//! The capability only makes progress while something ticks it. The scheduler
//! keeps one periodic tick task alive for as long as at least one subscription
//! asks for it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use idevhub_core::prelude::*;
use idevhub_native::Capability;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default delay between the end of one tick and the start of the next
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Runtime-adjustable poll interval shared with the tick task
#[derive(Debug, Clone)]
pub struct PollInterval(Arc<AtomicU64>);

impl PollInterval {
    pub fn new(interval: Duration) -> Self {
        Self(Arc::new(AtomicU64::new(as_micros(interval))))
    }

    pub fn get(&self) -> Duration {
        Duration::from_micros(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, interval: Duration) {
        self.0.store(as_micros(interval), Ordering::Relaxed);
    }
}

impl Default for PollInterval {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

fn as_micros(interval: Duration) -> u64 {
    u64::try_from(interval.as_micros()).unwrap_or(u64::MAX)
}

struct Pump {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct PumpState {
    refs: usize,
    pump: Option<Pump>,
}

struct SchedulerInner {
    interval: PollInterval,
    state: Mutex<PumpState>,
    /// Held for the duration of every tick, periodic or one-off
    tick_gate: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(pump) = state.pump.take() {
            pump.cancel.cancel();
        }
    }
}

/// Starts and stops the periodic tick based on a reference count
#[derive(Clone)]
pub struct PollScheduler {
    inner: Arc<SchedulerInner>,
}

impl std::fmt::Debug for PollScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollScheduler")
            .field("interval", &self.interval())
            .field("refs", &self.ref_count())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Default for PollScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl PollScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                interval: PollInterval::new(interval),
                state: Mutex::new(PumpState::default()),
                tick_gate: Arc::new(tokio::sync::Mutex::new(())),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PumpState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval.get()
    }

    /// Change the interval; applies from the next wait onward
    pub fn set_interval(&self, interval: Duration) {
        debug!("Poll interval set to {:?}", interval);
        self.inner.interval.set(interval);
    }

    pub fn ref_count(&self) -> usize {
        self.lock().refs
    }

    pub fn is_running(&self) -> bool {
        self.lock().pump.is_some()
    }

    /// Add one unit of demand; the first one starts ticking `capability`
    ///
    /// The first tick runs immediately. Must be called within a Tokio runtime.
    /// Returns the new count.
    pub fn enable<C>(&self, capability: &Arc<C>) -> usize
    where
        C: Capability + Sync + 'static,
    {
        let mut state = self.lock();
        state.refs += 1;

        if state.pump.is_none() {
            info!("Starting run-loop pump");
            let cancel = CancellationToken::new();
            let task = tokio::spawn(run_pump(
                capability.clone(),
                self.inner.interval.clone(),
                self.inner.tick_gate.clone(),
                cancel.clone(),
            ));
            state.pump = Some(Pump { cancel, task });
        }

        debug!("Pump demand raised to {}", state.refs);
        state.refs
    }

    /// Remove one unit of demand; the last one stops the tick task
    ///
    /// Never drops below zero. Returns the new count.
    pub fn disable(&self) -> usize {
        let mut state = self.lock();

        if state.refs == 0 {
            debug!("Pump demand already zero, ignoring disable");
            return 0;
        }

        state.refs -= 1;
        debug!("Pump demand lowered to {}", state.refs);

        if state.refs == 0 {
            if let Some(pump) = state.pump.take() {
                info!("Stopping run-loop pump");
                pump.cancel.cancel();
                drop(pump.task);
            }
        }

        state.refs
    }

    /// Run a single tick outside the periodic schedule
    ///
    /// Waits for an in-flight periodic tick so the two never overlap.
    pub async fn tick_once<C>(&self, capability: &C)
    where
        C: Capability + Sync,
    {
        let _gate = self.inner.tick_gate.lock().await;
        capability.tick().await;
    }
}

async fn run_pump<C>(
    capability: Arc<C>,
    interval: PollInterval,
    tick_gate: Arc<tokio::sync::Mutex<()>>,
    cancel: CancellationToken,
) where
    C: Capability + Sync + 'static,
{
    loop {
        {
            let _gate = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                gate = tick_gate.lock() => gate,
            };
            capability.tick().await;
        }

        // Measured from the end of the tick, read fresh for every wait
        let wait = interval.get();
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(wait) => {}
        }
    }

    debug!("Run-loop pump exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use idevhub_native::test_utils::FakeCapability;

    fn shared_fake() -> (FakeCapability, Arc<FakeCapability>) {
        let fake = FakeCapability::new();
        (fake.clone(), Arc::new(fake))
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_is_immediate() {
        let (fake, capability) = shared_fake();
        let scheduler = PollScheduler::new(Duration::from_secs(60));

        scheduler.enable(&capability);
        tokio::task::yield_now().await;

        assert_eq!(fake.tick_count(), 1);
        scheduler.disable();
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_follow_interval() {
        let (fake, capability) = shared_fake();
        let scheduler = PollScheduler::new(Duration::from_millis(10));

        scheduler.enable(&capability);
        tokio::time::sleep(Duration::from_millis(35)).await;

        // t=0, 10, 20, 30
        assert_eq!(fake.tick_count(), 4);
        scheduler.disable();
    }

    #[tokio::test(start_paused = true)]
    async fn test_ref_count_controls_pump() {
        let (_fake, capability) = shared_fake();
        let scheduler = PollScheduler::default();

        assert_eq!(scheduler.enable(&capability), 1);
        assert_eq!(scheduler.enable(&capability), 2);
        assert!(scheduler.is_running());

        assert_eq!(scheduler.disable(), 1);
        assert!(scheduler.is_running());

        assert_eq!(scheduler.disable(), 0);
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_excess_disable_floors_at_zero() {
        let (_fake, capability) = shared_fake();
        let scheduler = PollScheduler::default();

        assert_eq!(scheduler.disable(), 0);
        scheduler.enable(&capability);
        scheduler.disable();
        assert_eq!(scheduler.disable(), 0);
        assert_eq!(scheduler.ref_count(), 0);
        assert!(!scheduler.is_running());

        // Still restartable afterwards
        assert_eq!(scheduler.enable(&capability), 1);
        assert!(scheduler.is_running());
        scheduler.disable();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ticks_after_stop() {
        let (fake, capability) = shared_fake();
        let scheduler = PollScheduler::new(Duration::from_millis(10));

        scheduler.enable(&capability);
        tokio::time::sleep(Duration::from_millis(25)).await;
        scheduler.disable();

        let ticks = fake.tick_count();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fake.tick_count(), ticks);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_change_applies_to_next_wait() {
        let (fake, capability) = shared_fake();
        let scheduler = PollScheduler::new(Duration::from_millis(10));

        scheduler.enable(&capability);
        tokio::task::yield_now().await;
        assert_eq!(fake.tick_count(), 1);

        // The wait already in progress keeps its 10ms
        scheduler.set_interval(Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(fake.tick_count(), 2);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fake.tick_count(), 2);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fake.tick_count(), 3);
        scheduler.disable();
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_once_does_not_touch_ref_count() {
        let (fake, capability) = shared_fake();
        let scheduler = PollScheduler::default();

        scheduler.tick_once(capability.as_ref()).await;

        assert_eq!(fake.tick_count(), 1);
        assert_eq!(scheduler.ref_count(), 0);
        assert!(!scheduler.is_running());
    }

    #[test]
    fn test_poll_interval_roundtrip() {
        let interval = PollInterval::default();
        assert_eq!(interval.get(), DEFAULT_POLL_INTERVAL);
        interval.set(Duration::from_millis(250));
        assert_eq!(interval.get(), Duration::from_millis(250));
    }
}
