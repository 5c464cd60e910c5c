//! Lazy, single-flight capability acquisition
//!
//! The capability is loaded on first use. Callers that arrive while a load is
//! in flight wait on the same shared future instead of starting another one.
//! A successful load is kept for the provider's lifetime; a failed one is
//! forgotten so the next caller retries.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use idevhub_core::prelude::*;
use idevhub_native::{Capability, CapabilityLoader};

use crate::bus::EventBus;

type LoadOutcome<C> = std::result::Result<Arc<C>, Arc<Error>>;
type LoadFuture<C> = Shared<BoxFuture<'static, LoadOutcome<C>>>;

enum Slot<C> {
    Empty,
    Loading { attempt: u64, load: LoadFuture<C> },
    Ready(Arc<C>),
}

/// Owns the capability slot and wires new capabilities to the event bus
pub struct CapabilityProvider<L: CapabilityLoader> {
    loader: Arc<L>,
    bus: EventBus,
    slot: Mutex<Slot<L::Output>>,
    attempts: AtomicU64,
}

impl<L: CapabilityLoader> std::fmt::Debug for CapabilityProvider<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = match &*self.lock() {
            Slot::Empty => "empty",
            Slot::Loading { .. } => "loading",
            Slot::Ready(_) => "ready",
        };
        f.debug_struct("CapabilityProvider")
            .field("slot", &slot)
            .field("attempts", &self.attempts())
            .finish()
    }
}

impl<L: CapabilityLoader> CapabilityProvider<L> {
    pub fn new(loader: L, bus: EventBus) -> Self {
        Self {
            loader: Arc::new(loader),
            bus,
            slot: Mutex::new(Slot::Empty),
            attempts: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<L::Output>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Number of loads started so far
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn is_ready(&self) -> bool {
        matches!(&*self.lock(), Slot::Ready(_))
    }

    /// The capability, if a load has already succeeded
    pub fn get(&self) -> Option<Arc<L::Output>> {
        match &*self.lock() {
            Slot::Ready(capability) => Some(capability.clone()),
            _ => None,
        }
    }

    /// Resolve the capability, loading it if needed
    ///
    /// Fails with [`Error::Unsupported`] or [`Error::Init`]. Every caller
    /// waiting on the same load sees the same outcome.
    pub async fn acquire(&self) -> Result<Arc<L::Output>> {
        let (attempt, load) = {
            let mut slot = self.lock();
            match &*slot {
                Slot::Ready(capability) => return Ok(capability.clone()),
                Slot::Loading { attempt, load } => {
                    debug!("Joining in-flight capability load #{}", attempt);
                    (*attempt, load.clone())
                }
                Slot::Empty => {
                    let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    let load = self.start_load(attempt);
                    *slot = Slot::Loading {
                        attempt,
                        load: load.clone(),
                    };
                    (attempt, load)
                }
            }
        };

        let outcome = load.await;
        self.settle(attempt, &outcome);
        outcome.map_err(|e| e.replay())
    }

    fn start_load(&self, attempt: u64) -> LoadFuture<L::Output> {
        let loader = self.loader.clone();
        let bus = self.bus.clone();

        async move {
            info!("Loading device capability (attempt {})", attempt);
            match loader.load().await {
                Ok(capability) => {
                    capability.set_emitter(bus.emitter());
                    info!("Device capability ready");
                    Ok(Arc::new(capability))
                }
                Err(e) => {
                    warn!("Device capability load failed: {}", e);
                    Err(Arc::new(e))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Record the outcome of `attempt`, if it is still the pending one
    fn settle(&self, attempt: u64, outcome: &LoadOutcome<L::Output>) {
        let mut slot = self.lock();
        let pending =
            matches!(&*slot, Slot::Loading { attempt: current, .. } if *current == attempt);
        if !pending {
            return;
        }

        *slot = match outcome {
            Ok(capability) => Slot::Ready(capability.clone()),
            Err(_) => {
                debug!("Clearing failed capability load #{}", attempt);
                Slot::Empty
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idevhub_native::test_utils::{FakeCapability, FakeLoader};
    use std::time::Duration;

    fn provider(loader: FakeLoader) -> CapabilityProvider<FakeLoader> {
        CapabilityProvider::new(loader, EventBus::new())
    }

    #[tokio::test]
    async fn test_acquire_loads_once() {
        let loader = FakeLoader::new(FakeCapability::new());
        let provider = provider(loader.clone());

        let first = provider.acquire().await.unwrap();
        let second = provider.acquire().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loader.loads(), 1);
        assert!(provider.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquire_shares_one_load() {
        let loader = FakeLoader::new(FakeCapability::new()).with_delay(Duration::from_millis(50));
        let provider = provider(loader.clone());

        let (a, b, c) = tokio::join!(provider.acquire(), provider.acquire(), provider.acquire());

        assert_eq!(loader.loads(), 1);
        assert_eq!(provider.attempts(), 1);
        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
        assert!(Arc::ptr_eq(&a, &b) && Arc::ptr_eq(&b, &c));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_waiters_share_failure() {
        let loader = FakeLoader::new(FakeCapability::new()).with_delay(Duration::from_millis(50));
        loader.fail_next(Error::unsupported("no usbmuxd"));
        let provider = provider(loader.clone());

        let (a, b) = tokio::join!(provider.acquire(), provider.acquire());

        assert_eq!(loader.loads(), 1);
        for result in [a, b] {
            let err = result.unwrap_err();
            assert!(matches!(err, Error::Unsupported { ref reason } if reason == "no usbmuxd"));
        }
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let loader = FakeLoader::new(FakeCapability::new());
        loader.fail_next(Error::init("binding failed to load"));
        let provider = provider(loader.clone());

        let err = provider.acquire().await.unwrap_err();
        assert!(matches!(err, Error::Init { .. }));
        assert!(!provider.is_ready());
        assert!(provider.get().is_none());

        assert!(provider.acquire().await.is_ok());
        assert_eq!(loader.loads(), 2);
    }

    #[tokio::test]
    async fn test_other_load_errors_surface_as_init() {
        let loader = FakeLoader::new(FakeCapability::new());
        loader.fail_next(Error::process("usbmuxd crashed"));
        let provider = provider(loader);

        let err = provider.acquire().await.unwrap_err();
        assert!(matches!(err, Error::Init { .. }));
    }

    #[tokio::test]
    async fn test_emitter_wired_once() {
        let fake = FakeCapability::new();
        let provider = provider(FakeLoader::new(fake.clone()));

        provider.acquire().await.unwrap();
        provider.acquire().await.unwrap();

        assert_eq!(fake.emitters_set(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_waiter_does_not_strand_load() {
        let loader = FakeLoader::new(FakeCapability::new()).with_delay(Duration::from_millis(50));
        let provider = provider(loader.clone());

        // The first caller gives up before the load finishes
        let abandoned =
            tokio::time::timeout(Duration::from_millis(10), provider.acquire()).await;
        assert!(abandoned.is_err());

        assert!(provider.acquire().await.is_ok());
        assert_eq!(loader.loads(), 1);
    }
}
