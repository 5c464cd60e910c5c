//! Device-change event bus
//!
//! Fans device snapshots out to every listener through a
//! `tokio::sync::broadcast` channel. Each listener is drained by its own task,
//! so a slow handler never holds up the producer or the other listeners.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use idevhub_core::prelude::*;
use idevhub_core::DeviceSnapshot;
use idevhub_native::ChangeEmitter;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

/// Snapshots a listener may fall behind by before older ones are dropped
pub const BUS_CAPACITY: usize = 64;

/// Broadcasts device snapshots to registered listeners
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DeviceSnapshot>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Deliver `snapshot` to every listener; returns how many were reached
    pub fn publish(&self, snapshot: DeviceSnapshot) -> usize {
        match self.tx.send(snapshot) {
            Ok(receivers) => receivers,
            Err(_) => {
                trace!("Device change published with no listeners");
                0
            }
        }
    }

    /// An emitter that publishes onto this bus, for [`Capability::set_emitter`]
    ///
    /// [`Capability::set_emitter`]: idevhub_native::Capability::set_emitter
    pub fn emitter(&self) -> ChangeEmitter {
        let bus = self.clone();
        Arc::new(move |snapshot: DeviceSnapshot| {
            bus.publish(snapshot);
        })
    }

    /// Register `handler` for every snapshot published from now on
    ///
    /// Must be called within a Tokio runtime.
    pub fn subscribe<F>(&self, handler: F) -> Listener
    where
        F: Fn(DeviceSnapshot) + Send + 'static,
    {
        self.listen(None, handler)
    }

    /// Like [`subscribe`](Self::subscribe), but `seed` is delivered first
    ///
    /// The listener is registered before `seed` runs, so a change published
    /// while the seed is being computed is still delivered after it.
    pub fn subscribe_seeded<S, F>(&self, seed: S, handler: F) -> Listener
    where
        S: FnOnce() -> DeviceSnapshot,
        F: Fn(DeviceSnapshot) + Send + 'static,
    {
        let rx = self.tx.subscribe();
        let initial = seed();
        self.spawn_listener(rx, Some(initial), handler)
    }

    fn listen<F>(&self, seed: Option<DeviceSnapshot>, handler: F) -> Listener
    where
        F: Fn(DeviceSnapshot) + Send + 'static,
    {
        let rx = self.tx.subscribe();
        self.spawn_listener(rx, seed, handler)
    }

    fn spawn_listener<F>(
        &self,
        rx: broadcast::Receiver<DeviceSnapshot>,
        seed: Option<DeviceSnapshot>,
        handler: F,
    ) -> Listener
    where
        F: Fn(DeviceSnapshot) + Send + 'static,
    {
        let stopped = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        tokio::spawn(deliver(
            rx,
            seed,
            handler,
            stopped.clone(),
            cancel.clone(),
        ));

        Listener { stopped, cancel }
    }
}

async fn deliver<F>(
    mut rx: broadcast::Receiver<DeviceSnapshot>,
    seed: Option<DeviceSnapshot>,
    handler: F,
    stopped: Arc<AtomicBool>,
    cancel: CancellationToken,
) where
    F: Fn(DeviceSnapshot),
{
    if let Some(snapshot) = seed {
        if stopped.load(Ordering::Acquire) {
            return;
        }
        handler(snapshot);
    }

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Ok(snapshot) => {
                    // Checked right before the call: an unsubscribe that raced
                    // with this receive still wins.
                    if stopped.load(Ordering::Acquire) {
                        break;
                    }
                    handler(snapshot);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Device listener lagged, skipped {} snapshot(s)", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    trace!("Device listener finished");
}

/// Registration handle returned by [`EventBus::subscribe`]
///
/// Dropping the listener unsubscribes it.
#[derive(Debug)]
pub struct Listener {
    stopped: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Listener {
    /// Stop delivery; safe to call any number of times
    ///
    /// Takes effect immediately: a snapshot already received by the listener
    /// task but not yet handed to the handler is dropped.
    pub fn unsubscribe(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            self.cancel.cancel();
            trace!("Device listener unsubscribed");
        }
    }

    pub fn is_subscribed(&self) -> bool {
        !self.stopped.load(Ordering::Acquire)
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
