//! Handles returned to watchers

use super::registry::{SubscriptionKey, SubscriptionRegistry};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

/// Keeps a feed alive. Releasing is idempotent and also happens on drop.
pub struct SubscriptionGuard {
    registry: Arc<SubscriptionRegistry>,
    key: SubscriptionKey,
    generation: u64,
    released: AtomicBool,
}

impl SubscriptionGuard {
    pub(crate) fn new(registry: Arc<SubscriptionRegistry>, key: SubscriptionKey, generation: u64) -> Self {
        Self {
            registry,
            key,
            generation,
            released: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    pub fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.registry.release(&self.key, self.generation);
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// A live value plus the subscription that keeps it fresh.
pub struct Watched<T> {
    rx: watch::Receiver<T>,
    guard: SubscriptionGuard,
}

impl<T: Clone> Watched<T> {
    pub(crate) fn new(rx: watch::Receiver<T>, guard: SubscriptionGuard) -> Self {
        Self { rx, guard }
    }

    /// Latest value.
    pub fn get(&self) -> T {
        self.rx.borrow().clone()
    }

    /// Waits for the next change and returns the new value.
    /// `None` once the cache backing this watch is gone.
    pub async fn changed(&mut self) -> Option<T> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Waits until `predicate` holds for the current value.
    pub async fn wait_for(&mut self, predicate: impl FnMut(&T) -> bool) -> Option<T> {
        self.rx.wait_for(predicate).await.ok().map(|v| v.clone())
    }

    pub fn receiver(&self) -> watch::Receiver<T> {
        self.rx.clone()
    }

    pub fn key(&self) -> &SubscriptionKey {
        self.guard.key()
    }

    /// Stops watching. Calling it more than once is harmless.
    pub fn unsubscribe(&self) {
        self.guard.release();
    }

    pub fn is_unsubscribed(&self) -> bool {
        self.guard.is_released()
    }
}
