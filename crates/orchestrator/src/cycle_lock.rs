use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Process-wide single-flight lock for decision cycles.
///
/// Triggers use [`CycleLock::try_acquire`] and are rejected while a cycle is
/// active. Close-all uses [`CycleLock::acquire`] and waits its turn.
#[derive(Clone, Default)]
pub struct CycleLock {
    inner: Arc<Mutex<()>>,
}

/// Held for the lifetime of one cycle; dropping it releases the lock.
pub struct CycleGuard {
    _guard: OwnedMutexGuard<()>,
}

impl CycleLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking acquire. `None` when another cycle is in progress.
    #[must_use]
    pub fn try_acquire(&self) -> Option<CycleGuard> {
        Arc::clone(&self.inner)
            .try_lock_owned()
            .ok()
            .map(|guard| CycleGuard { _guard: guard })
    }

    /// Waits until the active cycle, if any, has finished.
    pub async fn acquire(&self) -> CycleGuard {
        CycleGuard {
            _guard: Arc::clone(&self.inner).lock_owned().await,
        }
    }

    #[must_use]
    pub fn is_held(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}
