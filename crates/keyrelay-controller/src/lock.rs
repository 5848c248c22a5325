//! Lock shared by every component that touches the same bus handles.

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

/// Cloneable handle to one process-wide critical section.
///
/// Bus clients are single-owner resources. Every component that shares a
/// client gets a clone of the same `SharedLock` and holds it while using the
/// client outside of its own poll and commit calls.
#[derive(Clone, Default, Debug)]
pub struct SharedLock {
    inner: Arc<Mutex<()>>,
}

impl SharedLock {
    /// Create a new, unlocked handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the critical section.
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.inner.lock().await
    }

    /// Take the critical section if nobody holds it.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, ()>> {
        self.inner.try_lock().ok()
    }
}
