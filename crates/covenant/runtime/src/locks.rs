//! Per-session turn serialisation.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per session id.
///
/// A turn holds its session's guard from the first read of session state
/// until its commit has finished.
#[derive(Default)]
pub struct SessionLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(session_id.to_string())
            .or_default()
            .clone();
        mutex.lock_owned().await
    }

    /// Drop locks nobody holds or waits on.
    pub fn prune(&self) {
        self.locks.retain(|_, m| Arc::strong_count(m) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
