//! Per-guest locking for message processing.
//!
//! One message per guest is processed at a time; different guests proceed in
//! parallel. An optional global semaphore caps total in-flight work. The
//! guard must be dropped before any slow external call: holding it across
//! the answer service or payment processor would queue a guest's whole
//! conversation behind the network.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

pub struct SessionLocks {
    locks: Arc<Mutex<HashMap<String, Arc<Semaphore>>>>,
    global: Option<Arc<Semaphore>>,
}

pub struct SessionGuard {
    _guest_permit: OwnedSemaphorePermit,
    _global_permit: Option<OwnedSemaphorePermit>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self {
            locks: Arc::new(Mutex::new(HashMap::new())),
            global: None,
        }
    }

    /// Additionally cap concurrent holders across all guests.
    pub fn with_global_limit(max_concurrent: usize) -> Self {
        Self {
            locks: Arc::new(Mutex::new(HashMap::new())),
            global: Some(Arc::new(Semaphore::new(max_concurrent.max(1)))),
        }
    }

    async fn guest_semaphore(&self, guest_id: &str) -> Arc<Semaphore> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(guest_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone()
    }

    /// Wait for exclusive access to one guest's session.
    pub async fn acquire(&self, guest_id: &str) -> SessionGuard {
        let global = match &self.global {
            Some(sem) => Some(
                sem.clone()
                    .acquire_owned()
                    .await
                    .expect("semaphore closed"),
            ),
            None => None,
        };
        let sem = self.guest_semaphore(guest_id).await;
        let permit = sem.acquire_owned().await.expect("semaphore closed");
        SessionGuard {
            _guest_permit: permit,
            _global_permit: global,
        }
    }

    /// Non-blocking acquire; `None` when the guest is busy or the global
    /// limit is exhausted. The eviction sweep uses this to skip guests with
    /// in-flight work.
    pub async fn try_acquire(&self, guest_id: &str) -> Option<SessionGuard> {
        let global = match &self.global {
            Some(sem) => match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => return None,
            },
            None => None,
        };
        let sem = self.guest_semaphore(guest_id).await;
        match sem.try_acquire_owned() {
            Ok(permit) => Some(SessionGuard {
                _guest_permit: permit,
                _global_permit: global,
            }),
            Err(_) => None,
        }
    }

    /// Drop semaphores nobody currently holds. Returns how many were
    /// removed.
    pub async fn cleanup_unused(&self) -> usize {
        let mut locks = self.locks.lock().await;
        let before = locks.len();
        locks.retain(|_, sem| sem.available_permits() < 1);
        before - locks.len()
    }
}

impl Default for SessionLocks {
    fn default() -> Self {
        Self::new()
    }
}
