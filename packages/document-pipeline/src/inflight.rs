//! Per-process coordination for concurrent ingestions of the same document.
//!
//! This is a fast-path optimization only: cross-process correctness comes
//! from the store's unique url constraint and status-driven waiting. Within
//! one process the registry prevents double-processing of an id and lets
//! waiters be woken on completion instead of discovering it on the next
//! poll.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::types::DocumentId;

#[derive(Default)]
pub struct InflightRegistry {
    inner: Mutex<HashMap<DocumentId, Arc<Notify>>>,
}

impl InflightRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Take exclusive local ownership of a document id. Returns `None` when
    /// another task in this process already holds it.
    pub fn try_acquire(self: &Arc<Self>, id: DocumentId) -> Option<InflightGuard> {
        let mut inner = self.inner.lock().unwrap();
        if inner.contains_key(&id) {
            return None;
        }
        inner.insert(id, Arc::new(Notify::new()));
        Some(InflightGuard {
            registry: Arc::clone(self),
            id,
        })
    }

    /// Notify handle for an id currently owned by this process, if any.
    /// Waiters still re-read the store after every wake; the handle only
    /// shortens the wait.
    pub fn watch(&self, id: DocumentId) -> Option<Arc<Notify>> {
        self.inner.lock().unwrap().get(&id).cloned()
    }

    fn release(&self, id: DocumentId) {
        let notify = self.inner.lock().unwrap().remove(&id);
        if let Some(notify) = notify {
            notify.notify_waiters();
        }
    }
}

/// RAII ownership of one in-flight document. Dropping releases the id and
/// wakes local waiters, whatever the outcome of the attempt was.
pub struct InflightGuard {
    registry: Arc<InflightRegistry>,
    id: DocumentId,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.registry.release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn second_acquire_fails_until_release() {
        let registry = InflightRegistry::new();
        let id = DocumentId::new();

        let guard = registry.try_acquire(id).unwrap();
        assert!(registry.try_acquire(id).is_none());
        assert!(registry.watch(id).is_some());

        drop(guard);
        assert!(registry.try_acquire(id).is_some());
    }

    #[tokio::test]
    async fn release_wakes_waiters() {
        let registry = InflightRegistry::new();
        let id = DocumentId::new();
        let guard = registry.try_acquire(id).unwrap();

        let notify = registry.watch(id).unwrap();
        let waiter = tokio::spawn(async move { notify.notified().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(guard);

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should be woken on release")
            .unwrap();
        assert!(registry.watch(id).is_none());
    }

    #[tokio::test]
    async fn distinct_ids_are_independent() {
        let registry = InflightRegistry::new();
        let _a = registry.try_acquire(DocumentId::new()).unwrap();
        let _b = registry.try_acquire(DocumentId::new()).unwrap();
    }
}
