//! Bookkeeping of running connection handlers
//!
//! The dispatcher registers every handler it spawns and, on shutdown, waits
//! until all of them finished on their own. One set exists per handler class.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

#[derive(Debug, Default)]
struct Inner {
    live: Mutex<HashSet<u64>>,
    next_id: AtomicU64,
    drained: Notify,
}

/// Concurrent set of live handlers
#[derive(Debug, Clone, Default)]
pub struct LiveSet {
    name: &'static str,
    inner: Arc<Inner>,
}

/// Membership of one handler; unregisters itself when dropped.
#[derive(Debug)]
pub struct LiveGuard {
    id: u64,
    inner: Arc<Inner>,
}

impl LiveSet {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Arc::default(),
        }
    }

    pub fn register(&self) -> LiveGuard {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.live.lock().insert(id);
        trace!("{} handler {id} registered", self.name);

        LiveGuard {
            id,
            inner: self.inner.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.live.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until every registered handler is gone.
    pub async fn wait_all(&self) {
        loop {
            let drained = self.inner.drained.notified();
            tokio::pin!(drained);
            // register interest before checking, so a concurrent unregister is not missed
            drained.as_mut().enable();

            if self.is_empty() {
                trace!("all {} handlers finished", self.name);
                return;
            }

            drained.await;
        }
    }
}

impl LiveGuard {
    pub fn unregister(self) {}
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        let mut live = self.inner.live.lock();
        live.remove(&self.id);
        if live.is_empty() {
            self.inner.drained.notify_waiters();
        }
    }
}
