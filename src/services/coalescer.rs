//! Single-flight coordination for derived image renders.
//!
//! When several requests miss the cache for the same derived key at once,
//! the first one (leader) renders and writes the cache; the rest (followers)
//! wait for it and then read the cache. Scope is this process only.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};
use tokio::sync::watch;

#[derive(Debug, Clone, Default)]
pub struct RequestCoalescer {
    /// In-flight renders: derived key -> completion signal.
    in_flight: Arc<Mutex<HashMap<String, watch::Sender<bool>>>>,
}

impl RequestCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Become the leader for `key`, or wait until the current leader is done.
    pub async fn acquire(&self, key: &str) -> CoalescingSlot {
        let mut rx = {
            let mut in_flight = self.lock();
            if !in_flight.contains_key(key) {
                let (tx, _rx) = watch::channel(false);
                in_flight.insert(key.to_string(), tx);
                return CoalescingSlot::Leader(LeaderGuard {
                    key: key.to_string(),
                    coalescer: self.clone(),
                });
            }
            in_flight[key].subscribe()
        };

        // An error means the leader vanished without signalling; either way
        // there is nothing left to wait for.
        let _ = rx.wait_for(|&done| done).await;
        CoalescingSlot::Follower
    }

    #[cfg(test)]
    pub fn in_flight_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, watch::Sender<bool>>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release(&self, key: &str) {
        if let Some(sender) = self.lock().remove(key) {
            let _ = sender.send(true);
        }
    }
}

#[derive(Debug)]
pub enum CoalescingSlot {
    /// First request for the key: render, write the cache, then drop the guard.
    Leader(LeaderGuard),

    /// Another request rendered this key while we waited; read the cache.
    Follower,
}

impl CoalescingSlot {
    #[cfg(test)]
    pub fn is_leader(&self) -> bool {
        matches!(self, CoalescingSlot::Leader(_))
    }
}

/// Held by the leader. Dropping it (normally, on error, or because the
/// request was cancelled) wakes every follower.
#[derive(Debug)]
pub struct LeaderGuard {
    key: String,
    coalescer: RequestCoalescer,
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.coalescer.release(&self.key);
    }
}
