//! In-process counter store.
//!
//! Fallback backend used when the shared store is unreachable. Entries for
//! one key live in a mutex-protected deque, so prune+count+insert is atomic
//! per key while requests against different keys never contend.
//!
//! Limitation: this store is correct only within a single process. A
//! multi-instance deployment running on the fallback under-enforces limits
//! in proportion to the instance count.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::Result;

use super::{CounterStore, Reservation};

/// Mutex-protected, time-ordered entry deque per key.
#[derive(Debug, Default)]
pub struct MemoryStore {
    windows: DashMap<String, Mutex<VecDeque<u64>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Infallible form of the store operation, used directly by the
    /// strategy on the fallback path.
    pub fn reserve(&self, key: &str, cutoff_ms: u64, limit: u64, now_ms: u64) -> Reservation {
        let entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(VecDeque::new()));
        let mut window = entry.lock();

        while window.front().is_some_and(|&ts| ts <= cutoff_ms) {
            window.pop_front();
        }

        let count = window.len() as u64;
        if count < limit {
            // Entries stay ordered: the clamped clock never hands out a
            // timestamp older than one already recorded.
            let ts = window.back().map_or(now_ms, |&last| now_ms.max(last));
            window.push_back(ts);
            Reservation {
                admitted: true,
                count: count + 1,
                oldest_entry_ms: window.front().copied(),
            }
        } else {
            Reservation {
                admitted: false,
                count,
                oldest_entry_ms: window.front().copied(),
            }
        }
    }

    /// Drop keys whose newest entry is older than `max_age`.
    ///
    /// The per-request prune only touches keys that are still receiving
    /// traffic; this sweep reclaims abandoned ones.
    pub fn purge_idle(&self, now_ms: u64, max_age: Duration) {
        let max_age_ms = max_age.as_millis() as u64;
        let before = self.windows.len();
        self.windows.retain(|_, window| {
            let window = window.lock();
            window
                .back()
                .is_some_and(|&last| now_ms.saturating_sub(last) < max_age_ms)
        });
        // Concurrent reserves may insert keys mid-sweep, so the map can end
        // up larger than it started.
        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            debug!(removed = removed, "Purged idle rate limit windows");
        }
    }

    /// Number of keys currently tracked.
    pub fn key_count(&self) -> usize {
        self.windows.len()
    }
}

/// Periodically purge idle windows from a memory store.
pub fn spawn_purge_task(
    store: Arc<MemoryStore>,
    clock: Arc<dyn crate::clock::Clock>,
    interval: Duration,
    max_age: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            store.purge_idle(clock.now_ms(), max_age);
        }
    })
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn prune_count_insert(
        &self,
        key: &str,
        cutoff_ms: u64,
        limit: u64,
        now_ms: u64,
    ) -> Result<Reservation> {
        Ok(self.reserve(key, cutoff_ms, limit, now_ms))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
