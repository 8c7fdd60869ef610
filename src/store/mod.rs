//! Counter store abstraction for sliding-window state.
//!
//! Two implementations live behind one trait: a shared Redis-backed ordered
//! set (correct across process instances) and an in-process memory store
//! used as a fallback when Redis is unreachable. The trait exposes a single
//! atomic prune+count+maybe-insert operation rather than separate round
//! trips, so concurrent requests against the same key can never both observe
//! an under-limit count when only one slot remains.

pub mod health;
pub mod memory;
pub mod redis;

use async_trait::async_trait;

use crate::error::Result;

pub use health::{StoreHealth, spawn_health_probe};
pub use memory::MemoryStore;
pub use redis::RedisStore;

/// Outcome of one atomic prune+count+maybe-insert operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    /// Whether a new entry was inserted (the request fit under the limit).
    pub admitted: bool,
    /// Entry count after pruning, including the inserted entry when admitted.
    pub count: u64,
    /// Timestamp of the oldest surviving entry, when any survive.
    pub oldest_entry_ms: Option<u64>,
}

/// Trait for sliding-window counter backends.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically remove all entries for `key` with timestamps at or before
    /// `cutoff_ms`, count the survivors, and insert a new entry at `now_ms`
    /// if and only if the count is below `limit`.
    async fn prune_count_insert(
        &self,
        key: &str,
        cutoff_ms: u64,
        limit: u64,
        now_ms: u64,
    ) -> Result<Reservation>;

    /// Lightweight liveness check used by the background health probe.
    async fn ping(&self) -> Result<()>;
}
