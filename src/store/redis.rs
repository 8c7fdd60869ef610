//! Redis-backed counter store.
//!
//! The primary backend: a sorted set per key, scored by entry timestamp,
//! shared by every process instance. A Lua script performs the
//! prune+count+maybe-insert sequence server-side in one atomic step, which
//! is the only way to avoid the check-then-insert race between concurrent
//! requests hitting the same key from different instances.

use std::time::Duration;

use async_trait::async_trait;
use redis::Script;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::{FloodgateError, Result};

use super::{CounterStore, Reservation};

/// Prunes expired entries, counts survivors, and inserts a new member only
/// when the count is under the limit. Returns {admitted, count, oldest_ms}.
const RESERVE_SCRIPT: &str = r#"
local key = KEYS[1]
local cutoff = tonumber(ARGV[1])
local limit = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local ttl_ms = tonumber(ARGV[4])
local member = ARGV[5]

redis.call('ZREMRANGEBYSCORE', key, '-inf', cutoff)
local count = redis.call('ZCARD', key)

local admitted = 0
if count < limit then
    redis.call('ZADD', key, now, member)
    redis.call('PEXPIRE', key, ttl_ms)
    count = count + 1
    admitted = 1
end

local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
local oldest_ms = -1
if oldest[2] then
    oldest_ms = tonumber(oldest[2])
end

return {admitted, count, oldest_ms}
"#;

/// Sorted-set counter store on a shared Redis instance.
pub struct RedisStore {
    client: redis::Client,
    key_prefix: String,
    /// Hard bound on every store round trip. A slow Redis must trigger
    /// fallback, never queue requests.
    op_timeout: Duration,
}

impl RedisStore {
    /// Create a store for the given connection URL.
    ///
    /// The connection itself is established lazily per operation; startup
    /// only validates the URL.
    pub fn new(url: &str, key_prefix: &str, op_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| FloodgateError::Config(format!("Invalid Redis URL: {}", e)))?;
        Ok(Self {
            client,
            key_prefix: key_prefix.to_string(),
            op_timeout,
        })
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn with_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = redis::RedisResult<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(FloodgateError::Store(format!(
                "Redis operation timed out after {:?}",
                self.op_timeout
            ))),
        }
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn prune_count_insert(
        &self,
        key: &str,
        cutoff_ms: u64,
        limit: u64,
        now_ms: u64,
    ) -> Result<Reservation> {
        let redis_key = self.prefixed(key);
        // Same-millisecond entries need distinct members in the sorted set.
        let member = format!("{}-{}", now_ms, Uuid::new_v4().simple());
        // Keys for abandoned windows expire on their own; one extra second
        // covers the insert-to-expiry skew.
        let ttl_ms = now_ms.saturating_sub(cutoff_ms) + 1_000;

        trace!(key = %redis_key, cutoff = cutoff_ms, limit = limit, "Reserving window slot");

        let script = Script::new(RESERVE_SCRIPT);
        let op = async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            script
                .key(&redis_key)
                .arg(cutoff_ms)
                .arg(limit)
                .arg(now_ms)
                .arg(ttl_ms)
                .arg(&member)
                .invoke_async::<(i64, u64, i64)>(&mut conn)
                .await
        };
        let (admitted, count, oldest_ms) = self.with_timeout(op).await?;

        let admitted = admitted == 1;
        if !admitted {
            debug!(key = %redis_key, count = count, limit = limit, "Window full");
        }

        Ok(Reservation {
            admitted,
            count,
            oldest_entry_ms: (oldest_ms >= 0).then_some(oldest_ms as u64),
        })
    }

    async fn ping(&self) -> Result<()> {
        let op = async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            redis::cmd("PING").query_async::<String>(&mut conn).await
        };
        self.with_timeout(op).await?;
        Ok(())
    }
}
