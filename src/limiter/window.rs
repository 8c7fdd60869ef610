//! Sliding window strategy.
//!
//! The counting algorithm: on each check, prune entries older than the
//! window, count survivors, and insert a new entry only when the count is
//! under the rule's limit. The whole sequence is one atomic store operation
//! per key, so concurrent requests for the same key cannot both take the
//! last slot. Exact request timestamps stay inspectable in the store, which
//! is why this design is preferred over a token bucket here.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{trace, warn};

use crate::clock::Clock;
use crate::error::FloodgateError;
use crate::store::{CounterStore, MemoryStore, Reservation, StoreHealth};

use super::key::RateLimitKey;
use super::rules::RateLimitRule;

/// The outcome of one admission check. Produced per request, never stored.
#[derive(Debug, Clone)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// When the window has rolled far enough for the quota to change.
    pub reset_at: DateTime<Utc>,
    /// Seconds until a retry can succeed. Set only on denial.
    pub retry_after_secs: Option<u64>,
    /// The rule that produced this decision.
    pub rule: Arc<RateLimitRule>,
}

impl Decision {
    /// An unconditional allow for bypassed identities. The store is never
    /// touched, so the full quota is reported as remaining.
    pub fn bypass(rule: Arc<RateLimitRule>, now_ms: u64) -> Self {
        let reset_at = ms_to_datetime(now_ms + rule.window_ms());
        Self {
            allowed: true,
            limit: rule.max_requests,
            remaining: rule.max_requests,
            reset_at,
            retry_after_secs: None,
            rule,
        }
    }

    fn from_reservation(
        rule: Arc<RateLimitRule>,
        reservation: Reservation,
        now_ms: u64,
        window_ms: u64,
    ) -> Self {
        if reservation.admitted {
            Self {
                allowed: true,
                limit: rule.max_requests,
                remaining: rule.max_requests.saturating_sub(reservation.count),
                reset_at: ms_to_datetime(now_ms + window_ms),
                retry_after_secs: None,
                rule,
            }
        } else {
            // The window frees up when its oldest surviving entry expires.
            let reset_ms = reservation
                .oldest_entry_ms
                .map_or(now_ms + window_ms, |oldest| oldest + window_ms);
            let retry_after = reset_ms.saturating_sub(now_ms).div_ceil(1_000).max(1);
            Self {
                allowed: false,
                limit: rule.max_requests,
                remaining: 0,
                reset_at: ms_to_datetime(reset_ms),
                retry_after_secs: Some(retry_after),
                rule,
            }
        }
    }

    /// Standardized response metadata, attached on allow and deny alike so
    /// callers can always show usage state.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", self.reset_at.timestamp().to_string()),
        ];
        if let Some(retry_after) = self.retry_after_secs {
            headers.push(("Retry-After", retry_after.to_string()));
        }
        headers
    }

    /// The denial message, honoring the caller's locale preference.
    pub fn message(&self, prefer_localized: bool) -> &str {
        if prefer_localized {
            if let Some(ref localized) = self.rule.localized_message {
                return localized;
            }
        }
        &self.rule.message
    }
}

fn ms_to_datetime(ms: u64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms as i64).unwrap_or_default()
}

/// The sliding window strategy over a primary and a fallback store.
///
/// The primary is consulted only while the shared health flag reports it
/// up; a failed or timed-out primary call flips the flag and the request is
/// re-run against the in-process fallback, so request latency stays bounded
/// and limiting is never disabled outright.
pub struct SlidingWindow {
    primary: Option<Arc<dyn CounterStore>>,
    fallback: Arc<MemoryStore>,
    health: Arc<StoreHealth>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindow {
    pub fn new(
        primary: Option<Arc<dyn CounterStore>>,
        fallback: Arc<MemoryStore>,
        health: Arc<StoreHealth>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            primary,
            fallback,
            health,
            clock,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Check one key against one rule, consuming a window slot on allow.
    pub async fn check(&self, key: &RateLimitKey, rule: &Arc<RateLimitRule>) -> Decision {
        let now_ms = self.clock.now_ms();
        let window_ms = rule.window_ms();
        let cutoff_ms = now_ms.saturating_sub(window_ms);
        let store_key = key.to_store_key();

        trace!(key = %key, limit = rule.max_requests, "Checking sliding window");

        let reservation = match self.primary {
            Some(ref primary) if self.health.is_healthy() => {
                match primary
                    .prune_count_insert(&store_key, cutoff_ms, rule.max_requests, now_ms)
                    .await
                {
                    Ok(reservation) => reservation,
                    Err(e) => {
                        self.log_degraded(key, &e);
                        self.health.report_failure();
                        self.fallback
                            .reserve(&store_key, cutoff_ms, rule.max_requests, now_ms)
                    }
                }
            }
            _ => self
                .fallback
                .reserve(&store_key, cutoff_ms, rule.max_requests, now_ms),
        };

        Decision::from_reservation(rule.clone(), reservation, now_ms, window_ms)
    }

    fn log_degraded(&self, key: &RateLimitKey, error: &FloodgateError) {
        warn!(
            key = %key,
            error = %error,
            "Primary store check failed, enforcing via in-process fallback"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::limiter::key::Scope;
    use crate::store::Reservation;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn rule(max: u64, window: u64) -> Arc<RateLimitRule> {
        Arc::new(RateLimitRule {
            category: "api".to_string(),
            scope: Scope::Ip,
            max_requests: max,
            window_seconds: window,
            message: "Too many requests".to_string(),
            localized_message: Some("Trop de requêtes".to_string()),
            bypass_scopes: Vec::new(),
        })
    }

    fn strategy(clock: Arc<ManualClock>) -> SlidingWindow {
        SlidingWindow::new(
            None,
            Arc::new(MemoryStore::new()),
            Arc::new(StoreHealth::new(3)),
            clock,
        )
    }

    #[tokio::test]
    async fn test_rapid_requests_count_down_then_deny() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let limiter = strategy(clock.clone());
        let rule = rule(5, 60);
        let key = RateLimitKey::new(Scope::Ip, "203.0.113.7", "api");

        for expected_remaining in [4, 3, 2, 1, 0] {
            let decision = limiter.check(&key, &rule).await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
            clock.advance_ms(1);
        }

        let decision = limiter.check(&key, &rule).await;
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.retry_after_secs, Some(60));
    }

    #[tokio::test]
    async fn test_window_rolls_forward_after_retry_after() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let limiter = strategy(clock.clone());
        let rule = rule(2, 10);
        let key = RateLimitKey::new(Scope::User, "u-1", "api");

        assert!(limiter.check(&key, &rule).await.allowed);
        assert!(limiter.check(&key, &rule).await.allowed);

        let denied = limiter.check(&key, &rule).await;
        assert!(!denied.allowed);
        let retry_after = denied.retry_after_secs.unwrap();

        clock.advance_ms(retry_after * 1_000 + 1);
        assert!(limiter.check(&key, &rule).await.allowed);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_interfere() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = strategy(clock);
        let rule = rule(1, 60);

        let a = RateLimitKey::new(Scope::Ip, "10.0.0.1", "api");
        let b = RateLimitKey::new(Scope::Ip, "10.0.0.2", "api");

        assert!(limiter.check(&a, &rule).await.allowed);
        assert!(!limiter.check(&a, &rule).await.allowed);
        assert!(limiter.check(&b, &rule).await.allowed);
    }

    #[tokio::test]
    async fn test_concurrent_checks_never_over_admit() {
        let limiter = Arc::new(SlidingWindow::new(
            None,
            Arc::new(MemoryStore::new()),
            Arc::new(StoreHealth::new(3)),
            Arc::new(crate::clock::MonotonicClock::new(crate::clock::SystemClock)),
        ));
        let rule = rule(50, 60);
        let allowed = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let limiter = limiter.clone();
            let rule = rule.clone();
            let allowed = allowed.clone();
            handles.push(tokio::spawn(async move {
                let key = RateLimitKey::new(Scope::Ip, "198.51.100.9", "api");
                for _ in 0..10 {
                    if limiter.check(&key, &rule).await.allowed {
                        allowed.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(allowed.load(Ordering::SeqCst), 50);
    }

    struct FailingStore;

    #[async_trait]
    impl CounterStore for FailingStore {
        async fn prune_count_insert(
            &self,
            _key: &str,
            _cutoff_ms: u64,
            _limit: u64,
            _now_ms: u64,
        ) -> crate::error::Result<Reservation> {
            Err(FloodgateError::Store("connection refused".into()))
        }

        async fn ping(&self) -> crate::error::Result<()> {
            Err(FloodgateError::Store("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_primary_failure_degrades_but_still_limits() {
        let clock = Arc::new(ManualClock::new(5_000_000));
        let health = Arc::new(StoreHealth::new(3));
        let limiter = SlidingWindow::new(
            Some(Arc::new(FailingStore)),
            Arc::new(MemoryStore::new()),
            health.clone(),
            clock,
        );
        let rule = rule(2, 60);
        let key = RateLimitKey::new(Scope::Ip, "192.0.2.1", "api");

        // First check hits the broken primary, falls back, and flips the flag.
        assert!(limiter.check(&key, &rule).await.allowed);
        assert!(!health.is_healthy());

        // Subsequent checks go straight to the fallback and still enforce.
        assert!(limiter.check(&key, &rule).await.allowed);
        assert!(!limiter.check(&key, &rule).await.allowed);
    }

    #[tokio::test]
    async fn test_headers_and_messages() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let limiter = strategy(clock);
        let rule = rule(1, 60);
        let key = RateLimitKey::new(Scope::Ip, "203.0.113.7", "api");

        let allowed = limiter.check(&key, &rule).await;
        let headers = allowed.headers();
        assert_eq!(headers.len(), 3);
        assert_eq!(headers[0], ("X-RateLimit-Limit", "1".to_string()));
        assert_eq!(headers[1], ("X-RateLimit-Remaining", "0".to_string()));

        let denied = limiter.check(&key, &rule).await;
        let headers = denied.headers();
        assert_eq!(headers.len(), 4);
        assert_eq!(headers[3].0, "Retry-After");
        assert_eq!(denied.message(false), "Too many requests");
        assert_eq!(denied.message(true), "Trop de requêtes");
    }
}
