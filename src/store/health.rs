//! Primary-store health tracking.
//!
//! The strategy never retries a failed primary inline; it consults a shared
//! health flag maintained by a background probe. A single failure flips the
//! flag to unhealthy immediately (requests move to the fallback on the next
//! check), while recovery requires several consecutive successful probes so
//! a flaky backend does not flap between primary and fallback.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use tracing::{info, warn};

use super::CounterStore;

/// Shared "store healthy" flag with recovery hysteresis.
#[derive(Debug)]
pub struct StoreHealth {
    healthy: AtomicBool,
    consecutive_ok: AtomicU32,
    recovery_probes: u32,
}

impl StoreHealth {
    /// `recovery_probes` is the number of consecutive successful probes
    /// required before an unhealthy store is trusted again.
    pub fn new(recovery_probes: u32) -> Self {
        Self {
            healthy: AtomicBool::new(true),
            consecutive_ok: AtomicU32::new(0),
            recovery_probes: recovery_probes.max(1),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Record a failed probe or request. Flips unhealthy immediately.
    pub fn report_failure(&self) {
        self.consecutive_ok.store(0, Ordering::Release);
        if self.healthy.swap(false, Ordering::AcqRel) {
            warn!("Primary counter store unhealthy, degrading to in-process fallback");
        }
    }

    /// Record a successful probe. Recovery only after the configured streak.
    pub fn report_success(&self) {
        if self.is_healthy() {
            return;
        }
        let streak = self.consecutive_ok.fetch_add(1, Ordering::AcqRel) + 1;
        if streak >= self.recovery_probes {
            self.healthy.store(true, Ordering::Release);
            info!("Primary counter store recovered, leaving degraded mode");
        }
    }
}

/// Spawn the background probe that pings the primary store and keeps the
/// health flag current. Runs detached from request threads.
pub fn spawn_health_probe(
    store: Arc<dyn CounterStore>,
    health: Arc<StoreHealth>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match store.ping().await {
                Ok(()) => health.report_success(),
                Err(_) => health.report_failure(),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FloodgateError, Result};
    use async_trait::async_trait;

    struct FlakyStore {
        ok: AtomicBool,
    }

    #[async_trait]
    impl CounterStore for FlakyStore {
        async fn prune_count_insert(
            &self,
            _key: &str,
            _cutoff_ms: u64,
            _limit: u64,
            _now_ms: u64,
        ) -> Result<super::super::Reservation> {
            Err(FloodgateError::Store("unused".into()))
        }

        async fn ping(&self) -> Result<()> {
            if self.ok.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(FloodgateError::Store("down".into()))
            }
        }
    }

    #[test]
    fn test_starts_healthy() {
        let health = StoreHealth::new(3);
        assert!(health.is_healthy());
    }

    #[test]
    fn test_single_failure_flips_unhealthy() {
        let health = StoreHealth::new(3);
        health.report_failure();
        assert!(!health.is_healthy());
    }

    #[test]
    fn test_recovery_requires_streak() {
        let health = StoreHealth::new(3);
        health.report_failure();

        health.report_success();
        health.report_success();
        assert!(!health.is_healthy());

        health.report_success();
        assert!(health.is_healthy());
    }

    #[test]
    fn test_failure_resets_streak() {
        let health = StoreHealth::new(2);
        health.report_failure();

        health.report_success();
        health.report_failure();
        health.report_success();
        assert!(!health.is_healthy());

        health.report_success();
        assert!(health.is_healthy());
    }

    #[tokio::test]
    async fn test_probe_tracks_store_state() {
        let store = Arc::new(FlakyStore {
            ok: AtomicBool::new(false),
        });
        let health = Arc::new(StoreHealth::new(1));

        let handle = spawn_health_probe(
            store.clone(),
            health.clone(),
            Duration::from_millis(10),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!health.is_healthy());

        store.ok.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(health.is_healthy());

        handle.abort();
    }
}
