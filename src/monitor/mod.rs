//! Usage monitoring and anomaly alerting.
//!
//! Aggregates admission outcomes into rolling per-category buckets and
//! emits three alert classes: threshold crossings on a rule's quota,
//! violations (denied decisions, with severity escalating for repeat
//! offenders), and suspicious request patterns. All dispatch goes through
//! the non-blocking [`AlertDispatcher`]; nothing here touches the counter
//! stores or adds meaningful latency to the admission path.

pub mod alert;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::Clock;
use crate::limiter::{Decision, RateLimitKey};

pub use alert::{Alert, AlertDispatcher, AlertKind, LogNotifier, Notifier, Severity};

/// Monitoring thresholds and retention knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Quota percentages that trigger threshold alerts.
    #[serde(default = "default_thresholds")]
    pub threshold_percents: Vec<u8>,

    /// Minimum seconds between repeat alerts for one threshold on one key.
    #[serde(default = "default_threshold_cooldown")]
    pub threshold_cooldown_secs: u64,

    /// Interval over which repeated violations from one key escalate.
    #[serde(default = "default_violation_window")]
    pub violation_window_secs: u64,

    /// Violations within the window that raise severity to High.
    #[serde(default = "default_violation_high")]
    pub violation_high_count: u64,

    /// Violations within the window that raise severity to Critical.
    #[serde(default = "default_violation_critical")]
    pub violation_critical_count: u64,

    /// Distinct endpoints from one identity that look like probing.
    #[serde(default = "default_fanout_threshold")]
    pub endpoint_fanout_threshold: usize,

    #[serde(default = "default_fanout_window")]
    pub endpoint_fanout_window_secs: u64,

    /// Caller-flagged auth failures from one identity that look suspicious.
    #[serde(default = "default_auth_failure_threshold")]
    pub auth_failure_threshold: usize,

    #[serde(default = "default_auth_failure_window")]
    pub auth_failure_window_secs: u64,

    /// Minimum seconds between repeat suspicious alerts for one identity.
    #[serde(default = "default_suspicious_cooldown")]
    pub suspicious_cooldown_secs: u64,

    /// Length of one usage aggregation bucket.
    #[serde(default = "default_bucket_secs")]
    pub usage_bucket_secs: u64,

    /// Buckets retained per category before rolling off.
    #[serde(default = "default_retention_buckets")]
    pub usage_retention_buckets: usize,
}

fn default_thresholds() -> Vec<u8> {
    vec![70, 80, 95]
}
fn default_threshold_cooldown() -> u64 {
    300
}
fn default_violation_window() -> u64 {
    300
}
fn default_violation_high() -> u64 {
    5
}
fn default_violation_critical() -> u64 {
    20
}
fn default_fanout_threshold() -> usize {
    10
}
fn default_fanout_window() -> u64 {
    60
}
fn default_auth_failure_threshold() -> usize {
    3
}
fn default_auth_failure_window() -> u64 {
    300
}
fn default_suspicious_cooldown() -> u64 {
    300
}
fn default_bucket_secs() -> u64 {
    3_600
}
fn default_retention_buckets() -> usize {
    24
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            threshold_percents: default_thresholds(),
            threshold_cooldown_secs: default_threshold_cooldown(),
            violation_window_secs: default_violation_window(),
            violation_high_count: default_violation_high(),
            violation_critical_count: default_violation_critical(),
            endpoint_fanout_threshold: default_fanout_threshold(),
            endpoint_fanout_window_secs: default_fanout_window(),
            auth_failure_threshold: default_auth_failure_threshold(),
            auth_failure_window_secs: default_auth_failure_window(),
            suspicious_cooldown_secs: default_suspicious_cooldown(),
            usage_bucket_secs: default_bucket_secs(),
            usage_retention_buckets: default_retention_buckets(),
        }
    }
}

/// Aggregated counts for one category over one reporting bucket.
#[derive(Debug, Clone, Serialize)]
pub struct UsageSnapshot {
    pub category: String,
    pub bucket_start: DateTime<Utc>,
    pub allowed: u64,
    pub denied: u64,
}

#[derive(Debug, Clone, Copy)]
struct UsageBucket {
    start_ms: u64,
    allowed: u64,
    denied: u64,
}

/// Rolling usage aggregation, threshold detection, and pattern heuristics.
pub struct UsageMonitor {
    config: MonitorConfig,
    clock: Arc<dyn Clock>,
    dispatcher: AlertDispatcher,
    usage: Mutex<HashMap<String, VecDeque<UsageBucket>>>,
    /// (store key, threshold percent) -> last fired, milliseconds.
    threshold_marks: Mutex<HashMap<(String, u8), u64>>,
    /// store key -> denial timestamps within the escalation window.
    violations: Mutex<HashMap<String, VecDeque<u64>>>,
    /// identity -> (timestamp, endpoint) pairs within the fan-out window.
    fanout: Mutex<HashMap<String, VecDeque<(u64, String)>>>,
    /// identity -> auth failure timestamps.
    auth_failures: Mutex<HashMap<String, VecDeque<u64>>>,
    /// heuristic cool-down marks, keyed "{identity}|{heuristic}".
    suspicious_marks: Mutex<HashMap<String, u64>>,
}

impl UsageMonitor {
    pub fn new(config: MonitorConfig, clock: Arc<dyn Clock>, dispatcher: AlertDispatcher) -> Self {
        Self {
            config,
            clock,
            dispatcher,
            usage: Mutex::new(HashMap::new()),
            threshold_marks: Mutex::new(HashMap::new()),
            violations: Mutex::new(HashMap::new()),
            fanout: Mutex::new(HashMap::new()),
            auth_failures: Mutex::new(HashMap::new()),
            suspicious_marks: Mutex::new(HashMap::new()),
        }
    }

    /// Record one per-rule decision outcome.
    pub fn observe(&self, key: &RateLimitKey, decision: &Decision) {
        let now_ms = self.clock.now_ms();
        self.record_usage(&key.category, decision.allowed, now_ms);
        self.check_thresholds(key, decision, now_ms);
        if !decision.allowed {
            self.record_violation(key, decision, now_ms);
        }
    }

    /// Record request-stream signals used by the suspicious-pattern
    /// heuristics. The auth-failure flag is supplied by the caller.
    pub fn observe_request(&self, identity: &str, endpoint: &str, auth_failed: bool, now_ms: u64) {
        self.check_endpoint_fanout(identity, endpoint, now_ms);
        if auth_failed {
            self.check_auth_failures(identity, now_ms);
        }
    }

    /// Usage snapshots for one category, oldest first.
    pub fn snapshot(&self, category: &str) -> Vec<UsageSnapshot> {
        let usage = self.usage.lock();
        usage
            .get(category)
            .map(|buckets| {
                buckets
                    .iter()
                    .map(|b| UsageSnapshot {
                        category: category.to_string(),
                        bucket_start: DateTime::from_timestamp_millis(b.start_ms as i64)
                            .unwrap_or_default(),
                        allowed: b.allowed,
                        denied: b.denied,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn record_usage(&self, category: &str, allowed: bool, now_ms: u64) {
        let bucket_ms = self.config.usage_bucket_secs * 1_000;
        let start_ms = (now_ms / bucket_ms) * bucket_ms;

        let mut usage = self.usage.lock();
        let buckets = usage.entry(category.to_string()).or_default();

        match buckets.back_mut() {
            Some(bucket) if bucket.start_ms == start_ms => {
                if allowed {
                    bucket.allowed += 1;
                } else {
                    bucket.denied += 1;
                }
            }
            _ => {
                buckets.push_back(UsageBucket {
                    start_ms,
                    allowed: u64::from(allowed),
                    denied: u64::from(!allowed),
                });
                while buckets.len() > self.config.usage_retention_buckets {
                    buckets.pop_front();
                }
            }
        }
    }

    fn check_thresholds(&self, key: &RateLimitKey, decision: &Decision, now_ms: u64) {
        if decision.limit == 0 {
            return;
        }
        let used = decision.limit.saturating_sub(decision.remaining);
        let percent = used * 100 / decision.limit;

        // Only the highest crossed threshold fires; lower ones already
        // fired at their own crossings.
        let crossed = self
            .config
            .threshold_percents
            .iter()
            .copied()
            .filter(|&t| percent >= u64::from(t))
            .max();
        let Some(threshold) = crossed else {
            return;
        };

        let cooldown_ms = self.config.threshold_cooldown_secs * 1_000;
        let mark_key = (key.to_store_key(), threshold);
        let mut marks = self.threshold_marks.lock();
        if let Some(&last) = marks.get(&mark_key) {
            if now_ms.saturating_sub(last) < cooldown_ms {
                return;
            }
        }
        marks.insert(mark_key, now_ms);
        drop(marks);

        debug!(key = %key, percent = percent, threshold = threshold, "Usage threshold crossed");
        self.dispatcher.dispatch(Alert::new(
            AlertKind::Threshold,
            Severity::Warning,
            key.to_store_key(),
            serde_json::json!({
                "category": key.category,
                "threshold_percent": threshold,
                "used": used,
                "limit": decision.limit,
            }),
        ));
    }

    fn record_violation(&self, key: &RateLimitKey, decision: &Decision, now_ms: u64) {
        let window_ms = self.config.violation_window_secs * 1_000;
        let store_key = key.to_store_key();

        let count = {
            let mut violations = self.violations.lock();
            let entries = violations.entry(store_key.clone()).or_default();
            while entries.front().is_some_and(|&ts| now_ms.saturating_sub(ts) >= window_ms) {
                entries.pop_front();
            }
            entries.push_back(now_ms);
            entries.len() as u64
        };

        let severity = if count >= self.config.violation_critical_count {
            Severity::Critical
        } else if count >= self.config.violation_high_count {
            Severity::High
        } else {
            Severity::Warning
        };

        self.dispatcher.dispatch(Alert::new(
            AlertKind::Violation,
            severity,
            store_key,
            serde_json::json!({
                "category": key.category,
                "recent_violations": count,
                "limit": decision.limit,
                "retry_after_secs": decision.retry_after_secs,
            }),
        ));
    }

    fn check_endpoint_fanout(&self, identity: &str, endpoint: &str, now_ms: u64) {
        let window_ms = self.config.endpoint_fanout_window_secs * 1_000;

        let distinct = {
            let mut fanout = self.fanout.lock();
            let entries = fanout.entry(identity.to_string()).or_default();
            while entries
                .front()
                .is_some_and(|&(ts, _)| now_ms.saturating_sub(ts) >= window_ms)
            {
                entries.pop_front();
            }
            entries.push_back((now_ms, endpoint.to_string()));

            let mut seen: Vec<&str> = entries.iter().map(|(_, e)| e.as_str()).collect();
            seen.sort_unstable();
            seen.dedup();
            seen.len()
        };

        if distinct < self.config.endpoint_fanout_threshold {
            return;
        }
        if !self.mark_suspicious(identity, "fanout", now_ms) {
            return;
        }

        self.dispatcher.dispatch(Alert::new(
            AlertKind::Suspicious,
            Severity::High,
            identity,
            serde_json::json!({
                "heuristic": "endpoint_fanout",
                "distinct_endpoints": distinct,
                "window_secs": self.config.endpoint_fanout_window_secs,
            }),
        ));
    }

    fn check_auth_failures(&self, identity: &str, now_ms: u64) {
        let window_ms = self.config.auth_failure_window_secs * 1_000;

        let count = {
            let mut failures = self.auth_failures.lock();
            let entries = failures.entry(identity.to_string()).or_default();
            while entries.front().is_some_and(|&ts| now_ms.saturating_sub(ts) >= window_ms) {
                entries.pop_front();
            }
            entries.push_back(now_ms);
            entries.len()
        };

        if count < self.config.auth_failure_threshold {
            return;
        }
        if !self.mark_suspicious(identity, "auth_failures", now_ms) {
            return;
        }

        self.dispatcher.dispatch(Alert::new(
            AlertKind::Suspicious,
            Severity::High,
            identity,
            serde_json::json!({
                "heuristic": "auth_failures",
                "failures": count,
                "window_secs": self.config.auth_failure_window_secs,
            }),
        ));
    }

    /// Drop bookkeeping that can no longer influence an alert: cool-down
    /// marks past their cool-down, event deques with no entries left inside
    /// their window, and usage series whose newest bucket has rolled past
    /// the retention horizon. Without this sweep the maps grow with the
    /// number of distinct identities ever seen.
    pub fn purge_stale(&self, now_ms: u64) {
        let threshold_cooldown_ms = self.config.threshold_cooldown_secs * 1_000;
        self.threshold_marks
            .lock()
            .retain(|_, &mut last| now_ms.saturating_sub(last) < threshold_cooldown_ms);

        let suspicious_cooldown_ms = self.config.suspicious_cooldown_secs * 1_000;
        self.suspicious_marks
            .lock()
            .retain(|_, &mut last| now_ms.saturating_sub(last) < suspicious_cooldown_ms);

        let violation_window_ms = self.config.violation_window_secs * 1_000;
        self.violations.lock().retain(|_, entries| {
            while entries
                .front()
                .is_some_and(|&ts| now_ms.saturating_sub(ts) >= violation_window_ms)
            {
                entries.pop_front();
            }
            !entries.is_empty()
        });

        let fanout_window_ms = self.config.endpoint_fanout_window_secs * 1_000;
        self.fanout.lock().retain(|_, entries| {
            while entries
                .front()
                .is_some_and(|&(ts, _)| now_ms.saturating_sub(ts) >= fanout_window_ms)
            {
                entries.pop_front();
            }
            !entries.is_empty()
        });

        let auth_window_ms = self.config.auth_failure_window_secs * 1_000;
        self.auth_failures.lock().retain(|_, entries| {
            while entries
                .front()
                .is_some_and(|&ts| now_ms.saturating_sub(ts) >= auth_window_ms)
            {
                entries.pop_front();
            }
            !entries.is_empty()
        });

        let retention_ms =
            self.config.usage_bucket_secs * 1_000 * self.config.usage_retention_buckets as u64;
        self.usage.lock().retain(|_, buckets| {
            buckets
                .back()
                .is_some_and(|b| now_ms.saturating_sub(b.start_ms) < retention_ms)
        });
    }

    /// Returns true when the heuristic may fire for this identity, and
    /// records the firing time.
    fn mark_suspicious(&self, identity: &str, heuristic: &str, now_ms: u64) -> bool {
        let cooldown_ms = self.config.suspicious_cooldown_secs * 1_000;
        let mark_key = format!("{}|{}", identity, heuristic);
        let mut marks = self.suspicious_marks.lock();
        if let Some(&last) = marks.get(&mark_key) {
            if now_ms.saturating_sub(last) < cooldown_ms {
                return false;
            }
        }
        marks.insert(mark_key, now_ms);
        true
    }
}

/// Periodically sweep stale monitor bookkeeping, mirroring the memory
/// store's idle-window purge. Runs detached from request threads.
pub fn spawn_monitor_purge(
    monitor: Arc<UsageMonitor>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let now_ms = monitor.clock.now_ms();
            monitor.purge_stale(now_ms);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::Result;
    use crate::limiter::{RateLimitRule, Scope};
    use async_trait::async_trait;

    struct CapturingNotifier {
        received: Mutex<Vec<Alert>>,
    }

    #[async_trait]
    impl Notifier for CapturingNotifier {
        async fn notify(&self, alert: Alert) -> Result<()> {
            self.received.lock().push(alert);
            Ok(())
        }
    }

    fn rule(max: u64) -> Arc<RateLimitRule> {
        Arc::new(RateLimitRule {
            category: "api".to_string(),
            scope: Scope::Ip,
            max_requests: max,
            window_seconds: 3_600,
            message: "Too many requests".to_string(),
            localized_message: None,
            bypass_scopes: Vec::new(),
        })
    }

    fn decision(rule: &Arc<RateLimitRule>, allowed: bool, remaining: u64) -> Decision {
        Decision {
            allowed,
            limit: rule.max_requests,
            remaining,
            reset_at: Utc::now(),
            retry_after_secs: (!allowed).then_some(60),
            rule: rule.clone(),
        }
    }

    fn setup(
        config: MonitorConfig,
        clock: Arc<ManualClock>,
    ) -> (UsageMonitor, Arc<CapturingNotifier>) {
        let notifier = Arc::new(CapturingNotifier {
            received: Mutex::new(Vec::new()),
        });
        let dispatcher = AlertDispatcher::spawn(notifier.clone(), 64);
        (UsageMonitor::new(config, clock, dispatcher), notifier)
    }

    async fn drain() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_threshold_fires_once_per_cooldown() {
        let clock = Arc::new(ManualClock::new(10_000_000));
        let config = MonitorConfig {
            threshold_percents: vec![80],
            threshold_cooldown_secs: 300,
            ..Default::default()
        };
        let (monitor, notifier) = setup(config, clock.clone());
        let rule = rule(100);
        let key = RateLimitKey::new(Scope::Ip, "203.0.113.7", "api");

        // 79% used: below the threshold, nothing fires.
        monitor.observe(&key, &decision(&rule, true, 21));
        // 80% used: exactly one alert.
        monitor.observe(&key, &decision(&rule, true, 20));
        // Sustained above threshold within the cool-down: no repeat.
        clock.advance_ms(30_000);
        monitor.observe(&key, &decision(&rule, true, 15));

        drain().await;
        let received = notifier.received.lock();
        let thresholds: Vec<_> = received
            .iter()
            .filter(|a| a.kind == AlertKind::Threshold)
            .collect();
        assert_eq!(thresholds.len(), 1);
        assert_eq!(thresholds[0].metadata["threshold_percent"], 80);
    }

    #[tokio::test]
    async fn test_threshold_refires_after_cooldown() {
        let clock = Arc::new(ManualClock::new(10_000_000));
        let config = MonitorConfig {
            threshold_percents: vec![80],
            threshold_cooldown_secs: 300,
            ..Default::default()
        };
        let (monitor, notifier) = setup(config, clock.clone());
        let rule = rule(100);
        let key = RateLimitKey::new(Scope::Ip, "203.0.113.7", "api");

        monitor.observe(&key, &decision(&rule, true, 20));
        clock.advance_ms(301_000);
        monitor.observe(&key, &decision(&rule, true, 20));

        drain().await;
        assert_eq!(notifier.received.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_violation_severity_escalates() {
        let clock = Arc::new(ManualClock::new(10_000_000));
        let config = MonitorConfig {
            threshold_percents: Vec::new(),
            violation_window_secs: 300,
            violation_high_count: 3,
            violation_critical_count: 5,
            ..Default::default()
        };
        let (monitor, notifier) = setup(config, clock.clone());
        let rule = rule(10);
        let key = RateLimitKey::new(Scope::User, "u-1", "api");

        for _ in 0..5 {
            monitor.observe(&key, &decision(&rule, false, 0));
            clock.advance_ms(1_000);
        }

        drain().await;
        let received = notifier.received.lock();
        let severities: Vec<Severity> = received.iter().map(|a| a.severity).collect();
        assert_eq!(
            severities,
            vec![
                Severity::Warning,
                Severity::Warning,
                Severity::High,
                Severity::High,
                Severity::Critical,
            ]
        );
    }

    #[tokio::test]
    async fn test_violations_outside_window_do_not_escalate() {
        let clock = Arc::new(ManualClock::new(10_000_000));
        let config = MonitorConfig {
            threshold_percents: Vec::new(),
            violation_window_secs: 10,
            violation_high_count: 2,
            ..Default::default()
        };
        let (monitor, notifier) = setup(config, clock.clone());
        let rule = rule(10);
        let key = RateLimitKey::new(Scope::User, "u-1", "api");

        monitor.observe(&key, &decision(&rule, false, 0));
        clock.advance_ms(11_000);
        monitor.observe(&key, &decision(&rule, false, 0));

        drain().await;
        let received = notifier.received.lock();
        assert!(received.iter().all(|a| a.severity == Severity::Warning));
    }

    #[tokio::test]
    async fn test_endpoint_fanout_heuristic() {
        let clock = Arc::new(ManualClock::new(10_000_000));
        let config = MonitorConfig {
            endpoint_fanout_threshold: 10,
            endpoint_fanout_window_secs: 60,
            ..Default::default()
        };
        let (monitor, notifier) = setup(config, clock.clone());

        for i in 0..9 {
            monitor.observe_request("u-1", &format!("/v1/e{}", i), false, clock.now_ms());
            clock.advance_ms(100);
        }
        drain().await;
        assert!(notifier.received.lock().is_empty());

        monitor.observe_request("u-1", "/v1/e9", false, clock.now_ms());
        drain().await;
        let received = notifier.received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].kind, AlertKind::Suspicious);
        assert_eq!(received[0].metadata["heuristic"], "endpoint_fanout");
    }

    #[tokio::test]
    async fn test_repeat_endpoints_are_not_fanout() {
        let clock = Arc::new(ManualClock::new(10_000_000));
        let config = MonitorConfig {
            endpoint_fanout_threshold: 10,
            ..Default::default()
        };
        let (monitor, notifier) = setup(config, clock.clone());

        // Many requests to one endpoint: volume, not probing.
        for _ in 0..50 {
            monitor.observe_request("u-1", "/v1/items", false, clock.now_ms());
            clock.advance_ms(100);
        }

        drain().await;
        assert!(notifier.received.lock().is_empty());
    }

    #[tokio::test]
    async fn test_auth_failure_heuristic() {
        let clock = Arc::new(ManualClock::new(10_000_000));
        let config = MonitorConfig {
            auth_failure_threshold: 3,
            auth_failure_window_secs: 300,
            endpoint_fanout_threshold: 100,
            ..Default::default()
        };
        let (monitor, notifier) = setup(config, clock.clone());

        monitor.observe_request("u-1", "/login", true, clock.now_ms());
        monitor.observe_request("u-1", "/login", true, clock.now_ms());
        drain().await;
        assert!(notifier.received.lock().is_empty());

        monitor.observe_request("u-1", "/login", true, clock.now_ms());
        drain().await;
        let received = notifier.received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].metadata["heuristic"], "auth_failures");
    }

    #[tokio::test]
    async fn test_purge_stale_reclaims_idle_identities() {
        let clock = Arc::new(ManualClock::new(10_000_000));
        let (monitor, _notifier) = setup(MonitorConfig::default(), clock.clone());
        let rule = rule(10);

        // 1,000 distinct clients, each leaving a threshold mark, a fan-out
        // entry, and an auth failure behind.
        for i in 0..1_000 {
            let key =
                RateLimitKey::new(Scope::Ip, format!("10.0.{}.{}", i / 256, i % 256), "api");
            monitor.observe(&key, &decision(&rule, true, 2));
            monitor.observe_request(&format!("u-{}", i), "/v1/items", true, clock.now_ms());
        }
        assert_eq!(monitor.threshold_marks.lock().len(), 1_000);
        assert_eq!(monitor.fanout.lock().len(), 1_000);
        assert_eq!(monitor.auth_failures.lock().len(), 1_000);

        // A day later every mark and window entry has expired; only the one
        // still-active identity survives the sweep.
        clock.advance_ms(24 * 3_600 * 1_000);
        monitor.observe_request("u-live", "/v1/items", true, clock.now_ms());
        monitor.purge_stale(clock.now_ms());

        assert!(monitor.threshold_marks.lock().is_empty());
        assert!(monitor.suspicious_marks.lock().is_empty());
        assert!(monitor.violations.lock().is_empty());
        assert!(monitor.usage.lock().is_empty());
        assert_eq!(monitor.fanout.lock().len(), 1);
        assert_eq!(monitor.auth_failures.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_usage_buckets_roll_off() {
        let clock = Arc::new(ManualClock::new(0));
        let config = MonitorConfig {
            threshold_percents: Vec::new(),
            usage_bucket_secs: 60,
            usage_retention_buckets: 2,
            ..Default::default()
        };
        let (monitor, _notifier) = setup(config, clock.clone());
        let rule = rule(100);
        let key = RateLimitKey::new(Scope::Ip, "203.0.113.7", "api");

        for _ in 0..3 {
            monitor.observe(&key, &decision(&rule, true, 99));
            monitor.observe(&key, &decision(&rule, false, 0));
            clock.advance_ms(60_000);
        }

        let snapshots = monitor.snapshot("api");
        assert_eq!(snapshots.len(), 2);
        for snapshot in &snapshots {
            assert_eq!(snapshot.allowed, 1);
            assert_eq!(snapshot.denied, 1);
        }
        assert!(monitor.snapshot("other").is_empty());
    }
}
