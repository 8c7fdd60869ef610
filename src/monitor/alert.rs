//! Alerts and non-blocking dispatch.
//!
//! Alerts are fire-and-forget: the monitor hands them to a bounded channel
//! and a detached task drains the channel into the notifier. A slow or
//! unavailable notifier can therefore never add latency to an admission
//! decision, and a full channel drops the alert with a log line rather
//! than blocking.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;

/// Alert classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Usage crossed a configured percentage of a limit.
    Threshold,
    /// A request was denied.
    Violation,
    /// A request-stream heuristic fired.
    Suspicious,
}

/// Alert severity, escalated for repeat offenders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    High,
    Critical,
}

/// A single emitted alert. The core guarantees emission, not delivery.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: Uuid,
    pub kind: AlertKind,
    pub severity: Severity,
    /// The window key or identity the alert concerns.
    pub key: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

impl Alert {
    pub fn new(
        kind: AlertKind,
        severity: Severity,
        key: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            severity,
            key: key.into(),
            timestamp: Utc::now(),
            metadata,
        }
    }
}

/// External alerting collaborator. No return contract is relied upon;
/// delivery reliability is the notifier's own responsibility.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: Alert) -> Result<()>;
}

/// Default notifier that writes alerts to the log stream.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: Alert) -> Result<()> {
        warn!(
            id = %alert.id,
            kind = ?alert.kind,
            severity = ?alert.severity,
            key = %alert.key,
            metadata = %alert.metadata,
            "Rate limit alert"
        );
        Ok(())
    }
}

/// Hands alerts to a background drain task through a bounded channel.
#[derive(Clone)]
pub struct AlertDispatcher {
    tx: mpsc::Sender<Alert>,
}

impl AlertDispatcher {
    /// Spawn the drain task and return the dispatch handle.
    pub fn spawn(notifier: Arc<dyn Notifier>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Alert>(capacity);
        tokio::spawn(async move {
            while let Some(alert) = rx.recv().await {
                if let Err(e) = notifier.notify(alert).await {
                    // Swallowed: the core never retries deliveries.
                    debug!(error = %e, "Alert delivery failed");
                }
            }
        });
        Self { tx }
    }

    /// Enqueue an alert without blocking. Dropped with a log line when the
    /// channel is full.
    pub fn dispatch(&self, alert: Alert) {
        if let Err(mpsc::error::TrySendError::Full(alert)) = self.tx.try_send(alert) {
            warn!(key = %alert.key, kind = ?alert.kind, "Alert channel full, dropping alert");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Notifier that records everything it receives.
    pub(crate) struct CapturingNotifier {
        pub received: Mutex<Vec<Alert>>,
    }

    impl CapturingNotifier {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self {
                received: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Notifier for CapturingNotifier {
        async fn notify(&self, alert: Alert) -> Result<()> {
            self.received.lock().push(alert);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dispatch_reaches_notifier() {
        let notifier = CapturingNotifier::new();
        let dispatcher = AlertDispatcher::spawn(notifier.clone(), 16);

        dispatcher.dispatch(Alert::new(
            AlertKind::Violation,
            Severity::Warning,
            "rl|api|ip|203.0.113.7",
            serde_json::json!({"count": 3}),
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let received = notifier.received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].kind, AlertKind::Violation);
    }

    #[tokio::test]
    async fn test_full_channel_drops_instead_of_blocking() {
        struct StuckNotifier;

        #[async_trait]
        impl Notifier for StuckNotifier {
            async fn notify(&self, _alert: Alert) -> Result<()> {
                std::future::pending::<()>().await;
                Ok(())
            }
        }

        let dispatcher = AlertDispatcher::spawn(Arc::new(StuckNotifier), 1);

        // Never blocks, regardless of how stuck the notifier is.
        for _ in 0..100 {
            dispatcher.dispatch(Alert::new(
                AlertKind::Threshold,
                Severity::Info,
                "k",
                serde_json::Value::Null,
            ));
        }
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }
}
