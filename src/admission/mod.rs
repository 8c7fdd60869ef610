//! Admission orchestration.
//!
//! The entry point every protected endpoint calls: resolves request
//! identity, applies bypass policy, runs each applicable rule through the
//! sliding window strategy, and renders the composed decision. The
//! controller is an explicit instance with injected dependencies, passed by
//! the caller rather than looked up globally, so independently configured
//! limiters can coexist and tests can wire in fakes.

pub mod allowlist;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use ipnet::IpNet;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::FloodgateConfig;
use crate::error::{FloodgateError, Result};
use crate::limiter::{Decision, RateLimitKey, RuleRegistry, Scope, SlidingWindow};
use crate::monitor::alert::{AlertDispatcher, Notifier};
use crate::monitor::{spawn_monitor_purge, UsageMonitor};
use crate::store::memory::spawn_purge_task;
use crate::store::{CounterStore, MemoryStore, RedisStore, StoreHealth, spawn_health_probe};

pub use allowlist::AllowList;

/// Everything the orchestrator needs to know about one inbound request.
/// Identity is supplied by the caller's auth layer, never derived here.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Authenticated user id, when the auth subsystem produced one.
    pub user_id: Option<String>,
    /// Address of the direct peer connection.
    pub remote_addr: IpAddr,
    /// Raw forwarded-for header value, if any. Only honored when the direct
    /// peer is a configured trusted proxy.
    pub forwarded_for: Option<String>,
    /// Endpoint path, used for endpoint-scoped rules and heuristics.
    pub endpoint: String,
    /// Caller-supplied flag marking this request as a failed authentication.
    pub auth_failed: bool,
}

impl RequestContext {
    pub fn new(remote_addr: IpAddr, endpoint: impl Into<String>) -> Self {
        Self {
            user_id: None,
            remote_addr,
            forwarded_for: None,
            endpoint: endpoint.into(),
            auth_failed: false,
        }
    }
}

/// The admission orchestrator.
pub struct AdmissionController {
    registry: Arc<RuleRegistry>,
    strategy: SlidingWindow,
    allowlist: AllowList,
    trusted_proxies: Vec<IpNet>,
    monitor: Option<Arc<UsageMonitor>>,
}

impl AdmissionController {
    pub fn new(
        registry: Arc<RuleRegistry>,
        strategy: SlidingWindow,
        allowlist: AllowList,
        trusted_proxies: Vec<IpNet>,
        monitor: Option<Arc<UsageMonitor>>,
    ) -> Self {
        Self {
            registry,
            strategy,
            allowlist,
            trusted_proxies,
            monitor,
        }
    }

    /// Assemble the full limiter from configuration: stores, health probe,
    /// fallback purge, monitor, and alert dispatch. Must run inside a tokio
    /// runtime since it spawns the background tasks. Any invalid
    /// configuration fails here, at startup.
    pub fn from_config(
        config: &FloodgateConfig,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let registry = Arc::new(RuleRegistry::from_rules(config.rules.clone())?);
        let allowlist = AllowList::from_entries(&config.allowlist)?;
        let trusted_proxies = parse_networks(&config.trusted_proxies)?;

        let fallback = Arc::new(MemoryStore::new());
        let health = Arc::new(StoreHealth::new(config.store.recovery_probes));

        let primary: Option<Arc<dyn CounterStore>> = match config.store.redis_url {
            Some(ref url) => {
                let store = Arc::new(RedisStore::new(
                    url,
                    &config.store.key_prefix,
                    Duration::from_millis(config.store.op_timeout_ms),
                )?);
                spawn_health_probe(
                    store.clone(),
                    health.clone(),
                    Duration::from_secs(config.store.probe_interval_secs),
                );
                info!(url = %url, "Shared counter store configured");
                Some(store)
            }
            None => {
                info!("No shared counter store configured, counting in-process only");
                None
            }
        };

        // Fallback windows are garbage-collected lazily per request; the
        // sweep reclaims keys that stopped receiving traffic.
        let longest_window = config
            .rules
            .iter()
            .map(|r| r.window_seconds)
            .max()
            .unwrap_or(3_600);
        spawn_purge_task(
            fallback.clone(),
            clock.clone(),
            Duration::from_secs(60),
            Duration::from_secs(longest_window * 3),
        );

        let dispatcher = AlertDispatcher::spawn(notifier, 256);
        let monitor = Arc::new(UsageMonitor::new(
            config.monitoring.clone(),
            clock.clone(),
            dispatcher,
        ));
        // Same cadence as the fallback-store sweep: monitor bookkeeping for
        // idle identities must not outlive its cool-downs and windows.
        spawn_monitor_purge(monitor.clone(), Duration::from_secs(60));

        let strategy = SlidingWindow::new(primary, fallback, health, clock);

        Ok(Self::new(
            registry,
            strategy,
            allowlist,
            trusted_proxies,
            Some(monitor),
        ))
    }

    /// Evaluate one request against the given rule categories.
    ///
    /// Composition is logical AND: the request is denied if any applicable
    /// rule denies it, and the largest `retry_after` among denying rules is
    /// surfaced. A slot consumed on a rule that allowed is not rolled back
    /// when a later rule denies; the allowed rule slightly over-counts
    /// during denials.
    pub async fn evaluate(
        &self,
        ctx: &RequestContext,
        categories: &[&str],
    ) -> Result<Decision> {
        if categories.is_empty() {
            return Err(FloodgateError::Config(
                "evaluate called with no categories".to_string(),
            ));
        }

        // Resolve every rule up front so an unknown category fails before
        // any slot is consumed.
        let mut rules = Vec::with_capacity(categories.len());
        for category in categories {
            let rule = self
                .registry
                .get(category)
                .ok_or_else(|| FloodgateError::UnknownCategory(category.to_string()))?;
            rules.push(rule);
        }

        let client_ip = self.client_ip(ctx);
        let identity = ctx
            .user_id
            .clone()
            .unwrap_or_else(|| client_ip.to_string());
        let now_ms = self.strategy.clock().now_ms();

        // Global allow-list short-circuits without touching any store.
        let id_allowed = ctx
            .user_id
            .as_deref()
            .is_some_and(|id| self.allowlist.contains_id(id));
        if id_allowed || self.allowlist.contains_ip(client_ip) {
            debug!(identity = %identity, "Request bypassed via allow-list");
            return Ok(Decision::bypass(rules[0].clone(), now_ms));
        }

        let mut denied: Option<Decision> = None;
        let mut allowed: Option<Decision> = None;

        for rule in &rules {
            let scope_id = self.scope_id(rule.scope, ctx, client_ip);

            if rule.bypass_scopes.iter().any(|s| s == &scope_id) {
                debug!(category = %rule.category, scope_id = %scope_id, "Rule bypassed");
                continue;
            }

            let key = RateLimitKey::new(rule.scope, scope_id, rule.category.clone());
            let decision = self.strategy.check(&key, rule).await;

            if let Some(ref monitor) = self.monitor {
                monitor.observe(&key, &decision);
            }

            if decision.allowed {
                // Surface the tightest remaining quota among allowing rules.
                let tighter = allowed
                    .as_ref()
                    .is_none_or(|prev| decision.remaining < prev.remaining);
                if tighter {
                    allowed = Some(decision);
                }
            } else {
                let stricter = denied
                    .as_ref()
                    .is_none_or(|prev| decision.retry_after_secs > prev.retry_after_secs);
                if stricter {
                    denied = Some(decision);
                }
            }
        }

        if let Some(ref monitor) = self.monitor {
            monitor.observe_request(&identity, &ctx.endpoint, ctx.auth_failed, now_ms);
        }

        Ok(denied
            .or(allowed)
            .unwrap_or_else(|| Decision::bypass(rules[0].clone(), now_ms)))
    }

    /// Resolve the client IP with trusted-proxy precedence: the forwarded
    /// header counts only when the direct peer is a configured trusted
    /// proxy; otherwise the connection address wins. An untrusted
    /// forwarded-for header can therefore never spoof a bypass.
    fn client_ip(&self, ctx: &RequestContext) -> IpAddr {
        let peer_trusted = self
            .trusted_proxies
            .iter()
            .any(|net| net.contains(&ctx.remote_addr));

        if peer_trusted {
            if let Some(ref forwarded) = ctx.forwarded_for {
                // The first hop in a comma-separated list is the client.
                let first = forwarded.split(',').next().unwrap_or(forwarded).trim();
                if let Ok(ip) = first.parse() {
                    return ip;
                }
            }
        }

        ctx.remote_addr
    }

    fn scope_id(&self, scope: Scope, ctx: &RequestContext, client_ip: IpAddr) -> String {
        let user_or_ip = || {
            ctx.user_id
                .clone()
                .unwrap_or_else(|| client_ip.to_string())
        };
        match scope {
            Scope::User => user_or_ip(),
            Scope::Ip => client_ip.to_string(),
            Scope::Endpoint => ctx.endpoint.clone(),
            Scope::UserEndpoint => format!("{}:{}", user_or_ip(), ctx.endpoint),
            Scope::IpEndpoint => format!("{}:{}", client_ip, ctx.endpoint),
        }
    }

    pub fn monitor(&self) -> Option<&Arc<UsageMonitor>> {
        self.monitor.as_ref()
    }
}

/// Parse trusted-proxy entries: CIDR blocks or bare IPs.
pub(crate) fn parse_networks(entries: &[String]) -> Result<Vec<IpNet>> {
    entries
        .iter()
        .map(|entry| {
            if entry.contains('/') {
                entry.parse().map_err(|e| {
                    FloodgateError::Config(format!("Invalid trusted proxy '{}': {}", entry, e))
                })
            } else {
                entry
                    .parse::<IpAddr>()
                    .map(IpNet::from)
                    .map_err(|e| {
                        FloodgateError::Config(format!("Invalid trusted proxy '{}': {}", entry, e))
                    })
            }
        })
        .collect()
}
