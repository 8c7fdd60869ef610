//! Configuration management for Floodgate.
//!
//! The whole surface is loaded once at startup; there is no hot reload.
//! Every entry is validated eagerly so a bad rule or allow-list entry
//! fails the process instead of silently disabling protection.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::admission::AllowList;
use crate::error::{FloodgateError, Result};
use crate::limiter::{RateLimitRule, RuleRegistry};
use crate::monitor::MonitorConfig;

/// Main configuration for a Floodgate limiter instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FloodgateConfig {
    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Rate limit rules, one per category
    #[serde(default)]
    pub rules: Vec<RateLimitRule>,

    /// Proxies whose forwarded-for headers are trusted (IPs or CIDR blocks)
    #[serde(default)]
    pub trusted_proxies: Vec<String>,

    /// Identities exempt from limiting (user ids, IPs, or CIDR blocks)
    #[serde(default)]
    pub allowlist: Vec<String>,

    /// Monitoring and alerting knobs
    #[serde(default)]
    pub monitoring: MonitorConfig,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Shared Redis store URL. When absent, counting is in-process only.
    pub redis_url: Option<String>,

    /// Prefix for all store keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Hard bound on one store round trip, in milliseconds
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,

    /// Health probe interval in seconds
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,

    /// Consecutive successful probes required before leaving degraded mode
    #[serde(default = "default_recovery_probes")]
    pub recovery_probes: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: default_key_prefix(),
            op_timeout_ms: default_op_timeout_ms(),
            probe_interval_secs: default_probe_interval(),
            recovery_probes: default_recovery_probes(),
        }
    }
}

fn default_key_prefix() -> String {
    "floodgate:".to_string()
}

fn default_op_timeout_ms() -> u64 {
    50
}

fn default_probe_interval() -> u64 {
    5
}

fn default_recovery_probes() -> u32 {
    3
}

impl FloodgateConfig {
    /// Load and validate configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: FloodgateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| FloodgateError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every entry. Errors here are fatal at startup.
    pub fn validate(&self) -> Result<()> {
        RuleRegistry::from_rules(self.rules.clone())?;
        AllowList::from_entries(&self.allowlist)?;
        crate::admission::parse_networks(&self.trusted_proxies)?;

        for &percent in &self.monitoring.threshold_percents {
            if percent == 0 || percent > 100 {
                return Err(FloodgateError::Config(format!(
                    "Threshold percent {} out of range (1-100)",
                    percent
                )));
            }
        }
        if self.store.op_timeout_ms == 0 {
            return Err(FloodgateError::Config(
                "store.op_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
