//! Rate limit rules and the rule registry.
//!
//! Rules are configured once at startup and are read-only thereafter. All
//! invariants are validated when the registry is built so that a bad entry
//! fails startup instead of surfacing in the request path.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{FloodgateError, Result};

use super::key::Scope;

/// Upper bound on a rule window (one year). Keeps the millisecond window
/// arithmetic comfortably inside `u64`.
const MAX_WINDOW_SECONDS: u64 = 366 * 24 * 3_600;

/// A named rate limit: category, scope, limit, window, and messaging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// Category name, e.g. "api", "login", "password_reset".
    pub category: String,
    /// The dimension requests are keyed on.
    pub scope: Scope,
    /// Maximum requests allowed in the window. Must be positive.
    pub max_requests: u64,
    /// Window length in seconds. Must be positive.
    pub window_seconds: u64,
    /// Default user-facing message for denials.
    pub message: String,
    /// Optional locale-appropriate message; the caller picks at render time.
    #[serde(default)]
    pub localized_message: Option<String>,
    /// Scope ids exempt from this rule (exact match).
    #[serde(default)]
    pub bypass_scopes: Vec<String>,
}

impl RateLimitRule {
    pub fn window_ms(&self) -> u64 {
        self.window_seconds * 1_000
    }

    fn validate(&self) -> Result<()> {
        if self.category.is_empty() {
            return Err(FloodgateError::Config(
                "Rate limit rule has an empty category".to_string(),
            ));
        }
        if self.max_requests == 0 {
            return Err(FloodgateError::Config(format!(
                "Rule '{}' has non-positive max_requests",
                self.category
            )));
        }
        if self.window_seconds == 0 {
            return Err(FloodgateError::Config(format!(
                "Rule '{}' has non-positive window_seconds",
                self.category
            )));
        }
        if self.window_seconds > MAX_WINDOW_SECONDS {
            return Err(FloodgateError::Config(format!(
                "Rule '{}' window_seconds exceeds the {} second maximum",
                self.category, MAX_WINDOW_SECONDS
            )));
        }
        Ok(())
    }
}

/// Read-only registry of rules indexed by category.
#[derive(Debug, Default)]
pub struct RuleRegistry {
    rules: HashMap<String, Arc<RateLimitRule>>,
}

impl RuleRegistry {
    /// Build a registry, rejecting invalid or duplicate entries.
    pub fn from_rules(rules: Vec<RateLimitRule>) -> Result<Self> {
        let mut map = HashMap::with_capacity(rules.len());
        for rule in rules {
            rule.validate()?;
            if map.contains_key(&rule.category) {
                return Err(FloodgateError::Config(format!(
                    "Duplicate rate limit category '{}'",
                    rule.category
                )));
            }
            map.insert(rule.category.clone(), Arc::new(rule));
        }
        info!(rule_count = map.len(), "Rate limit rules registered");
        Ok(Self { rules: map })
    }

    /// Look up the rule for a category.
    pub fn get(&self, category: &str) -> Option<Arc<RateLimitRule>> {
        self.rules.get(category).cloned()
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
