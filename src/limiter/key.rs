//! Rate limit key generation and handling.

use serde::{Deserialize, Serialize};

/// The dimension an identity is keyed on for limiting purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Keyed on the authenticated user id (falls back to client IP when the
    /// request is anonymous).
    User,
    /// Keyed on the resolved client IP.
    Ip,
    /// Keyed on the endpoint path alone.
    Endpoint,
    /// Keyed on user identity and endpoint combined.
    UserEndpoint,
    /// Keyed on client IP and endpoint combined.
    IpEndpoint,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::User => "user",
            Scope::Ip => "ip",
            Scope::Endpoint => "endpoint",
            Scope::UserEndpoint => "user_endpoint",
            Scope::IpEndpoint => "ip_endpoint",
        }
    }
}

/// A key that uniquely identifies one sliding window.
///
/// Composed of the scope type, the resolved scope id, and the rule category.
/// Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub scope: Scope,
    pub scope_id: String,
    pub category: String,
}

impl RateLimitKey {
    pub fn new(scope: Scope, scope_id: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            scope,
            scope_id: scope_id.into(),
            category: category.into(),
        }
    }

    /// Stable store-key encoding.
    /// Format: "rl|{category}|{scope}|{scope_id}"
    /// We use | as delimiter since it's less common in categories and ids.
    pub fn to_store_key(&self) -> String {
        format!(
            "rl|{}|{}|{}",
            self.category,
            self.scope.as_str(),
            self.scope_id
        )
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_store_key())
    }
}
