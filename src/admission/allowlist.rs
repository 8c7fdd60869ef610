//! Typed allow-list for bypassed identities.
//!
//! Entries are parsed and validated at load time rather than compared as
//! raw strings in the request path: IPs and CIDR ranges become `IpNet`
//! values, everything else is an exact-match identity (user id, API key).

use std::collections::HashSet;
use std::net::IpAddr;

use ipnet::IpNet;

use crate::error::{FloodgateError, Result};

/// Allow-list supporting exact identity match and CIDR range match.
#[derive(Debug, Default, Clone)]
pub struct AllowList {
    exact: HashSet<String>,
    networks: Vec<IpNet>,
}

impl AllowList {
    /// Parse entries at load time. An entry containing `/` must be a valid
    /// CIDR block; a bare IP becomes a host-length network; anything else
    /// is an exact identity.
    pub fn from_entries(entries: &[String]) -> Result<Self> {
        let mut exact = HashSet::new();
        let mut networks = Vec::new();

        for entry in entries {
            if entry.contains('/') {
                let net: IpNet = entry.parse().map_err(|e| {
                    FloodgateError::Config(format!("Invalid CIDR allow-list entry '{}': {}", entry, e))
                })?;
                networks.push(net);
            } else if let Ok(ip) = entry.parse::<IpAddr>() {
                networks.push(IpNet::from(ip));
            } else {
                exact.insert(entry.clone());
            }
        }

        Ok(Self { exact, networks })
    }

    /// Exact identity match (user id, API key).
    pub fn contains_id(&self, id: &str) -> bool {
        self.exact.contains(id)
    }

    /// IP match against any configured network.
    pub fn contains_ip(&self, ip: IpAddr) -> bool {
        self.networks.iter().any(|net| net.contains(&ip))
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.networks.is_empty()
    }
}
