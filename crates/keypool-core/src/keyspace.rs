//! Store key layout.
//!
//! Every key starts with an application prefix and a network tag so that
//! several deployments (or several chains) can share one store:
//!
//! - `{prefix}:SERVICE_POOL:{network}:ADDRESS:{id}:SORTED_SET` -- lease pool
//! - `{prefix}:SERVICE_POOL:{network}:ADDRESS:{id}:KEY_VALUE` -- capacity counter
//! - `{prefix}:SERVICE_CACHE:{network}:KEY_VALUE:{key}` -- memoized value
//! - `{prefix}:SERVICE_POOL:{network}:DATA:{channel}:SORTED_SET` -- recency ledger

use crate::error::{PoolError, PoolResult};

/// Characters that would break the `:`-separated layout or are
/// easy to mistype in a shell.
const FORBIDDEN_CHARS: &[char] = &[':', ' ', '\t', '\n', '\r'];

/// Validate a prefix or network tag.
pub fn validate_segment(kind: &'static str, value: &str) -> PoolResult<()> {
    if value.is_empty() {
        return Err(PoolError::InvalidName {
            kind,
            name: value.to_string(),
            reason: "must not be empty".into(),
        });
    }
    if let Some(ch) = value.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        return Err(PoolError::InvalidName {
            kind,
            name: value.to_string(),
            reason: format!("contains forbidden character: {ch:?}"),
        });
    }
    Ok(())
}

/// Validate a logical name (resource id, cache key, channel).
///
/// Logical names sit at a fixed position in the key, so `:` is allowed;
/// only emptiness is rejected.
pub fn validate_name(kind: &'static str, value: &str) -> PoolResult<()> {
    if value.is_empty() {
        return Err(PoolError::InvalidName {
            kind,
            name: String::new(),
            reason: "must not be empty".into(),
        });
    }
    Ok(())
}

/// Builds namespaced store keys for one prefix and network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
    network: String,
}

impl KeySpace {
    /// Create a key space, rejecting prefixes or networks that would corrupt
    /// the key layout.
    pub fn new(prefix: impl Into<String>, network: impl Into<String>) -> PoolResult<Self> {
        let prefix = prefix.into();
        let network = network.into();
        validate_segment("prefix", &prefix)?;
        validate_segment("network", &network)?;
        Ok(Self { prefix, network })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    /// Sorted set holding every index of a resource pool.
    pub fn lease_pool(&self, resource_id: &str) -> String {
        format!(
            "{}:SERVICE_POOL:{}:ADDRESS:{resource_id}:SORTED_SET",
            self.prefix, self.network
        )
    }

    /// Scalar high-water mark of a resource pool.
    pub fn capacity_counter(&self, resource_id: &str) -> String {
        format!(
            "{}:SERVICE_POOL:{}:ADDRESS:{resource_id}:KEY_VALUE",
            self.prefix, self.network
        )
    }

    pub fn cache_entry(&self, key: &str) -> String {
        format!("{}:SERVICE_CACHE:{}:KEY_VALUE:{key}", self.prefix, self.network)
    }

    pub fn ledger_channel(&self, channel: &str) -> String {
        format!(
            "{}:SERVICE_POOL:{}:DATA:{channel}:SORTED_SET",
            self.prefix, self.network
        )
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self {
            prefix: "FLOW".into(),
            network: "emulator".into(),
        }
    }
}
