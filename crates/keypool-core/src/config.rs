use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PoolError, PoolResult};
use crate::keyspace::{validate_segment, KeySpace};

const MAX_TTL_MS: u64 = i64::MAX as u64;

/// What a component does when the shared store cannot be reached.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackMode {
    /// Fail closed with [`PoolError::StoreUnavailable`].
    Strict,
    /// Keep serving: random lease indices without exclusivity, empty ledger
    /// reads, dropped ledger writes.
    #[default]
    Lenient,
}

impl FromStr for FallbackMode {
    type Err = PoolError;

    fn from_str(s: &str) -> PoolResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(FallbackMode::Strict),
            "lenient" => Ok(FallbackMode::Lenient),
            other => Err(PoolError::Config(format!(
                "unknown fallback mode {other:?} (expected \"strict\" or \"lenient\")"
            ))),
        }
    }
}

/// Configuration shared by the lease pool, memoizer and ledger.
///
/// Every field has a default, so a TOML file only needs the keys it changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeypoolConfig {
    /// Application prefix for every store key.
    pub prefix: String,
    /// Network tag, so one store can serve several chains.
    pub network: String,
    /// Upper bound on leasable indices per resource.
    pub max_capacity: u32,
    /// Lease time-to-live in milliseconds.
    pub lease_ttl_ms: u64,
    /// Expiry of memoized values, in seconds.
    pub cache_ttl_secs: u64,
    /// Default number of entries returned by ledger reads.
    pub ledger_limit: usize,
    /// Behaviour when the store is unreachable.
    pub fallback: FallbackMode,
}

impl Default for KeypoolConfig {
    fn default() -> Self {
        Self {
            prefix: "FLOW".into(),
            network: "emulator".into(),
            max_capacity: 1,
            lease_ttl_ms: 60_000,
            cache_ttl_secs: 1_800,
            ledger_limit: 20,
            fallback: FallbackMode::Lenient,
        }
    }
}

impl KeypoolConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> PoolResult<Self> {
        toml::from_str(s).map_err(|e| PoolError::Config(e.to_string()))
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> PoolResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PoolError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> PoolResult<String> {
        toml::to_string_pretty(self).map_err(|e| PoolError::Config(e.to_string()))
    }

    /// Apply `KEYPOOL_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> PoolResult<()> {
        self.apply_env_with(|name| std::env::var(name).ok())
    }

    /// Apply `KEYPOOL_*` overrides from an arbitrary lookup.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> PoolResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("KEYPOOL_PREFIX") {
            self.prefix = v;
        }
        if let Some(v) = lookup("KEYPOOL_NETWORK") {
            self.network = v;
        }
        if let Some(v) = lookup("KEYPOOL_MAX_CAPACITY") {
            self.max_capacity = parse_env("KEYPOOL_MAX_CAPACITY", &v)?;
        }
        if let Some(v) = lookup("KEYPOOL_LEASE_TTL_MS") {
            self.lease_ttl_ms = parse_env("KEYPOOL_LEASE_TTL_MS", &v)?;
        }
        if let Some(v) = lookup("KEYPOOL_CACHE_TTL_SECS") {
            self.cache_ttl_secs = parse_env("KEYPOOL_CACHE_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("KEYPOOL_FALLBACK") {
            self.fallback = v.parse()?;
        }
        Ok(())
    }

    /// Check that the configuration can produce a usable key space.
    pub fn validate(&self) -> PoolResult<()> {
        validate_segment("prefix", &self.prefix)?;
        validate_segment("network", &self.network)?;
        if self.lease_ttl_ms == 0 {
            return Err(PoolError::Config("lease_ttl_ms must be positive".into()));
        }
        if self.cache_ttl_secs == 0 {
            return Err(PoolError::Config("cache_ttl_secs must be positive".into()));
        }
        // Expiry instants are i64 milliseconds.
        if self.lease_ttl_ms > MAX_TTL_MS {
            return Err(PoolError::Config(format!(
                "lease_ttl_ms must be at most {MAX_TTL_MS}"
            )));
        }
        if self.cache_ttl_secs > MAX_TTL_MS / 1000 {
            return Err(PoolError::Config(format!(
                "cache_ttl_secs must be at most {}",
                MAX_TTL_MS / 1000
            )));
        }
        Ok(())
    }

    pub fn key_space(&self) -> PoolResult<KeySpace> {
        KeySpace::new(self.prefix.clone(), self.network.clone())
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

fn parse_env<T: FromStr>(name: &str, raw: &str) -> PoolResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| PoolError::Config(format!("{name}: cannot parse {raw:?}")))
}
