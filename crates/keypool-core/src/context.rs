use std::sync::Arc;

use keypool_store::{Clock, SharedStore, SystemClock};

use crate::config::KeypoolConfig;
use crate::error::PoolResult;
use crate::lease::{Lease, LeasePool};
use crate::memo::Memoizer;
use crate::recency::RecencyLedger;

/// The three keypool components wired to one store and key space.
///
/// Cheap to clone and to rebuild per request: it owns nothing but handles.
#[derive(Clone, Debug)]
pub struct Keypool {
    config: KeypoolConfig,
    leases: LeasePool,
    cache: Memoizer,
    ledger: RecencyLedger,
}

impl Keypool {
    /// Build from a validated configuration on the system clock.
    pub fn new(config: KeypoolConfig, store: Arc<dyn SharedStore>) -> PoolResult<Self> {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: KeypoolConfig,
        store: Arc<dyn SharedStore>,
        clock: Arc<dyn Clock>,
    ) -> PoolResult<Self> {
        config.validate()?;
        let keys = config.key_space()?;

        let leases = LeasePool::with_clock(
            Arc::clone(&store),
            keys.clone(),
            Arc::clone(&clock),
            config.fallback,
        );
        let cache = Memoizer::new(Arc::clone(&store), keys.clone(), config.cache_ttl());
        let ledger = RecencyLedger::with_clock(store, keys, clock, config.fallback)
            .with_default_limit(config.ledger_limit);

        Ok(Self {
            config,
            leases,
            cache,
            ledger,
        })
    }

    pub fn config(&self) -> &KeypoolConfig {
        &self.config
    }

    pub fn leases(&self) -> &LeasePool {
        &self.leases
    }

    pub fn cache(&self) -> &Memoizer {
        &self.cache
    }

    pub fn ledger(&self) -> &RecencyLedger {
        &self.ledger
    }

    /// Acquire with the configured capacity and TTL.
    pub async fn acquire_default(&self, resource_id: &str) -> PoolResult<Lease> {
        self.leases
            .acquire(resource_id, self.config.max_capacity, self.config.lease_ttl())
            .await
    }
}
