//! Time-bounded exclusive leases on resource indices.
//!
//! Each resource identity (typically a signing address) owns an index space
//! `0..capacity`. All indices live in one sorted set whose score is the
//! instant the index becomes available:
//!
//! - score `<= now`: available, idle since `score`
//! - score `> now`: leased until `score`
//!
//! `acquire` pops the lowest score. If it is already available it is
//! re-scored to `now + ttl` and handed out, so the longest-idle index is
//! always reused first. Otherwise the pool grows by one index, bounded by
//! `max_capacity` through the store's atomic `incr_below`. A lease that is
//! never released simply lapses when its score falls behind the clock.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use keypool_store::{deadline_after, Clock, SharedStore, StoreError, SystemClock};

use crate::config::FallbackMode;
use crate::error::{PoolError, PoolResult};
use crate::keyspace::{validate_name, KeySpace};

/// A granted lease on one resource index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Lease {
    /// Resource identity the index belongs to.
    pub resource_id: String,
    /// The leased index, in `0..max_capacity`.
    pub index: u32,
    /// Instant (ms since epoch) at which the lease lapses on its own.
    pub expires_at_ms: i64,
    /// `false` when the store was unreachable and the index was picked at
    /// random; such a lease carries no exclusivity guarantee.
    pub exclusive: bool,
}

/// Distributed pool of leasable indices.
///
/// Holds no state of its own; every instance over the same store and key
/// space sees the same pools, so it is cheap to build one per request.
#[derive(Clone)]
pub struct LeasePool {
    store: Arc<dyn SharedStore>,
    keys: KeySpace,
    clock: Arc<dyn Clock>,
    fallback: FallbackMode,
}

impl LeasePool {
    /// Create a lease pool on the system clock.
    pub fn new(store: Arc<dyn SharedStore>, keys: KeySpace, fallback: FallbackMode) -> Self {
        Self::with_clock(store, keys, Arc::new(SystemClock), fallback)
    }

    pub fn with_clock(
        store: Arc<dyn SharedStore>,
        keys: KeySpace,
        clock: Arc<dyn Clock>,
        fallback: FallbackMode,
    ) -> Self {
        Self {
            store,
            keys,
            clock,
            fallback,
        }
    }

    pub fn fallback(&self) -> FallbackMode {
        self.fallback
    }

    /// Lease the longest-idle index of `resource_id`, growing the pool up to
    /// `max_capacity` when every existing index is leased.
    ///
    /// Fails with [`PoolError::CapacityExhausted`] when the pool is full.
    /// That error is never retried here; the caller decides whether to wait.
    pub async fn acquire(
        &self,
        resource_id: &str,
        max_capacity: u32,
        ttl: Duration,
    ) -> PoolResult<Lease> {
        validate_name("resource id", resource_id)?;
        match self.try_acquire(resource_id, max_capacity, ttl).await {
            Err(PoolError::Store(e)) if e.is_unavailable() => {
                self.acquire_degraded(resource_id, max_capacity, ttl, e)
            }
            other => other,
        }
    }

    async fn try_acquire(
        &self,
        resource_id: &str,
        max_capacity: u32,
        ttl: Duration,
    ) -> PoolResult<Lease> {
        let pool_key = self.keys.lease_pool(resource_id);
        let now = self.clock.now_ms();
        let expires_at_ms = deadline_after(now, ttl);

        if let Some((member, score)) = self.store.zpopmin(&pool_key).await? {
            let index = parse_index(&pool_key, &member)?;
            if score <= now {
                self.reinsert_popped(resource_id, &pool_key, index, &member, expires_at_ms)
                    .await?;
                debug!(resource_id, index, idle_ms = now.saturating_sub(score), "lease granted");
                return Ok(Lease {
                    resource_id: resource_id.to_string(),
                    index,
                    expires_at_ms,
                    exclusive: true,
                });
            }
            // Even the soonest index is still leased: put it back untouched.
            self.reinsert_popped(resource_id, &pool_key, index, &member, score)
                .await?;
        }

        let counter_key = self.keys.capacity_counter(resource_id);
        match self
            .store
            .incr_below(&counter_key, i64::from(max_capacity))
            .await?
        {
            Some(next) => {
                let index = u32::try_from(next).map_err(|_| StoreError::InvalidValue {
                    key: counter_key.clone(),
                    reason: format!("counter {next} out of range"),
                })?;
                self.store
                    .zadd(&pool_key, expires_at_ms, &index.to_string())
                    .await?;
                info!(resource_id, index, max_capacity, "lease pool grown");
                Ok(Lease {
                    resource_id: resource_id.to_string(),
                    index,
                    expires_at_ms,
                    exclusive: true,
                })
            }
            None => {
                debug!(resource_id, max_capacity, "lease pool exhausted");
                Err(PoolError::CapacityExhausted {
                    resource_id: resource_id.to_string(),
                    max_capacity,
                })
            }
        }
    }

    /// Put a popped index back into the pool at `score`.
    ///
    /// Between `zpopmin` and this call the index exists nowhere in the
    /// store, so a failure here drops it from the pool until someone
    /// releases it again.
    async fn reinsert_popped(
        &self,
        resource_id: &str,
        pool_key: &str,
        index: u32,
        member: &str,
        score: i64,
    ) -> PoolResult<()> {
        self.store
            .zadd(pool_key, score, member)
            .await
            .map_err(|e| {
                warn!(
                    resource_id,
                    index,
                    error = %e,
                    "popped index lost from the pool; release it once the store is back"
                );
                PoolError::Store(e)
            })
    }

    fn acquire_degraded(
        &self,
        resource_id: &str,
        max_capacity: u32,
        ttl: Duration,
        cause: StoreError,
    ) -> PoolResult<Lease> {
        if self.fallback == FallbackMode::Strict {
            return Err(PoolError::StoreUnavailable(cause));
        }
        if max_capacity == 0 {
            return Err(PoolError::CapacityExhausted {
                resource_id: resource_id.to_string(),
                max_capacity,
            });
        }
        let index = rand::thread_rng().gen_range(0..max_capacity);
        warn!(resource_id, index, error = %cause, "store unavailable; leasing random index without exclusivity");
        Ok(Lease {
            resource_id: resource_id.to_string(),
            index,
            expires_at_ms: deadline_after(self.clock.now_ms(), ttl),
            exclusive: false,
        })
    }

    /// Make `index` immediately available again.
    ///
    /// Idempotent: releasing an index that is not tracked (re)inserts it.
    pub async fn release(&self, resource_id: &str, index: u32) -> PoolResult<()> {
        validate_name("resource id", resource_id)?;
        let pool_key = self.keys.lease_pool(resource_id);
        let now = self.clock.now_ms();
        let result = self.store.zadd(&pool_key, now, &index.to_string()).await;
        self.tolerate(result, resource_id, "release")?;
        debug!(resource_id, index, "lease released");
        Ok(())
    }

    /// Push the expiry of a held lease to `now + ttl`.
    ///
    /// For holders whose work may outlive the original TTL.
    pub async fn renew(&self, resource_id: &str, index: u32, ttl: Duration) -> PoolResult<i64> {
        validate_name("resource id", resource_id)?;
        let pool_key = self.keys.lease_pool(resource_id);
        let expires_at_ms = deadline_after(self.clock.now_ms(), ttl);
        let result = self
            .store
            .zadd(&pool_key, expires_at_ms, &index.to_string())
            .await;
        self.tolerate(result, resource_id, "renew")?;
        debug!(resource_id, index, expires_at_ms, "lease renewed");
        Ok(expires_at_ms)
    }

    /// Number of indices ever created for `resource_id`.
    pub async fn capacity(&self, resource_id: &str) -> PoolResult<u32> {
        validate_name("resource id", resource_id)?;
        let counter_key = self.keys.capacity_counter(resource_id);
        match self.store.get(&counter_key).await? {
            None => Ok(0),
            Some(raw) => raw.parse::<u32>().map_err(|_| {
                PoolError::Store(StoreError::InvalidValue {
                    key: counter_key,
                    reason: format!("value {raw:?} is not a capacity"),
                })
            }),
        }
    }

    /// Run `action` under a lease, releasing it afterwards whatever the
    /// outcome.
    ///
    /// A failed release is logged, not returned; the lease then lapses at
    /// its TTL.
    pub async fn with_lease<T, E, F, Fut>(
        &self,
        resource_id: &str,
        max_capacity: u32,
        ttl: Duration,
        action: F,
    ) -> Result<T, E>
    where
        F: FnOnce(Lease) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<PoolError>,
    {
        let lease = self.acquire(resource_id, max_capacity, ttl).await?;
        let index = lease.index;
        let result = action(lease).await;
        if let Err(e) = self.release(resource_id, index).await {
            warn!(resource_id, index, error = %e, "failed to release lease; it will lapse at its TTL");
        }
        result
    }

    /// Swallow unavailability in lenient mode, fail closed in strict mode.
    fn tolerate(
        &self,
        result: Result<(), StoreError>,
        resource_id: &str,
        op: &'static str,
    ) -> PoolResult<()> {
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_unavailable() => match self.fallback {
                FallbackMode::Strict => Err(PoolError::StoreUnavailable(e)),
                FallbackMode::Lenient => {
                    warn!(resource_id, op, error = %e, "store unavailable; skipping");
                    Ok(())
                }
            },
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for LeasePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeasePool")
            .field("keys", &self.keys)
            .field("fallback", &self.fallback)
            .finish()
    }
}

fn parse_index(pool_key: &str, member: &str) -> PoolResult<u32> {
    member.parse::<u32>().map_err(|_| {
        PoolError::Store(StoreError::InvalidValue {
            key: pool_key.to_string(),
            reason: format!("member {member:?} is not a lease index"),
        })
    })
}
