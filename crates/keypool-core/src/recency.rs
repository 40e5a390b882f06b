//! Time-ordered record of recent tokens per channel.
//!
//! Used to remember which transactions were submitted most recently. Entries
//! are never pruned.

use std::sync::Arc;

use tracing::{debug, warn};

use keypool_store::{Clock, SharedStore, StoreError, SystemClock};

use crate::config::FallbackMode;
use crate::error::{PoolError, PoolResult};
use crate::keyspace::{validate_name, KeySpace};

/// Number of tokens returned by [`RecencyLedger::list_recent`] when no limit
/// is given.
pub const DEFAULT_RECENT_LIMIT: usize = 20;

/// Append-only ledger of tokens ordered by insertion time.
#[derive(Clone)]
pub struct RecencyLedger {
    store: Arc<dyn SharedStore>,
    keys: KeySpace,
    clock: Arc<dyn Clock>,
    fallback: FallbackMode,
    default_limit: usize,
}

impl RecencyLedger {
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
            default_limit: DEFAULT_RECENT_LIMIT,
        }
    }

    /// Override the limit used when `list_recent` is called without one.
    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit;
        self
    }

    /// Record `token` as the newest entry of `channel`.
    ///
    /// Appending a token that is already present moves it to the front
    /// instead of duplicating it.
    pub async fn append(&self, channel: &str, token: &str) -> PoolResult<()> {
        validate_name("channel", channel)?;
        let key = self.keys.ledger_channel(channel);
        let now = self.clock.now_ms();
        match self.store.zadd(&key, now, token).await {
            Ok(()) => {
                debug!(channel, token, "ledger append");
                Ok(())
            }
            Err(e) => self.degrade(channel, e).map(|_| ()),
        }
    }

    /// Up to `limit` tokens of `channel`, newest first.
    pub async fn list_recent(&self, channel: &str, limit: Option<usize>) -> PoolResult<Vec<String>> {
        validate_name("channel", channel)?;
        let limit = limit.unwrap_or(self.default_limit);
        if limit == 0 {
            return Ok(Vec::new());
        }
        let key = self.keys.ledger_channel(channel);
        match self.store.zrevrange(&key, 0, limit - 1).await {
            Ok(tokens) => Ok(tokens),
            Err(e) => self.degrade(channel, e),
        }
    }

    fn degrade(&self, channel: &str, err: StoreError) -> PoolResult<Vec<String>> {
        if !err.is_unavailable() {
            return Err(err.into());
        }
        match self.fallback {
            FallbackMode::Strict => Err(PoolError::StoreUnavailable(err)),
            FallbackMode::Lenient => {
                warn!(channel, error = %err, "store unavailable; ledger degraded");
                Ok(Vec::new())
            }
        }
    }
}

impl std::fmt::Debug for RecencyLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecencyLedger")
            .field("keys", &self.keys)
            .field("fallback", &self.fallback)
            .field("default_limit", &self.default_limit)
            .finish()
    }
}
