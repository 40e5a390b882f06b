//! Error types for lease, cache and ledger operations.

use keypool_store::StoreError;
use thiserror::Error;

/// Errors surfaced by keypool components.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Every index is leased and the pool may not grow any further.
    #[error("capacity exhausted for {resource_id}: all {max_capacity} slots are leased")]
    CapacityExhausted { resource_id: String, max_capacity: u32 },

    /// The store could not be reached and the component is configured to
    /// fail closed.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    /// Any other store failure, e.g. a corrupt counter or pool member.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A key component (prefix, network, resource id, channel) is unusable.
    #[error("invalid {kind} {name:?}: {reason}")]
    InvalidName {
        kind: &'static str,
        name: String,
        reason: String,
    },

    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(String),
}

impl PoolError {
    /// Returns `true` if the caller may retry later and expect a slot.
    pub fn is_capacity_exhausted(&self) -> bool {
        matches!(self, PoolError::CapacityExhausted { .. })
    }
}

/// Convenience type alias for keypool operations.
pub type PoolResult<T> = std::result::Result<T, PoolError>;
