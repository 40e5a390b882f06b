use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreResult;

/// Shared ordered key-value store.
///
/// This is the subset of a Redis-like server that keypool relies on. All
/// implementations must satisfy these invariants:
/// - Each call is atomic with respect to the key or collection it names.
/// - Sorted sets hold each member at most once; `zadd` on an existing member
///   replaces its score.
/// - Sorted-set order is ascending by score, then ascending by member.
/// - A value whose expiry has passed reads as absent.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Read a scalar value. Returns `Ok(None)` if absent or expired.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Write a scalar value, optionally expiring after `expiry`.
    async fn set(&self, key: &str, value: &str, expiry: Option<Duration>) -> StoreResult<()>;

    /// Increment an integer value, treating a missing key as `0`.
    ///
    /// Returns the value after the increment.
    async fn incr(&self, key: &str) -> StoreResult<i64>;

    /// Increment an integer value only while it is below `bound`.
    ///
    /// Returns `Some(previous)` when the increment happened and `None` when
    /// the value was already at or above `bound`. The comparison and the
    /// increment are a single atomic step.
    async fn incr_below(&self, key: &str, bound: i64) -> StoreResult<Option<i64>>;

    /// Add `member` to a sorted set, or update its score if present.
    async fn zadd(&self, collection: &str, score: i64, member: &str) -> StoreResult<()>;

    /// Remove and return the lowest-scored member.
    async fn zpopmin(&self, collection: &str) -> StoreResult<Option<(String, i64)>>;

    /// Members ranked by descending score, from rank `start` to `stop` inclusive.
    async fn zrevrange(&self, collection: &str, start: usize, stop: usize)
        -> StoreResult<Vec<String>>;

    /// Score of a single member, if present.
    async fn zscore(&self, collection: &str, member: &str) -> StoreResult<Option<i64>>;

    /// Number of members in a sorted set.
    async fn zcard(&self, collection: &str) -> StoreResult<usize>;
}
