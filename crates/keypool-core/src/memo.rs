//! Cache-aside memoization over the shared store.
//!
//! The memoizer is strictly optional plumbing: a store that is down, slow to
//! answer, or holding an unreadable payload only costs a recomputation. No
//! store error ever reaches the caller.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use keypool_store::SharedStore;

use crate::keyspace::KeySpace;

/// Cache-aside helper for idempotent lookups.
///
/// Concurrent misses on the same key are not coordinated: each caller
/// computes and the last write wins.
#[derive(Clone)]
pub struct Memoizer {
    store: Arc<dyn SharedStore>,
    keys: KeySpace,
    default_ttl: Duration,
}

impl Memoizer {
    pub fn new(store: Arc<dyn SharedStore>, keys: KeySpace, default_ttl: Duration) -> Self {
        Self {
            store,
            keys,
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// [`get_or_compute`](Self::get_or_compute) with the configured TTL.
    pub async fn memoize<T, E, F, Fut>(&self, key: &str, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.get_or_compute(key, self.default_ttl, compute).await
    }

    /// Return the cached value for `key`, or run `compute`, cache its result
    /// for `ttl`, and return it.
    ///
    /// Errors from `compute` are returned as-is and nothing is cached. An
    /// empty `key` bypasses the cache entirely.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if key.is_empty() {
            warn!("empty cache key; computing without the cache");
            return compute().await;
        }
        let store_key = self.keys.cache_entry(key);

        match self.store.get(&store_key).await {
            Ok(Some(raw)) => match decode::<T>(&raw) {
                Some(value) => {
                    debug!(key, "cache hit");
                    return Ok(value);
                }
                None => warn!(key, "cached payload unreadable; recomputing"),
            },
            Ok(None) => debug!(key, "cache miss"),
            Err(e) => warn!(key, error = %e, "cache read failed; bypassing cache"),
        }

        let value = compute().await?;

        match encode(&value) {
            Some(payload) => {
                if let Err(e) = self.store.set(&store_key, &payload, Some(ttl)).await {
                    warn!(key, error = %e, "cache write failed; result not cached");
                }
            }
            None => warn!(key, "result not serializable; not cached"),
        }
        Ok(value)
    }
}

impl std::fmt::Debug for Memoizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memoizer")
            .field("keys", &self.keys)
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

/// Strings are stored raw, everything else as JSON text.
fn encode<T: Serialize>(value: &T) -> Option<String> {
    match serde_json::to_value(value).ok()? {
        Value::String(s) => Some(s),
        other => serde_json::to_string(&other).ok(),
    }
}

/// Parse a payload as JSON, falling back to treating it as a plain string.
fn decode<T: DeserializeOwned>(raw: &str) -> Option<T> {
    serde_json::from_str::<T>(raw)
        .ok()
        .or_else(|| serde_json::from_value::<T>(Value::String(raw.to_string())).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keypool_store::{InMemoryStore, ManualClock};
    use serde::Deserialize;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Pool {
        id: u64,
        name: String,
    }

    fn memoizer() -> (Arc<ManualClock>, Arc<InMemoryStore>, Memoizer) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
        let memo = Memoizer::new(store.clone(), KeySpace::default(), Duration::from_secs(1_800));
        (clock, store, memo)
    }

    async fn counted(memo: &Memoizer, key: &str, calls: &AtomicUsize) -> u64 {
        memo.get_or_compute(key, Duration::from_secs(30), || async {
            Ok::<_, Infallible>(calls.fetch_add(1, Ordering::SeqCst) as u64 + 100)
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn second_call_hits_cache() {
        let (_clock, _store, memo) = memoizer();
        let calls = AtomicUsize::new(0);

        assert_eq!(counted(&memo, "k", &calls).await, 100);
        assert_eq!(counted(&memo, "k", &calls).await, 100);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_key_skips_the_store() {
        let (_clock, store, memo) = memoizer();
        let calls = AtomicUsize::new(0);

        assert_eq!(counted(&memo, "", &calls).await, 100);
        assert_eq!(counted(&memo, "", &calls).await, 101);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn expired_entry_is_recomputed() {
        let (clock, _store, memo) = memoizer();
        let calls = AtomicUsize::new(0);

        counted(&memo, "k", &calls).await;
        clock.advance(Duration::from_secs(30));
        assert_eq!(counted(&memo, "k", &calls).await, 101);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let (_clock, _store, memo) = memoizer();
        let calls = AtomicUsize::new(0);
        counted(&memo, "a", &calls).await;
        counted(&memo, "b", &calls).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn structured_values_roundtrip() {
        let (_clock, store, memo) = memoizer();
        let pools = vec![
            Pool { id: 1, name: "standard".into() },
            Pool { id: 2, name: "limited".into() },
        ];
        let expected = pools.clone();

        let first: Vec<Pool> = memo
            .memoize("pools", || async move { Ok::<_, Infallible>(pools) })
            .await
            .unwrap();
        assert_eq!(first, expected);

        let raw = store
            .get(&KeySpace::default().cache_entry("pools"))
            .await
            .unwrap()
            .unwrap();
        assert!(raw.starts_with('['));

        let second: Vec<Pool> = memo
            .memoize("pools", || async { Ok::<Vec<Pool>, Infallible>(Vec::new()) })
            .await
            .unwrap();
        assert_eq!(second, expected);
    }

    #[tokio::test]
    async fn strings_are_stored_raw() {
        let (_clock, store, memo) = memoizer();
        let v: String = memo
            .memoize("addr", || async { Ok::<_, Infallible>("0xf8d6e0586b0a20c7".to_string()) })
            .await
            .unwrap();
        assert_eq!(v, "0xf8d6e0586b0a20c7");

        let raw = store
            .get(&KeySpace::default().cache_entry("addr"))
            .await
            .unwrap();
        assert_eq!(raw.as_deref(), Some("0xf8d6e0586b0a20c7"));
    }

    #[tokio::test]
    async fn plain_string_payload_falls_back_to_raw() {
        let (_clock, store, memo) = memoizer();
        store
            .set(&KeySpace::default().cache_entry("greeting"), "hello world", None)
            .await
            .unwrap();

        let v: String = memo
            .memoize("greeting", || async { Ok::<_, Infallible>("recomputed".to_string()) })
            .await
            .unwrap();
        assert_eq!(v, "hello world");
    }

    #[tokio::test]
    async fn unreadable_payload_is_recomputed() {
        let (_clock, store, memo) = memoizer();
        let key = KeySpace::default().cache_entry("pools");
        store.set(&key, "{not json", None).await.unwrap();

        let v: Vec<u64> = memo
            .memoize("pools", || async { Ok::<_, Infallible>(vec![1, 2, 3]) })
            .await
            .unwrap();
        assert_eq!(v, vec![1, 2, 3]);
        assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("[1,2,3]"));
    }

    #[tokio::test]
    async fn compute_errors_propagate_and_are_not_cached() {
        let (_clock, store, memo) = memoizer();
        let err = memo
            .memoize("k", || async { Err::<u64, _>("access node down") })
            .await
            .unwrap_err();
        assert_eq!(err, "access node down");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn unavailable_store_always_computes() {
        let (_clock, store, memo) = memoizer();
        store.set_available(false);
        let calls = AtomicUsize::new(0);

        assert_eq!(counted(&memo, "k", &calls).await, 100);
        assert_eq!(counted(&memo, "k", &calls).await, 101);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn encode_and_decode_rules() {
        assert_eq!(encode(&"abc").as_deref(), Some("abc"));
        assert_eq!(encode(&42u32).as_deref(), Some("42"));
        assert_eq!(decode::<u32>("42"), Some(42));
        assert_eq!(decode::<String>("abc").as_deref(), Some("abc"));
        assert_eq!(decode::<String>("\"quoted\"").as_deref(), Some("quoted"));
        assert_eq!(decode::<u32>("abc"), None);
    }
}
