use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::clock::{deadline_after, Clock, SystemClock};
use crate::error::{StoreError, StoreResult};
use crate::traits::SharedStore;

/// A scalar value with an optional absolute expiry.
#[derive(Clone, Debug)]
struct ValueEntry {
    value: String,
    expires_at_ms: Option<i64>,
}

impl ValueEntry {
    fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms.is_some_and(|at| at <= now_ms)
    }
}

/// Member-to-score map plus a `(score, member)` index kept in lockstep.
#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<String, i64>,
    order: BTreeSet<(i64, String)>,
}

impl SortedSet {
    fn insert(&mut self, score: i64, member: &str) {
        if let Some(old) = self.scores.insert(member.to_string(), score) {
            self.order.remove(&(old, member.to_string()));
        }
        self.order.insert((score, member.to_string()));
    }

    fn pop_min(&mut self) -> Option<(String, i64)> {
        let (score, member) = self.order.pop_first()?;
        self.scores.remove(&member);
        Some((member, score))
    }
}

#[derive(Debug, Default)]
struct State {
    values: HashMap<String, ValueEntry>,
    sets: HashMap<String, SortedSet>,
}

impl State {
    /// Live value for `key`, evicting it first if it has expired.
    fn live_value(&mut self, key: &str, now_ms: i64) -> Option<&mut ValueEntry> {
        if self.values.get(key).is_some_and(|e| e.is_expired(now_ms)) {
            self.values.remove(key);
        }
        self.values.get_mut(key)
    }
}

/// In-memory implementation of [`SharedStore`].
///
/// All state sits behind one `Mutex`, so every call is trivially atomic.
/// Expiry is evaluated lazily against the injected [`Clock`]. Data is lost
/// when the store is dropped, and it is only shared between callers holding
/// the same `Arc`.
pub struct InMemoryStore {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
    available: AtomicBool,
}

impl InMemoryStore {
    /// Create an empty store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store that evaluates expiry against `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock,
            available: AtomicBool::new(true),
        }
    }

    /// Simulate losing (`false`) or regaining (`true`) the connection.
    ///
    /// While unavailable every operation fails with
    /// [`StoreError::Unavailable`]; stored data is kept.
    pub fn set_available(&self, available: bool) {
        let was = self.available.swap(available, Ordering::SeqCst);
        if was != available {
            debug!(available, "in-memory store availability changed");
        }
    }

    /// Number of live scalar values plus sorted sets.
    pub fn len(&self) -> usize {
        let now = self.clock.now_ms();
        self.state
            .lock()
            .map(|s| {
                s.values.values().filter(|e| !e.is_expired(now)).count() + s.sets.len()
            })
            .unwrap_or(0)
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, State>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store marked unavailable".into()));
        }
        self.state
            .lock()
            .map_err(|e| StoreError::Backend(format!("lock poisoned: {e}")))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("entries", &self.len())
            .field("available", &self.available.load(Ordering::SeqCst))
            .finish()
    }
}

fn parse_counter(key: &str, raw: &str) -> StoreResult<i64> {
    raw.parse::<i64>().map_err(|_| StoreError::InvalidValue {
        key: key.to_string(),
        reason: format!("value {raw:?} is not an integer"),
    })
}

#[async_trait]
impl SharedStore for InMemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = self.clock.now_ms();
        let mut state = self.lock()?;
        Ok(state.live_value(key, now).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, expiry: Option<Duration>) -> StoreResult<()> {
        let now = self.clock.now_ms();
        let mut state = self.lock()?;
        state.values.insert(
            key.to_string(),
            ValueEntry {
                value: value.to_string(),
                expires_at_ms: expiry.map(|d| deadline_after(now, d)),
            },
        );
        Ok(())
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let now = self.clock.now_ms();
        let mut state = self.lock()?;
        match state.live_value(key, now) {
            Some(entry) => {
                let next = parse_counter(key, &entry.value)? + 1;
                entry.value = next.to_string();
                Ok(next)
            }
            None => {
                state.values.insert(
                    key.to_string(),
                    ValueEntry {
                        value: "1".into(),
                        expires_at_ms: None,
                    },
                );
                Ok(1)
            }
        }
    }

    async fn incr_below(&self, key: &str, bound: i64) -> StoreResult<Option<i64>> {
        let now = self.clock.now_ms();
        let mut state = self.lock()?;
        let current = match state.live_value(key, now) {
            Some(entry) => parse_counter(key, &entry.value)?,
            None => 0,
        };
        if current >= bound {
            return Ok(None);
        }
        let expires_at_ms = state.live_value(key, now).and_then(|e| e.expires_at_ms);
        state.values.insert(
            key.to_string(),
            ValueEntry {
                value: (current + 1).to_string(),
                expires_at_ms,
            },
        );
        Ok(Some(current))
    }

    async fn zadd(&self, collection: &str, score: i64, member: &str) -> StoreResult<()> {
        let mut state = self.lock()?;
        state
            .sets
            .entry(collection.to_string())
            .or_default()
            .insert(score, member);
        Ok(())
    }

    async fn zpopmin(&self, collection: &str) -> StoreResult<Option<(String, i64)>> {
        let mut state = self.lock()?;
        let Some(set) = state.sets.get_mut(collection) else {
            return Ok(None);
        };
        let popped = set.pop_min();
        if set.scores.is_empty() {
            state.sets.remove(collection);
        }
        Ok(popped)
    }

    async fn zrevrange(
        &self,
        collection: &str,
        start: usize,
        stop: usize,
    ) -> StoreResult<Vec<String>> {
        let state = self.lock()?;
        if stop < start {
            return Ok(Vec::new());
        }
        Ok(state
            .sets
            .get(collection)
            .map(|set| {
                set.order
                    .iter()
                    .rev()
                    .skip(start)
                    .take((stop - start).saturating_add(1))
                    .map(|(_, member)| member.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn zscore(&self, collection: &str, member: &str) -> StoreResult<Option<i64>> {
        let state = self.lock()?;
        Ok(state
            .sets
            .get(collection)
            .and_then(|set| set.scores.get(member).copied()))
    }

    async fn zcard(&self, collection: &str) -> StoreResult<usize> {
        let state = self.lock()?;
        Ok(state.sets.get(collection).map_or(0, |set| set.scores.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn manual_store() -> (Arc<ManualClock>, InMemoryStore) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let store = InMemoryStore::with_clock(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn set_and_get() {
        let store = InMemoryStore::new();
        store.set("k", "v", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn value_expires() {
        let (clock, store) = manual_store();
        store
            .set("k", "v", Some(Duration::from_secs(10)))
            .await
            .unwrap();

        clock.advance(Duration::from_millis(9_999));
        assert!(store.get("k").await.unwrap().is_some());

        clock.advance(Duration::from_millis(1));
        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn incr_starts_from_zero() {
        let store = InMemoryStore::new();
        assert_eq!(store.incr("c").await.unwrap(), 1);
        assert_eq!(store.incr("c").await.unwrap(), 2);
        assert_eq!(store.get("c").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn incr_rejects_non_integer() {
        let store = InMemoryStore::new();
        store.set("c", "abc", None).await.unwrap();
        let err = store.incr("c").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidValue { .. }));
    }

    #[tokio::test]
    async fn incr_below_stops_at_bound() {
        let store = InMemoryStore::new();
        assert_eq!(store.incr_below("c", 2).await.unwrap(), Some(0));
        assert_eq!(store.incr_below("c", 2).await.unwrap(), Some(1));
        assert_eq!(store.incr_below("c", 2).await.unwrap(), None);
        assert_eq!(store.get("c").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn incr_below_zero_bound_never_increments() {
        let store = InMemoryStore::new();
        assert_eq!(store.incr_below("c", 0).await.unwrap(), None);
        assert_eq!(store.get("c").await.unwrap(), None);
    }

    #[tokio::test]
    async fn zpopmin_returns_lowest_score() {
        let store = InMemoryStore::new();
        store.zadd("z", 30, "c").await.unwrap();
        store.zadd("z", 10, "a").await.unwrap();
        store.zadd("z", 20, "b").await.unwrap();

        assert_eq!(store.zpopmin("z").await.unwrap(), Some(("a".into(), 10)));
        assert_eq!(store.zpopmin("z").await.unwrap(), Some(("b".into(), 20)));
        assert_eq!(store.zcard("z").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn zpopmin_on_missing_collection() {
        let store = InMemoryStore::new();
        assert_eq!(store.zpopmin("nothing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn zadd_updates_existing_member() {
        let store = InMemoryStore::new();
        store.zadd("z", 10, "a").await.unwrap();
        store.zadd("z", 5, "b").await.unwrap();
        store.zadd("z", 1, "a").await.unwrap();

        assert_eq!(store.zcard("z").await.unwrap(), 2);
        assert_eq!(store.zscore("z", "a").await.unwrap(), Some(1));
        assert_eq!(store.zpopmin("z").await.unwrap(), Some(("a".into(), 1)));
    }

    #[tokio::test]
    async fn equal_scores_order_by_member() {
        let store = InMemoryStore::new();
        store.zadd("z", 7, "b").await.unwrap();
        store.zadd("z", 7, "a").await.unwrap();
        assert_eq!(store.zpopmin("z").await.unwrap(), Some(("a".into(), 7)));
    }

    #[tokio::test]
    async fn zrevrange_is_inclusive_and_descending() {
        let store = InMemoryStore::new();
        for (score, member) in [(1, "a"), (2, "b"), (3, "c"), (4, "d")] {
            store.zadd("z", score, member).await.unwrap();
        }
        assert_eq!(store.zrevrange("z", 0, 1).await.unwrap(), vec!["d", "c"]);
        assert_eq!(store.zrevrange("z", 1, 2).await.unwrap(), vec!["c", "b"]);
        assert_eq!(store.zrevrange("z", 0, 100).await.unwrap().len(), 4);
        assert!(store.zrevrange("z", 3, 1).await.unwrap().is_empty());
        assert!(store.zrevrange("missing", 0, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn huge_expiry_does_not_expire_immediately() {
        let (clock, store) = manual_store();
        store
            .set("k", "v", Some(Duration::from_secs(u64::MAX)))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(86_400));
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn zrevrange_to_usize_max() {
        let store = InMemoryStore::new();
        store.zadd("z", 1, "a").await.unwrap();
        store.zadd("z", 2, "b").await.unwrap();
        assert_eq!(
            store.zrevrange("z", 0, usize::MAX).await.unwrap(),
            vec!["b", "a"]
        );
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = InMemoryStore::new();
        store.zadd("z", 1, "a").await.unwrap();
        store.set_available(false);

        assert!(store.get("k").await.unwrap_err().is_unavailable());
        assert!(store.zpopmin("z").await.unwrap_err().is_unavailable());
        assert!(store.incr_below("c", 1).await.unwrap_err().is_unavailable());

        store.set_available(true);
        assert_eq!(store.zcard("z").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_incr_below_never_overshoots() {
        let store = Arc::new(InMemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.incr_below("c", 5).await.unwrap()
            }));
        }
        let mut granted = Vec::new();
        for h in handles {
            if let Some(v) = h.await.unwrap() {
                granted.push(v);
            }
        }
        granted.sort();
        assert_eq!(granted, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn debug_format() {
        let store = InMemoryStore::new();
        let s = format!("{store:?}");
        assert!(s.contains("InMemoryStore"));
        assert!(s.contains("available: true"));
    }
}
