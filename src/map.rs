//! Expiring Map
//!
//! Insertion-ordered map with a FIFO capacity bound and optional expiry.
//! `ExpiringMap` is a cheap handle; clones share the same entries.
//!
//! The internal lock is never held while user code runs (expiry callbacks,
//! combinator closures, comparators), so that code may freely call back
//! into the map.

use parking_lot::Mutex;
use std::fmt;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::MapConfig;
use crate::error::ConfigError;
use crate::metrics::MapMetrics;
use crate::storage::{CapacityPolicy, ExpiryStrategy, OrderedStore, Seq, StrategyKind};

pub(crate) struct MapState<K, V> {
    store: OrderedStore<K, V>,
    capacity: CapacityPolicy,
    expiry: ExpiryStrategy<K>,
}

impl<K, V> MapState<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Full delete path: entry and its expiry state go together
    fn remove_entry(&mut self, key: &K) -> Option<(K, V)> {
        let entry = self.store.remove_entry(key)?;
        self.expiry.forget(key);
        Some(entry)
    }
}

pub(crate) struct Shared<K, V> {
    state: Mutex<MapState<K, V>>,
    config: MapConfig<K, V>,
    metrics: MapMetrics,
    runtime: Option<Handle>,
}

impl<K, V> Drop for Shared<K, V> {
    fn drop(&mut self) {
        self.state.get_mut().expiry.shutdown();
    }
}

impl<K, V> Shared<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// One sweep pass, returns the number of entries removed.
    ///
    /// All candidates are removed under a single lock, then callbacks run
    /// in store order with the lock released.
    pub(crate) fn sweep(&self) -> usize {
        let expired: Vec<(K, V)> = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if !state.expiry.is_sweeping() {
                return 0;
            }
            let candidates =
                state
                    .expiry
                    .sweep_candidates(&state.store, Instant::now(), self.config.expire_after);
            candidates
                .iter()
                .filter_map(|key| state.remove_entry(key))
                .collect()
        };

        self.metrics.record_sweep();
        let removed = expired.len();
        if removed > 0 {
            debug!(removed = removed, "Swept expired entries");
        }
        self.notify_expired(expired);
        removed
    }

    /// Body of a fired per-entry timer
    pub(crate) fn expire_timer(&self, key: &K, generation: u64, value: V) {
        let removed = {
            let mut state = self.state.lock();
            if !state.expiry.claim_timer(key, generation) {
                return;
            }
            state.remove_entry(key)
        };

        if let Some((key, _)) = removed {
            debug!("Entry expired by its timer");
            self.notify_expired(vec![(key, value)]);
        }
    }

    fn notify_expired(&self, expired: Vec<(K, V)>) {
        self.metrics.record_expired(expired.len());
        let Some(on_expire) = &self.config.on_expire else {
            return;
        };

        for (key, value) in &expired {
            if panic::catch_unwind(AssertUnwindSafe(|| on_expire(key, value))).is_err() {
                self.metrics.record_callback_failure();
                error!("on_expire callback panicked, continuing with remaining entries");
            }
        }
    }
}

/// Insertion-ordered map with capacity eviction and expiry
pub struct ExpiringMap<K, V> {
    shared: Arc<Shared<K, V>>,
}

impl<K, V> Clone for ExpiringMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K, V> fmt::Debug for ExpiringMap<K, V>
where
    K: Eq + Hash + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("ExpiringMap")
            .field("len", &state.store.len())
            .field("strategy", &state.expiry.kind())
            .field("config", &self.shared.config)
            .finish()
    }
}

impl<K, V> ExpiringMap<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Build a map from a configuration.
    ///
    /// The expiry strategy is fixed here from the configuration: a sweep
    /// interval selects the periodic sweep (started immediately, so a Tokio
    /// runtime must be running), otherwise per-entry timers.
    pub fn new(config: MapConfig<K, V>) -> Result<Self, ConfigError> {
        config.validate()?;
        let runtime = Handle::try_current().ok();
        if config.sweep_interval.is_some() && runtime.is_none() {
            return Err(ConfigError::NoRuntime);
        }
        Ok(Self::with_runtime(config, runtime))
    }

    fn with_runtime(config: MapConfig<K, V>, runtime: Option<Handle>) -> Self {
        let expiry = match config.sweep_interval {
            Some(_) => ExpiryStrategy::interval_sweep(),
            None => ExpiryStrategy::per_entry(),
        };

        let map = Self {
            shared: Arc::new(Shared {
                state: Mutex::new(MapState {
                    store: OrderedStore::new(),
                    capacity: CapacityPolicy::from_limit(config.capacity_limit),
                    expiry,
                }),
                config,
                metrics: MapMetrics::new(),
                runtime,
            }),
        };
        map.start_sweep();
        map
    }

    /// Empty map with the same configuration and fresh expiry state
    pub(crate) fn empty_like(&self) -> Self {
        Self::with_runtime(self.shared.config.clone(), self.shared.runtime.clone())
    }

    /// Insert or replace a value, returns the previous value.
    ///
    /// A new key evicts the oldest entry when the map is at its capacity
    /// limit. Replacing keeps the entry's position, never evicts, refreshes
    /// its sweep age and cancels its pending timer.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.insert_entry(key, value, None)
    }

    /// Insert with a time-to-live.
    ///
    /// Only maps running per-entry timers honour `ttl`, and only when a
    /// Tokio runtime is reachable from the calling thread. A zero `ttl` arms
    /// nothing.
    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) -> Option<V> {
        self.insert_entry(key, value, Some(ttl))
    }

    fn insert_entry(&self, key: K, value: V, ttl: Option<Duration>) -> Option<V> {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;

        if !state.capacity.admits() {
            return None;
        }

        if let Some(victim) = state.capacity.victim(&state.store, &key).cloned() {
            state.remove_entry(&victim);
            self.shared.metrics.record_eviction();
            debug!(limit = ?state.capacity.limit(), "Evicted oldest entry");
        }

        state.expiry.touch(&key, Instant::now());

        let previous = match ttl.filter(|ttl| !ttl.is_zero()) {
            Some(ttl) => {
                let previous = state.store.insert(key.clone(), value.clone());
                self.arm_timer(state, key, value, ttl);
                previous
            }
            None => state.store.insert(key, value),
        };

        self.shared.metrics.record_insert();
        previous
    }

    fn arm_timer(&self, state: &mut MapState<K, V>, key: K, value: V, ttl: Duration) {
        if state.expiry.kind() != StrategyKind::PerEntryTimer {
            warn!(ttl = ?ttl, "TTL ignored, map expires entries with its sweep");
            return;
        }

        let runtime = match &self.shared.runtime {
            Some(runtime) => runtime.clone(),
            None => match Handle::try_current() {
                Ok(runtime) => runtime,
                Err(_) => {
                    warn!(ttl = ?ttl, "TTL ignored, no Tokio runtime to drive the timer");
                    return;
                }
            },
        };
        state
            .expiry
            .arm(key, value, ttl, &runtime, Arc::downgrade(&self.shared));
    }

    /// Get value by key
    pub fn get(&self, key: &K) -> Option<V> {
        self.shared.state.lock().store.get(key).cloned()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.shared.state.lock().store.contains_key(key)
    }

    /// Remove a key, returns its value. Never invokes the expiry callback.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.shared
            .state
            .lock()
            .remove_entry(key)
            .map(|(_, value)| value)
    }

    /// Delete key, returns true if key existed
    pub fn delete(&self, key: &K) -> bool {
        self.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().store.is_empty()
    }

    /// Remove every entry. A running sweep keeps running.
    pub fn clear(&self) {
        let mut state = self.shared.state.lock();
        state.store.clear();
        state.expiry.clear();
    }

    /// Remove every entry and stop the sweep
    pub fn clear_and_stop(&self) {
        let mut state = self.shared.state.lock();
        state.store.clear();
        state.expiry.clear();
        if state.expiry.stop() {
            info!("Expiry sweep stopped");
        }
    }

    /// Value of the oldest entry
    pub fn first(&self) -> Option<V> {
        let state = self.shared.state.lock();
        state.store.first().map(|(_, value)| value.clone())
    }

    /// Key of the oldest entry
    pub fn first_key(&self) -> Option<K> {
        let state = self.shared.state.lock();
        state.store.first().map(|(key, _)| key.clone())
    }

    /// Value of the newest entry
    pub fn last(&self) -> Option<V> {
        let state = self.shared.state.lock();
        state.store.last().map(|(_, value)| value.clone())
    }

    /// Key of the newest entry
    pub fn last_key(&self) -> Option<K> {
        let state = self.shared.state.lock();
        state.store.last().map(|(key, _)| key.clone())
    }

    /// Snapshot of all keys in order
    pub fn keys(&self) -> Vec<K> {
        self.shared.state.lock().store.keys().cloned().collect()
    }

    /// Snapshot of all values in order
    pub fn values(&self) -> Vec<V> {
        let state = self.shared.state.lock();
        state.store.iter().map(|(_, value)| value.clone()).collect()
    }

    /// Snapshot of all entries in order
    pub fn to_vec(&self) -> Vec<(K, V)> {
        let state = self.shared.state.lock();
        state
            .store
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Lazy iterator over entries in insertion order.
    ///
    /// The map is not locked between items. Entries deleted before the
    /// iterator reaches them are skipped, entries inserted meanwhile are
    /// visited, and an entry is never yielded twice.
    pub fn iter(&self) -> Iter<K, V> {
        Iter {
            map: self.clone(),
            cursor: None,
        }
    }

    /// (Re)start the periodic sweep. Returns false on maps configured
    /// without a sweep interval.
    pub fn start_sweep(&self) -> bool {
        let (Some(every), Some(runtime)) = (self.shared.config.sweep_interval, &self.shared.runtime)
        else {
            return false;
        };

        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        state.expiry.start(
            state.store.keys(),
            Instant::now(),
            runtime,
            Arc::downgrade(&self.shared),
            every,
        )
    }

    /// Stop the periodic sweep and drop all recorded ages
    pub fn stop_sweep(&self) -> bool {
        let stopped = self.shared.state.lock().expiry.stop();
        if stopped {
            info!("Expiry sweep stopped");
        }
        stopped
    }

    pub fn is_sweeping(&self) -> bool {
        self.shared.state.lock().expiry.is_sweeping()
    }

    /// Run one sweep pass now, returns the number of entries removed
    pub fn sweep_expired(&self) -> usize {
        self.shared.sweep()
    }

    pub fn strategy(&self) -> StrategyKind {
        self.shared.state.lock().expiry.kind()
    }

    /// Number of per-entry timers still pending
    pub fn pending_timers(&self) -> usize {
        self.shared.state.lock().expiry.pending_timers()
    }

    /// Number of keys with a recorded sweep age
    pub(crate) fn tracked_stamps(&self) -> usize {
        self.shared.state.lock().expiry.tracked_stamps()
    }

    pub fn config(&self) -> &MapConfig<K, V> {
        &self.shared.config
    }

    pub fn metrics(&self) -> &MapMetrics {
        &self.shared.metrics
    }

    /// Whether both handles refer to the same map
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub(crate) fn next_after(&self, cursor: Option<Seq>) -> Option<(Seq, K, V)> {
        let state = self.shared.state.lock();
        state
            .store
            .next_after(cursor)
            .map(|(seq, key, value)| (seq, key.clone(), value.clone()))
    }

    /// Rearrange the given keys among their current positions. Pending
    /// per-entry timers are dropped; sweep ages are kept.
    pub(crate) fn reorder(&self, keys: Vec<K>) {
        let mut state = self.shared.state.lock();
        state.expiry.cancel_timers();
        state.store.reorder(keys);
    }
}

/// Cursor over an [`ExpiringMap`], yielding owned entries
pub struct Iter<K, V> {
    map: ExpiringMap<K, V>,
    cursor: Option<Seq>,
}

impl<K, V> Iterator for Iter<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        let (seq, key, value) = self.map.next_after(self.cursor)?;
        self.cursor = Some(seq);
        Some((key, value))
    }
}

impl<K, V> IntoIterator for &ExpiringMap<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    type Item = (K, V);
    type IntoIter = Iter<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;
    use tokio_test::{assert_err, assert_ok};

    type Log = Arc<Mutex<Vec<(String, u32)>>>;

    fn recording(config: MapConfig<String, u32>) -> (MapConfig<String, u32>, Log) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let config = config.with_on_expire(move |k: &String, v: &u32| sink.lock().push((k.clone(), *v)));
        (config, log)
    }

    fn key(s: &str) -> String {
        s.to_string()
    }

    async fn advance_to(start: Instant, ms: u64) {
        tokio::time::sleep_until(start + Duration::from_millis(ms)).await;
        tokio::task::yield_now().await;
    }

    #[test]
    fn test_basic_operations() {
        let map = assert_ok!(ExpiringMap::new(MapConfig::default()));
        assert_eq!(map.strategy(), StrategyKind::PerEntryTimer);

        assert_eq!(map.insert(key("a"), 1), None);
        assert_eq!(map.insert(key("a"), 2), Some(1));
        assert_eq!(map.get(&key("a")), Some(2));
        assert!(map.contains_key(&key("a")));
        assert_eq!(map.len(), 1);

        assert!(map.delete(&key("a")));
        assert!(!map.delete(&key("a")));
        assert!(map.is_empty());
        assert_eq!(map.metrics().inserts(), 2);
    }

    #[test]
    fn test_clones_share_entries() {
        let map = assert_ok!(ExpiringMap::new(MapConfig::default()));
        let other = map.clone();
        other.insert(key("a"), 1);
        assert_eq!(map.get(&key("a")), Some(1));
        assert!(map.ptr_eq(&other));
    }

    #[test]
    fn test_first_and_last() {
        let map = assert_ok!(ExpiringMap::new(MapConfig::default()));
        assert_eq!(map.first(), None);
        assert_eq!(map.last_key(), None);

        map.insert(key("a"), 1);
        map.insert(key("b"), 2);
        map.insert(key("c"), 3);
        map.insert(key("a"), 10);

        assert_eq!(map.first_key(), Some(key("a")));
        assert_eq!(map.first(), Some(10));
        assert_eq!(map.last_key(), Some(key("c")));
        assert_eq!(map.last(), Some(3));
        assert_eq!(map.keys(), vec![key("a"), key("b"), key("c")]);
        assert_eq!(map.values(), vec![10, 2, 3]);
    }

    #[test]
    fn test_capacity_keeps_most_recent() {
        let (config, expired) = recording(MapConfig::new().with_capacity_limit(3));
        let map = assert_ok!(ExpiringMap::new(config));

        for i in 0..10u32 {
            map.insert(format!("k{}", i), i);
            assert!(map.len() <= 3);
        }

        assert_eq!(map.keys(), vec![key("k7"), key("k8"), key("k9")]);
        assert_eq!(map.metrics().evicted(), 7);
        // Eviction is not expiry
        assert!(expired.lock().is_empty());
    }

    #[test]
    fn test_reinsert_never_evicts() {
        let map = assert_ok!(ExpiringMap::new(MapConfig::new().with_capacity_limit(2)));
        map.insert(key("a"), 1);
        map.insert(key("b"), 2);

        assert_eq!(map.insert(key("a"), 3), Some(1));
        assert_eq!(map.len(), 2);
        assert_eq!(map.metrics().evicted(), 0);

        // "a" kept its position, so it is still the oldest
        map.insert(key("c"), 4);
        assert_eq!(map.keys(), vec![key("b"), key("c")]);
    }

    #[test]
    fn test_zero_capacity_stays_empty() {
        let map = assert_ok!(ExpiringMap::new(MapConfig::new().with_capacity_limit(0)));
        for i in 0..5u32 {
            assert_eq!(map.insert(format!("k{}", i), i), None);
            assert!(map.is_empty());
        }
    }

    #[test]
    fn test_sweep_needs_runtime() {
        let config: MapConfig<String, u32> =
            MapConfig::new().with_sweep_interval(Duration::from_millis(100));
        let err = assert_err!(ExpiringMap::new(config));
        assert_eq!(err, ConfigError::NoRuntime);
    }

    #[test]
    fn test_ttl_ignored_without_runtime() {
        let map = assert_ok!(ExpiringMap::new(MapConfig::default()));
        map.insert_with_ttl(key("a"), 1, Duration::from_millis(10));
        assert_eq!(map.get(&key("a")), Some(1));
        assert_eq!(map.pending_timers(), 0);
    }

    #[test]
    fn test_map_built_outside_runtime_arms_timers_inside_one() {
        let (config, expired) = recording(MapConfig::default());
        let map = assert_ok!(ExpiringMap::new(config));
        assert_eq!(map.strategy(), StrategyKind::PerEntryTimer);

        let runtime = assert_ok!(tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build());

        runtime.block_on(async {
            map.insert_with_ttl(key("k"), 1, Duration::from_millis(10));
            assert_eq!(map.pending_timers(), 1);

            tokio::time::sleep(Duration::from_millis(100)).await;
            assert_eq!(map.get(&key("k")), None);
        });

        assert_eq!(*expired.lock(), vec![(key("k"), 1)]);
    }

    #[test]
    fn test_iter_tolerates_deletion() {
        let map = assert_ok!(ExpiringMap::new(MapConfig::default()));
        for (i, k) in ["a", "b", "c", "d"].iter().enumerate() {
            map.insert(key(k), i as u32);
        }

        let mut seen = Vec::new();
        for (k, _) in &map {
            // Delete the current entry and the next one
            map.delete(&k);
            if k == "a" {
                map.delete(&key("b"));
            }
            seen.push(k);
        }

        assert_eq!(seen, vec![key("a"), key("c"), key("d")]);
        assert!(map.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_entry_ttl() {
        let start = Instant::now();
        let (config, expired) = recording(MapConfig::default());
        let map = assert_ok!(ExpiringMap::new(config));
        assert_eq!(map.strategy(), StrategyKind::PerEntryTimer);

        map.insert_with_ttl(key("k"), 7, Duration::from_millis(50));
        assert_eq!(map.pending_timers(), 1);

        advance_to(start, 49).await;
        assert_eq!(map.get(&key("k")), Some(7));

        advance_to(start, 51).await;
        assert_eq!(map.get(&key("k")), None);
        assert_eq!(*expired.lock(), vec![(key("k"), 7)]);
        assert_eq!(map.pending_timers(), 0);
        assert_eq!(map.metrics().expired(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reinsert_supersedes_timer() {
        let start = Instant::now();
        let (config, expired) = recording(MapConfig::default());
        let map = assert_ok!(ExpiringMap::new(config));

        map.insert_with_ttl(key("k"), 1, Duration::from_millis(1000));
        map.insert_with_ttl(key("k"), 2, Duration::from_millis(10));
        assert_eq!(map.pending_timers(), 1);

        advance_to(start, 11).await;
        assert_eq!(map.get(&key("k")), None);

        advance_to(start, 2000).await;
        assert_eq!(*expired.lock(), vec![(key("k"), 2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_plain_reinsert_cancels_timer() {
        let start = Instant::now();
        let (config, expired) = recording(MapConfig::default());
        let map = assert_ok!(ExpiringMap::new(config));

        map.insert_with_ttl(key("k"), 1, Duration::from_millis(50));
        map.insert(key("k"), 2);
        assert_eq!(map.pending_timers(), 0);

        advance_to(start, 100).await;
        assert_eq!(map.get(&key("k")), Some(2));
        assert!(expired.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_and_eviction_cancel_timers() {
        let start = Instant::now();
        let (config, expired) = recording(MapConfig::new().with_capacity_limit(1));
        let map = assert_ok!(ExpiringMap::new(config));

        map.insert_with_ttl(key("a"), 1, Duration::from_millis(50));
        map.insert_with_ttl(key("b"), 2, Duration::from_millis(50));
        assert_eq!(map.pending_timers(), 1);

        assert!(map.delete(&key("b")));
        assert_eq!(map.pending_timers(), 0);

        advance_to(start, 100).await;
        assert!(expired.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_map_never_fires() {
        let start = Instant::now();
        let (config, expired) = recording(MapConfig::default());
        let map = assert_ok!(ExpiringMap::new(config));

        map.insert_with_ttl(key("k"), 1, Duration::from_millis(10));
        drop(map);

        advance_to(start, 100).await;
        assert!(expired.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_sweep() {
        let start = Instant::now();
        let (config, expired) = recording(
            MapConfig::new()
                .with_sweep_interval(Duration::from_millis(100))
                .with_expire_after(Duration::from_millis(50)),
        );
        let map = assert_ok!(ExpiringMap::new(config));
        assert_eq!(map.strategy(), StrategyKind::IntervalSweep);
        assert!(map.is_sweeping());

        map.insert(key("a"), 1);
        advance_to(start, 60).await;
        map.insert(key("b"), 2);

        // Entries go on the first tick after their window, not the instant it
        // elapses: "b" outlives t=160 (see DESIGN.md, open question 4).
        // Tick at 100: "a" is 100ms old, "b" only 40ms
        advance_to(start, 160).await;
        assert_eq!(map.get(&key("a")), None);
        assert_eq!(map.get(&key("b")), Some(2));

        // Tick at 200: "b" is 140ms old
        advance_to(start, 210).await;
        assert!(map.is_empty());
        assert_eq!(*expired.lock(), vec![(key("a"), 1), (key("b"), 2)]);
        assert_eq!(map.metrics().sweeps(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reinsert_refreshes_sweep_age() {
        let start = Instant::now();
        let map = assert_ok!(ExpiringMap::new(
            MapConfig::<String, u32>::new()
                .with_sweep_interval(Duration::from_millis(100))
                .with_expire_after(Duration::from_millis(50)),
        ));

        map.insert(key("a"), 1);
        advance_to(start, 90).await;
        map.insert(key("a"), 2);

        advance_to(start, 110).await;
        assert_eq!(map.get(&key("a")), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_without_age_limit_flushes() {
        let start = Instant::now();
        let (config, expired) =
            recording(MapConfig::new().with_sweep_interval(Duration::from_millis(100)));
        let map = assert_ok!(ExpiringMap::new(config));

        map.insert(key("a"), 1);
        map.insert(key("b"), 2);
        advance_to(start, 110).await;
        assert!(map.is_empty());
        assert_eq!(expired.lock().len(), 2);

        map.insert(key("c"), 3);
        advance_to(start, 210).await;
        assert!(map.is_empty());
        assert_eq!(expired.lock().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_ignored_in_sweep_mode() {
        let map = assert_ok!(ExpiringMap::new(
            MapConfig::<String, u32>::new()
                .with_sweep_interval(Duration::from_millis(100))
                .with_expire_after(Duration::from_secs(60)),
        ));
        map.insert_with_ttl(key("a"), 1, Duration::from_millis(10));
        assert_eq!(map.pending_timers(), 0);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(map.get(&key("a")), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_callback_does_not_stop_sweep() {
        let seen: Log = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let config = MapConfig::new()
            .with_sweep_interval(Duration::from_secs(3600))
            .with_on_expire(move |k: &String, v: &u32| {
                if k == "a" {
                    panic!("callback failure");
                }
                sink.lock().push((k.clone(), *v));
            });
        let map = assert_ok!(ExpiringMap::new(config));

        map.insert(key("a"), 1);
        map.insert(key("b"), 2);
        map.insert(key("c"), 3);

        assert_eq!(map.sweep_expired(), 3);
        assert!(map.is_empty());
        assert_eq!(*seen.lock(), vec![(key("b"), 2), (key("c"), 3)]);
        assert_eq!(map.metrics().callback_failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reentrant_callback() {
        let handle: Arc<OnceLock<ExpiringMap<String, u32>>> = Arc::new(OnceLock::new());
        let seen: Log = Arc::new(Mutex::new(Vec::new()));

        let (inner, sink) = (handle.clone(), seen.clone());
        let config = MapConfig::new()
            .with_sweep_interval(Duration::from_secs(3600))
            .with_on_expire(move |k: &String, v: &u32| {
                sink.lock().push((k.clone(), *v));
                if let Some(map) = inner.get() {
                    // Already gone: removed before any callback ran
                    assert!(!map.delete(&key("b")));
                    map.insert(format!("{}-requeued", k), *v);
                }
            });
        let map = assert_ok!(ExpiringMap::new(config));
        assert!(handle.set(map.clone()).is_ok());

        map.insert(key("a"), 1);
        map.insert(key("b"), 2);

        assert_eq!(map.sweep_expired(), 2);
        assert_eq!(*seen.lock(), vec![(key("a"), 1), (key("b"), 2)]);
        assert_eq!(map.keys(), vec![key("a-requeued"), key("b-requeued")]);
        assert_eq!(map.metrics().callback_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_and_restart_sweep() {
        let start = Instant::now();
        let (config, expired) = recording(
            MapConfig::new()
                .with_sweep_interval(Duration::from_millis(100))
                .with_expire_after(Duration::from_millis(50)),
        );
        let map = assert_ok!(ExpiringMap::new(config));

        assert!(map.stop_sweep());
        assert!(!map.stop_sweep());
        assert!(!map.is_sweeping());

        map.insert(key("a"), 1);
        advance_to(start, 500).await;
        assert_eq!(map.get(&key("a")), Some(1));
        assert_eq!(map.sweep_expired(), 0);

        // Restart at 500: "a" counts as inserted now
        assert!(map.start_sweep());
        advance_to(start, 550).await;
        assert_eq!(map.sweep_expired(), 0);

        advance_to(start, 610).await;
        assert!(map.is_empty());
        assert_eq!(*expired.lock(), vec![(key("a"), 1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stamps_follow_entries() {
        let map = assert_ok!(ExpiringMap::new(
            MapConfig::<String, u32>::new()
                .with_capacity_limit(2)
                .with_sweep_interval(Duration::from_secs(3600))
                .with_expire_after(Duration::from_secs(60)),
        ));

        map.insert(key("a"), 1);
        map.insert(key("b"), 2);
        assert_eq!(map.tracked_stamps(), 2);

        // Eviction of "a" drops its stamp
        map.insert(key("c"), 3);
        assert_eq!(map.len(), 2);
        assert_eq!(map.tracked_stamps(), map.len());

        // Replacing does not add a second stamp
        map.insert(key("c"), 30);
        assert_eq!(map.tracked_stamps(), map.len());

        assert!(map.delete(&key("b")));
        assert_eq!(map.tracked_stamps(), 1);
        assert_eq!(map.tracked_stamps(), map.len());

        map.retain(|_, _| false);
        assert_eq!(map.tracked_stamps(), 0);

        map.insert(key("d"), 4);
        map.clear();
        assert_eq!(map.tracked_stamps(), 0);

        map.insert(key("e"), 5);
        assert!(map.stop_sweep());
        assert_eq!(map.tracked_stamps(), 0);
        assert_eq!(map.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_and_stop() {
        let map = assert_ok!(ExpiringMap::new(
            MapConfig::<String, u32>::new().with_sweep_interval(Duration::from_millis(100)),
        ));
        map.insert(key("a"), 1);

        map.clear();
        assert!(map.is_empty());
        assert!(map.is_sweeping());

        map.insert(key("b"), 2);
        map.clear_and_stop();
        assert!(map.is_empty());
        assert!(!map.is_sweeping());
    }

    #[test]
    fn test_start_sweep_without_interval() {
        let map: ExpiringMap<String, u32> = assert_ok!(ExpiringMap::new(MapConfig::default()));
        assert!(!map.start_sweep());
        assert!(!map.stop_sweep());
        assert_eq!(map.sweep_expired(), 0);
    }
}
