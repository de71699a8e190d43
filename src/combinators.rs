//! Combinators
//!
//! Order-preserving traversals built on [`ExpiringMap::iter`]. Closures run
//! without the map locked and may insert into or delete from it.
//!
//! Entries copied into a new map (`filter`, `concat`) or rebuilt in place
//! (`sort_by`, `concat_mut`) lose their pending per-entry timers.

use std::cmp::Ordering;
use std::hash::Hash;

use crate::map::ExpiringMap;

impl<K, V> ExpiringMap<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// True if any entry matches, stops at the first match
    pub fn some<F>(&self, mut predicate: F) -> bool
    where
        F: FnMut(&K, &V) -> bool,
    {
        self.iter().any(|(key, value)| predicate(&key, &value))
    }

    /// True if every entry matches, stops at the first mismatch
    pub fn every<F>(&self, mut predicate: F) -> bool
    where
        F: FnMut(&K, &V) -> bool,
    {
        self.iter().all(|(key, value)| predicate(&key, &value))
    }

    /// First entry that matches
    pub fn find<F>(&self, mut predicate: F) -> Option<(K, V)>
    where
        F: FnMut(&K, &V) -> bool,
    {
        self.iter().find(|(key, value)| predicate(key, value))
    }

    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V),
    {
        for (key, value) in self.iter() {
            f(&key, &value);
        }
    }

    /// New map with the same configuration holding the matching entries.
    ///
    /// Copied entries start with fresh expiry state.
    pub fn filter<F>(&self, mut predicate: F) -> Self
    where
        F: FnMut(&K, &V) -> bool,
    {
        let filtered = self.empty_like();
        for (key, value) in self.iter() {
            if predicate(&key, &value) {
                filtered.insert(key, value);
            }
        }
        filtered
    }

    /// Map every entry, in order
    pub fn map<U, F>(&self, mut mapper: F) -> Vec<U>
    where
        F: FnMut(&K, &V) -> U,
    {
        self.iter().map(|(key, value)| mapper(&key, &value)).collect()
    }

    /// `filter(predicate)` followed by `map(mapper)` in a single pass
    pub fn map_filtered<U, P, F>(&self, mut predicate: P, mut mapper: F) -> Vec<U>
    where
        P: FnMut(&K, &V) -> bool,
        F: FnMut(&K, &V) -> U,
    {
        self.iter()
            .filter(|(key, value)| predicate(key, value))
            .map(|(key, value)| mapper(&key, &value))
            .collect()
    }

    /// Left fold without a seed: the first call receives `None`.
    ///
    /// Returns `None` for an empty map.
    pub fn reduce<A, F>(&self, mut f: F) -> Option<A>
    where
        F: FnMut(Option<A>, &K, &V) -> A,
    {
        self.iter()
            .fold(None, |acc, (key, value)| Some(f(acc, &key, &value)))
    }

    /// Left fold from `init`
    pub fn fold<A, F>(&self, init: A, mut f: F) -> A
    where
        F: FnMut(A, &K, &V) -> A,
    {
        self.iter()
            .fold(init, |acc, (key, value)| f(acc, &key, &value))
    }

    /// Reorder entries by `compare`.
    ///
    /// Entries trade places among the positions they already hold, so a
    /// traversal in progress continues from its current position. Pending
    /// per-entry timers are dropped and not re-armed. Sweep ages are kept.
    /// Entries removed while the comparator runs stay removed.
    pub fn sort_by<F>(&self, mut compare: F)
    where
        F: FnMut(&(K, V), &(K, V)) -> Ordering,
    {
        let mut entries: Vec<(K, V)> = self.iter().collect();
        if entries.is_empty() {
            return;
        }
        entries.sort_by(&mut compare);
        self.reorder(entries.into_iter().map(|(key, _)| key).collect());
    }

    /// New map with this map's configuration holding this map's entries,
    /// then each source's entries in turn. Later sources win on key
    /// collisions; colliding keys keep their first position.
    pub fn concat(&self, sources: &[&Self]) -> Self {
        let merged = self.empty_like();
        merged.concat_mut(&[self]);
        merged.concat_mut(sources);
        merged
    }

    /// Merge each source into this map, in order
    pub fn concat_mut(&self, sources: &[&Self]) {
        for source in sources {
            for (key, value) in source.iter() {
                self.insert(key, value);
            }
        }
    }

    /// Delete, in place, every entry the predicate rejects.
    ///
    /// Returns the number of entries removed.
    pub fn retain<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&K, &V) -> bool,
    {
        let mut removed = 0;
        for (key, value) in self.iter() {
            if !predicate(&key, &value) && self.delete(&key) {
                removed += 1;
            }
        }
        removed
    }

    /// Alias of [`retain`](Self::retain)
    pub fn filter_mut<F>(&self, predicate: F) -> usize
    where
        F: FnMut(&K, &V) -> bool,
    {
        self.retain(predicate)
    }
}
