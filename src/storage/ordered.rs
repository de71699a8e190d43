//! Insertion-Ordered Store
//!
//! Hash index for O(1) key access plus a sequence-ordered index that
//! remembers insertion order. Every entry carries the sequence number it
//! was inserted with; traversal walks sequence numbers in ascending order,
//! so a cursor is just the last sequence number it yielded.

use hashbrown::{HashMap, HashSet};
use std::collections::BTreeMap;
use std::hash::Hash;
use std::mem;
use std::ops::Bound;

/// Position of an entry in insertion order
pub type Seq = u64;

#[derive(Debug, Clone)]
struct Slot<V> {
    seq: Seq,
    value: V,
}

/// Key-value store that iterates in insertion order
#[derive(Debug, Clone)]
pub struct OrderedStore<K, V> {
    index: HashMap<K, Slot<V>>,
    order: BTreeMap<Seq, K>,
    next_seq: Seq,
}

impl<K, V> Default for OrderedStore<K, V> {
    fn default() -> Self {
        Self {
            index: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
        }
    }
}

impl<K, V> OrderedStore<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value, returns the previous value.
    ///
    /// Replacing keeps the entry's position in insertion order.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        if let Some(slot) = self.index.get_mut(&key) {
            return Some(mem::replace(&mut slot.value, value));
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, key.clone());
        self.index.insert(key, Slot { seq, value });
        None
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.index.get(key).map(|slot| &slot.value)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Remove an entry, returning the owned key and value
    pub fn remove_entry(&mut self, key: &K) -> Option<(K, V)> {
        let (key, slot) = self.index.remove_entry(key)?;
        self.order.remove(&slot.seq);
        Some((key, slot.value))
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.remove_entry(key).map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Drop every entry.
    ///
    /// Sequence numbers keep increasing so that a cursor taken before the
    /// clear still sees entries inserted after it.
    pub fn clear(&mut self) {
        self.index.clear();
        self.order.clear();
    }

    /// Oldest entry
    pub fn first(&self) -> Option<(&K, &V)> {
        let (_, key) = self.order.first_key_value()?;
        self.entry(key)
    }

    /// Newest entry
    pub fn last(&self) -> Option<(&K, &V)> {
        let (_, key) = self.order.last_key_value()?;
        self.entry(key)
    }

    /// First live entry positioned after `cursor` (or the oldest entry when
    /// `cursor` is None), together with its position.
    pub fn next_after(&self, cursor: Option<Seq>) -> Option<(Seq, &K, &V)> {
        let lower = match cursor {
            Some(seq) => Bound::Excluded(seq),
            None => Bound::Unbounded,
        };
        let (seq, key) = self.order.range((lower, Bound::Unbounded)).next()?;
        let (key, value) = self.entry(key)?;
        Some((*seq, key, value))
    }

    /// Iterate entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        self.order.values().filter_map(|key| self.entry(key))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.order.values()
    }

    /// Rearrange the given keys into the order given.
    ///
    /// The keys trade places among the positions they already hold, so the
    /// set of sequence numbers is unchanged and a cursor keeps its place.
    /// Keys that are not present, and repeats, are skipped.
    pub fn reorder<I>(&mut self, keys: I)
    where
        I: IntoIterator<Item = K>,
    {
        let mut seen = HashSet::new();
        let keys: Vec<K> = keys
            .into_iter()
            .filter(|key| self.index.contains_key(key) && seen.insert(key.clone()))
            .collect();

        let mut seqs: Vec<Seq> = keys
            .iter()
            .filter_map(|key| self.index.get(key).map(|slot| slot.seq))
            .collect();
        seqs.sort_unstable();
        for seq in &seqs {
            self.order.remove(seq);
        }

        for (key, seq) in keys.into_iter().zip(seqs) {
            if let Some(slot) = self.index.get_mut(&key) {
                slot.seq = seq;
            }
            self.order.insert(seq, key);
        }
    }

    fn entry(&self, key: &K) -> Option<(&K, &V)> {
        self.index
            .get_key_value(key)
            .map(|(key, slot)| (key, &slot.value))
    }
}
