//! Eviction Module
//!
//! FIFO capacity bound: the oldest entry makes room for a new key.

use std::hash::Hash;

use super::OrderedStore;

/// Capacity policy applied on every insert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CapacityPolicy {
    /// No limit (default)
    #[default]
    Unbounded,
    /// At most this many entries, evicting the oldest first
    Fifo(usize),
}

impl CapacityPolicy {
    pub fn from_limit(limit: Option<usize>) -> Self {
        limit.map_or(Self::Unbounded, Self::Fifo)
    }

    pub fn limit(&self) -> Option<usize> {
        match self {
            Self::Unbounded => None,
            Self::Fifo(limit) => Some(*limit),
        }
    }

    /// Whether inserts are accepted at all. A zero limit turns every
    /// insert into a no-op.
    pub fn admits(&self) -> bool {
        !matches!(self, Self::Fifo(0))
    }

    /// Key to evict before `key` is inserted, if any.
    ///
    /// Replacing an existing key never evicts.
    pub fn victim<'a, K, V>(&self, store: &'a OrderedStore<K, V>, key: &K) -> Option<&'a K>
    where
        K: Eq + Hash + Clone,
    {
        let Self::Fifo(limit) = self else {
            return None;
        };
        if store.contains_key(key) || store.len() < *limit {
            return None;
        }
        store.first().map(|(oldest, _)| oldest)
    }
}
