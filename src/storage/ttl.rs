//! Expiry Strategies
//!
//! Per-entry one-shot timers or a periodic sweep, chosen once per map.
//! Background tasks only hold a weak reference to the map, so a pending
//! timer never keeps a dropped map alive.

use hashbrown::HashMap;
use std::hash::Hash;
use std::sync::Weak;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::{interval, sleep, Instant};
use tracing::{debug, info};

use super::OrderedStore;
use crate::map::Shared;

/// Which expiry strategy a map runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// Each insert with a TTL arms its own timer; others live until
    /// deleted or evicted
    PerEntryTimer,
    /// A background task sweeps old entries on an interval
    IntervalSweep,
}

/// Pending per-entry timer
#[derive(Debug)]
pub(crate) struct TimerSlot {
    generation: u64,
    handle: AbortHandle,
}

#[derive(Debug)]
pub(crate) enum ExpiryStrategy<K> {
    PerEntryTimer {
        timers: HashMap<K, TimerSlot>,
        next_generation: u64,
    },
    IntervalSweep {
        /// Last insert time per key; present only while the sweep runs
        stamps: Option<HashMap<K, Instant>>,
        task: Option<AbortHandle>,
    },
}

impl<K> ExpiryStrategy<K> {
    pub(crate) fn per_entry() -> Self {
        Self::PerEntryTimer {
            timers: HashMap::new(),
            next_generation: 0,
        }
    }

    pub(crate) fn interval_sweep() -> Self {
        Self::IntervalSweep {
            stamps: None,
            task: None,
        }
    }

    pub(crate) fn kind(&self) -> StrategyKind {
        match self {
            Self::PerEntryTimer { .. } => StrategyKind::PerEntryTimer,
            Self::IntervalSweep { .. } => StrategyKind::IntervalSweep,
        }
    }

    pub(crate) fn is_sweeping(&self) -> bool {
        matches!(self, Self::IntervalSweep { stamps: Some(_), .. })
    }

    pub(crate) fn pending_timers(&self) -> usize {
        match self {
            Self::PerEntryTimer { timers, .. } => timers.len(),
            _ => 0,
        }
    }

    /// Number of keys with a recorded sweep age
    pub(crate) fn tracked_stamps(&self) -> usize {
        match self {
            Self::IntervalSweep {
                stamps: Some(stamps),
                ..
            } => stamps.len(),
            _ => 0,
        }
    }

    /// Abort every pending per-entry timer
    pub(crate) fn cancel_timers(&mut self) {
        if let Self::PerEntryTimer { timers, .. } = self {
            for (_, slot) in timers.drain() {
                slot.handle.abort();
            }
        }
    }

    /// Forget all expiry state for a cleared map. A running sweep keeps
    /// running with an empty table.
    pub(crate) fn clear(&mut self) {
        self.cancel_timers();
        if let Self::IntervalSweep {
            stamps: Some(stamps),
            ..
        } = self
        {
            stamps.clear();
        }
    }

    /// Stop the sweep task and drop the stamp table
    pub(crate) fn stop(&mut self) -> bool {
        let Self::IntervalSweep { stamps, task } = self else {
            return false;
        };
        if let Some(task) = task.take() {
            task.abort();
        }
        stamps.take().is_some()
    }

    /// Abort all background work
    pub(crate) fn shutdown(&mut self) {
        self.cancel_timers();
        self.stop();
    }
}

impl<K> ExpiryStrategy<K>
where
    K: Eq + Hash + Clone,
{
    /// Record an insert or value replacement of `key`.
    ///
    /// Supersedes any pending timer and refreshes the sweep stamp.
    pub(crate) fn touch(&mut self, key: &K, now: Instant) {
        match self {
            Self::PerEntryTimer { timers, .. } => {
                if let Some(slot) = timers.remove(key) {
                    slot.handle.abort();
                }
            }
            Self::IntervalSweep { stamps, .. } => {
                if let Some(stamps) = stamps {
                    stamps.insert(key.clone(), now);
                }
            }
        }
    }

    /// Drop expiry state of a removed key
    pub(crate) fn forget(&mut self, key: &K) {
        match self {
            Self::PerEntryTimer { timers, .. } => {
                if let Some(slot) = timers.remove(key) {
                    slot.handle.abort();
                }
            }
            Self::IntervalSweep { stamps, .. } => {
                if let Some(stamps) = stamps {
                    stamps.remove(key);
                }
            }
        }
    }

    /// Claim the timer of `key` if `generation` is still the current one.
    ///
    /// A timer that fires after being superseded finds a newer generation
    /// (or no slot at all) and does nothing.
    pub(crate) fn claim_timer(&mut self, key: &K, generation: u64) -> bool {
        let Self::PerEntryTimer { timers, .. } = self else {
            return false;
        };
        let current = timers
            .get(key)
            .is_some_and(|slot| slot.generation == generation);
        if current {
            timers.remove(key);
        }
        current
    }

    /// Keys the sweep should remove now, in store order.
    ///
    /// Without `expire_after` every entry qualifies. Nothing qualifies while
    /// the sweep is stopped.
    pub(crate) fn sweep_candidates<V>(
        &self,
        store: &OrderedStore<K, V>,
        now: Instant,
        expire_after: Option<Duration>,
    ) -> Vec<K> {
        let Self::IntervalSweep {
            stamps: Some(stamps),
            ..
        } = self
        else {
            return Vec::new();
        };

        store
            .keys()
            .filter(|key| match expire_after {
                None => true,
                Some(after) => stamps
                    .get(*key)
                    .is_some_and(|stamp| now.saturating_duration_since(*stamp) > after),
            })
            .cloned()
            .collect()
    }

    /// (Re)start the sweep.
    ///
    /// Live keys get `now` as their stamp: entries inserted while the sweep
    /// was stopped have no recorded age and are treated as inserted at start.
    pub(crate) fn start<'a, V>(
        &mut self,
        keys: impl Iterator<Item = &'a K>,
        now: Instant,
        runtime: &Handle,
        map: Weak<Shared<K, V>>,
        every: Duration,
    ) -> bool
    where
        K: Send + 'static,
        V: Clone + Send + 'static,
    {
        let Self::IntervalSweep { stamps, task } = self else {
            return false;
        };
        if let Some(previous) = task.take() {
            previous.abort();
        }
        *stamps = Some(keys.map(|key| (key.clone(), now)).collect());
        *task = Some(spawn_sweeper(runtime, map, every));
        true
    }

    /// Arm a one-shot timer for `key`, replacing any pending one.
    ///
    /// `value` is what the expiry callback receives when the timer fires.
    pub(crate) fn arm<V>(
        &mut self,
        key: K,
        value: V,
        ttl: Duration,
        runtime: &Handle,
        map: Weak<Shared<K, V>>,
    ) -> bool
    where
        K: Send + 'static,
        V: Clone + Send + 'static,
    {
        let Self::PerEntryTimer {
            timers,
            next_generation,
        } = self
        else {
            return false;
        };

        let generation = *next_generation;
        *next_generation += 1;

        let timer_key = key.clone();
        let handle = runtime
            .spawn(async move {
                sleep(ttl).await;
                if let Some(shared) = map.upgrade() {
                    shared.expire_timer(&timer_key, generation, value);
                }
            })
            .abort_handle();

        if let Some(previous) = timers.insert(key, TimerSlot { generation, handle }) {
            previous.handle.abort();
        }
        true
    }
}

/// Spawn the periodic sweep task
fn spawn_sweeper<K, V>(runtime: &Handle, map: Weak<Shared<K, V>>, every: Duration) -> AbortHandle
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    runtime
        .spawn(async move {
            let mut ticker = interval(every);
            info!("Expiry sweep started, interval: {:?}", every);

            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(shared) = map.upgrade() else {
                    debug!("Map dropped, expiry sweep exiting");
                    break;
                };
                shared.sweep();
            }
        })
        .abort_handle()
}
