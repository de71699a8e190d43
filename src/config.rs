//! Map Configuration

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ConfigError;

/// Callback invoked once per entry removed by expiry
pub type OnExpire<K, V> = Arc<dyn Fn(&K, &V) + Send + Sync>;

/// Map configuration, fixed once the map is built
pub struct MapConfig<K, V> {
    /// Maximum number of entries (None = unlimited, Some(0) = reject every insert)
    pub capacity_limit: Option<usize>,

    /// Extra lifetime added to an entry's last insert time (None = no age limit)
    pub expire_after: Option<Duration>,

    /// Period of the background sweep; its presence enables the sweep
    pub sweep_interval: Option<Duration>,

    /// Called with every entry removed by expiry
    pub on_expire: Option<OnExpire<K, V>>,
}

impl<K, V> Default for MapConfig<K, V> {
    fn default() -> Self {
        Self {
            capacity_limit: None,
            expire_after: None,
            sweep_interval: None,
            on_expire: None,
        }
    }
}

impl<K, V> Clone for MapConfig<K, V> {
    fn clone(&self) -> Self {
        Self {
            capacity_limit: self.capacity_limit,
            expire_after: self.expire_after,
            sweep_interval: self.sweep_interval,
            on_expire: self.on_expire.clone(),
        }
    }
}

impl<K, V> fmt::Debug for MapConfig<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapConfig")
            .field("capacity_limit", &self.capacity_limit)
            .field("expire_after", &self.expire_after)
            .field("sweep_interval", &self.sweep_interval)
            .field("on_expire", &self.on_expire.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl<K, V> MapConfig<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the number of entries; the oldest entry is evicted to make room
    pub fn with_capacity_limit(mut self, limit: usize) -> Self {
        self.capacity_limit = Some(limit);
        self
    }

    /// Expire entries older than `after` on each sweep
    pub fn with_expire_after(mut self, after: Duration) -> Self {
        self.expire_after = Some(after);
        self
    }

    /// Run the expiry sweep every `interval`
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    /// Set the expiry callback
    pub fn with_on_expire<F>(mut self, callback: F) -> Self
    where
        F: Fn(&K, &V) + Send + Sync + 'static,
    {
        self.on_expire = Some(Arc::new(callback));
        self
    }

    /// Check the settings that the type system cannot rule out
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::ZeroSweepInterval);
        }
        Ok(())
    }
}
