//! EXPIREMAP - Self-Expiring Insertion-Ordered Map
//!
//! Key-value map that keeps insertion order, evicts its oldest entry when a
//! capacity limit is reached, and expires entries either with per-entry
//! timers or with a periodic background sweep driven by Tokio.
//!
//! ```rust,no_run
//! use expiremap::{ExpiringMap, MapConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), expiremap::ConfigError> {
//!     let config = MapConfig::new()
//!         .with_capacity_limit(1000)
//!         .with_expire_after(Duration::from_secs(30))
//!         .with_sweep_interval(Duration::from_secs(5))
//!         .with_on_expire(|key: &String, _value: &u64| println!("expired {}", key));
//!
//!     let sessions = ExpiringMap::new(config)?;
//!     sessions.insert("alice".to_string(), 1);
//!     Ok(())
//! }
//! ```

mod combinators;
pub mod config;
pub mod error;
pub mod map;
pub mod metrics;
pub mod storage;

pub use config::{MapConfig, OnExpire};
pub use error::ConfigError;
pub use map::{ExpiringMap, Iter};
pub use metrics::MapMetrics;
pub use storage::{CapacityPolicy, OrderedStore, StrategyKind};
