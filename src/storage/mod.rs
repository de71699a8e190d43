//! Storage Engine
//!
//! Insertion-ordered store, capacity eviction and expiry strategies.

mod eviction;
mod ordered;
mod ttl;

pub use eviction::CapacityPolicy;
pub use ordered::{OrderedStore, Seq};
pub use ttl::StrategyKind;

pub(crate) use ttl::ExpiryStrategy;
