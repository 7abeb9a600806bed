//! # tessera-cache
//!
//! Caching for the tessera derivative-image engine.
//!
//! - [`DerivativeCache`] - disk-backed, content-addressed store of encoded
//!   outputs keyed by request fingerprint, with staged atomic writes and
//!   cooperative TTL / size-LRU eviction
//! - [`InfoCache`] - bounded in-memory LRU of source descriptions
//! - [`SingleFlight`] - collapses concurrent identical builds to one
//!   execution
//!
//! Both caches are hints: losing an entry costs a rebuild, never
//! correctness, as long as the fingerprint covers every pixel-affecting
//! input.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod derivative;
pub mod info;
pub mod singleflight;

pub use derivative::{
    spawn_eviction_worker, CacheHit, DerivativeCache, DerivativeCacheStats, EntryWriter,
    EvictionWorker, PurgeSelector,
};
pub use info::{InfoCache, InfoCacheStats};
pub use singleflight::{FlightGuard, Role, SingleFlight};
