//! Caching layers: the global response cache and the per-client
//! request deduplicator.
//!
//! Two deliberately distinct stores:
//!
//! - [`ResponseCache`] is global and long-lived (hours): any client
//!   asking for the same analysis of the same article is served from it.
//! - [`RequestDeduplicator`] is per-client and short-lived (seconds):
//!   it absorbs accidental double-submits without consulting the global
//!   cache's TTL policy.

pub mod dedup;
pub mod response;

pub use dedup::{DedupConfig, RequestDeduplicator};
pub use response::{CacheConfig, CacheStats, CachedAnalysis, ResponseCache};
