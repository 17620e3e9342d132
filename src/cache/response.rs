//! Response cache for completed article analyses.
//!
//! Keyed on the content fingerprint of `(endpoint, normalized text)`,
//! so trivially-reformatted resubmissions hit while any semantic change
//! misses. Entries carry their own TTL; expiry is lazy — an entry past
//! its TTL is simply a miss on the next lookup, there is no sweep.
//!
//! # Concurrency
//!
//! Multiple concurrent misses for the same fingerprint may each invoke
//! the provider; the second writer overwrites the first with an
//! equivalent value. The provider call is idempotent, so the only cost
//! is the duplicate call itself.
//!
//! # Future extensibility: shared/distributed caching
//!
//! The in-memory moka cache is per-process; instances of munin do not
//! coordinate. When shared caching is needed (redis-backed, multiple
//! instances), extract a `CacheBackend` trait and inject it here — the
//! fingerprint key design is backend-agnostic, but would need a stable
//! cross-process hash first (see `fingerprint` module docs).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use moka::Expiry;
use moka::future::Cache;

use crate::analysis::AnalysisPayload;
use crate::cost::TokenUsage;
use crate::fingerprint::fingerprint;
use crate::telemetry;

/// Configuration for the response cache.
///
/// ```rust
/// # use munin::cache::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .max_entries(5_000)
///     .default_ttl(Duration::from_secs(6 * 3600));
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached entries. Default: 10,000.
    pub max_entries: u64,
    /// TTL applied to entries that don't specify their own. Default: 1 hour.
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            default_ttl: Duration::from_secs(3600),
        }
    }
}

impl CacheConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of cached entries.
    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }

    /// Set the TTL used when an entry doesn't carry its own.
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }
}

/// A completed analysis plus the metadata the routes echo back.
#[derive(Debug, Clone)]
pub struct CachedAnalysis {
    pub payload: AnalysisPayload,
    pub model: String,
    pub prompt_version: String,
    pub usage: TokenUsage,
    /// Actual provider cost of the call that produced this entry, USD.
    pub cost: f64,
    /// Per-entry time-to-live.
    pub ttl: Duration,
}

/// Hit/miss counters, exposed for the usage-stats endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Hit rate in [0, 1]; zero lookups count as 0.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Per-entry TTL: each value declares how long it lives.
struct PerEntryTtl;

impl Expiry<u64, CachedAnalysis> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &u64,
        value: &CachedAnalysis,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-memory response cache for article analyses.
///
/// Uses moka's async LRU cache with a per-entry expiry policy. Keyed on
/// a content fingerprint of (endpoint, normalized text).
pub struct ResponseCache {
    cache: Cache<u64, CachedAnalysis>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    /// Create a new response cache with the given configuration.
    pub fn new(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .expire_after(PerEntryTtl)
            .build();
        Self {
            cache,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a cached analysis.
    ///
    /// Normalizes and fingerprints internally, so callers pass the raw
    /// article text. Returns `None` on miss or past-TTL entries.
    /// Emits cache hit/miss metrics and updates [`CacheStats`].
    pub async fn get(&self, endpoint: &str, text: &str) -> Option<CachedAnalysis> {
        let key = fingerprint(endpoint, text);
        match self.cache.get(&key).await {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(telemetry::CACHE_HITS_TOTAL, "endpoint" => endpoint.to_string())
                    .increment(1);
                Some(entry)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "endpoint" => endpoint.to_string())
                    .increment(1);
                None
            }
        }
    }

    /// Store an analysis under the fingerprint of `(endpoint, text)`.
    pub async fn insert(&self, endpoint: &str, text: &str, entry: CachedAnalysis) {
        let key = fingerprint(endpoint, text);
        self.cache.insert(key, entry).await;
    }

    /// Current hit/miss counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
