//! Telemetry metric name constants.
//!
//! Centralised metric names for munin operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `munin_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `endpoint` — analysis endpoint (e.g. "analyze-article")
//! - `model` — provider model id
//! - `status` — outcome: "ok" or "error"
//! - `tier` — token pricing tier: "input", "cache_write", "cache_read", "output"

/// Total completion requests dispatched through the gateway.
///
/// Labels: `model`, `status` ("ok" | "error").
pub const REQUESTS_TOTAL: &str = "munin_requests_total";

/// Gateway request duration in seconds.
///
/// Labels: `model`.
pub const REQUEST_DURATION_SECONDS: &str = "munin_request_duration_seconds";

/// Total tokens consumed, by pricing tier.
///
/// Labels: `model`, `tier` ("input" | "cache_write" | "cache_read" | "output").
pub const TOKENS_TOTAL: &str = "munin_tokens_total";

/// Total response-cache hits.
///
/// Labels: `endpoint`.
pub const CACHE_HITS_TOTAL: &str = "munin_cache_hits_total";

/// Total response-cache misses.
///
/// Labels: `endpoint`.
pub const CACHE_MISSES_TOTAL: &str = "munin_cache_misses_total";

/// Total requests collapsed by the deduplicator.
///
/// Labels: `endpoint`.
pub const DEDUP_HITS_TOTAL: &str = "munin_dedup_hits_total";

/// Total requests rejected by the rate limiter.
pub const RATE_LIMITED_TOTAL: &str = "munin_rate_limited_total";

/// Accumulated provider cost in micro-dollars (USD × 1e6).
///
/// Counters are integral, so cost is scaled to micro-dollars to keep
/// sub-cent amounts visible.
pub const COST_MICRODOLLARS_TOTAL: &str = "munin_cost_microdollars_total";
