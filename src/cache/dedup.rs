//! Short-window request deduplication.
//!
//! Absorbs accidental double-submits — a double-clicked button, a
//! client retry on a slow response — by remembering each client's
//! completed requests for a few seconds. An identical request from the
//! same client inside the window returns the recorded result without
//! touching the provider.
//!
//! This is not general caching (that is [`ResponseCache`]'s job): the
//! key mixes in the client id, and the TTL is seconds, not hours.
//!
//! [`ResponseCache`]: super::ResponseCache

use std::time::Duration;

use moka::future::Cache;

use super::response::CachedAnalysis;
use crate::fingerprint::client_fingerprint;
use crate::telemetry;

/// Configuration for the request deduplicator.
#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// How long a completed request shadows identical ones. Default: 30s.
    pub window: Duration,
    /// Maximum remembered requests. Default: 10,000.
    pub max_entries: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(30),
            max_entries: 10_000,
        }
    }
}

impl DedupConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the dedup window.
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Set the maximum number of remembered requests.
    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }
}

/// Per-client deduplication store keyed on hash(client + payload).
pub struct RequestDeduplicator {
    cache: Cache<u64, CachedAnalysis>,
}

impl RequestDeduplicator {
    /// Create a new deduplicator with the given configuration.
    pub fn new(config: &DedupConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(config.window)
            .build();
        Self { cache }
    }

    /// Check whether this client already completed an identical request
    /// inside the window. Emits a dedup-hit metric on hit.
    pub async fn check(
        &self,
        client_id: &str,
        endpoint: &str,
        text: &str,
    ) -> Option<CachedAnalysis> {
        let key = client_fingerprint(client_id, endpoint, text);
        let hit = self.cache.get(&key).await;
        if hit.is_some() {
            metrics::counter!(telemetry::DEDUP_HITS_TOTAL, "endpoint" => endpoint.to_string())
                .increment(1);
        }
        hit
    }

    /// Record a completed request so immediate retries are collapsed.
    pub async fn record(
        &self,
        client_id: &str,
        endpoint: &str,
        text: &str,
        result: CachedAnalysis,
    ) {
        let key = client_fingerprint(client_id, endpoint, text);
        self.cache.insert(key, result).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AnalysisPayload, ArticleAnalysis};
    use crate::cost::TokenUsage;

    fn make_result() -> CachedAnalysis {
        CachedAnalysis {
            payload: AnalysisPayload::Standard(ArticleAnalysis {
                titles: vec!["t".into()],
                hashtags: vec!["#t".into(); 20],
                eyecatch_prompt: "p".into(),
                summary: "s".into(),
                seo_score: 1,
                virality_score: 2,
            }),
            model: "test-model".into(),
            prompt_version: "v1".into(),
            usage: TokenUsage::default(),
            cost: 0.0,
            ttl: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn same_client_same_payload_is_collapsed() {
        let dedup = RequestDeduplicator::new(&DedupConfig::default());
        assert!(dedup.check("1.2.3.4", "analyze-article", "text").await.is_none());

        dedup
            .record("1.2.3.4", "analyze-article", "text", make_result())
            .await;

        assert!(dedup.check("1.2.3.4", "analyze-article", "text").await.is_some());
    }

    #[tokio::test]
    async fn different_clients_are_not_collapsed() {
        let dedup = RequestDeduplicator::new(&DedupConfig::default());
        dedup
            .record("1.2.3.4", "analyze-article", "text", make_result())
            .await;
        assert!(dedup.check("5.6.7.8", "analyze-article", "text").await.is_none());
    }

    #[tokio::test]
    async fn window_expiry_reopens_the_request() {
        let config = DedupConfig::new().window(Duration::from_millis(50));
        let dedup = RequestDeduplicator::new(&config);
        dedup
            .record("1.2.3.4", "analyze-article", "text", make_result())
            .await;

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(dedup.check("1.2.3.4", "analyze-article", "text").await.is_none());
    }

    #[tokio::test]
    async fn cosmetic_whitespace_still_collapses() {
        let dedup = RequestDeduplicator::new(&DedupConfig::default());
        dedup
            .record("1.2.3.4", "analyze-article", "some  text", make_result())
            .await;
        assert!(dedup.check("1.2.3.4", "analyze-article", "some text").await.is_some());
    }
}
