//! Tests for [`ResponseCache`] and [`RequestDeduplicator`] — the two
//! caching layers with their distinct keying and lifetimes.

use std::time::Duration;

use munin::analysis::{AnalysisPayload, ArticleAnalysis};
use munin::cache::{
    CacheConfig, CachedAnalysis, DedupConfig, RequestDeduplicator, ResponseCache,
};
use munin::cost::TokenUsage;

fn entry(ttl: Duration) -> CachedAnalysis {
    CachedAnalysis {
        payload: AnalysisPayload::Standard(ArticleAnalysis {
            titles: vec!["A title".into()],
            hashtags: vec!["#tag".into(); 20],
            eyecatch_prompt: "a quiet office at dawn".into(),
            summary: "summary".into(),
            seo_score: 70,
            virality_score: 40,
        }),
        model: "claude-3-5-sonnet-20241022".into(),
        prompt_version: "v1".into(),
        usage: TokenUsage {
            input_tokens: 1000,
            output_tokens: 500,
            cache_creation_input_tokens: 0,
            cache_read_input_tokens: 0,
        },
        cost: 0.0105,
        ttl,
    }
}

// =========================================================================
// CacheConfig
// =========================================================================

#[test]
fn cache_config_defaults() {
    let config = CacheConfig::default();
    assert_eq!(config.max_entries, 10_000);
    assert_eq!(config.default_ttl, Duration::from_secs(3600));
}

#[test]
fn cache_config_builder() {
    let config = CacheConfig::new()
        .max_entries(500)
        .default_ttl(Duration::from_secs(60));
    assert_eq!(config.max_entries, 500);
    assert_eq!(config.default_ttl, Duration::from_secs(60));
}

// =========================================================================
// ResponseCache
// =========================================================================

#[tokio::test]
async fn cache_ttl_boundary() {
    let cache = ResponseCache::new(&CacheConfig::default());
    cache
        .insert("analyze-article", "article body", entry(Duration::from_millis(200)))
        .await;

    // Half-way through the TTL the entry is served.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(cache.get("analyze-article", "article body").await.is_some());

    // Past the TTL the first lookup misses.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(cache.get("analyze-article", "article body").await.is_none());
}

#[tokio::test]
async fn cache_is_global_across_clients() {
    // Nothing about the key involves a client: the cache is shared.
    let cache = ResponseCache::new(&CacheConfig::default());
    cache
        .insert("analyze-article", "shared text", entry(Duration::from_secs(60)))
        .await;
    assert!(cache.get("analyze-article", "shared text").await.is_some());
}

#[tokio::test]
async fn cache_stats_track_hits_and_misses() {
    let cache = ResponseCache::new(&CacheConfig::default());
    cache.get("analyze-article", "a").await;
    cache.get("analyze-article", "b").await;
    cache
        .insert("analyze-article", "a", entry(Duration::from_secs(60)))
        .await;
    cache.get("analyze-article", "a").await;

    let stats = cache.stats();
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.hits, 1);
    assert!((stats.hit_rate() - 1.0 / 3.0).abs() < 1e-12);
}

#[tokio::test]
async fn reformatted_text_hits_the_same_entry() {
    let cache = ResponseCache::new(&CacheConfig::default());
    cache
        .insert(
            "analyze-article",
            "first paragraph\n\n\nsecond   paragraph",
            entry(Duration::from_secs(60)),
        )
        .await;
    assert!(
        cache
            .get("analyze-article", "first paragraph\n\nsecond paragraph")
            .await
            .is_some()
    );
}

// =========================================================================
// RequestDeduplicator
// =========================================================================

#[tokio::test]
async fn dedup_is_scoped_per_client() {
    let dedup = RequestDeduplicator::new(&DedupConfig::default());
    dedup
        .record("10.0.0.1", "analyze-article", "text", entry(Duration::from_secs(60)))
        .await;

    assert!(dedup.check("10.0.0.1", "analyze-article", "text").await.is_some());
    assert!(dedup.check("10.0.0.2", "analyze-article", "text").await.is_none());
}

#[tokio::test]
async fn dedup_window_is_short_lived() {
    let dedup = RequestDeduplicator::new(&DedupConfig::new().window(Duration::from_millis(80)));
    dedup
        .record("10.0.0.1", "analyze-article", "text", entry(Duration::from_secs(60)))
        .await;
    assert!(dedup.check("10.0.0.1", "analyze-article", "text").await.is_some());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(dedup.check("10.0.0.1", "analyze-article", "text").await.is_none());
}

#[tokio::test]
async fn dedup_distinguishes_endpoints() {
    let dedup = RequestDeduplicator::new(&DedupConfig::default());
    dedup
        .record("10.0.0.1", "analyze-article", "text", entry(Duration::from_secs(60)))
        .await;
    assert!(
        dedup
            .check("10.0.0.1", "analyze-article-full", "text")
            .await
            .is_none()
    );
}
