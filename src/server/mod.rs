//! HTTP service mode.
//!
//! Exposes the orchestration core over axum:
//!
//! - `POST /api/analyze-article` — marketing analysis of one article
//! - `POST /api/analyze-article-full` — extended analysis
//! - `GET /api/usage-stats` — aggregated usage/cost statistics
//! - `GET /health` — liveness
//!
//! Every error is converted to a JSON `{"error": ...}` body at this
//! boundary; nothing propagates as a panic and raw provider payloads
//! never reach the client.

pub mod config;
pub mod handlers;

use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::Router;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::MuninError;
use crate::budget::AllocatorConfig;
use crate::cache::{CacheConfig, DedupConfig, RequestDeduplicator, ResponseCache};
use crate::cost::ModelTable;
use crate::experiments::ExperimentManager;
use crate::gateway::AiGateway;
use crate::limits::{RateLimitConfig, RateLimiter};
use crate::prompts::PromptRegistry;
use crate::provider::{AnthropicClient, CompletionProvider};
use crate::usage::UsageAnalytics;

pub use config::{Config, Secrets};

/// Shared state behind every route.
pub struct AppState {
    pub config: Config,
    /// `None` when no API key is configured; analysis requests then
    /// fail with a configuration error instead of reaching a provider.
    pub gateway: Option<AiGateway>,
    pub cache: ResponseCache,
    pub dedup: RequestDeduplicator,
    pub limiter: RateLimiter,
    pub registry: RwLock<PromptRegistry>,
    pub experiments: RwLock<ExperimentManager>,
    pub analytics: UsageAnalytics,
    pub allocator: AllocatorConfig,
}

impl AppState {
    /// Build state with the production Anthropic provider.
    pub fn new(config: Config, api_key: Option<String>) -> Self {
        let provider: Option<Arc<dyn CompletionProvider>> =
            api_key.map(|key| Arc::new(AnthropicClient::new(key)) as Arc<dyn CompletionProvider>);
        Self::with_provider(config, provider)
    }

    /// Build state with an injected provider (tests, alternative backends).
    pub fn with_provider(config: Config, provider: Option<Arc<dyn CompletionProvider>>) -> Self {
        let cache = ResponseCache::new(
            &CacheConfig::new()
                .max_entries(config.cache.max_entries)
                .default_ttl(Duration::from_secs(config.cache.ttl_secs)),
        );
        let dedup = RequestDeduplicator::new(
            &DedupConfig::new().window(Duration::from_secs(config.dedup.window_secs)),
        );
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: config.rate_limit.max_requests,
            window: Duration::from_millis(config.rate_limit.window_ms),
        });
        let registry = RwLock::new(PromptRegistry::with_embedded_seed(config.analysis.profile));
        let allocator = AllocatorConfig {
            max_tokens_per_request: config.analysis.max_tokens_per_request,
            ..AllocatorConfig::default()
        };
        let analytics = UsageAnalytics::new(config.analytics.enabled);
        let gateway = provider.map(|p| AiGateway::new(p, ModelTable::with_known_models()));

        Self {
            config,
            gateway,
            cache,
            dedup,
            limiter,
            registry,
            experiments: RwLock::new(ExperimentManager::new()),
            analytics,
            allocator,
        }
    }
}

/// Build the service router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/analyze-article", post(handlers::analyze_article))
        .route(
            "/api/analyze-article-full",
            post(handlers::analyze_article_full),
        )
        .route("/api/usage-stats", get(handlers::usage_stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

impl IntoResponse for MuninError {
    fn into_response(self) -> Response {
        // Full detail goes to the log; the client gets the category.
        match &self {
            MuninError::InvalidInput(_) => tracing::debug!("client error: {self}"),
            MuninError::RateLimited { .. } => tracing::info!("rate limited: {self}"),
            MuninError::Parsing(_) | MuninError::EmptyResponse => {
                tracing::error!("model output rejected: {self}");
            }
            _ => tracing::error!("request failed: {self:#}"),
        }

        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::Json(serde_json::json!({ "error": self.user_message() }));

        let mut response = (status, body).into_response();
        if let MuninError::RateLimited {
            retry_after: Some(retry_after),
        } = &self
            && let Ok(value) = HeaderValue::from_str(&retry_after.as_secs().max(1).to_string())
        {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}
