//! Route handlers: the request orchestration pipeline.
//!
//! Each analysis request walks the same pipeline with early exits:
//! validate → rate-limit → dedup → cache → token budget → prompt
//! resolve → gateway call → parse/repair → cache store → usage log →
//! respond. The order matters: a rate-limited client must not warm the
//! cache, and a cache hit must not consume provider budget.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Deserialize;
use tracing::error;

use super::AppState;
use crate::analysis::{AnalysisPayload, parse_analysis, parse_full_analysis};
use crate::budget::{estimate_tokens, max_tokens_for};
use crate::cache::CachedAnalysis;
use crate::cost::{TokenUsage, estimate_cost};
use crate::limits::RateDecision;
use crate::prompts::{PromptTemplate, TemplateCategory, TemplateQuery};
use crate::provider::{ChatMessage, CompletionRequest};
use crate::usage::{StatsFormat, UsageEvent};
use crate::{MuninError, Result};

/// Which analysis flavour a route serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Standard,
    Full,
}

impl Endpoint {
    /// Tag used for fingerprints, metrics, and usage events.
    fn tag(self) -> &'static str {
        match self {
            Self::Standard => "analyze-article",
            Self::Full => "analyze-article-full",
        }
    }

    fn category(self) -> TemplateCategory {
        match self {
            Self::Standard => TemplateCategory::Analysis,
            Self::Full => TemplateCategory::AnalysisFull,
        }
    }
}

/// A prompt resolved for one request, with its experiment provenance.
struct ResolvedPrompt {
    template: PromptTemplate,
    /// `(experiment_id, variant_id)` when an experiment assigned it.
    experiment: Option<(String, String)>,
}

/// Liveness probe.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// `POST /api/analyze-article`
pub async fn analyze_article(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: std::result::Result<Json<serde_json::Value>, JsonRejection>,
) -> Response {
    run_analysis(state, headers, body, Endpoint::Standard)
        .await
        .unwrap_or_else(|err| err.into_response())
}

/// `POST /api/analyze-article-full`
pub async fn analyze_article_full(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: std::result::Result<Json<serde_json::Value>, JsonRejection>,
) -> Response {
    run_analysis(state, headers, body, Endpoint::Full)
        .await
        .unwrap_or_else(|err| err.into_response())
}

async fn run_analysis(
    state: Arc<AppState>,
    headers: HeaderMap,
    body: std::result::Result<Json<serde_json::Value>, JsonRejection>,
    endpoint: Endpoint,
) -> Result<Response> {
    // Validating
    let Json(body) =
        body.map_err(|rejection| MuninError::InvalidInput(rejection.body_text()))?;
    let text = validate_article_text(&body, state.config.analysis.max_article_length)?;
    let client_id = client_id(&headers);

    // RateLimiting
    let decision = state.limiter.check(&client_id);
    if !decision.allowed {
        return Ok(rate_limited_response(&decision));
    }

    // Deduplicating
    if let Some(record) = state.dedup.check(&client_id, endpoint.tag(), text).await {
        record_usage(&state, endpoint, &record, true, true);
        return Ok(success_response(&record, true, true, 0.0));
    }

    // CacheChecking
    if let Some(record) = state.cache.get(endpoint.tag(), text).await {
        record_usage(&state, endpoint, &record, true, false);
        return Ok(success_response(&record, true, false, 0.0));
    }

    let gateway = state.gateway.as_ref().ok_or_else(|| {
        MuninError::Configuration("ANTHROPIC_API_KEY is not configured".to_string())
    })?;

    // TokenBudgeting
    let article_len = text.chars().count();
    let budget = max_tokens_for(&state.allocator, article_len, endpoint.tag());

    // PromptResolving
    let resolved = resolve_prompt(&state, endpoint.category(), &client_id)?;
    let template = &resolved.template;
    let mut vars = HashMap::new();
    vars.insert("article_text", text);
    let user_prompt = template.render(&vars)?;
    let max_tokens = budget.min(template.max_tokens);

    let model = state.config.analysis.model.clone();
    let pricing = gateway.models().get(&model)?.pricing;
    let estimated_cost = estimate_cost(
        estimate_tokens(&template.system_prompt) + estimate_tokens(&user_prompt),
        max_tokens,
        &pricing,
    );

    // Calling
    let completion = gateway
        .generate(CompletionRequest {
            model,
            system_prompt: template.system_prompt.clone(),
            cache_system_prompt: template.wants_system_prompt_caching(),
            messages: vec![ChatMessage::user(user_prompt)],
            max_tokens,
            temperature: template.temperature,
        })
        .await?;

    // Parsing + Validating-Output
    let policy = state.config.analysis.repair_policy;
    let parsed = match endpoint {
        Endpoint::Standard => parse_analysis(&completion.content, policy).map(AnalysisPayload::Standard),
        Endpoint::Full => parse_full_analysis(&completion.content, policy).map(AnalysisPayload::Full),
    };
    let payload = match parsed {
        Ok(payload) => {
            record_prompt_outcome(&state, &resolved, true);
            payload
        }
        Err(e) => {
            record_prompt_outcome(&state, &resolved, false);
            // The raw completion stays server-side, truncated for the log.
            let raw: String = completion.content.chars().take(500).collect();
            error!(endpoint = endpoint.tag(), raw = %raw, "unparseable model output");
            return Err(e);
        }
    };

    // Caching
    let record = CachedAnalysis {
        payload,
        model: completion.model,
        prompt_version: template.version.clone(),
        usage: completion.cost.usage,
        cost: completion.cost.total_cost,
        ttl: std::time::Duration::from_secs(state.config.cache.ttl_secs),
    };
    state.cache.insert(endpoint.tag(), text, record.clone()).await;
    state
        .dedup
        .record(&client_id, endpoint.tag(), text, record.clone())
        .await;
    record_usage(&state, endpoint, &record, false, false);

    // Responding
    Ok(success_response(&record, false, false, estimated_cost))
}

/// Pull the article text out of the request body.
fn validate_article_text(body: &serde_json::Value, max_length: usize) -> Result<&str> {
    let value = body
        .get("articleText")
        .ok_or_else(|| MuninError::InvalidInput("articleText is required".to_string()))?;
    let text = value
        .as_str()
        .ok_or_else(|| MuninError::InvalidInput("articleText must be a string".to_string()))?;
    if text.trim().is_empty() {
        return Err(MuninError::InvalidInput(
            "articleText must not be empty".to_string(),
        ));
    }
    let length = text.chars().count();
    if length > max_length {
        return Err(MuninError::InvalidInput(format!(
            "articleText is too long: {length} characters (maximum {max_length})"
        )));
    }
    Ok(text)
}

/// Identify the caller: first `X-Forwarded-For` hop, then `X-Real-IP`,
/// then a shared bucket.
fn client_id(headers: &HeaderMap) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok())
        && let Some(first) = forwarded.split(',').next()
    {
        let first = first.trim();
        if !first.is_empty() {
            return first.to_string();
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }
    "unknown".to_string()
}

/// Resolve the prompt for a category: an active experiment's variant
/// for this client when one exists, else the registry default.
fn resolve_prompt(
    state: &AppState,
    category: TemplateCategory,
    client_id: &str,
) -> Result<ResolvedPrompt> {
    {
        let experiments = state.experiments.read().expect("experiment lock poisoned");
        if let Some(experiment) = experiments.active_for_category(category) {
            let variant = experiments.select_variant(&experiment.id, client_id)?;
            return Ok(ResolvedPrompt {
                template: variant.prompt.clone(),
                experiment: Some((experiment.id.clone(), variant.id.clone())),
            });
        }
    }

    let registry = state.registry.read().expect("registry lock poisoned");
    let template = registry.get(category, &TemplateQuery::new())?.clone();
    Ok(ResolvedPrompt {
        template,
        experiment: None,
    })
}

/// Feed a parse outcome back into the experiment or registry stats.
fn record_prompt_outcome(state: &AppState, resolved: &ResolvedPrompt, success: bool) {
    match &resolved.experiment {
        Some((experiment_id, variant_id)) => {
            let mut experiments = state.experiments.write().expect("experiment lock poisoned");
            let _ = experiments.record_result(experiment_id, variant_id, success);
        }
        None => {
            let mut registry = state.registry.write().expect("registry lock poisoned");
            let _ = registry.record_performance(&resolved.template.id, success);
        }
    }
}

fn record_usage(
    state: &AppState,
    endpoint: Endpoint,
    record: &CachedAnalysis,
    cached: bool,
    deduplicated: bool,
) {
    state.analytics.record(UsageEvent {
        timestamp: Utc::now(),
        endpoint: endpoint.tag().to_string(),
        model: record.model.clone(),
        // Cached responses spend nothing; don't double-count the
        // original call's tokens in the aggregates.
        usage: if cached {
            TokenUsage::default()
        } else {
            record.usage
        },
        cost: if cached { 0.0 } else { record.cost },
        cached,
        deduplicated,
    });
}

/// 429 with the retry headers the contract promises.
fn rate_limited_response(decision: &RateDecision) -> Response {
    let retry_after = decision.retry_after_secs().max(1);
    (
        StatusCode::TOO_MANY_REQUESTS,
        [
            (header::RETRY_AFTER, retry_after.to_string()),
            (
                header::HeaderName::from_static("x-ratelimit-remaining"),
                decision.remaining.to_string(),
            ),
            (
                header::HeaderName::from_static("x-ratelimit-reset"),
                retry_after.to_string(),
            ),
        ],
        Json(serde_json::json!({
            "error": "Rate limit exceeded. Please retry later."
        })),
    )
        .into_response()
}

/// 200 with the analysis payload plus the `_metadata` envelope.
fn success_response(
    record: &CachedAnalysis,
    cached: bool,
    deduplicated: bool,
    estimated_cost: f64,
) -> Response {
    let mut body = match serde_json::to_value(&record.payload) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => {
            // Payloads are structs; anything else is a programming error.
            return MuninError::Parsing("analysis payload is not an object".to_string())
                .into_response();
        }
    };
    body.insert(
        "_metadata".to_string(),
        serde_json::json!({
            "cached": cached,
            "deduplication": deduplicated,
            "estimatedCost": estimated_cost,
            "actualCost": if cached { 0.0 } else { record.cost },
            "tokensUsed": record.usage.total(),
            "model": record.model,
            "promptVersion": record.prompt_version,
        }),
    );
    Json(serde_json::Value::Object(body)).into_response()
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    period: Option<String>,
    format: Option<String>,
}

/// `GET /api/usage-stats?period={today|week|month|all}&format={json|markdown}`
pub async fn usage_stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Response {
    let result = (|| -> Result<Response> {
        let period = query.period.as_deref().unwrap_or("all").parse()?;
        let format: StatsFormat = query.format.as_deref().unwrap_or("json").parse()?;
        let summary = state.analytics.summary(period, state.cache.stats());
        Ok(match format {
            StatsFormat::Json => Json(summary).into_response(),
            StatsFormat::Markdown => (
                [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
                summary.to_markdown(),
            )
                .into_response(),
        })
    })();
    result.unwrap_or_else(|err| err.into_response())
}
