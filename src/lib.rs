//! Munin - cost-optimised orchestration gateway for LLM article analysis
//!
//! This crate wraps calls to the Anthropic Claude API for article
//! marketing analysis (titles, hashtags, eye-catch prompts, SEO and
//! virality scores) in a cost-conscious orchestration layer: a
//! fingerprint-keyed response cache, a fixed-window rate limiter, a
//! short-window request deduplicator, dynamic output-token budgeting,
//! four-tier cost accounting, and a versioned prompt registry with
//! consistent-hash A/B experiments.
//!
//! # Library example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use munin::cost::ModelTable;
//! use munin::gateway::AiGateway;
//! use munin::provider::{AnthropicClient, ChatMessage, CompletionRequest};
//!
//! #[tokio::main]
//! async fn main() -> munin::Result<()> {
//!     let provider = Arc::new(AnthropicClient::new("sk-ant-your-key"));
//!     let gateway = AiGateway::new(provider, ModelTable::with_known_models());
//!
//!     let completion = gateway
//!         .generate(CompletionRequest {
//!             model: "claude-3-5-sonnet-20241022".into(),
//!             system_prompt: "You analyse articles.".into(),
//!             cache_system_prompt: true,
//!             messages: vec![ChatMessage::user("Analyse: ...")],
//!             max_tokens: 1000,
//!             temperature: 0.7,
//!         })
//!         .await?;
//!
//!     println!("{} (${:.6})", completion.content, completion.cost.total_cost);
//!     Ok(())
//! }
//! ```
//!
//! # Service mode
//!
//! With the `server` feature (default), [`server::router`] exposes the
//! orchestration pipeline over HTTP; the `munind` binary wires it to
//! config files and environment variables.

pub mod analysis;
pub mod budget;
pub mod cache;
pub mod cost;
pub mod error;
pub mod experiments;
pub mod fingerprint;
pub mod gateway;
pub mod limits;
pub mod prompts;
pub mod provider;
pub mod telemetry;
pub mod usage;

#[cfg(feature = "server")]
pub mod server;

// Re-export main types at crate root
pub use error::{MuninError, Result};
pub use gateway::{AiGateway, Completion};

// Re-export the orchestration building blocks
pub use analysis::{AnalysisPayload, ArticleAnalysis, FullArticleAnalysis, RepairPolicy};
pub use budget::{AllocatorConfig, estimate_tokens, max_tokens_for};
pub use cache::{CacheConfig, CachedAnalysis, DedupConfig, RequestDeduplicator, ResponseCache};
pub use cost::{CostRecord, ModelPricing, ModelTable, TokenUsage};
pub use experiments::{Experiment, ExperimentManager, ExperimentVariant};
pub use limits::{RateDecision, RateLimitConfig, RateLimiter};
pub use prompts::{Profile, PromptRegistry, PromptTemplate, RegisterMode, TemplateQuery};
pub use provider::{AnthropicClient, ChatMessage, CompletionProvider, CompletionRequest};
pub use usage::{Period, StatsFormat, UsageAnalytics, UsageEvent, UsageSummary};
