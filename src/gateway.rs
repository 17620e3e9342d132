//! AI gateway: validated, metered access to the completion provider.
//!
//! The gateway is the single place provider calls go through. It
//! validates a request against the model table before spending money,
//! prices the reported usage with the four-tier cost model, and emits
//! request/duration/token metrics around every call.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::cost::{CostRecord, ModelTable};
use crate::provider::{CompletionProvider, CompletionRequest};
use crate::telemetry;
use crate::{MuninError, Result};

/// A priced completion.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub cost: CostRecord,
    pub model: String,
    pub stop_reason: Option<String>,
}

/// Gateway wrapping a [`CompletionProvider`] with validation, cost
/// accounting, and telemetry.
pub struct AiGateway {
    provider: Arc<dyn CompletionProvider>,
    models: ModelTable,
}

impl AiGateway {
    /// Create a gateway over a provider and model table.
    pub fn new(provider: Arc<dyn CompletionProvider>, models: ModelTable) -> Self {
        Self { provider, models }
    }

    /// The model table, for callers that need bounds (e.g. allocators).
    pub fn models(&self) -> &ModelTable {
        &self.models
    }

    /// Validate and execute a completion request.
    ///
    /// Checks run before any provider call: the model must be known,
    /// `max_tokens` must be positive and within the model's output
    /// limit, `temperature` within [0, 1], and at least one message
    /// present.
    pub async fn generate(&self, request: CompletionRequest) -> Result<Completion> {
        let spec = self.models.get(&request.model)?;

        if request.max_tokens == 0 || request.max_tokens > spec.max_output_tokens {
            return Err(MuninError::InvalidInput(format!(
                "max_tokens {} outside 1..={} for model '{}'",
                request.max_tokens, spec.max_output_tokens, request.model
            )));
        }
        if !(0.0..=1.0).contains(&request.temperature) {
            return Err(MuninError::InvalidInput(format!(
                "temperature {} outside [0, 1]",
                request.temperature
            )));
        }
        if request.messages.is_empty() {
            return Err(MuninError::InvalidInput(
                "at least one message is required".to_string(),
            ));
        }

        let pricing = spec.pricing;
        let model = request.model.clone();
        let started = Instant::now();
        let result = self.provider.complete(&request).await;
        let elapsed = started.elapsed();

        metrics::histogram!(
            telemetry::REQUEST_DURATION_SECONDS,
            "model" => model.clone(),
        )
        .record(elapsed.as_secs_f64());

        let completion = match result {
            Ok(completion) => completion,
            Err(e) => {
                metrics::counter!(
                    telemetry::REQUESTS_TOTAL,
                    "model" => model.clone(),
                    "status" => "error",
                )
                .increment(1);
                warn!(
                    provider = self.provider.name(),
                    model = %model,
                    error = %e,
                    "completion request failed"
                );
                return Err(e);
            }
        };

        metrics::counter!(
            telemetry::REQUESTS_TOTAL,
            "model" => model.clone(),
            "status" => "ok",
        )
        .increment(1);

        let usage = completion.usage;
        for (tier, count) in [
            ("input", usage.input_tokens),
            ("cache_write", usage.cache_creation_input_tokens),
            ("cache_read", usage.cache_read_input_tokens),
            ("output", usage.output_tokens),
        ] {
            if count > 0 {
                metrics::counter!(
                    telemetry::TOKENS_TOTAL,
                    "model" => model.clone(),
                    "tier" => tier,
                )
                .increment(u64::from(count));
            }
        }

        let cost = CostRecord::compute(usage, &pricing);
        metrics::counter!(telemetry::COST_MICRODOLLARS_TOTAL)
            .increment((cost.total_cost * 1e6).round() as u64);

        debug!(
            provider = self.provider.name(),
            model = %model,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            cache_read = usage.cache_read_input_tokens,
            cost_usd = cost.total_cost,
            elapsed_ms = elapsed.as_millis() as u64,
            "completion ok"
        );

        Ok(Completion {
            content: completion.content,
            cost,
            model: completion.model,
            stop_reason: completion.stop_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::TokenUsage;
    use crate::provider::{ChatMessage, ProviderCompletion};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct MockProvider {
        calls: AtomicU32,
    }

    #[async_trait]
    impl CompletionProvider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<ProviderCompletion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ProviderCompletion {
                content: "{}".to_string(),
                usage: TokenUsage {
                    input_tokens: 1000,
                    output_tokens: 500,
                    cache_creation_input_tokens: 0,
                    cache_read_input_tokens: 0,
                },
                model: request.model.clone(),
                stop_reason: Some("end_turn".into()),
            })
        }
    }

    fn gateway() -> (AiGateway, Arc<MockProvider>) {
        let provider = Arc::new(MockProvider {
            calls: AtomicU32::new(0),
        });
        (
            AiGateway::new(provider.clone(), ModelTable::with_known_models()),
            provider,
        )
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "claude-3-5-sonnet-20241022".into(),
            system_prompt: "sys".into(),
            cache_system_prompt: false,
            messages: vec![ChatMessage::user("hello")],
            max_tokens: 1000,
            temperature: 0.7,
        }
    }

    #[tokio::test]
    async fn generate_prices_the_usage() {
        let (gateway, provider) = gateway();
        let completion = gateway.generate(request()).await.unwrap();
        let expected = 1000.0 / 1e6 * 3.0 + 500.0 / 1e6 * 15.0;
        assert!((completion.cost.total_cost - expected).abs() < 1e-12);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_model_fails_before_the_provider() {
        let (gateway, provider) = gateway();
        let mut req = request();
        req.model = "gpt-oops".into();
        assert!(matches!(
            gateway.generate(req).await,
            Err(MuninError::ModelNotFound(_))
        ));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn max_tokens_bounds_are_enforced() {
        let (gateway, provider) = gateway();

        let mut req = request();
        req.max_tokens = 0;
        assert!(matches!(
            gateway.generate(req).await,
            Err(MuninError::InvalidInput(_))
        ));

        let mut req = request();
        req.max_tokens = 9000; // above the sonnet output limit
        assert!(matches!(
            gateway.generate(req).await,
            Err(MuninError::InvalidInput(_))
        ));

        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn temperature_out_of_range_is_rejected() {
        let (gateway, _) = gateway();
        let mut req = request();
        req.temperature = 1.5;
        assert!(matches!(
            gateway.generate(req).await,
            Err(MuninError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn empty_messages_are_rejected() {
        let (gateway, _) = gateway();
        let mut req = request();
        req.messages.clear();
        assert!(matches!(
            gateway.generate(req).await,
            Err(MuninError::InvalidInput(_))
        ));
    }
}
