//! Usage analytics: per-request cost accounting with period summaries.
//!
//! Every analysis request records a [`UsageEvent`]; the usage-stats
//! endpoint aggregates them over a [`Period`] and renders the summary
//! as JSON or a markdown table. The log is bounded and in-memory —
//! enough for an operator dashboard, not an audit trail.

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;
use crate::cost::TokenUsage;
use crate::{MuninError, Result};

/// Maximum events retained; the oldest are dropped past this.
const MAX_EVENTS: usize = 50_000;

/// One recorded analysis request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    pub timestamp: DateTime<Utc>,
    pub endpoint: String,
    pub model: String,
    pub usage: TokenUsage,
    /// Actual cost in USD; zero for cached/deduplicated responses.
    pub cost: f64,
    pub cached: bool,
    pub deduplicated: bool,
}

/// Reporting period for usage summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Today,
    Week,
    Month,
    All,
}

impl FromStr for Period {
    type Err = MuninError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "today" => Ok(Self::Today),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "all" => Ok(Self::All),
            other => Err(MuninError::InvalidInput(format!(
                "invalid period '{other}' (expected today, week, month, or all)"
            ))),
        }
    }
}

impl Period {
    /// Cut-off timestamp for this period, relative to `now`.
    ///
    /// `Today` starts at UTC midnight; week/month are rolling windows.
    fn cutoff(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Today => Some(
                now.date_naive()
                    .and_hms_opt(0, 0, 0)
                    .expect("midnight is a valid time")
                    .and_utc(),
            ),
            Self::Week => Some(now - Duration::days(7)),
            Self::Month => Some(now - Duration::days(30)),
            Self::All => None,
        }
    }
}

/// Output format for the usage-stats endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatsFormat {
    #[default]
    Json,
    Markdown,
}

impl FromStr for StatsFormat {
    type Err = MuninError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" => Ok(Self::Json),
            "markdown" => Ok(Self::Markdown),
            other => Err(MuninError::InvalidInput(format!(
                "invalid format '{other}' (expected json or markdown)"
            ))),
        }
    }
}

/// Aggregated usage over a period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSummary {
    pub period: Period,
    pub requests: u64,
    /// Requests served from the response cache.
    pub cached_responses: u64,
    /// Requests collapsed by the deduplicator.
    pub deduplicated_responses: u64,
    /// Requests that reached the provider.
    pub provider_calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_input_tokens: u64,
    pub cache_read_input_tokens: u64,
    pub total_cost: f64,
    /// Lifetime response-cache hit rate, in [0, 1].
    pub cache_hit_rate: f64,
}

impl UsageSummary {
    /// Render the summary as a markdown report.
    pub fn to_markdown(&self) -> String {
        let period = match self.period {
            Period::Today => "today",
            Period::Week => "week",
            Period::Month => "month",
            Period::All => "all",
        };
        format!(
            "# Usage ({period})\n\n\
             | Metric | Value |\n\
             |---|---|\n\
             | Requests | {} |\n\
             | Served from cache | {} |\n\
             | Deduplicated | {} |\n\
             | Provider calls | {} |\n\
             | Input tokens | {} |\n\
             | Output tokens | {} |\n\
             | Cache-write tokens | {} |\n\
             | Cache-read tokens | {} |\n\
             | Total cost (USD) | {:.6} |\n\
             | Cache hit rate | {:.1}% |\n",
            self.requests,
            self.cached_responses,
            self.deduplicated_responses,
            self.provider_calls,
            self.input_tokens,
            self.output_tokens,
            self.cache_creation_input_tokens,
            self.cache_read_input_tokens,
            self.total_cost,
            self.cache_hit_rate * 100.0,
        )
    }
}

/// Bounded in-memory usage log.
#[derive(Debug)]
pub struct UsageAnalytics {
    enabled: bool,
    events: Mutex<VecDeque<UsageEvent>>,
}

impl UsageAnalytics {
    /// Create an analytics log; a disabled one records nothing.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Record one request. No-op when analytics are disabled.
    pub fn record(&self, event: UsageEvent) {
        if !self.enabled {
            return;
        }
        let mut events = self.events.lock().expect("usage log mutex poisoned");
        if events.len() == MAX_EVENTS {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Aggregate events for a period.
    ///
    /// `cache_stats` supplies the lifetime hit/miss counters from the
    /// response cache, which live outside the event log.
    pub fn summary(&self, period: Period, cache_stats: CacheStats) -> UsageSummary {
        self.summary_at(period, cache_stats, Utc::now())
    }

    fn summary_at(
        &self,
        period: Period,
        cache_stats: CacheStats,
        now: DateTime<Utc>,
    ) -> UsageSummary {
        let cutoff = period.cutoff(now);
        let events = self.events.lock().expect("usage log mutex poisoned");

        let mut summary = UsageSummary {
            period,
            requests: 0,
            cached_responses: 0,
            deduplicated_responses: 0,
            provider_calls: 0,
            input_tokens: 0,
            output_tokens: 0,
            cache_creation_input_tokens: 0,
            cache_read_input_tokens: 0,
            total_cost: 0.0,
            cache_hit_rate: cache_stats.hit_rate(),
        };

        for event in events.iter() {
            if let Some(cutoff) = cutoff
                && event.timestamp < cutoff
            {
                continue;
            }
            summary.requests += 1;
            if event.deduplicated {
                summary.deduplicated_responses += 1;
            } else if event.cached {
                summary.cached_responses += 1;
            } else {
                summary.provider_calls += 1;
            }
            summary.input_tokens += u64::from(event.usage.input_tokens);
            summary.output_tokens += u64::from(event.usage.output_tokens);
            summary.cache_creation_input_tokens +=
                u64::from(event.usage.cache_creation_input_tokens);
            summary.cache_read_input_tokens += u64::from(event.usage.cache_read_input_tokens);
            summary.total_cost += event.cost;
        }

        summary
    }
}
