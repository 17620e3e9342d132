//! Fixed-window rate limiting per client.
//!
//! Each client id gets a `{window_start, count}` pair; when the window
//! lapses the count resets. This is the simple fixed-window scheme:
//! a client can burst up to `2 × limit − 1` requests across a window
//! boundary. Switch to sliding-window or token-bucket if precise quota
//! enforcement ever matters more than simplicity.
//!
//! State is process-local. In a multi-instance deployment each instance
//! enforces its own quota; clients spread across instances can exceed
//! the intended global limit. Externalising the counters (redis) is the
//! known fix and deliberately out of scope here.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::telemetry;

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests allowed per window. Default: 10.
    pub max_requests: u32,
    /// Window length. Default: 60s.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window: Duration::from_secs(60),
        }
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests the client has left in the current window.
    pub remaining: u32,
    /// Time until the current window resets.
    pub reset_in: Duration,
}

impl RateDecision {
    /// `Retry-After` value in whole seconds, rounded up so the client
    /// never retries early.
    pub fn retry_after_secs(&self) -> u64 {
        self.reset_in.as_secs_f64().ceil() as u64
    }
}

#[derive(Debug)]
struct WindowState {
    window_start: Instant,
    count: u32,
}

/// Fixed-window rate limiter keyed by client id.
///
/// The counter map is mutex-guarded: the critical section is a map
/// lookup and an integer bump, far too short to contend under the
/// request rates this service sees.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    clients: Mutex<HashMap<String, WindowState>>,
}

impl RateLimiter {
    /// Create a limiter from configuration.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Check (and count) a request from `client_id`.
    ///
    /// Counts the request against the current window and reports
    /// whether it is allowed, how many requests remain, and when the
    /// window resets. Rejected requests do not grow the counter past
    /// the limit, so there is no unbounded growth while a client is
    /// being throttled.
    pub fn check(&self, client_id: &str) -> RateDecision {
        let now = Instant::now();
        let mut clients = self.clients.lock().expect("rate limiter mutex poisoned");

        // Opportunistic GC: drop entries idle for more than a full
        // window beyond their own expiry.
        if clients.len() > 1024 {
            let horizon = self.config.window * 2;
            clients.retain(|_, state| now.duration_since(state.window_start) < horizon);
        }

        let state = clients
            .entry(client_id.to_string())
            .or_insert(WindowState {
                window_start: now,
                count: 0,
            });

        if now.duration_since(state.window_start) >= self.config.window {
            state.window_start = now;
            state.count = 0;
        }

        let allowed = state.count < self.config.max_requests;
        if allowed {
            state.count += 1;
        } else {
            metrics::counter!(telemetry::RATE_LIMITED_TOTAL).increment(1);
        }

        let elapsed = now.duration_since(state.window_start);
        RateDecision {
            allowed,
            remaining: self.config.max_requests - state.count,
            reset_in: self.config.window.saturating_sub(elapsed),
        }
    }

    /// The configured window, for response headers.
    pub fn window(&self) -> Duration {
        self.config.window
    }
}
