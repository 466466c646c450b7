//! Token-bucket rate limiting.

use super::{decision_tags, Sampler, SamplingStatus};
use crate::clock::{Clock, SystemClock};
use crate::span::TagValue;
use crate::span_context::TraceId;
use std::sync::{Arc, Mutex, PoisonError};

// Credit bucket refilled continuously from the monotonic tick source.
// Credits accumulate fractionally, so rates below one item per second work.
#[derive(Debug)]
pub(crate) struct RateLimiter {
    credits_per_nanosecond: f64,
    max_balance: f64,
    clock: Arc<dyn Clock>,
    state: Mutex<RateLimiterState>,
}

#[derive(Debug)]
struct RateLimiterState {
    balance: f64,
    last_tick: i64,
}

impl RateLimiter {
    pub(crate) fn new(credits_per_second: f64, max_balance: f64, clock: Arc<dyn Clock>) -> Self {
        let last_tick = clock.current_nano_ticks();
        RateLimiter {
            credits_per_nanosecond: credits_per_second / 1e9,
            max_balance,
            clock,
            state: Mutex::new(RateLimiterState {
                balance: max_balance,
                last_tick,
            }),
        }
    }

    pub(crate) fn check_credit(&self, item_cost: f64) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = self.clock.current_nano_ticks();
        let elapsed = (now - state.last_tick).max(0);
        state.last_tick = now;
        state.balance = f64::min(
            state.balance + elapsed as f64 * self.credits_per_nanosecond,
            self.max_balance,
        );
        if state.balance >= item_cost {
            state.balance -= item_cost;
            true
        } else {
            false
        }
    }
}

/// Sampler that admits at most a fixed number of traces per second.
///
/// The bucket capacity is `max(maxTracesPerSecond, 1)`, so rates below one
/// per second still admit an occasional trace instead of none.
#[derive(Debug)]
pub struct RateLimitingSampler {
    max_traces_per_second: f64,
    rate_limiter: RateLimiter,
}

impl RateLimitingSampler {
    /// Value of `sampler.type` reported by this sampler.
    pub const TYPE: &'static str = "ratelimiting";

    /// Create a sampler admitting `max_traces_per_second` traces per second.
    pub fn new(max_traces_per_second: f64) -> Self {
        RateLimitingSampler::with_clock(max_traces_per_second, Arc::new(SystemClock::new()))
    }

    /// Create a sampler driven by the given clock.
    pub fn with_clock(max_traces_per_second: f64, clock: Arc<dyn Clock>) -> Self {
        let max_balance = max_traces_per_second.max(1.0);
        RateLimitingSampler {
            max_traces_per_second,
            rate_limiter: RateLimiter::new(max_traces_per_second, max_balance, clock),
        }
    }

    /// The configured rate.
    pub fn max_traces_per_second(&self) -> f64 {
        self.max_traces_per_second
    }
}

impl PartialEq for RateLimitingSampler {
    fn eq(&self, other: &Self) -> bool {
        self.max_traces_per_second == other.max_traces_per_second
    }
}

impl Sampler for RateLimitingSampler {
    fn sample(&self, _operation_name: &str, _trace_id: TraceId) -> SamplingStatus {
        SamplingStatus::new(
            self.rate_limiter.check_credit(1.0),
            decision_tags(Self::TYPE, TagValue::F64(self.max_traces_per_second)),
        )
    }
}
