//! Performance monitor interceptor.

use crate::domain::chain::{Interceptor, Invocation, InvokeResult, Next};
use crate::middleware::metrics::RuntimeMetrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Logs per-call latency and records it into [`RuntimeMetrics`].
///
/// Runs first by default so the measurement covers every other interceptor.
pub struct TimingInterceptor {
    metrics: Arc<RuntimeMetrics>,
    slow_threshold: Duration,
}

impl TimingInterceptor {
    pub const PRIORITY: i32 = 1000;

    pub fn new(metrics: Arc<RuntimeMetrics>) -> Self {
        Self {
            metrics,
            slow_threshold: Duration::from_secs(1),
        }
    }

    /// Calls slower than `threshold` are logged at warn level.
    pub fn with_slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = threshold;
        self
    }
}

impl Interceptor for TimingInterceptor {
    fn name(&self) -> &str {
        "timing"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn intercept(&self, invocation: &mut Invocation, next: Next<'_>) -> InvokeResult {
        let start = Instant::now();
        let result = next.proceed(invocation);
        let elapsed = start.elapsed();
        self.metrics.record_latency(elapsed);

        if elapsed > self.slow_threshold {
            warn!(
                request_id = %invocation.request_id(),
                service = invocation.service(),
                method = %invocation.method().signature(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Slow invocation"
            );
        } else {
            debug!(
                request_id = %invocation.request_id(),
                service = invocation.service(),
                method = %invocation.method().signature(),
                elapsed_us = elapsed.as_micros() as u64,
                ok = result.is_ok(),
                "Invocation finished"
            );
        }
        result
    }
}
