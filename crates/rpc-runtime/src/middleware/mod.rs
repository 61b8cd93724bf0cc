//! Runtime metrics and the built-in interceptors.

pub mod metrics;
pub mod timing;

pub use metrics::{MetricsSnapshot, RuntimeMetrics};
pub use timing::TimingInterceptor;
