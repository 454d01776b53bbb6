//! Observability contracts: lifecycle hooks and the metrics sink.
//!
//! Both are configured before the server accepts connections and shared
//! immutably afterwards. Hook dispatch is best-effort and must never block
//! the audio pipeline; the metrics sink is a thin trait the embedder backs
//! with statsd, Prometheus, or nothing at all.

pub mod hooks;
pub mod metrics;

pub use hooks::{ErrorContext, HookDispatcher, HookEvent, Hooks, TurnTimings};
pub use metrics::{names, MetricsSink, NoopMetrics, TracingMetrics};
