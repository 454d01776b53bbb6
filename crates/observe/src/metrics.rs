//! Metrics sink contract.
//!
//! Three operations, stable names, free-form tags. The runtime reports;
//! the embedder decides where numbers go. `NoopMetrics` discards,
//! `TracingMetrics` emits structured log events.

/// Stable metric names reported by the runtime.
pub mod names {
    pub const STT_DURATION_MS: &str = "llmrtc.stt.duration_ms";
    pub const LLM_TTFT_MS: &str = "llmrtc.llm.ttft_ms";
    pub const LLM_DURATION_MS: &str = "llmrtc.llm.duration_ms";
    pub const TTS_DURATION_MS: &str = "llmrtc.tts.duration_ms";
    pub const TURN_DURATION_MS: &str = "llmrtc.turn.duration_ms";
    pub const TURN_CANCELLED: &str = "llmrtc.turn.cancelled";
    pub const ERRORS: &str = "llmrtc.errors";
    pub const TOOL_DURATION_MS: &str = "llmrtc.tool.duration_ms";
    pub const STAGE_DURATION_MS: &str = "llmrtc.playbook.stage.duration_ms";
    pub const TRANSITIONS: &str = "llmrtc.playbook.transitions";
    pub const CONNECTIONS_ACTIVE: &str = "llmrtc.connections.active";
}

/// Sink for runtime metrics. Implementations must be cheap and non-blocking;
/// they are called from the hot path of every turn.
pub trait MetricsSink: Send + Sync {
    fn timing(&self, name: &str, ms: u64, tags: &[(&str, &str)]);
    fn increment(&self, name: &str, n: u64, tags: &[(&str, &str)]);
    fn gauge(&self, name: &str, value: f64, tags: &[(&str, &str)]);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn timing(&self, _name: &str, _ms: u64, _tags: &[(&str, &str)]) {}
    fn increment(&self, _name: &str, _n: u64, _tags: &[(&str, &str)]) {}
    fn gauge(&self, _name: &str, _value: f64, _tags: &[(&str, &str)]) {}
}

/// Emits each metric as a structured `tracing` event at DEBUG level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn timing(&self, name: &str, ms: u64, tags: &[(&str, &str)]) {
        tracing::debug!(metric = name, ms, tags = ?tags, "timing");
    }

    fn increment(&self, name: &str, n: u64, tags: &[(&str, &str)]) {
        tracing::debug!(metric = name, n, tags = ?tags, "increment");
    }

    fn gauge(&self, name: &str, value: f64, tags: &[(&str, &str)]) {
        tracing::debug!(metric = name, value, tags = ?tags, "gauge");
    }
}
