//! Lifecycle hook dispatch.
//!
//! Embedders register [`Hooks`] implementations to observe the pipeline:
//! connection lifecycle, per-phase turn progress, tool execution, playbook
//! stage changes, and centralized errors. Dispatch is best-effort — a
//! failing hook is logged, never propagated — except guardrail hooks
//! (`veto() == true`), which run inline at turn start and may abort the
//! turn as a policy violation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use llmrtc_domain::error::{Component, Error, Result};
use llmrtc_domain::message::ToolCallResult;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-phase timing marks for one finished turn, in milliseconds.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TurnTimings {
    pub stt_ms: Option<u64>,
    /// Time to first LLM token.
    pub llm_ttft_ms: Option<u64>,
    pub llm_ms: Option<u64>,
    pub tts_ms: Option<u64>,
    pub total_ms: u64,
}

/// Structured context attached to every error event.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorContext {
    pub code: String,
    pub component: Component,
    pub session_id: String,
    pub turn_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorContext {
    pub fn new(error: &Error, session_id: impl Into<String>, turn_id: Option<String>) -> Self {
        Self {
            code: error.code().as_str().to_string(),
            component: error.component(),
            session_id: session_id.into(),
            turn_id,
            timestamp: Utc::now(),
        }
    }
}

/// Everything observable in the runtime, as one event enum.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum HookEvent {
    Connection { session_id: String },
    Disconnect { session_id: String },
    SpeechStart { session_id: String },
    SpeechEnd { session_id: String, duration_ms: u64 },

    TurnStart { session_id: String, turn_id: String },
    TurnEnd { session_id: String, turn_id: String, timings: TurnTimings },

    SttStart { turn_id: String },
    SttEnd { turn_id: String, text: String },
    SttError { turn_id: String, message: String },

    LlmStart { turn_id: String },
    LlmChunk { turn_id: String, text: String },
    LlmEnd { turn_id: String, text: String },
    LlmError { turn_id: String, message: String },

    TtsStart { turn_id: String },
    TtsChunk { turn_id: String, bytes: usize },
    TtsEnd { turn_id: String },
    TtsError { turn_id: String, message: String },

    ToolStart { turn_id: String, call_id: String, tool_name: String },
    ToolEnd { turn_id: String, result: ToolCallResult },
    ToolError { turn_id: String, call_id: String, tool_name: String, message: String },

    StageEnter { session_id: String, stage: String },
    StageExit { session_id: String, stage: String },
    Transition { session_id: String, from: String, to: String, reason: String },
    PlaybookTurnEnd { session_id: String, stage: String, turns_in_stage: u32 },
    PlaybookComplete { session_id: String },

    Error { context: ErrorContext, message: String },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Hooks trait + dispatcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A hook implementation. All events funnel through `on_event`.
#[async_trait::async_trait]
pub trait Hooks: Send + Sync {
    /// Guardrail hooks run inline at turn start; an error from one aborts
    /// the turn. Everything else is fire-and-forget.
    fn veto(&self) -> bool {
        false
    }

    async fn on_event(&self, event: HookEvent) -> Result<()>;
}

/// Fans events out to every registered hook.
#[derive(Clone, Default)]
pub struct HookDispatcher {
    hooks: Vec<Arc<dyn Hooks>>,
}

impl HookDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Arc<dyn Hooks>) {
        self.hooks.push(hook);
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Fire-and-forget dispatch. Non-veto hooks run on spawned tasks so a
    /// slow observer cannot stall the pipeline; veto hooks run inline but
    /// their errors are only logged here.
    pub async fn emit(&self, event: HookEvent) {
        for hook in &self.hooks {
            if hook.veto() {
                if let Err(e) = hook.on_event(event.clone()).await {
                    tracing::warn!(error = %e, "guardrail hook failed outside a checkpoint");
                }
            } else {
                let hook = hook.clone();
                let event = event.clone();
                tokio::spawn(async move {
                    if let Err(e) = hook.on_event(event).await {
                        tracing::warn!(error = %e, "hook dispatch failed");
                    }
                });
            }
        }
    }

    /// Checkpoint dispatch (turn start). Veto hooks run inline; the first
    /// error aborts the caller as a policy violation. Non-veto hooks are
    /// still notified fire-and-forget.
    pub async fn check(&self, event: HookEvent) -> Result<()> {
        for hook in &self.hooks {
            if hook.veto() {
                if let Err(e) = hook.on_event(event.clone()).await {
                    return Err(Error::Validation(format!("guardrail rejected turn: {e}")));
                }
            } else {
                let hook = hook.clone();
                let event = event.clone();
                tokio::spawn(async move {
                    if let Err(e) = hook.on_event(event).await {
                        tracing::warn!(error = %e, "hook dispatch failed");
                    }
                });
            }
        }
        Ok(())
    }
}
