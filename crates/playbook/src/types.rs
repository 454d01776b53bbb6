use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use llmrtc_domain::config::SamplingConfig;
use llmrtc_providers::ToolChoice;

/// Transition source matching any stage.
pub const WILDCARD: &str = "*";

/// A declarative multi-stage conversation graph. Immutable once built;
/// validated at construction by [`crate::validate::validate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playbook {
    pub id: String,
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    pub initial_stage: String,
    /// Layered under every stage's own prompt.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Sampling defaults for the playbook's LLM calls; stage-less fields
    /// fall back to the turn config.
    #[serde(default)]
    pub llm_defaults: SamplingConfig,
}

impl Playbook {
    pub fn stage(&self, id: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id == id)
    }

    /// The full system prompt for a stage: global prompt, then the
    /// stage's own, blank-line separated.
    pub fn layered_prompt(&self, stage: &Stage) -> String {
        match (&self.system_prompt, &stage.system_prompt) {
            (Some(global), Some(own)) => format!("{global}\n\n{own}"),
            (Some(global), None) => global.clone(),
            (None, Some(own)) => own.clone(),
            (None, None) => String::new(),
        }
    }

    /// Transitions leaving `stage_id`: source-specific first, then
    /// wildcard, each group in declaration order.
    pub fn transitions_from<'a>(&'a self, stage_id: &str) -> Vec<&'a Transition> {
        let mut out: Vec<&Transition> = self
            .transitions
            .iter()
            .filter(|t| t.from == stage_id)
            .collect();
        out.extend(self.transitions.iter().filter(|t| t.from == WILDCARD));
        out
    }

    /// Whether the stage allows llm-decision transitions (and therefore
    /// implicitly carries the built-in transition tool).
    pub fn has_llm_decision_from(&self, stage_id: &str) -> bool {
        self.transitions_from(stage_id)
            .iter()
            .any(|t| matches!(t.condition, TransitionCondition::LlmDecision))
    }
}

/// A node in the playbook graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub id: String,
    pub name: String,
    /// Layered over the playbook's global prompt.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Names of registered tools available in this stage.
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub history_strategy: HistoryStrategy,
    #[serde(default)]
    pub tool_choice: ToolChoice,
    /// Phase 1 (silent tool loop) + phase 2 (spoken reply) when true;
    /// a single narrated phase otherwise.
    #[serde(default = "d_true")]
    pub two_phase: bool,
    /// Permit transitions whose target is this stage itself.
    #[serde(default)]
    pub allow_self_transition: bool,
}

fn d_true() -> bool {
    true
}

/// What happens to conversation history when a stage is entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStrategy {
    /// Carry history unchanged.
    #[default]
    Full,
    /// Clear to just the new stage's system prompt.
    Reset,
    /// Replace prior history with an LLM-produced summary.
    Summary,
    /// Keep only the last N messages.
    #[serde(rename = "last_n")]
    LastN { n: usize },
}

/// An edge in the playbook graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub id: String,
    /// Source stage id, or [`WILDCARD`].
    pub from: String,
    pub to: String,
    pub condition: TransitionCondition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TransitionCondition {
    /// Any keyword appears in the assistant response (case-insensitive
    /// substring).
    Keyword { keywords: Vec<String> },
    /// A tool with this name was executed this turn; optionally the
    /// serialized result must contain `result_contains`.
    ToolCall {
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result_contains: Option<String>,
    },
    /// The model called the built-in transition tool naming this edge's
    /// target.
    LlmDecision,
    /// An intent classifier labeled the turn with this intent.
    Intent { intent: String },
    /// Turns in the current stage reached the threshold.
    MaxTurns { max_turns: u32 },
    /// Time in the current stage reached the threshold.
    Timeout { timeout_secs: u64 },
    /// A named predicate registered on the engine.
    Custom { name: String },
}

/// Mutable per-session playbook position. Only the engine writes it, and
/// only between turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookState {
    pub current_stage: String,
    pub turns_in_stage: u32,
    pub entered_at: DateTime<Utc>,
    /// Free-form data accumulated per stage.
    #[serde(default)]
    pub stage_data: HashMap<String, serde_json::Value>,
}

impl PlaybookState {
    pub fn new(initial_stage: impl Into<String>) -> Self {
        Self {
            current_stage: initial_stage.into(),
            turns_in_stage: 0,
            entered_at: Utc::now(),
            stage_data: HashMap::new(),
        }
    }
}
