//! Transition evaluation.
//!
//! Runs after the turn completes, never during it. Conditions are ranked;
//! within a rank, source-specific transitions beat wildcard ones and
//! declaration order breaks remaining ties. The first match wins.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use llmrtc_domain::message::ToolCallResult;

use crate::types::{Playbook, Transition, TransitionCondition};

/// A named predicate for `custom` conditions, registered on the engine.
pub type CustomPredicate = Arc<dyn Fn(&TurnRecord) -> bool + Send + Sync>;

/// Everything a condition may inspect about the finished turn.
#[derive(Debug, Clone, Default)]
pub struct TurnRecord {
    /// Results of every tool executed this turn, in dispatch order.
    pub executed_tools: Vec<ToolCallResult>,
    /// Target chosen via the built-in `playbook_transition` tool.
    pub explicit_target: Option<String>,
    /// Final spoken assistant text.
    pub assistant_text: String,
    /// Intent label, when a classifier is configured.
    pub intent: Option<String>,
    /// Turns completed in the current stage, including this one.
    pub turns_in_stage: u32,
    pub time_in_stage: Duration,
}

/// Condition rank per the tie-break order; lower wins.
fn rank(condition: &TransitionCondition) -> u8 {
    match condition {
        TransitionCondition::ToolCall { .. } => 0,
        TransitionCondition::LlmDecision => 1,
        TransitionCondition::Keyword { .. } => 2,
        TransitionCondition::Intent { .. } => 3,
        TransitionCondition::MaxTurns { .. } => 4,
        TransitionCondition::Timeout { .. } => 5,
        TransitionCondition::Custom { .. } => 6,
    }
}

/// Pick the winning transition out of `current_stage`, if any. Returns
/// the transition and the `stage-change` reason string.
pub fn evaluate<'a>(
    playbook: &'a Playbook,
    current_stage: &str,
    record: &TurnRecord,
    custom: &HashMap<String, CustomPredicate>,
) -> Option<(&'a Transition, String)> {
    // transitions_from already orders source-specific before wildcard,
    // declaration order within each group. A stable sort by rank preserves
    // that order inside each rank.
    let mut candidates = playbook.transitions_from(current_stage);
    candidates.sort_by_key(|t| rank(&t.condition));

    for transition in candidates {
        // Self-loops only fire when the stage opted in.
        if transition.to == current_stage {
            let allows = playbook
                .stage(current_stage)
                .is_some_and(|s| s.allow_self_transition);
            if !allows {
                continue;
            }
        }
        if let Some(reason) = matches(transition, record, custom) {
            return Some((transition, reason));
        }
    }
    None
}

fn matches(
    transition: &Transition,
    record: &TurnRecord,
    custom: &HashMap<String, CustomPredicate>,
) -> Option<String> {
    match &transition.condition {
        TransitionCondition::ToolCall {
            tool_name,
            result_contains,
        } => {
            let hit = record.executed_tools.iter().any(|result| {
                if result.tool_name != *tool_name {
                    return false;
                }
                match result_contains {
                    None => true,
                    Some(needle) => result
                        .value
                        .as_ref()
                        .map(|v| v.to_string().contains(needle.as_str()))
                        .unwrap_or(false),
                }
            });
            hit.then(|| format!("tool_call:{tool_name}"))
        }
        TransitionCondition::LlmDecision => record
            .explicit_target
            .as_deref()
            .filter(|target| *target == transition.to)
            .map(|_| "llm_decision".to_string()),
        TransitionCondition::Keyword { keywords } => {
            let text = record.assistant_text.to_lowercase();
            keywords
                .iter()
                .find(|k| text.contains(&k.to_lowercase()))
                .map(|k| format!("keyword:{k}"))
        }
        TransitionCondition::Intent { intent } => record
            .intent
            .as_deref()
            .filter(|label| label.eq_ignore_ascii_case(intent))
            .map(|_| format!("intent:{intent}")),
        TransitionCondition::MaxTurns { max_turns } => (record.turns_in_stage >= *max_turns)
            .then(|| format!("max_turns:{max_turns}")),
        TransitionCondition::Timeout { timeout_secs } => (record.time_in_stage
            >= Duration::from_secs(*timeout_secs))
        .then(|| format!("timeout:{timeout_secs}s")),
        TransitionCondition::Custom { name } => custom
            .get(name)
            .is_some_and(|predicate| predicate(record))
            .then(|| format!("custom:{name}")),
    }
}
