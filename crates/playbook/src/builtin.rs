//! The built-in `playbook_transition` tool.
//!
//! Implicitly available in any stage with outgoing llm-decision
//! transitions. Calls are intercepted by the engine and recorded as an
//! explicit stage choice; the handler is never dispatched to the
//! registry.

use serde_json::json;

use llmrtc_domain::message::ToolDefinition;

pub const TRANSITION_TOOL: &str = "playbook_transition";

/// Build the tool definition, constraining `target_stage` to the ids the
/// current stage can actually reach via llm-decision transitions.
pub fn transition_tool_definition(target_stages: &[String]) -> ToolDefinition {
    ToolDefinition {
        name: TRANSITION_TOOL.into(),
        description: "Move the conversation to a different stage when the current stage's \
                      goal is complete or the user asks for something it cannot handle."
            .into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "target_stage": {
                    "type": "string",
                    "enum": target_stages,
                    "description": "The stage to move to."
                },
                "reason": {
                    "type": "string",
                    "description": "Why the stage should change."
                }
            },
            "required": ["target_stage"]
        }),
        policy: None,
    }
}
