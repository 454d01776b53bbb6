//! Normalization helpers shared by streaming adapters.

use serde_json::Value;

use llmrtc_domain::message::ToolCall;
use llmrtc_domain::stream::{LlmEvent, StopReason};

/// Map a provider-native finish reason to the canonical [`StopReason`].
///
/// Unknown strings map to `EndTurn` with a debug log rather than failing
/// the turn over a cosmetic mismatch.
pub fn stop_reason_from_finish(reason: &str) -> StopReason {
    match reason {
        "stop" | "end_turn" | "completed" | "done" => StopReason::EndTurn,
        "tool_calls" | "tool_use" | "function_call" => StopReason::ToolUse,
        "length" | "max_tokens" | "max_output_tokens" => StopReason::MaxTokens,
        "stop_sequence" | "content_filter_stop" => StopReason::StopSequence,
        other => {
            tracing::debug!(finish_reason = other, "unrecognized finish reason");
            StopReason::EndTurn
        }
    }
}

/// Accumulates partial tool-call argument fragments across stream chunks.
///
/// Streaming providers emit tool calls as started/delta pairs (and some
/// additionally as a finished event with full arguments). Adapters feed
/// every event through [`apply`](Self::apply) and call
/// [`into_calls`](Self::into_calls) at stream end to obtain the complete
/// normalized set, in arrival order.
#[derive(Default)]
pub struct ToolCallAssembler {
    /// call_id → (tool_name, argument JSON buffer), in arrival order.
    pending: Vec<(String, String, String)>,
    finished: Vec<ToolCall>,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started(&mut self, call_id: &str, tool_name: &str) {
        self.pending
            .push((call_id.to_string(), tool_name.to_string(), String::new()));
    }

    pub fn delta(&mut self, call_id: &str, fragment: &str) {
        if let Some((_, _, buf)) = self.pending.iter_mut().find(|(id, _, _)| id == call_id) {
            buf.push_str(fragment);
        }
    }

    pub fn finished(&mut self, call_id: &str, tool_name: &str, arguments: Value) {
        self.pending.retain(|(id, _, _)| id != call_id);
        self.finished.push(ToolCall {
            call_id: call_id.to_string(),
            tool_name: tool_name.to_string(),
            arguments,
        });
    }

    /// Route one stream event into the assembler. Non-tool events are
    /// ignored.
    pub fn apply(&mut self, event: &LlmEvent) {
        match event {
            LlmEvent::ToolCallStarted { call_id, tool_name } => self.started(call_id, tool_name),
            LlmEvent::ToolCallDelta { call_id, delta } => self.delta(call_id, delta),
            LlmEvent::ToolCallFinished {
                call_id,
                tool_name,
                arguments,
            } => self.finished(call_id, tool_name, arguments.clone()),
            _ => {}
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.finished.is_empty()
    }

    /// Drain into the complete call set: explicitly finished calls first,
    /// then calls assembled from start/delta buffers (some providers never
    /// emit a finished event). Argument buffers that are empty or invalid
    /// JSON degrade to an empty object.
    pub fn into_calls(self) -> Vec<ToolCall> {
        let mut calls = self.finished;
        for (call_id, tool_name, args_buf) in self.pending {
            let arguments = if args_buf.trim().is_empty() {
                Value::Object(Default::default())
            } else {
                match serde_json::from_str(&args_buf) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(
                            call_id = %call_id,
                            tool = %tool_name,
                            error = %e,
                            "tool call arguments are not valid JSON; defaulting to empty object"
                        );
                        Value::Object(Default::default())
                    }
                }
            };
            calls.push(ToolCall {
                call_id,
                tool_name,
                arguments,
            });
        }
        calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn finish_reason_mapping() {
        assert_eq!(stop_reason_from_finish("stop"), StopReason::EndTurn);
        assert_eq!(stop_reason_from_finish("tool_calls"), StopReason::ToolUse);
        assert_eq!(stop_reason_from_finish("tool_use"), StopReason::ToolUse);
        assert_eq!(stop_reason_from_finish("length"), StopReason::MaxTokens);
        assert_eq!(
            stop_reason_from_finish("stop_sequence"),
            StopReason::StopSequence
        );
        assert_eq!(stop_reason_from_finish("???"), StopReason::EndTurn);
    }

    #[test]
    fn assembles_from_start_and_deltas() {
        let mut asm = ToolCallAssembler::new();
        asm.started("c1", "lookup_order");
        asm.delta("c1", "{\"orderId\":");
        asm.delta("c1", "\"12345\"}");
        let calls = asm.into_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name, "lookup_order");
        assert_eq!(calls[0].arguments, json!({"orderId": "12345"}));
    }

    #[test]
    fn finished_event_takes_precedence_over_buffers() {
        let mut asm = ToolCallAssembler::new();
        asm.started("c1", "t");
        asm.delta("c1", "partial garbage");
        asm.finished("c1", "t", json!({"a": 1}));
        let calls = asm.into_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments, json!({"a": 1}));
    }

    #[test]
    fn invalid_json_degrades_to_empty_object() {
        let mut asm = ToolCallAssembler::new();
        asm.started("c1", "t");
        asm.delta("c1", "{not json");
        let calls = asm.into_calls();
        assert_eq!(calls[0].arguments, json!({}));
    }

    #[test]
    fn empty_buffer_degrades_to_empty_object() {
        let mut asm = ToolCallAssembler::new();
        asm.started("c1", "t");
        let calls = asm.into_calls();
        assert_eq!(calls[0].arguments, json!({}));
    }

    #[test]
    fn apply_routes_events() {
        let mut asm = ToolCallAssembler::new();
        asm.apply(&LlmEvent::ToolCallStarted {
            call_id: "c1".into(),
            tool_name: "t".into(),
        });
        asm.apply(&LlmEvent::ToolCallDelta {
            call_id: "c1".into(),
            delta: "{}".into(),
        });
        asm.apply(&LlmEvent::Token {
            text: "ignored".into(),
        });
        assert_eq!(asm.into_calls().len(), 1);
    }
}
