use serde::{Deserialize, Serialize};

/// Internal tool call format (provider-agnostic).
/// Every adapter converts provider-specific tool calls to/from this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// The outcome of one dispatched tool call.
///
/// Exactly one result exists per request; synthetic timeout, validation,
/// and cancellation errors are results too.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub call_id: String,
    pub tool_name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ToolCallResult {
    pub fn ok(call: &ToolCall, value: serde_json::Value, duration_ms: u64) -> Self {
        Self {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            success: true,
            value: Some(value),
            error: None,
            duration_ms,
        }
    }

    pub fn err(call: &ToolCall, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            success: false,
            value: None,
            error: Some(error.into()),
            duration_ms,
        }
    }

    /// The content string fed back to the LLM as a tool message.
    pub fn content(&self) -> String {
        if self.success {
            self.value
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "null".to_string())
        } else {
            format!(
                "error: {}",
                self.error.as_deref().unwrap_or("unknown error")
            )
        }
    }
}

/// How the executor schedules a tool relative to its neighbors in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionPolicy {
    Sequential,
    Parallel,
}

/// Tool definition exposed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
    /// `None` falls back to the executor's default policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<ExecutionPolicy>,
}

/// A vision attachment on a user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(flatten)]
    pub source: AttachmentSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentSource {
    /// Base64-encoded image payload.
    Base64 { data: String },
    /// A URL the provider fetches itself.
    Url { url: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in the conversation (provider-agnostic).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Vision attachments, ordered. Only meaningful on user messages.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// Tool-call requests, ordered. Only meaningful on assistant messages.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// The call-id this tool message answers. Only on tool messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// The tool name this tool message answers. Only on tool messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

// ── Convenience constructors ───────────────────────────────────────

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
            attachments: Vec::new(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            ..Self::system(text)
        }
    }

    pub fn user_with_attachments(text: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            role: Role::User,
            attachments,
            ..Self::system(text)
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            ..Self::system(text)
        }
    }

    pub fn assistant_with_tool_calls(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            tool_calls,
            ..Self::system(text)
        }
    }

    pub fn tool_result(result: &ToolCallResult) -> Self {
        Self {
            role: Role::Tool,
            content: result.content(),
            tool_call_id: Some(result.call_id.clone()),
            tool_name: Some(result.tool_name.clone()),
            ..Self::system("")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_result_message_links_back() {
        let call = ToolCall {
            call_id: "c1".into(),
            tool_name: "lookup_order".into(),
            arguments: json!({"orderId": "12345"}),
        };
        let result = ToolCallResult::ok(&call, json!({"status": "delivered"}), 12);
        let msg = Message::tool_result(&result);
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("c1"));
        assert_eq!(msg.tool_name.as_deref(), Some("lookup_order"));
        assert!(msg.content.contains("delivered"));
    }

    #[test]
    fn failed_result_content_carries_error() {
        let call = ToolCall {
            call_id: "c2".into(),
            tool_name: "t".into(),
            arguments: json!({}),
        };
        let result = ToolCallResult::err(&call, "timeout", 3000);
        assert_eq!(result.content(), "error: timeout");
    }

    #[test]
    fn attachment_roundtrip() {
        let att = Attachment {
            source: AttachmentSource::Url {
                url: "https://example.com/cat.png".into(),
            },
            mime: Some("image/png".into()),
            alt: None,
        };
        let json = serde_json::to_string(&att).unwrap();
        let back: Attachment = serde_json::from_str(&json).unwrap();
        assert_eq!(att, back);
    }

    #[test]
    fn plain_message_serializes_without_empty_fields() {
        let json = serde_json::to_value(Message::user("hi")).unwrap();
        assert_eq!(json["role"], "user");
        assert!(json.get("attachments").is_none());
        assert!(json.get("tool_calls").is_none());
    }
}
