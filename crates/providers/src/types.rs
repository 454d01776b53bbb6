use bytes::Bytes;
use serde::{Deserialize, Serialize};

use llmrtc_domain::audio::{AudioFormat, DOWNSTREAM_SAMPLE_RATE_HZ};
use llmrtc_domain::message::{Attachment, Message, ToolCall, ToolDefinition};
use llmrtc_domain::stream::StopReason;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How the model may use the provided tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    /// Model decides.
    #[default]
    Auto,
    /// Tools disabled for this call.
    None,
    /// Model must call some tool.
    Required,
    /// Model must call this tool.
    Tool { name: String },
}

/// A provider-agnostic completion request.
#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    /// The conversation messages to send.
    pub messages: Vec<Message>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: ToolChoice,
    /// Sampling temperature. `None` lets the provider choose.
    pub temperature: Option<f32>,
    /// Nucleus sampling cutoff. `None` lets the provider choose.
    pub top_p: Option<f32>,
    /// Maximum tokens in the response. `None` lets the provider choose.
    pub max_tokens: Option<u32>,
}

/// A provider-agnostic completion response.
#[derive(Debug, Clone)]
pub struct LlmResult {
    /// Full textual content of the response.
    pub full_text: String,
    /// Tool calls emitted by the model, normalized.
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
}

/// What a provider/model combination can do. Drives the vision fallback
/// and lets embedders route by capability rather than provider name.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Capabilities {
    pub streaming: bool,
    pub tools: bool,
    pub vision: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STT / TTS / Vision
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SttConfig {
    /// BCP-47 language hint. `None` lets the provider detect.
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// Provider-specific voice identifier.
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default = "d_format")]
    pub format: AudioFormat,
    #[serde(default = "d_sample_rate")]
    pub sample_rate_hz: u32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            voice: None,
            format: d_format(),
            sample_rate_hz: d_sample_rate(),
        }
    }
}

fn d_format() -> AudioFormat {
    AudioFormat::Pcm
}

fn d_sample_rate() -> u32 {
    DOWNSTREAM_SAMPLE_RATE_HZ
}

/// One fully synthesized utterance.
#[derive(Debug, Clone)]
pub struct TtsResult {
    pub audio: Bytes,
    pub format: AudioFormat,
    pub sample_rate_hz: u32,
}

#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub prompt: String,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone)]
pub struct VisionResult {
    pub description: String,
}
