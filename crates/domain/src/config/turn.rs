use serde::{Deserialize, Serialize};

/// Sampling parameters passed through to the LLM provider.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SamplingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnConfig {
    /// Sampling defaults for every turn; a playbook's stage config layers
    /// on top.
    #[serde(default)]
    pub sampling: SamplingConfig,
    /// Stream TTS audio per sentence. When false, each sentence is
    /// synthesized fully before forwarding.
    #[serde(default = "d_true")]
    pub streaming_tts: bool,
    /// Characters that close a sentence when followed by whitespace.
    #[serde(default = "d_sentence_terminators")]
    pub sentence_terminators: String,
    /// Phase-1 tool loop iteration cap for playbook turns.
    #[serde(default = "d_tool_loop_cap")]
    pub tool_loop_cap: usize,
    #[serde(default = "d_stt_timeout_ms")]
    pub stt_timeout_ms: u64,
    #[serde(default = "d_llm_timeout_ms")]
    pub llm_timeout_ms: u64,
    #[serde(default = "d_tts_timeout_ms")]
    pub tts_timeout_ms: u64,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            sampling: SamplingConfig::default(),
            streaming_tts: true,
            sentence_terminators: d_sentence_terminators(),
            tool_loop_cap: d_tool_loop_cap(),
            stt_timeout_ms: d_stt_timeout_ms(),
            llm_timeout_ms: d_llm_timeout_ms(),
            tts_timeout_ms: d_tts_timeout_ms(),
        }
    }
}

fn d_true() -> bool {
    true
}

fn d_sentence_terminators() -> String {
    ".!?".into()
}

fn d_tool_loop_cap() -> usize {
    5
}

fn d_stt_timeout_ms() -> u64 {
    15_000
}

fn d_llm_timeout_ms() -> u64 {
    30_000
}

fn d_tts_timeout_ms() -> u64 {
    15_000
}
