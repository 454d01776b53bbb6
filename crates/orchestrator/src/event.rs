use llmrtc_domain::audio::AudioChunk;
use llmrtc_domain::error::{Component, Error, ErrorCode};
use llmrtc_domain::message::{ToolCall, ToolCallResult};

/// Events emitted during a single turn, in strict causal order.
///
/// The server maps these 1:1 onto wire frames; audio payloads ride along
/// here and are split onto the binary side-channel at the transport edge.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    /// STT output; partials stream with `is_final = false`.
    Transcript { text: String, is_final: bool },

    /// Partial LLM text token.
    LlmChunk { text: String },

    /// Complete assistant text for the turn.
    LlmComplete { text: String },

    /// First TTS audio is on its way.
    TtsStart,

    /// One chunk of synthesized audio. Chunks are ordered by sentence.
    TtsChunk {
        sentence_index: usize,
        audio: AudioChunk,
    },

    /// All sentences synthesized.
    TtsComplete,

    /// Barge-in: the turn was cancelled after entering TTS. Terminal, and
    /// no further `TtsChunk` follows for this turn.
    TtsCancelled,

    /// The turn was cancelled before entering TTS. Terminal.
    Cancelled,

    /// A tool call is being dispatched (playbook turns).
    ToolCallStart { call: ToolCall },

    /// A tool call finished (playbook turns).
    ToolCallEnd { result: ToolCallResult },

    /// The playbook moved to a new stage.
    StageChange {
        from: String,
        to: String,
        reason: String,
    },

    /// A phase failed. Terminal unless `recoverable` and the phase policy
    /// lets the turn continue (TTS errors).
    Error {
        code: ErrorCode,
        component: Component,
        message: String,
        recoverable: bool,
    },
}

impl TurnEvent {
    pub fn from_error(error: &Error) -> Self {
        Self::Error {
            code: error.code(),
            component: error.component(),
            message: error.to_string(),
            recoverable: error.recoverable(),
        }
    }
}

/// Aggregate outcome of a turn, for callers that don't consume the stream.
#[derive(Debug, Clone, Default)]
pub struct TurnResult {
    /// Final user transcript (empty when the utterance was silence).
    pub transcript: String,
    /// Final assistant text (empty on failure or admission skip).
    pub llm_text: String,
    /// Audio chunks synthesized across the turn's sentences.
    pub tts_chunks: usize,
    pub cancelled: bool,
    /// First terminal error, if the turn failed.
    pub error: Option<(ErrorCode, String)>,
}
