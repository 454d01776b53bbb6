use serde::{Deserialize, Serialize};
use std::fmt;

/// The pipeline component an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Stt,
    Llm,
    Tts,
    Vad,
    Transport,
    Server,
    Tool,
    Playbook,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stt => "stt",
            Self::Llm => "llm",
            Self::Tts => "tts",
            Self::Vad => "vad",
            Self::Transport => "transport",
            Self::Server => "server",
            Self::Tool => "tool",
            Self::Playbook => "playbook",
        };
        f.write_str(s)
    }
}

/// Orthogonal failure kind, combined with [`Component`] for metrics tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Timeout,
    Provider,
    Protocol,
    Validation,
    Cancelled,
    RateLimited,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::Provider => "provider",
            Self::Protocol => "protocol",
            Self::Validation => "validation",
            Self::Cancelled => "cancelled",
            Self::RateLimited => "rate-limited",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Stable error codes surfaced in `error` frames on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    WebrtcUnavailable,
    ConnectionFailed,
    SessionNotFound,
    SessionExpired,
    SttError,
    SttTimeout,
    LlmError,
    LlmTimeout,
    TtsError,
    TtsTimeout,
    AudioProcessingError,
    VadError,
    InvalidMessage,
    InvalidAudioFormat,
    ToolError,
    PlaybookError,
    InternalError,
    RateLimited,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebrtcUnavailable => "WEBRTC_UNAVAILABLE",
            Self::ConnectionFailed => "CONNECTION_FAILED",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::SttError => "STT_ERROR",
            Self::SttTimeout => "STT_TIMEOUT",
            Self::LlmError => "LLM_ERROR",
            Self::LlmTimeout => "LLM_TIMEOUT",
            Self::TtsError => "TTS_ERROR",
            Self::TtsTimeout => "TTS_TIMEOUT",
            Self::AudioProcessingError => "AUDIO_PROCESSING_ERROR",
            Self::VadError => "VAD_ERROR",
            Self::InvalidMessage => "INVALID_MESSAGE",
            Self::InvalidAudioFormat => "INVALID_AUDIO_FORMAT",
            Self::ToolError => "TOOL_ERROR",
            Self::PlaybookError => "PLAYBOOK_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
            Self::RateLimited => "RATE_LIMITED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared error type used across all LLMRTC crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{component} timed out after {timeout_ms}ms")]
    Timeout { component: Component, timeout_ms: u64 },

    #[error("{component} provider: {message}")]
    Provider { component: Component, message: String },

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("cancelled")]
    Cancelled,

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session expired: {0}")]
    SessionExpired(String),

    #[error("audio: {0}")]
    Audio(String),

    #[error("unsupported audio format: {0}")]
    InvalidAudioFormat(String),

    #[error("vad: {0}")]
    Vad(String),

    #[error("tool {tool}: {message}")]
    Tool { tool: String, message: String },

    #[error("playbook: {0}")]
    Playbook(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// Convenience constructor for provider failures.
    pub fn provider(component: Component, message: impl Into<String>) -> Self {
        Self::Provider {
            component,
            message: message.into(),
        }
    }

    /// The component this error is attributed to.
    pub fn component(&self) -> Component {
        match self {
            Self::Timeout { component, .. } | Self::Provider { component, .. } => *component,
            Self::Protocol(_) => Component::Transport,
            Self::Audio(_) | Self::InvalidAudioFormat(_) => Component::Transport,
            Self::Vad(_) => Component::Vad,
            Self::Tool { .. } => Component::Tool,
            Self::Playbook(_) => Component::Playbook,
            _ => Component::Server,
        }
    }

    /// The failure kind, for metrics tags.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Provider { .. } => ErrorKind::Provider,
            Self::Protocol(_) | Self::InvalidAudioFormat(_) => ErrorKind::Protocol,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::RateLimited(_) => ErrorKind::RateLimited,
            Self::Tool { .. } => ErrorKind::Provider,
            _ => ErrorKind::Internal,
        }
    }

    /// The stable wire code for `error` frames.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { component, .. } => match component {
                Component::Stt => ErrorCode::SttTimeout,
                Component::Llm => ErrorCode::LlmTimeout,
                Component::Tts => ErrorCode::TtsTimeout,
                Component::Tool => ErrorCode::ToolError,
                _ => ErrorCode::InternalError,
            },
            Self::Provider { component, .. } => match component {
                Component::Stt => ErrorCode::SttError,
                Component::Llm => ErrorCode::LlmError,
                Component::Tts => ErrorCode::TtsError,
                Component::Vad => ErrorCode::VadError,
                Component::Transport => ErrorCode::ConnectionFailed,
                _ => ErrorCode::InternalError,
            },
            Self::Protocol(_) | Self::Validation(_) => ErrorCode::InvalidMessage,
            Self::RateLimited(_) => ErrorCode::RateLimited,
            Self::SessionNotFound(_) => ErrorCode::SessionNotFound,
            Self::SessionExpired(_) => ErrorCode::SessionExpired,
            Self::Audio(_) => ErrorCode::AudioProcessingError,
            Self::InvalidAudioFormat(_) => ErrorCode::InvalidAudioFormat,
            Self::Vad(_) => ErrorCode::VadError,
            Self::Tool { .. } => ErrorCode::ToolError,
            Self::Playbook(_) => ErrorCode::PlaybookError,
            _ => ErrorCode::InternalError,
        }
    }

    /// Whether the client can reasonably retry after this error.
    ///
    /// Session-terminal and protocol errors are not recoverable; transient
    /// provider/timeout failures are.
    pub fn recoverable(&self) -> bool {
        match self {
            Self::Timeout { .. }
            | Self::Provider { .. }
            | Self::RateLimited(_)
            | Self::Audio(_)
            | Self::Vad(_)
            | Self::Tool { .. } => true,
            Self::Cancelled => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_maps_to_component_code() {
        let e = Error::Timeout {
            component: Component::Stt,
            timeout_ms: 5000,
        };
        assert_eq!(e.code(), ErrorCode::SttTimeout);
        assert_eq!(e.kind(), ErrorKind::Timeout);
        assert_eq!(e.component(), Component::Stt);
        assert!(e.recoverable());
    }

    #[test]
    fn session_expired_is_not_recoverable() {
        let e = Error::SessionExpired("s1".into());
        assert_eq!(e.code(), ErrorCode::SessionExpired);
        assert!(!e.recoverable());
    }

    #[test]
    fn error_code_wire_strings() {
        assert_eq!(ErrorCode::SttTimeout.as_str(), "STT_TIMEOUT");
        assert_eq!(ErrorCode::InvalidMessage.as_str(), "INVALID_MESSAGE");
        assert_eq!(ErrorCode::RateLimited.as_str(), "RATE_LIMITED");
    }

    #[test]
    fn provider_error_display_includes_component() {
        let e = Error::provider(Component::Llm, "boom");
        assert_eq!(e.to_string(), "llm provider: boom");
    }
}
