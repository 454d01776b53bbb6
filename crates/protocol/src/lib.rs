//! Wire protocol: the client↔server JSON envelope and its codec.
//!
//! Every envelope is a JSON object with a required `"type"` tag. Audio
//! rides the transport's binary side-channel, not the envelope — except
//! the legacy `audio` fallback, which carries base64 WAV for environments
//! without a real-time audio channel.
//!
//! Decoding is forward-compatible: an unknown `"type"` is reported as
//! ignored so newer clients keep working against older servers. Strict
//! mode turns unknown types into protocol violations.

use serde::{Deserialize, Serialize};

use llmrtc_domain::error::{Component, Error, Result};
use llmrtc_domain::message::{Attachment, ToolCall};

/// Protocol version the server speaks. Emitted in `ready`; clients must
/// refuse versions they do not support.
pub const PROTOCOL_VERSION: u16 = 1;

/// Whether a client-announced version can be served.
pub fn version_supported(version: u16) -> bool {
    version == PROTOCOL_VERSION
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client → server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Resume a prior session after a transport drop.
    #[serde(rename = "reconnect")]
    Reconnect { session_id: String },

    /// Vision attachments queued for the next speech segment.
    #[serde(rename = "attachments")]
    Attachments { attachments: Vec<Attachment> },

    /// External audio capture started; the server begins buffering.
    #[serde(rename = "audio-start")]
    AudioStart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sample_rate_hz: Option<u32>,
    },

    /// External audio capture stopped.
    #[serde(rename = "audio-stop")]
    AudioStop,

    /// Run a turn over the audio buffered since `audio-start` (push-to-talk
    /// path, bypassing the VAD gate).
    #[serde(rename = "audio-process")]
    AudioProcess,

    /// Legacy fallback: one utterance as base64 WAV inside the envelope.
    #[serde(rename = "audio")]
    Audio { data: String },

    #[serde(rename = "ping")]
    Ping { timestamp: i64 },

    #[serde(rename = "pong")]
    Pong { timestamp: i64 },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server → client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// First frame on a fresh session.
    #[serde(rename = "ready")]
    Ready {
        session_id: String,
        protocol_version: u16,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        ice_servers: Vec<String>,
    },

    /// Answer to `reconnect`.
    #[serde(rename = "reconnect-ack")]
    ReconnectAck {
        success: bool,
        history_recovered: bool,
        session_id: String,
    },

    #[serde(rename = "transcript")]
    Transcript { text: String, is_final: bool },

    /// Partial LLM text token.
    #[serde(rename = "llm-chunk")]
    LlmChunk { text: String },

    /// Complete assistant text for the turn.
    #[serde(rename = "llm")]
    Llm { text: String },

    #[serde(rename = "tts-start")]
    TtsStart,

    /// TTS lifecycle frame. Audio bytes ride the binary side-channel; the
    /// base64 payload is only present in legacy fallback mode.
    #[serde(rename = "tts-chunk")]
    TtsChunk {
        sentence_index: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        audio: Option<String>,
    },

    #[serde(rename = "tts-complete")]
    TtsComplete,

    #[serde(rename = "tts-cancelled")]
    TtsCancelled,

    #[serde(rename = "speech-start")]
    SpeechStart,

    #[serde(rename = "speech-end")]
    SpeechEnd { duration_ms: u64 },

    #[serde(rename = "tool-call-start")]
    ToolCallStart {
        call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    #[serde(rename = "tool-call-end")]
    ToolCallEnd {
        call_id: String,
        tool_name: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        duration_ms: u64,
    },

    #[serde(rename = "stage-change")]
    StageChange {
        from: String,
        to: String,
        reason: String,
    },

    #[serde(rename = "error")]
    Error {
        code: String,
        message: String,
        component: Component,
        recoverable: bool,
    },

    #[serde(rename = "ping")]
    Ping { timestamp: i64 },

    #[serde(rename = "pong")]
    Pong { timestamp: i64 },
}

impl ServerMessage {
    /// Build an `error` frame from a domain error.
    pub fn from_error(error: &Error) -> Self {
        Self::Error {
            code: error.code().as_str().to_string(),
            message: error.to_string(),
            component: error.component(),
            recoverable: error.recoverable(),
        }
    }
}

/// A tool call request surfaced to the client as `tool-call-start`.
pub fn tool_call_start(call: &ToolCall) -> ServerMessage {
    ServerMessage::ToolCallStart {
        call_id: call.call_id.clone(),
        tool_name: call.tool_name.clone(),
        arguments: call.arguments.clone(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Codec
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome of decoding one inbound text frame.
#[derive(Debug)]
pub enum Decoded {
    Message(ClientMessage),
    /// Unknown but well-formed type, skipped in forward-compatible mode.
    Ignored(String),
}

const CLIENT_TYPES: &[&str] = &[
    "reconnect",
    "attachments",
    "audio-start",
    "audio-stop",
    "audio-process",
    "audio",
    "ping",
    "pong",
];

/// Decode an inbound client envelope.
///
/// Malformed JSON or a missing `type` is always a protocol violation.
/// An unrecognized `type` is [`Decoded::Ignored`] unless `strict` is set.
pub fn decode_client(text: &str, strict: bool) -> Result<Decoded> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| Error::Protocol(format!("malformed JSON envelope: {e}")))?;

    let msg_type = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| Error::Protocol("envelope missing string `type` field".into()))?
        .to_string();

    if !CLIENT_TYPES.contains(&msg_type.as_str()) {
        if strict {
            return Err(Error::Protocol(format!(
                "unknown message type `{msg_type}`"
            )));
        }
        return Ok(Decoded::Ignored(msg_type));
    }

    let msg = serde_json::from_value::<ClientMessage>(value)
        .map_err(|e| Error::Protocol(format!("invalid `{msg_type}` envelope: {e}")))?;
    Ok(Decoded::Message(msg))
}

/// Encode an outbound server envelope.
pub fn encode_server(msg: &ServerMessage) -> Result<String> {
    Ok(serde_json::to_string(msg)?)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_frame_shape() {
        let msg = ServerMessage::Ready {
            session_id: "s1".into(),
            protocol_version: PROTOCOL_VERSION,
            ice_servers: vec![],
        };
        let json: serde_json::Value =
            serde_json::from_str(&encode_server(&msg).unwrap()).unwrap();
        assert_eq!(json["type"], "ready");
        assert_eq!(json["session_id"], "s1");
        assert_eq!(json["protocol_version"], 1);
        assert!(json.get("ice_servers").is_none());
    }

    #[test]
    fn reconnect_roundtrip() {
        let decoded =
            decode_client(r#"{"type":"reconnect","session_id":"abc"}"#, false).unwrap();
        match decoded {
            Decoded::Message(ClientMessage::Reconnect { session_id }) => {
                assert_eq!(session_id, "abc");
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_ignored_by_default() {
        let decoded = decode_client(r#"{"type":"fancy-new-thing"}"#, false).unwrap();
        assert!(matches!(decoded, Decoded::Ignored(t) if t == "fancy-new-thing"));
    }

    #[test]
    fn unknown_type_rejected_in_strict_mode() {
        let err = decode_client(r#"{"type":"fancy-new-thing"}"#, true).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn malformed_json_is_protocol_violation() {
        assert!(matches!(
            decode_client("{not json", false),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            decode_client(r#"{"no_type":true}"#, false),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn known_type_with_bad_fields_is_protocol_violation() {
        let err = decode_client(r#"{"type":"reconnect"}"#, false).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn tts_lifecycle_tags() {
        for (msg, tag) in [
            (ServerMessage::TtsStart, "tts-start"),
            (ServerMessage::TtsComplete, "tts-complete"),
            (ServerMessage::TtsCancelled, "tts-cancelled"),
        ] {
            let json: serde_json::Value =
                serde_json::from_str(&encode_server(&msg).unwrap()).unwrap();
            assert_eq!(json["type"], tag);
        }
    }

    #[test]
    fn error_frame_from_domain_error() {
        let err = Error::Timeout {
            component: Component::Stt,
            timeout_ms: 5000,
        };
        let msg = ServerMessage::from_error(&err);
        let json: serde_json::Value =
            serde_json::from_str(&encode_server(&msg).unwrap()).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "STT_TIMEOUT");
        assert_eq!(json["component"], "stt");
        assert_eq!(json["recoverable"], true);
    }

    #[test]
    fn version_negotiation() {
        assert!(version_supported(PROTOCOL_VERSION));
        assert!(!version_supported(PROTOCOL_VERSION + 1));
    }

    #[test]
    fn legacy_audio_fallback_decodes() {
        let decoded = decode_client(r#"{"type":"audio","data":"UklGRg=="}"#, false).unwrap();
        assert!(matches!(
            decoded,
            Decoded::Message(ClientMessage::Audio { .. })
        ));
    }
}
