use bytes::Bytes;

use llmrtc_domain::audio::AudioChunk;
use llmrtc_domain::error::Result;
use llmrtc_domain::stream::{BoxStream, LlmEvent, SttResult};

use crate::types::{
    Capabilities, LlmRequest, LlmResult, SttConfig, TtsConfig, TtsResult, VisionRequest,
    VisionResult,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every LLM adapter implements.
///
/// Adapters translate between these types and each provider's wire format,
/// normalizing tool calls to [`llmrtc_domain::message::ToolCall`] and finish
/// reasons to [`llmrtc_domain::stream::StopReason`].
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a completion request and wait for the full response.
    async fn complete(&self, req: LlmRequest) -> Result<LlmResult>;

    /// Send a completion request and return a stream of events.
    ///
    /// The default wraps [`complete`](Self::complete) so non-streaming
    /// providers degrade transparently: one token event carrying the full
    /// text, then `Done`.
    async fn stream(&self, req: LlmRequest) -> Result<BoxStream<'static, Result<LlmEvent>>> {
        let result = self.complete(req).await?;
        let mut events = Vec::new();
        if !result.full_text.is_empty() {
            events.push(Ok(LlmEvent::Token {
                text: result.full_text,
            }));
        }
        events.push(Ok(LlmEvent::Done {
            stop_reason: result.stop_reason,
            tool_calls: result.tool_calls,
        }));
        Ok(Box::pin(futures_util::stream::iter(events)))
    }

    /// The advertised capabilities of this provider/model combination.
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STT
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Speech-to-text. Input is mono 16-bit little-endian PCM at 16 kHz.
#[async_trait::async_trait]
pub trait SttProvider: Send + Sync {
    async fn transcribe(&self, audio: Bytes, config: SttConfig) -> Result<SttResult>;

    /// Streaming variant: zero or more partials (`is_final = false`)
    /// followed by exactly one final. The default yields just the final.
    async fn transcribe_stream(
        &self,
        audio: Bytes,
        config: SttConfig,
    ) -> Result<BoxStream<'static, Result<SttResult>>> {
        let mut result = self.transcribe(audio, config).await?;
        result.is_final = true;
        Ok(Box::pin(futures_util::stream::iter([Ok(result)])))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TTS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Text-to-speech, one call per sentence.
#[async_trait::async_trait]
pub trait TtsProvider: Send + Sync {
    async fn speak(&self, text: &str, config: TtsConfig) -> Result<TtsResult>;

    /// Streaming variant yielding raw audio chunks of the declared format.
    /// The default synthesizes fully, then forwards one chunk — the
    /// sentence chunker upstream still provides the latency win.
    async fn speak_stream(
        &self,
        text: &str,
        config: TtsConfig,
    ) -> Result<BoxStream<'static, Result<AudioChunk>>> {
        let result = self.speak(text, config).await?;
        let chunk = AudioChunk {
            data: result.audio,
            format: result.format,
            sample_rate_hz: result.sample_rate_hz,
        };
        Ok(Box::pin(futures_util::stream::iter([Ok(chunk)])))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Vision
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fallback image description, used only when the configured LLM lacks
/// native vision.
#[async_trait::async_trait]
pub trait VisionProvider: Send + Sync {
    async fn describe(&self, req: VisionRequest) -> Result<VisionResult>;
}
