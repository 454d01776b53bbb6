//! Development loopback providers.
//!
//! `llmrtcd run` boots with these so the whole pipeline — VAD gate, turn
//! orchestration, sentence chunking, barge-in — can be exercised without
//! any external AI service. They are placeholders, not adapters: real
//! deployments inject their own providers through [`crate::ServerBuilder`].

use bytes::Bytes;

use llmrtc_domain::audio::{pcm_duration_ms, AudioFormat, BYTES_PER_SAMPLE, UPSTREAM_SAMPLE_RATE_HZ};
use llmrtc_domain::error::Result;
use llmrtc_domain::message::Role;
use llmrtc_domain::stream::{SttResult, StopReason};
use llmrtc_providers::{
    LlmProvider, LlmRequest, LlmResult, SttConfig, SttProvider, TtsConfig, TtsProvider, TtsResult,
};

/// Reports the utterance length instead of transcribing.
pub struct DevStt;

#[async_trait::async_trait]
impl SttProvider for DevStt {
    async fn transcribe(&self, audio: Bytes, _config: SttConfig) -> Result<SttResult> {
        let duration = pcm_duration_ms(audio.len(), UPSTREAM_SAMPLE_RATE_HZ);
        Ok(SttResult::final_text(format!(
            "I spoke for about {duration} milliseconds."
        )))
    }
}

/// Echoes the last user message back as the assistant reply.
pub struct DevEchoLlm;

#[async_trait::async_trait]
impl LlmProvider for DevEchoLlm {
    async fn complete(&self, req: LlmRequest) -> Result<LlmResult> {
        let last_user = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(LlmResult {
            full_text: format!("You said: {last_user}"),
            tool_calls: Vec::new(),
            stop_reason: StopReason::EndTurn,
        })
    }

    fn provider_id(&self) -> &str {
        "dev-echo"
    }
}

/// Synthesizes silence sized to the text (~60 ms per word).
pub struct DevTts;

#[async_trait::async_trait]
impl TtsProvider for DevTts {
    async fn speak(&self, text: &str, config: TtsConfig) -> Result<TtsResult> {
        let words = text.split_whitespace().count().max(1);
        let samples = config.sample_rate_hz as usize * 60 * words / 1000;
        Ok(TtsResult {
            audio: Bytes::from(vec![0u8; samples * BYTES_PER_SAMPLE]),
            format: AudioFormat::Pcm,
            sample_rate_hz: config.sample_rate_hz,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmrtc_domain::message::Message;

    #[tokio::test]
    async fn dev_stack_round_trip() {
        let stt = DevStt;
        let transcript = stt
            .transcribe(Bytes::from(vec![0u8; 32_000]), SttConfig::default())
            .await
            .unwrap();
        assert!(transcript.text.contains("1000 milliseconds"));

        let llm = DevEchoLlm;
        let reply = llm
            .complete(LlmRequest {
                messages: vec![Message::user(&transcript.text)],
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(reply.full_text.starts_with("You said:"));

        let tts = DevTts;
        let audio = tts.speak(&reply.full_text, TtsConfig::default()).await.unwrap();
        assert!(!audio.audio.is_empty());
        assert_eq!(audio.format, AudioFormat::Pcm);
    }
}
