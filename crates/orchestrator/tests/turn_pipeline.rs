//! End-to-end turn pipeline tests with scripted fake providers.
//!
//! All tests run on the current-thread runtime so the event interleaving
//! is deterministic.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use llmrtc_domain::audio::AudioChunk;
use llmrtc_domain::config::TurnConfig;
use llmrtc_domain::error::{Component, Error, ErrorCode, Result};
use llmrtc_domain::history::History;
use llmrtc_domain::stream::{BoxStream, LlmEvent, SttResult, StopReason};
use llmrtc_observe::MetricsSink;
use llmrtc_orchestrator::{Orchestrator, TurnEvent, TurnInput};
use llmrtc_providers::{
    LlmProvider, LlmRequest, LlmResult, SttConfig, SttProvider, TtsConfig, TtsProvider, TtsResult,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted fakes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ScriptedStt {
    partials: Vec<&'static str>,
    final_text: &'static str,
}

#[async_trait::async_trait]
impl SttProvider for ScriptedStt {
    async fn transcribe(&self, _audio: Bytes, _config: SttConfig) -> Result<SttResult> {
        Ok(SttResult::final_text(self.final_text))
    }

    async fn transcribe_stream(
        &self,
        _audio: Bytes,
        _config: SttConfig,
    ) -> Result<BoxStream<'static, Result<SttResult>>> {
        let mut results: Vec<Result<SttResult>> = self
            .partials
            .iter()
            .map(|p| Ok(SttResult::partial(*p)))
            .collect();
        results.push(Ok(SttResult::final_text(self.final_text)));
        Ok(Box::pin(futures_util::stream::iter(results)))
    }
}

struct HangingStt;

#[async_trait::async_trait]
impl SttProvider for HangingStt {
    async fn transcribe(&self, _audio: Bytes, _config: SttConfig) -> Result<SttResult> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(SttResult::final_text(""))
    }
}

struct ScriptedLlm {
    tokens: Vec<&'static str>,
    /// Inject an error after this many tokens instead of finishing.
    fail_after: Option<usize>,
}

impl ScriptedLlm {
    fn new(tokens: Vec<&'static str>) -> Self {
        Self {
            tokens,
            fail_after: None,
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedLlm {
    async fn complete(&self, _req: LlmRequest) -> Result<LlmResult> {
        Ok(LlmResult {
            full_text: self.tokens.concat(),
            tool_calls: Vec::new(),
            stop_reason: StopReason::EndTurn,
        })
    }

    async fn stream(&self, _req: LlmRequest) -> Result<BoxStream<'static, Result<LlmEvent>>> {
        let tokens = self.tokens.clone();
        let fail_after = self.fail_after;
        let stream = async_stream::stream! {
            for (i, token) in tokens.iter().enumerate() {
                if fail_after == Some(i) {
                    yield Err(Error::provider(Component::Llm, "upstream disconnected"));
                    return;
                }
                yield Ok(LlmEvent::Token { text: token.to_string() });
            }
            yield Ok(LlmEvent::Done {
                stop_reason: StopReason::EndTurn,
                tool_calls: Vec::new(),
            });
        };
        Ok(Box::pin(stream))
    }

    fn provider_id(&self) -> &str {
        "scripted-llm"
    }
}

struct ScriptedTts {
    chunks_per_sentence: usize,
    /// Pause between chunks, letting a test barge in mid-stream.
    chunk_delay: Option<Duration>,
}

#[async_trait::async_trait]
impl TtsProvider for ScriptedTts {
    async fn speak(&self, _text: &str, config: TtsConfig) -> Result<TtsResult> {
        Ok(TtsResult {
            audio: Bytes::from(vec![0u8; 640]),
            format: config.format,
            sample_rate_hz: config.sample_rate_hz,
        })
    }

    async fn speak_stream(
        &self,
        _text: &str,
        config: TtsConfig,
    ) -> Result<BoxStream<'static, Result<AudioChunk>>> {
        let count = self.chunks_per_sentence;
        let delay = self.chunk_delay;
        let stream = async_stream::stream! {
            for _ in 0..count {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(AudioChunk::pcm(
                    Bytes::from(vec![0u8; 640]),
                    config.sample_rate_hz,
                ));
            }
        };
        Ok(Box::pin(stream))
    }
}

#[derive(Default)]
struct RecordingMetrics {
    increments: Mutex<Vec<(String, Vec<(String, String)>)>>,
}

impl MetricsSink for RecordingMetrics {
    fn timing(&self, _name: &str, _ms: u64, _tags: &[(&str, &str)]) {}

    fn increment(&self, name: &str, _n: u64, tags: &[(&str, &str)]) {
        self.increments.lock().push((
            name.to_string(),
            tags.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ));
    }

    fn gauge(&self, _name: &str, _value: f64, _tags: &[(&str, &str)]) {}
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn input(history: &Arc<Mutex<History>>) -> TurnInput {
    TurnInput {
        session_id: "s1".into(),
        audio: Bytes::from(vec![0u8; 3200]),
        attachments: Vec::new(),
        history: history.clone(),
    }
}

fn tag(event: &TurnEvent) -> &'static str {
    match event {
        TurnEvent::Transcript { is_final: false, .. } => "transcript-partial",
        TurnEvent::Transcript { is_final: true, .. } => "transcript",
        TurnEvent::LlmChunk { .. } => "llm-chunk",
        TurnEvent::LlmComplete { .. } => "llm",
        TurnEvent::TtsStart => "tts-start",
        TurnEvent::TtsChunk { .. } => "tts-chunk",
        TurnEvent::TtsComplete => "tts-complete",
        TurnEvent::TtsCancelled => "tts-cancelled",
        TurnEvent::Cancelled => "cancelled",
        TurnEvent::ToolCallStart { .. } => "tool-call-start",
        TurnEvent::ToolCallEnd { .. } => "tool-call-end",
        TurnEvent::StageChange { .. } => "stage-change",
        TurnEvent::Error { .. } => "error",
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario A: single-prompt turn, full event order
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn single_prompt_turn_event_order() {
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(ScriptedLlm::new(vec!["It's ", "noon", "."])),
        Arc::new(ScriptedStt {
            partials: vec!["What time"],
            final_text: "What time is it?",
        }),
        Arc::new(ScriptedTts {
            chunks_per_sentence: 1,
            chunk_delay: None,
        }),
        TurnConfig::default(),
    ));

    let history = Arc::new(Mutex::new(History::new(8)));
    let (_handle, mut rx) = orchestrator.run_turn_stream(input(&history));

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    let tags: Vec<_> = events.iter().map(tag).collect();
    assert_eq!(
        tags,
        [
            "transcript-partial",
            "transcript",
            "llm-chunk",
            "llm-chunk",
            "llm-chunk",
            "llm",
            "tts-start",
            "tts-chunk",
            "tts-complete",
        ]
    );

    // Payload checks.
    assert!(matches!(
        &events[1],
        TurnEvent::Transcript { text, is_final: true } if text == "What time is it?"
    ));
    assert!(matches!(
        &events[5],
        TurnEvent::LlmComplete { text } if text == "It's noon."
    ));

    // History gained the user and assistant messages.
    let history = history.lock();
    assert_eq!(history.len(), 2);
    assert_eq!(history.messages()[0].content, "What time is it?");
    assert_eq!(history.messages()[1].content, "It's noon.");
}

#[tokio::test]
async fn multi_sentence_chunks_are_ordered_by_sentence() {
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(ScriptedLlm::new(vec!["One. ", "Two. ", "Three."])),
        Arc::new(ScriptedStt {
            partials: vec![],
            final_text: "count to three",
        }),
        Arc::new(ScriptedTts {
            chunks_per_sentence: 2,
            chunk_delay: None,
        }),
        TurnConfig::default(),
    ));

    let history = Arc::new(Mutex::new(History::new(8)));
    let (_handle, mut rx) = orchestrator.run_turn_stream(input(&history));

    let mut indices = Vec::new();
    while let Some(event) = rx.recv().await {
        if let TurnEvent::TtsChunk { sentence_index, .. } = event {
            indices.push(sentence_index);
        }
    }
    assert_eq!(indices, [0, 0, 1, 1, 2, 2]);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario B: barge-in mid-TTS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn barge_in_during_tts_emits_single_cancelled_event() {
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(ScriptedLlm::new(vec!["Here is a long answer. ", "More."])),
        Arc::new(ScriptedStt {
            partials: vec![],
            final_text: "tell me everything",
        }),
        Arc::new(ScriptedTts {
            chunks_per_sentence: 50,
            chunk_delay: Some(Duration::from_millis(5)),
        }),
        TurnConfig::default(),
    ));

    let history = Arc::new(Mutex::new(History::new(8)));
    let (handle, mut rx) = orchestrator.run_turn_stream(input(&history));

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        let is_first_chunk = matches!(event, TurnEvent::TtsChunk { .. });
        events.push(event);
        if is_first_chunk {
            // Speech started on the client's side: barge in.
            handle.cancel();
            break;
        }
    }
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    let cancelled_count = events
        .iter()
        .filter(|e| matches!(e, TurnEvent::TtsCancelled))
        .count();
    assert_eq!(cancelled_count, 1, "exactly one tts-cancelled");

    // No chunk may follow the cancellation event.
    let cancel_pos = events
        .iter()
        .position(|e| matches!(e, TurnEvent::TtsCancelled))
        .unwrap();
    assert!(
        events[cancel_pos..]
            .iter()
            .all(|e| !matches!(e, TurnEvent::TtsChunk { .. })),
        "no tts-chunk after tts-cancelled"
    );
    assert!(handle.entered_tts());
}

#[tokio::test]
async fn cancel_before_tts_is_plain_cancelled() {
    // The LLM stalls after its first token, so the cancel lands mid-phase
    // before any sentence closes.
    struct StallingLlm;

    #[async_trait::async_trait]
    impl LlmProvider for StallingLlm {
        async fn complete(&self, _req: LlmRequest) -> Result<LlmResult> {
            unreachable!("streaming is always used")
        }

        async fn stream(
            &self,
            _req: LlmRequest,
        ) -> Result<BoxStream<'static, Result<LlmEvent>>> {
            let stream = async_stream::stream! {
                yield Ok(LlmEvent::Token { text: "still ".into() });
                tokio::time::sleep(Duration::from_secs(3600)).await;
            };
            Ok(Box::pin(stream))
        }

        fn provider_id(&self) -> &str {
            "stalling-llm"
        }
    }

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(StallingLlm),
        Arc::new(ScriptedStt {
            partials: vec![],
            final_text: "hello",
        }),
        Arc::new(ScriptedTts {
            chunks_per_sentence: 1,
            chunk_delay: None,
        }),
        TurnConfig::default(),
    ));

    let history = Arc::new(Mutex::new(History::new(8)));
    let (handle, mut rx) = orchestrator.run_turn_stream(input(&history));

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        let cancel_now = matches!(event, TurnEvent::LlmChunk { .. });
        events.push(event);
        if cancel_now {
            handle.cancel();
        }
    }

    assert!(events.iter().any(|e| matches!(e, TurnEvent::Cancelled)));
    assert!(!events.iter().any(|e| matches!(e, TurnEvent::TtsCancelled)));
    assert!(!events.iter().any(|e| matches!(e, TurnEvent::TtsChunk { .. })));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario F: STT timeout
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test(start_paused = true)]
async fn stt_timeout_fails_turn_without_llm_or_tts() {
    let metrics = Arc::new(RecordingMetrics::default());
    let orchestrator = Arc::new(
        Orchestrator::new(
            Arc::new(ScriptedLlm::new(vec!["never"])),
            Arc::new(HangingStt),
            Arc::new(ScriptedTts {
                chunks_per_sentence: 1,
                chunk_delay: None,
            }),
            TurnConfig {
                stt_timeout_ms: 100,
                ..Default::default()
            },
        )
        .with_metrics(metrics.clone()),
    );

    let history = Arc::new(Mutex::new(History::new(8)));
    let (_handle, mut rx) = orchestrator.run_turn_stream(input(&history));

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        TurnEvent::Error {
            code: ErrorCode::SttTimeout,
            component: Component::Stt,
            recoverable: true,
            ..
        }
    ));

    let increments = metrics.increments.lock();
    assert!(increments.iter().any(|(name, tags)| {
        name == "llmrtc.errors"
            && tags.contains(&("component".to_string(), "stt".to_string()))
            && tags.contains(&("kind".to_string(), "timeout".to_string()))
    }));

    // Session history untouched.
    assert!(history.lock().is_empty());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn llm_failure_leaves_no_assistant_message() {
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(ScriptedLlm {
            tokens: vec!["Partial answer. ", "never sent"],
            fail_after: Some(1),
        }),
        Arc::new(ScriptedStt {
            partials: vec![],
            final_text: "question",
        }),
        Arc::new(ScriptedTts {
            chunks_per_sentence: 1,
            chunk_delay: None,
        }),
        TurnConfig::default(),
    ));

    let history = Arc::new(Mutex::new(History::new(8)));
    let (_handle, mut rx) = orchestrator.run_turn_stream(input(&history));

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    assert!(events.iter().any(|e| matches!(
        e,
        TurnEvent::Error {
            code: ErrorCode::LlmError,
            ..
        }
    )));
    assert!(!events.iter().any(|e| matches!(e, TurnEvent::TtsComplete)));
    assert!(!events.iter().any(|e| matches!(e, TurnEvent::LlmComplete { .. })));

    // Only the user message survives a failed turn.
    let history = history.lock();
    assert_eq!(history.len(), 1);
    assert_eq!(history.messages()[0].content, "question");
}

#[tokio::test]
async fn empty_transcript_skips_llm_and_tts() {
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(ScriptedLlm::new(vec!["should not run"])),
        Arc::new(ScriptedStt {
            partials: vec![],
            final_text: "   ",
        }),
        Arc::new(ScriptedTts {
            chunks_per_sentence: 1,
            chunk_delay: None,
        }),
        TurnConfig::default(),
    ));

    let history = Arc::new(Mutex::new(History::new(8)));
    let result = orchestrator.run_turn(input(&history)).await;

    assert_eq!(result.transcript, "   ");
    assert!(result.llm_text.is_empty());
    assert!(result.error.is_none());
    assert!(!result.cancelled);
    assert!(history.lock().is_empty());
}

#[tokio::test]
async fn history_truncates_at_turn_boundary() {
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(ScriptedLlm::new(vec!["Fine."])),
        Arc::new(ScriptedStt {
            partials: vec![],
            final_text: "and now?",
        }),
        Arc::new(ScriptedTts {
            chunks_per_sentence: 1,
            chunk_delay: None,
        }),
        TurnConfig::default(),
    ));

    let history = Arc::new(Mutex::new(History::with_system_prompt(2, "be brief")));
    history.lock().push(llmrtc_domain::message::Message::user("old"));
    history.lock().push(llmrtc_domain::message::Message::assistant("older"));

    let result = orchestrator.run_turn(input(&history)).await;
    assert_eq!(result.llm_text, "Fine.");

    let history = history.lock();
    // system + last 2 messages.
    assert_eq!(history.len(), 3);
    assert_eq!(history.messages()[0].content, "be brief");
    assert_eq!(history.messages()[1].content, "and now?");
    assert_eq!(history.messages()[2].content, "Fine.");
}
