//! The TTS stage of the turn pipeline.
//!
//! Runs as its own task, consuming completed sentences from a bounded
//! channel and forwarding synthesized audio to the turn's event channel.
//! Sentences are synthesized strictly in order; within a sentence, chunk
//! order is the provider's stream order. The stage watches two signals:
//! the turn's cancel token (barge-in) and a private abort token used when
//! the LLM phase fails and queued sentences must not be spoken.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use llmrtc_domain::cancel::CancelToken;
use llmrtc_domain::config::TurnConfig;
use llmrtc_domain::error::{Component, Error};
use llmrtc_observe::{names, HookDispatcher, HookEvent, MetricsSink};
use llmrtc_providers::{TtsConfig, TtsProvider};

use crate::event::TurnEvent;
use crate::turn::TurnContext;

/// What the stage did by the time it stopped.
#[derive(Debug, Clone, Copy, Default)]
pub struct TtsOutcome {
    /// `tts-start` was emitted.
    pub started: bool,
    /// The stage stopped because the turn was cancelled.
    pub cancelled: bool,
    /// At least one sentence failed to synthesize.
    pub errored: bool,
    pub chunks: usize,
    /// Wall time spent inside TTS calls, summed over sentences.
    pub duration_ms: u64,
}

enum SentenceEnd {
    Ok(usize),
    Cancelled,
    Failed,
}

pub struct SpeechStage {
    sentence_tx: mpsc::Sender<(usize, String)>,
    abort: CancelToken,
    handle: JoinHandle<TtsOutcome>,
}

impl SpeechStage {
    /// Spawn the stage. The sentence channel is bounded so a slow TTS
    /// provider applies backpressure to the LLM phase.
    pub fn spawn(
        tts: Arc<dyn TtsProvider>,
        config: TurnConfig,
        ctx: TurnContext,
        events: mpsc::Sender<TurnEvent>,
        hooks: HookDispatcher,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let (sentence_tx, sentence_rx) = mpsc::channel::<(usize, String)>(8);
        let abort = CancelToken::new();
        let worker = Worker {
            tts,
            config,
            ctx,
            events,
            hooks,
            metrics,
            abort: abort.clone(),
        };
        let handle = tokio::spawn(worker.run(sentence_rx));
        Self {
            sentence_tx,
            abort,
            handle,
        }
    }

    /// Queue a sentence. Returns `false` when the stage is gone or the
    /// turn was cancelled while waiting for channel capacity.
    pub async fn speak(&self, index: usize, sentence: String) -> bool {
        tokio::select! {
            sent = self.sentence_tx.send((index, sentence)) => sent.is_ok(),
            _ = self.abort.cancelled() => false,
        }
    }

    /// Stop without speaking queued sentences (LLM phase failed). Not a
    /// turn cancellation: no `tts-cancelled` is implied.
    pub fn abort(&self) {
        self.abort.cancel();
    }

    /// Close the sentence channel and wait for the stage to drain.
    pub async fn finish(self) -> TtsOutcome {
        drop(self.sentence_tx);
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "speech stage task panicked");
                TtsOutcome {
                    errored: true,
                    ..Default::default()
                }
            }
        }
    }
}

struct Worker {
    tts: Arc<dyn TtsProvider>,
    config: TurnConfig,
    ctx: TurnContext,
    events: mpsc::Sender<TurnEvent>,
    hooks: HookDispatcher,
    metrics: Arc<dyn MetricsSink>,
    abort: CancelToken,
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<(usize, String)>) -> TtsOutcome {
        let mut outcome = TtsOutcome::default();

        loop {
            let (index, sentence) = tokio::select! {
                _ = self.ctx.cancel.cancelled() => {
                    outcome.cancelled = true;
                    break;
                }
                _ = self.abort.cancelled() => break,
                item = rx.recv() => match item {
                    None => break,
                    Some(item) => item,
                },
            };

            if !outcome.started {
                outcome.started = true;
                self.ctx.mark_tts_entered();
                if self.events.send(TurnEvent::TtsStart).await.is_err() {
                    break;
                }
                self.hooks
                    .emit(HookEvent::TtsStart {
                        turn_id: self.ctx.turn_id.clone(),
                    })
                    .await;
            }

            let started_at = Instant::now();
            match self.synthesize(index, &sentence).await {
                SentenceEnd::Ok(chunks) => outcome.chunks += chunks,
                SentenceEnd::Cancelled => {
                    outcome.cancelled = true;
                    outcome.duration_ms += started_at.elapsed().as_millis() as u64;
                    break;
                }
                // A failed sentence is reported but does not invalidate the
                // turn; later sentences still play.
                SentenceEnd::Failed => outcome.errored = true,
            }
            outcome.duration_ms += started_at.elapsed().as_millis() as u64;
        }

        outcome
    }

    async fn synthesize(&self, index: usize, sentence: &str) -> SentenceEnd {
        let timeout = Duration::from_millis(self.config.tts_timeout_ms);
        let tts_config = TtsConfig::default();

        if self.config.streaming_tts {
            let stream = match tokio::time::timeout(
                timeout,
                self.tts.speak_stream(sentence, tts_config),
            )
            .await
            {
                Err(_) => {
                    self.report(Error::Timeout {
                        component: Component::Tts,
                        timeout_ms: self.config.tts_timeout_ms,
                    })
                    .await;
                    return SentenceEnd::Failed;
                }
                Ok(Err(e)) => {
                    self.report(e).await;
                    return SentenceEnd::Failed;
                }
                Ok(Ok(stream)) => stream,
            };

            let mut stream = stream;
            let mut chunks = 0usize;
            loop {
                let item = tokio::select! {
                    _ = self.ctx.cancel.cancelled() => return SentenceEnd::Cancelled,
                    _ = self.abort.cancelled() => return SentenceEnd::Ok(chunks),
                    item = stream.next() => item,
                };
                match item {
                    None => return SentenceEnd::Ok(chunks),
                    Some(Err(e)) => {
                        self.report(e).await;
                        return SentenceEnd::Failed;
                    }
                    Some(Ok(audio)) => {
                        if !self.forward(index, audio).await {
                            return SentenceEnd::Cancelled;
                        }
                        chunks += 1;
                    }
                }
            }
        } else {
            match tokio::time::timeout(timeout, self.tts.speak(sentence, tts_config)).await {
                Err(_) => {
                    self.report(Error::Timeout {
                        component: Component::Tts,
                        timeout_ms: self.config.tts_timeout_ms,
                    })
                    .await;
                    SentenceEnd::Failed
                }
                Ok(Err(e)) => {
                    self.report(e).await;
                    SentenceEnd::Failed
                }
                Ok(Ok(result)) => {
                    let audio = llmrtc_domain::audio::AudioChunk {
                        data: result.audio,
                        format: result.format,
                        sample_rate_hz: result.sample_rate_hz,
                    };
                    if self.forward(index, audio).await {
                        SentenceEnd::Ok(1)
                    } else {
                        SentenceEnd::Cancelled
                    }
                }
            }
        }
    }

    /// Forward one audio chunk, racing the cancel token so a barge-in is
    /// never stuck behind a full event channel.
    async fn forward(&self, index: usize, audio: llmrtc_domain::audio::AudioChunk) -> bool {
        let bytes = audio.data.len();
        let sent = tokio::select! {
            _ = self.ctx.cancel.cancelled() => return false,
            sent = self.events.send(TurnEvent::TtsChunk {
                sentence_index: index,
                audio,
            }) => sent.is_ok(),
        };
        if sent {
            self.hooks
                .emit(HookEvent::TtsChunk {
                    turn_id: self.ctx.turn_id.clone(),
                    bytes,
                })
                .await;
        }
        sent
    }

    async fn report(&self, error: Error) {
        let _ = self.events.send(TurnEvent::from_error(&error)).await;
        self.hooks
            .emit(HookEvent::TtsError {
                turn_id: self.ctx.turn_id.clone(),
                message: error.to_string(),
            })
            .await;
        self.hooks
            .emit(HookEvent::Error {
                context: llmrtc_observe::ErrorContext::new(
                    &error,
                    &self.ctx.session_id,
                    Some(self.ctx.turn_id.clone()),
                ),
                message: error.to_string(),
            })
            .await;
        let component = error.component().to_string();
        let kind = error.kind().to_string();
        self.metrics.increment(
            names::ERRORS,
            1,
            &[("component", component.as_str()), ("kind", kind.as_str())],
        );
    }
}
