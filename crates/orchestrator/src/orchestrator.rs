//! The turn orchestrator: STT → LLM → sentence chunker → TTS.
//!
//! Entry point: [`Orchestrator::run_turn_stream`] spawns the pipeline and
//! returns a [`TurnHandle`] plus a channel of [`TurnEvent`]s in strict
//! causal order. [`Orchestrator::run_turn`] drains the channel into an
//! aggregate [`TurnResult`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use llmrtc_domain::config::TurnConfig;
use llmrtc_domain::error::{Component, Error};
use llmrtc_domain::history::History;
use llmrtc_domain::message::{Attachment, Message};
use llmrtc_domain::stream::LlmEvent;
use llmrtc_observe::{names, ErrorContext, HookDispatcher, HookEvent, MetricsSink, NoopMetrics, TurnTimings};
use llmrtc_providers::{
    LlmProvider, LlmRequest, SttConfig, SttProvider, TtsProvider, VisionProvider, VisionRequest,
};

use crate::chunker::SentenceChunker;
use crate::event::{TurnEvent, TurnResult};
use crate::speech::SpeechStage;
use crate::turn::{PhaseOutcome, TurnContext, TurnHandle};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Input
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One captured utterance plus the session state the turn operates on.
pub struct TurnInput {
    pub session_id: String,
    /// Mono 16-bit LE PCM at 16 kHz, as delivered by the VAD gate.
    pub audio: Bytes,
    /// Vision attachments queued by the client for this utterance.
    pub attachments: Vec<Attachment>,
    /// The session's history. Mutated only between pipeline phases.
    pub history: Arc<Mutex<History>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Orchestrator {
    llm: Arc<dyn LlmProvider>,
    stt: Arc<dyn SttProvider>,
    tts: Arc<dyn TtsProvider>,
    vision: Option<Arc<dyn VisionProvider>>,
    hooks: HookDispatcher,
    metrics: Arc<dyn MetricsSink>,
    config: TurnConfig,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        stt: Arc<dyn SttProvider>,
        tts: Arc<dyn TtsProvider>,
        config: TurnConfig,
    ) -> Self {
        Self {
            llm,
            stt,
            tts,
            vision: None,
            hooks: HookDispatcher::new(),
            metrics: Arc::new(NoopMetrics),
            config,
        }
    }

    pub fn with_vision(mut self, vision: Arc<dyn VisionProvider>) -> Self {
        self.vision = Some(vision);
        self
    }

    pub fn with_hooks(mut self, hooks: HookDispatcher) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &TurnConfig {
        &self.config
    }

    pub fn llm(&self) -> &Arc<dyn LlmProvider> {
        &self.llm
    }

    pub fn tts(&self) -> &Arc<dyn TtsProvider> {
        &self.tts
    }

    pub fn hooks(&self) -> &HookDispatcher {
        &self.hooks
    }

    pub fn metrics(&self) -> &Arc<dyn MetricsSink> {
        &self.metrics
    }

    /// Run a turn, streaming events as they happen.
    ///
    /// The receiver yields the event sequence documented on [`TurnEvent`];
    /// the handle lets the barge-in arbiter cancel the turn mid-flight.
    pub fn run_turn_stream(
        self: &Arc<Self>,
        input: TurnInput,
    ) -> (TurnHandle, mpsc::Receiver<TurnEvent>) {
        let ctx = TurnContext::new(&input.session_id);
        let handle = ctx.handle();
        let (tx, rx) = mpsc::channel::<TurnEvent>(64);

        let this = self.clone();
        let span = tracing::info_span!(
            "turn",
            turn_id = %ctx.turn_id,
            session_id = %ctx.session_id,
        );
        tokio::spawn(tracing::Instrument::instrument(
            async move {
                this.run_inner(input, ctx, tx).await;
            },
            span,
        ));

        (handle, rx)
    }

    /// Run a turn to completion, collecting the aggregate result.
    pub async fn run_turn(self: &Arc<Self>, input: TurnInput) -> TurnResult {
        let (_handle, mut rx) = self.run_turn_stream(input);
        let mut result = TurnResult::default();
        while let Some(event) = rx.recv().await {
            match event {
                TurnEvent::Transcript { text, is_final: true } => result.transcript = text,
                TurnEvent::LlmComplete { text } => result.llm_text = text,
                TurnEvent::TtsChunk { .. } => result.tts_chunks += 1,
                TurnEvent::TtsCancelled | TurnEvent::Cancelled => result.cancelled = true,
                TurnEvent::Error { code, message, .. } => {
                    if result.error.is_none() {
                        result.error = Some((code, message));
                    }
                }
                _ => {}
            }
        }
        result
    }

    // ── Pipeline ─────────────────────────────────────────────────────

    async fn run_inner(
        self: Arc<Self>,
        input: TurnInput,
        ctx: TurnContext,
        tx: mpsc::Sender<TurnEvent>,
    ) {
        tracing::debug!("turn started");
        let mut timings = TurnTimings::default();

        // Guardrail checkpoint: a veto hook may refuse the turn.
        if let Err(e) = self
            .hooks
            .check(HookEvent::TurnStart {
                session_id: ctx.session_id.clone(),
                turn_id: ctx.turn_id.clone(),
            })
            .await
        {
            self.report_error(&ctx, &tx, &e, None).await;
            self.finalize(&ctx, timings).await;
            return;
        }

        // ── STT phase ────────────────────────────────────────────────
        let stt_started = Instant::now();
        let transcript = match self
            .stt_phase(&ctx, input.audio, input.attachments, &input.history, &tx)
            .await
        {
            PhaseOutcome::Cancelled => {
                self.finalize_cancelled(&ctx, &tx, timings).await;
                return;
            }
            PhaseOutcome::Failed => {
                self.finalize(&ctx, timings).await;
                return;
            }
            PhaseOutcome::Done(transcript) => {
                timings.stt_ms = Some(stt_started.elapsed().as_millis() as u64);
                transcript
            }
        };

        // Admission: silence or noise-only transcripts end the turn
        // successfully with no LLM or TTS work.
        let Some(_transcript) = transcript else {
            tracing::debug!("empty transcript; skipping llm/tts");
            self.finalize(&ctx, timings).await;
            return;
        };

        // ── LLM + TTS pipeline ───────────────────────────────────────
        let speech = SpeechStage::spawn(
            self.tts.clone(),
            self.config.clone(),
            ctx.clone(),
            tx.clone(),
            self.hooks.clone(),
            self.metrics.clone(),
        );

        match self
            .llm_phase(&ctx, &input.history, &speech, &tx, &mut timings)
            .await
        {
            PhaseOutcome::Cancelled => {
                let _ = speech.finish().await;
                self.finalize_cancelled(&ctx, &tx, timings).await;
            }
            PhaseOutcome::Failed => {
                // Queued sentences must not be spoken after an LLM failure.
                speech.abort();
                let _ = speech.finish().await;
                self.finalize(&ctx, timings).await;
            }
            PhaseOutcome::Done(()) => {
                let outcome = speech.finish().await;
                timings.tts_ms = Some(outcome.duration_ms);

                if outcome.cancelled || ctx.cancel.is_cancelled() {
                    self.finalize_cancelled(&ctx, &tx, timings).await;
                    return;
                }

                // An empty assistant reply still closes the TTS envelope.
                if !outcome.started {
                    let _ = tx.send(TurnEvent::TtsStart).await;
                }
                let _ = tx.send(TurnEvent::TtsComplete).await;
                self.hooks
                    .emit(HookEvent::TtsEnd {
                        turn_id: ctx.turn_id.clone(),
                    })
                    .await;
                self.metrics
                    .timing(names::TTS_DURATION_MS, outcome.duration_ms, &[]);

                // Turn boundary: enforce the history limit.
                input.history.lock().truncate();

                self.finalize(&ctx, timings).await;
            }
        }
    }

    /// STT phase: stream partials, return the final transcript, append the
    /// user message (with attachments and vision fallback) to history.
    ///
    /// Returns `Done(None)` when the final transcript is empty.
    pub async fn stt_phase(
        &self,
        ctx: &TurnContext,
        audio: Bytes,
        attachments: Vec<Attachment>,
        history: &Arc<Mutex<History>>,
        tx: &mpsc::Sender<TurnEvent>,
    ) -> PhaseOutcome<Option<String>> {
        enum SttEnd {
            Final(String),
            Cancelled,
            Err(Error),
        }

        self.hooks
            .emit(HookEvent::SttStart {
                turn_id: ctx.turn_id.clone(),
            })
            .await;
        let started = Instant::now();
        let timeout = Duration::from_millis(self.config.stt_timeout_ms);

        let end = match tokio::time::timeout(timeout, async {
            let mut stream = match self
                .stt
                .transcribe_stream(audio, SttConfig::default())
                .await
            {
                Ok(stream) => stream,
                Err(e) => return SttEnd::Err(e),
            };

            let mut last_text = String::new();
            loop {
                let item = tokio::select! {
                    _ = ctx.cancel.cancelled() => return SttEnd::Cancelled,
                    item = stream.next() => item,
                };
                match item {
                    // Provider closed without an explicit final; treat the
                    // last partial as final.
                    None => return SttEnd::Final(last_text),
                    Some(Err(e)) => return SttEnd::Err(e),
                    Some(Ok(result)) => {
                        let _ = tx
                            .send(TurnEvent::Transcript {
                                text: result.text.clone(),
                                is_final: result.is_final,
                            })
                            .await;
                        if result.is_final {
                            return SttEnd::Final(result.text);
                        }
                        last_text = result.text;
                    }
                }
            }
        })
        .await
        {
            Err(_) => SttEnd::Err(Error::Timeout {
                component: Component::Stt,
                timeout_ms: self.config.stt_timeout_ms,
            }),
            Ok(end) => end,
        };

        match end {
            SttEnd::Cancelled => PhaseOutcome::Cancelled,
            SttEnd::Err(e) => {
                let hook = HookEvent::SttError {
                    turn_id: ctx.turn_id.clone(),
                    message: e.to_string(),
                };
                self.report_error(ctx, tx, &e, Some(hook)).await;
                PhaseOutcome::Failed
            }
            SttEnd::Final(text) => {
                self.metrics.timing(
                    names::STT_DURATION_MS,
                    started.elapsed().as_millis() as u64,
                    &[],
                );
                self.hooks
                    .emit(HookEvent::SttEnd {
                        turn_id: ctx.turn_id.clone(),
                        text: text.clone(),
                    })
                    .await;

                if text.trim().is_empty() {
                    return PhaseOutcome::Done(None);
                }

                let content = self.apply_vision_fallback(&text, &attachments).await;
                history
                    .lock()
                    .push(Message::user_with_attachments(content, attachments));
                PhaseOutcome::Done(Some(text))
            }
        }
    }

    /// When attachments are present and the LLM lacks native vision, fold
    /// a vision provider's description into the user message so the model
    /// still sees the image content. Vision failures degrade silently.
    async fn apply_vision_fallback(&self, transcript: &str, attachments: &[Attachment]) -> String {
        if attachments.is_empty() || self.llm.capabilities().vision {
            return transcript.to_string();
        }
        let Some(vision) = &self.vision else {
            return transcript.to_string();
        };
        match vision
            .describe(VisionRequest {
                prompt: transcript.to_string(),
                attachments: attachments.to_vec(),
            })
            .await
        {
            Ok(result) => format!("{transcript}\n[attached image: {}]", result.description),
            Err(e) => {
                tracing::warn!(error = %e, "vision fallback failed; continuing without");
                transcript.to_string()
            }
        }
    }

    /// LLM phase: stream tokens, chunk into sentences, feed the speech
    /// stage, append the assistant message to history on success.
    async fn llm_phase(
        &self,
        ctx: &TurnContext,
        history: &Arc<Mutex<History>>,
        speech: &SpeechStage,
        tx: &mpsc::Sender<TurnEvent>,
        timings: &mut TurnTimings,
    ) -> PhaseOutcome<()> {
        enum LlmEnd {
            Done,
            Cancelled,
            Err(Error),
        }

        self.hooks
            .emit(HookEvent::LlmStart {
                turn_id: ctx.turn_id.clone(),
            })
            .await;
        let started = Instant::now();
        let timeout = Duration::from_millis(self.config.llm_timeout_ms);

        let request = LlmRequest {
            messages: history.lock().snapshot(),
            temperature: self.config.sampling.temperature,
            top_p: self.config.sampling.top_p,
            max_tokens: self.config.sampling.max_tokens,
            ..Default::default()
        };

        let mut chunker = SentenceChunker::new(&self.config.sentence_terminators);
        let mut full_text = String::new();
        let mut sentence_index = 0usize;
        let mut ttft_ms: Option<u64> = None;

        let end = match tokio::time::timeout(timeout, async {
            let mut stream = match self.llm.stream(request).await {
                Ok(stream) => stream,
                Err(e) => return LlmEnd::Err(e),
            };

            loop {
                let item = tokio::select! {
                    _ = ctx.cancel.cancelled() => return LlmEnd::Cancelled,
                    item = stream.next() => item,
                };
                let event = match item {
                    None => return LlmEnd::Done,
                    Some(Err(e)) => return LlmEnd::Err(e),
                    Some(Ok(event)) => event,
                };
                match event {
                    LlmEvent::Token { text } => {
                        ttft_ms.get_or_insert_with(|| started.elapsed().as_millis() as u64);
                        let _ = tx.send(TurnEvent::LlmChunk { text: text.clone() }).await;
                        self.hooks
                            .emit(HookEvent::LlmChunk {
                                turn_id: ctx.turn_id.clone(),
                                text: text.clone(),
                            })
                            .await;
                        full_text.push_str(&text);
                        for sentence in chunker.push(&text) {
                            if !speech.speak(sentence_index, sentence).await {
                                return LlmEnd::Cancelled;
                            }
                            sentence_index += 1;
                        }
                    }
                    LlmEvent::Done { tool_calls, .. } => {
                        if !tool_calls.is_empty() {
                            // Single-prompt turns carry no tools; a model
                            // hallucinating calls is logged and ignored.
                            tracing::debug!(
                                count = tool_calls.len(),
                                "ignoring tool calls in single-prompt turn"
                            );
                        }
                        return LlmEnd::Done;
                    }
                    LlmEvent::Error { message } => {
                        return LlmEnd::Err(Error::provider(Component::Llm, message));
                    }
                    // Tool-call assembly events are meaningless here.
                    _ => {}
                }
            }
        })
        .await
        {
            Err(_) => LlmEnd::Err(Error::Timeout {
                component: Component::Llm,
                timeout_ms: self.config.llm_timeout_ms,
            }),
            Ok(end) => end,
        };

        match end {
            LlmEnd::Cancelled => PhaseOutcome::Cancelled,
            LlmEnd::Err(e) => {
                // Partial assistant text is logged only; failed turns leave
                // no assistant message in history.
                if !full_text.is_empty() {
                    tracing::debug!(partial = %full_text, "discarding partial assistant text");
                }
                let hook = HookEvent::LlmError {
                    turn_id: ctx.turn_id.clone(),
                    message: e.to_string(),
                };
                self.report_error(ctx, tx, &e, Some(hook)).await;
                PhaseOutcome::Failed
            }
            LlmEnd::Done => {
                if let Some(rest) = chunker.finish() {
                    if !speech.speak(sentence_index, rest).await {
                        return PhaseOutcome::Cancelled;
                    }
                }

                timings.llm_ttft_ms = ttft_ms;
                timings.llm_ms = Some(started.elapsed().as_millis() as u64);
                self.metrics.timing(
                    names::LLM_DURATION_MS,
                    started.elapsed().as_millis() as u64,
                    &[],
                );
                if let Some(ttft) = ttft_ms {
                    self.metrics.timing(names::LLM_TTFT_MS, ttft, &[]);
                }

                let _ = tx
                    .send(TurnEvent::LlmComplete {
                        text: full_text.clone(),
                    })
                    .await;
                self.hooks
                    .emit(HookEvent::LlmEnd {
                        turn_id: ctx.turn_id.clone(),
                        text: full_text.clone(),
                    })
                    .await;

                if !full_text.is_empty() {
                    history.lock().push(Message::assistant(full_text));
                }
                PhaseOutcome::Done(())
            }
        }
    }

    // ── Finalization ─────────────────────────────────────────────────

    /// Emit the single terminal cancellation event: `tts-cancelled` when
    /// the turn had entered TTS, a plain cancel otherwise. Called only
    /// after the speech stage has been joined, so no audio chunk can
    /// follow. Also used by the playbook engine.
    pub async fn finalize_cancelled(
        &self,
        ctx: &TurnContext,
        tx: &mpsc::Sender<TurnEvent>,
        mut timings: TurnTimings,
    ) {
        if ctx.entered_tts() {
            let _ = tx.send(TurnEvent::TtsCancelled).await;
        } else {
            let _ = tx.send(TurnEvent::Cancelled).await;
        }
        self.metrics.increment(names::TURN_CANCELLED, 1, &[]);
        timings.total_ms = ctx.elapsed_ms();
        self.hooks
            .emit(HookEvent::TurnEnd {
                session_id: ctx.session_id.clone(),
                turn_id: ctx.turn_id.clone(),
                timings,
            })
            .await;
        tracing::debug!("turn cancelled");
    }

    /// Close the turn: total-duration metric and the `TurnEnd` hook. Also
    /// used by the playbook engine.
    pub async fn finalize(&self, ctx: &TurnContext, mut timings: TurnTimings) {
        timings.total_ms = ctx.elapsed_ms();
        self.metrics
            .timing(names::TURN_DURATION_MS, timings.total_ms, &[]);
        self.hooks
            .emit(HookEvent::TurnEnd {
                session_id: ctx.session_id.clone(),
                turn_id: ctx.turn_id.clone(),
                timings,
            })
            .await;
        tracing::debug!(total_ms = timings.total_ms, "turn ended");
    }

    /// Report a phase error: turn event, optional phase hook, centralized
    /// error hook, error metric tagged by component and kind.
    pub async fn report_error(
        &self,
        ctx: &TurnContext,
        tx: &mpsc::Sender<TurnEvent>,
        error: &Error,
        phase_hook: Option<HookEvent>,
    ) {
        let _ = tx.send(TurnEvent::from_error(error)).await;
        if let Some(hook) = phase_hook {
            self.hooks.emit(hook).await;
        }
        self.hooks
            .emit(HookEvent::Error {
                context: ErrorContext::new(error, &ctx.session_id, Some(ctx.turn_id.clone())),
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
