//! Playbook turn execution.
//!
//! Entry point: [`PlaybookEngine::run_turn_stream`], mirroring the
//! orchestrator's contract. A two-phase stage runs a silent tool loop and
//! then streams the spoken reply; a single-phase stage narrates while it
//! calls tools. After the turn, transitions are evaluated and the target
//! stage's history strategy is applied — always between turns, never
//! concurrently with a running phase.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::Utc;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use llmrtc_domain::config::SamplingConfig;
use llmrtc_domain::error::{Component, Error, Result};
use llmrtc_domain::history::History;
use llmrtc_domain::message::{Attachment, Message, ToolCall, ToolCallResult};
use llmrtc_domain::stream::{LlmEvent, StopReason};
use llmrtc_observe::{names, HookEvent, TurnTimings};
use llmrtc_orchestrator::{
    Orchestrator, PhaseOutcome, SentenceChunker, SpeechStage, TurnContext, TurnEvent, TurnHandle,
};
use llmrtc_providers::{LlmRequest, ToolCallAssembler, ToolChoice};
use llmrtc_tools::{ToolContext, ToolExecutor};

use crate::builtin::{transition_tool_definition, TRANSITION_TOOL};
use crate::history::apply_strategy;
use crate::transitions::{evaluate, CustomPredicate, TurnRecord};
use crate::types::{Playbook, PlaybookState, Stage, TransitionCondition};
use crate::validate;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Contracts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Labels a user utterance with one of the candidate intents, for
/// `intent` transitions.
#[async_trait::async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, text: &str, candidates: &[String]) -> Result<Option<String>>;
}

/// One captured utterance plus the session state the playbook turn
/// operates on.
pub struct PlaybookTurnInput {
    pub session_id: String,
    pub audio: Bytes,
    pub attachments: Vec<Attachment>,
    pub history: Arc<Mutex<History>>,
    pub state: Arc<Mutex<PlaybookState>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PlaybookEngine {
    playbook: Arc<Playbook>,
    orchestrator: Arc<Orchestrator>,
    executor: Arc<ToolExecutor>,
    intent: Option<Arc<dyn IntentClassifier>>,
    custom: HashMap<String, CustomPredicate>,
}

enum LoopEnd {
    Done,
    Cancelled,
    Failed,
}

enum ReplyEnd {
    Done {
        text: String,
        tool_calls: Vec<ToolCall>,
    },
    Cancelled,
    Failed,
}

impl PlaybookEngine {
    /// Build the engine, validating the playbook graph against the tool
    /// registry. Construction is the only place validation happens.
    pub fn new(
        playbook: Playbook,
        orchestrator: Arc<Orchestrator>,
        executor: Arc<ToolExecutor>,
    ) -> Result<Self> {
        validate::validate(&playbook, executor.registry())?;
        Ok(Self {
            playbook: Arc::new(playbook),
            orchestrator,
            executor,
            intent: None,
            custom: HashMap::new(),
        })
    }

    pub fn with_intent_classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.intent = Some(classifier);
        self
    }

    pub fn register_custom_condition(
        mut self,
        name: impl Into<String>,
        predicate: CustomPredicate,
    ) -> Self {
        self.custom.insert(name.into(), predicate);
        self
    }

    pub fn playbook(&self) -> &Arc<Playbook> {
        &self.playbook
    }

    /// Fresh per-session state positioned at the initial stage.
    pub fn initial_state(&self) -> PlaybookState {
        PlaybookState::new(&self.playbook.initial_stage)
    }

    /// The initial history for a playbook session: the initial stage's
    /// layered prompt, bounded by `limit`.
    pub fn initial_history(&self, limit: usize) -> History {
        let stage = self
            .playbook
            .stage(&self.playbook.initial_stage)
            .expect("validated at construction");
        History::with_system_prompt(limit, self.playbook.layered_prompt(stage))
    }

    /// Run one playbook turn, streaming events as they happen.
    pub fn run_turn_stream(
        self: &Arc<Self>,
        input: PlaybookTurnInput,
    ) -> (TurnHandle, mpsc::Receiver<TurnEvent>) {
        let ctx = TurnContext::new(&input.session_id);
        let handle = ctx.handle();
        let (tx, rx) = mpsc::channel::<TurnEvent>(64);

        let this = self.clone();
        let span = tracing::info_span!(
            "playbook_turn",
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

    // ── Turn body ────────────────────────────────────────────────────

    async fn run_inner(
        self: Arc<Self>,
        input: PlaybookTurnInput,
        ctx: TurnContext,
        tx: mpsc::Sender<TurnEvent>,
    ) {
        let PlaybookTurnInput {
            audio,
            attachments,
            history,
            state,
            ..
        } = input;
        let orchestrator = &self.orchestrator;
        let hooks = orchestrator.hooks().clone();
        let mut timings = TurnTimings::default();

        if let Err(e) = hooks
            .check(HookEvent::TurnStart {
                session_id: ctx.session_id.clone(),
                turn_id: ctx.turn_id.clone(),
            })
            .await
        {
            orchestrator.report_error(&ctx, &tx, &e, None).await;
            orchestrator.finalize(&ctx, timings).await;
            return;
        }

        // Stage snapshot. State mutates only between turns, so reading it
        // once up front is sound.
        let (stage_id, turns_before, entered_at) = {
            let state = state.lock();
            (
                state.current_stage.clone(),
                state.turns_in_stage,
                state.entered_at,
            )
        };
        let Some(stage) = self.playbook.stage(&stage_id).cloned() else {
            let e = Error::Playbook(format!("state references unknown stage `{stage_id}`"));
            orchestrator.report_error(&ctx, &tx, &e, None).await;
            orchestrator.finalize(&ctx, timings).await;
            return;
        };

        // Keep the layered prompt at the head of history (covers the very
        // first turn, before any transition ran).
        self.ensure_prompt(&history, &stage);

        // ── STT phase (shared with the orchestrator) ────────────────
        let stt_started = Instant::now();
        let transcript = match orchestrator
            .stt_phase(&ctx, audio, attachments, &history, &tx)
            .await
        {
            PhaseOutcome::Cancelled => {
                orchestrator.finalize_cancelled(&ctx, &tx, timings).await;
                return;
            }
            PhaseOutcome::Failed => {
                orchestrator.finalize(&ctx, timings).await;
                return;
            }
            PhaseOutcome::Done(None) => {
                // Silence: not a stage turn.
                orchestrator.finalize(&ctx, timings).await;
                return;
            }
            PhaseOutcome::Done(Some(text)) => {
                timings.stt_ms = Some(stt_started.elapsed().as_millis() as u64);
                text
            }
        };

        // ── Stage tool set ──────────────────────────────────────────
        let registry = self.executor.registry();
        let mut tools = registry.definitions_for(&stage.tools);
        let decision_targets = self.decision_targets(&stage_id);
        if !decision_targets.is_empty() {
            tools.push(transition_tool_definition(&decision_targets));
        }
        let sampling = self.merged_sampling();

        let mut record = TurnRecord {
            turns_in_stage: turns_before + 1,
            time_in_stage: (Utc::now() - entered_at).to_std().unwrap_or_default(),
            ..Default::default()
        };

        // ── Phases ──────────────────────────────────────────────────
        let spoken = if stage.two_phase {
            self.two_phase_turn(&ctx, &history, &stage, tools, &sampling, &tx, &mut timings, &mut record)
                .await
        } else {
            self.single_phase_turn(&ctx, &history, &stage, tools, &sampling, &tx, &mut timings, &mut record)
                .await
        };

        let spoken_text = match spoken {
            ReplyEnd::Cancelled => {
                orchestrator.finalize_cancelled(&ctx, &tx, timings).await;
                return;
            }
            ReplyEnd::Failed => {
                orchestrator.finalize(&ctx, timings).await;
                return;
            }
            ReplyEnd::Done { text, .. } => text,
        };
        record.assistant_text = spoken_text;

        // ── Intent classification ───────────────────────────────────
        let intent_candidates = self.intent_candidates(&stage_id);
        if !intent_candidates.is_empty() {
            if let Some(classifier) = &self.intent {
                match classifier.classify(&transcript, &intent_candidates).await {
                    Ok(label) => record.intent = label,
                    Err(e) => {
                        tracing::warn!(error = %e, "intent classification failed");
                    }
                }
            }
        }

        // Turn boundary: enforce the history limit before any strategy.
        history.lock().truncate();

        // ── Transition evaluation ───────────────────────────────────
        self.evaluate_and_apply(&ctx, &history, &state, &stage_id, entered_at, &record, &tx)
            .await;

        let (stage_after, turns_after) = {
            let state = state.lock();
            (state.current_stage.clone(), state.turns_in_stage)
        };
        hooks
            .emit(HookEvent::PlaybookTurnEnd {
                session_id: ctx.session_id.clone(),
                stage: stage_after,
                turns_in_stage: turns_after,
            })
            .await;

        orchestrator.finalize(&ctx, timings).await;
    }

    // ── Two-phase execution ──────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    async fn two_phase_turn(
        &self,
        ctx: &TurnContext,
        history: &Arc<Mutex<History>>,
        stage: &Stage,
        tools: Vec<llmrtc_domain::message::ToolDefinition>,
        sampling: &SamplingConfig,
        tx: &mpsc::Sender<TurnEvent>,
        timings: &mut TurnTimings,
        record: &mut TurnRecord,
    ) -> ReplyEnd {
        // Phase 1: silent tool loop. No TTS, no token events.
        match self
            .tool_loop(ctx, history, &tools, &stage.tool_choice, sampling, tx, record)
            .await
        {
            LoopEnd::Cancelled => return ReplyEnd::Cancelled,
            LoopEnd::Failed => return ReplyEnd::Failed,
            LoopEnd::Done => {}
        }

        // Phase 2: spoken reply with tools disabled.
        let speech = self.spawn_speech(ctx, tx);
        let mut chunker = SentenceChunker::new(&self.orchestrator.config().sentence_terminators);
        let mut sentence_index = 0usize;

        let end = self
            .stream_reply(
                ctx,
                history,
                Vec::new(),
                ToolChoice::None,
                sampling,
                &speech,
                &mut chunker,
                &mut sentence_index,
                tx,
                timings,
            )
            .await;

        match end {
            ReplyEnd::Cancelled => {
                let _ = speech.finish().await;
                ReplyEnd::Cancelled
            }
            ReplyEnd::Failed => {
                speech.abort();
                let _ = speech.finish().await;
                ReplyEnd::Failed
            }
            ReplyEnd::Done { text, .. } => {
                if let Some(rest) = chunker.finish() {
                    if !speech.speak(sentence_index, rest).await {
                        let _ = speech.finish().await;
                        return ReplyEnd::Cancelled;
                    }
                }
                self.close_spoken_reply(ctx, history, &text, true, speech, tx, timings)
                    .await
            }
        }
    }

    // ── Single-phase execution ───────────────────────────────────────

    /// One narrated phase: assistant text streams to TTS continuously and
    /// tool results are folded into the same spoken turn.
    #[allow(clippy::too_many_arguments)]
    async fn single_phase_turn(
        &self,
        ctx: &TurnContext,
        history: &Arc<Mutex<History>>,
        stage: &Stage,
        tools: Vec<llmrtc_domain::message::ToolDefinition>,
        sampling: &SamplingConfig,
        tx: &mpsc::Sender<TurnEvent>,
        timings: &mut TurnTimings,
        record: &mut TurnRecord,
    ) -> ReplyEnd {
        let speech = self.spawn_speech(ctx, tx);
        let mut chunker = SentenceChunker::new(&self.orchestrator.config().sentence_terminators);
        let mut sentence_index = 0usize;
        let mut narration = String::new();
        let cap = self.orchestrator.config().tool_loop_cap;

        for loop_idx in 0..=cap {
            let end = self
                .stream_reply(
                    ctx,
                    history,
                    tools.clone(),
                    stage.tool_choice.clone(),
                    sampling,
                    &speech,
                    &mut chunker,
                    &mut sentence_index,
                    tx,
                    timings,
                )
                .await;

            let (text, tool_calls) = match end {
                ReplyEnd::Cancelled => {
                    let _ = speech.finish().await;
                    return ReplyEnd::Cancelled;
                }
                ReplyEnd::Failed => {
                    speech.abort();
                    let _ = speech.finish().await;
                    return ReplyEnd::Failed;
                }
                ReplyEnd::Done { text, tool_calls } => (text, tool_calls),
            };
            narration.push_str(&text);

            if tool_calls.is_empty() || loop_idx == cap {
                if !text.is_empty() {
                    history.lock().push(Message::assistant(text));
                }
                break;
            }

            history
                .lock()
                .push(Message::assistant_with_tool_calls(text, tool_calls.clone()));
            if self
                .dispatch_tools(ctx, &tool_calls, history, tx, record)
                .await
                .is_err()
            {
                let _ = speech.finish().await;
                return ReplyEnd::Cancelled;
            }
        }

        if let Some(rest) = chunker.finish() {
            if !speech.speak(sentence_index, rest).await {
                let _ = speech.finish().await;
                return ReplyEnd::Cancelled;
            }
        }
        // Narration was appended to history per iteration.
        self.close_spoken_reply(ctx, history, &narration, false, speech, tx, timings)
            .await
    }

    /// Drain the speech stage and close the turn's TTS envelope. Emits
    /// the `llm` completion event; `record_assistant` appends the spoken
    /// reply to history (two-phase turns — single-phase appends its
    /// narration per iteration).
    #[allow(clippy::too_many_arguments)]
    async fn close_spoken_reply(
        &self,
        ctx: &TurnContext,
        history: &Arc<Mutex<History>>,
        text: &str,
        record_assistant: bool,
        speech: SpeechStage,
        tx: &mpsc::Sender<TurnEvent>,
        timings: &mut TurnTimings,
    ) -> ReplyEnd {
        let _ = tx
            .send(TurnEvent::LlmComplete {
                text: text.to_string(),
            })
            .await;
        self.orchestrator
            .hooks()
            .emit(HookEvent::LlmEnd {
                turn_id: ctx.turn_id.clone(),
                text: text.to_string(),
            })
            .await;

        if record_assistant && !text.is_empty() {
            history.lock().push(Message::assistant(text));
        }

        let outcome = speech.finish().await;
        timings.tts_ms = Some(outcome.duration_ms);
        if outcome.cancelled || ctx.cancel.is_cancelled() {
            return ReplyEnd::Cancelled;
        }

        if !outcome.started {
            let _ = tx.send(TurnEvent::TtsStart).await;
        }
        let _ = tx.send(TurnEvent::TtsComplete).await;
        self.orchestrator
            .hooks()
            .emit(HookEvent::TtsEnd {
                turn_id: ctx.turn_id.clone(),
            })
            .await;
        self.orchestrator
            .metrics()
            .timing(names::TTS_DURATION_MS, outcome.duration_ms, &[]);

        ReplyEnd::Done {
            text: text.to_string(),
            tool_calls: Vec::new(),
        }
    }

    // ── Phase 1: silent tool loop ────────────────────────────────────

    async fn tool_loop(
        &self,
        ctx: &TurnContext,
        history: &Arc<Mutex<History>>,
        tools: &[llmrtc_domain::message::ToolDefinition],
        tool_choice: &ToolChoice,
        sampling: &SamplingConfig,
        tx: &mpsc::Sender<TurnEvent>,
        record: &mut TurnRecord,
    ) -> LoopEnd {
        let config = self.orchestrator.config();
        let cap = config.tool_loop_cap;
        let timeout = Duration::from_millis(config.llm_timeout_ms);

        for loop_idx in 0..cap {
            if ctx.cancel.is_cancelled() {
                return LoopEnd::Cancelled;
            }
            tracing::debug!(loop_idx, "tool loop iteration");

            let request = LlmRequest {
                messages: history.lock().snapshot(),
                tools: tools.to_vec(),
                tool_choice: tool_choice.clone(),
                temperature: sampling.temperature,
                top_p: sampling.top_p,
                max_tokens: sampling.max_tokens,
            };

            let result = match tokio::time::timeout(
                timeout,
                self.orchestrator.llm().complete(request),
            )
            .await
            {
                Err(_) => Err(Error::Timeout {
                    component: Component::Llm,
                    timeout_ms: config.llm_timeout_ms,
                }),
                Ok(result) => result,
            };
            let result = match result {
                Ok(result) => result,
                Err(e) => {
                    let hook = HookEvent::LlmError {
                        turn_id: ctx.turn_id.clone(),
                        message: e.to_string(),
                    };
                    self.orchestrator.report_error(ctx, tx, &e, Some(hook)).await;
                    return LoopEnd::Failed;
                }
            };

            if result.stop_reason != StopReason::ToolUse || result.tool_calls.is_empty() {
                // Phase 1 is silent: any text here is working material the
                // spoken phase will re-derive from history.
                return LoopEnd::Done;
            }

            history.lock().push(Message::assistant_with_tool_calls(
                result.full_text,
                result.tool_calls.clone(),
            ));

            if self
                .dispatch_tools(ctx, &result.tool_calls, history, tx, record)
                .await
                .is_err()
            {
                return LoopEnd::Cancelled;
            }

            if loop_idx == cap - 1 {
                tracing::debug!(cap, "tool loop cap reached; proceeding to spoken reply");
            }
        }

        LoopEnd::Done
    }

    // ── Tool dispatch ────────────────────────────────────────────────

    /// Dispatch a batch of tool calls, intercepting the built-in
    /// transition tool. Emits start/end events, appends tool messages,
    /// and accumulates results on the turn record. `Err(())` signals the
    /// turn was cancelled mid-dispatch.
    async fn dispatch_tools(
        &self,
        ctx: &TurnContext,
        calls: &[ToolCall],
        history: &Arc<Mutex<History>>,
        tx: &mpsc::Sender<TurnEvent>,
        record: &mut TurnRecord,
    ) -> std::result::Result<(), ()> {
        let hooks = self.orchestrator.hooks();
        let metrics = self.orchestrator.metrics();

        let mut results: Vec<Option<ToolCallResult>> = vec![None; calls.len()];
        let mut to_execute: Vec<ToolCall> = Vec::new();
        let mut execute_slots: Vec<usize> = Vec::new();

        for (i, call) in calls.iter().enumerate() {
            let _ = tx
                .send(TurnEvent::ToolCallStart { call: call.clone() })
                .await;
            hooks
                .emit(HookEvent::ToolStart {
                    turn_id: ctx.turn_id.clone(),
                    call_id: call.call_id.clone(),
                    tool_name: call.tool_name.clone(),
                })
                .await;

            if call.tool_name == TRANSITION_TOOL {
                // Intercepted: recorded as an explicit stage choice, never
                // dispatched to the registry.
                if record.explicit_target.is_none() {
                    record.explicit_target = call
                        .arguments
                        .get("target_stage")
                        .and_then(|v| v.as_str())
                        .map(String::from);
                }
                results[i] = Some(ToolCallResult::ok(
                    call,
                    serde_json::json!({ "acknowledged": true }),
                    0,
                ));
            } else {
                to_execute.push(call.clone());
                execute_slots.push(i);
            }
        }

        let tool_ctx = ToolContext {
            session_id: ctx.session_id.clone(),
            turn_id: ctx.turn_id.clone(),
            cancel: ctx.cancel.clone(),
        };
        let executed = self.executor.execute(&to_execute, &tool_ctx).await;
        for (slot, result) in execute_slots.into_iter().zip(executed) {
            results[slot] = Some(result);
        }

        for result in results.into_iter().flatten() {
            let _ = tx
                .send(TurnEvent::ToolCallEnd {
                    result: result.clone(),
                })
                .await;
            hooks
                .emit(HookEvent::ToolEnd {
                    turn_id: ctx.turn_id.clone(),
                    result: result.clone(),
                })
                .await;
            metrics.timing(
                names::TOOL_DURATION_MS,
                result.duration_ms,
                &[("tool", result.tool_name.as_str())],
            );
            history.lock().push(Message::tool_result(&result));
            record.executed_tools.push(result);
        }

        if ctx.cancel.is_cancelled() {
            Err(())
        } else {
            Ok(())
        }
    }

    // ── Streaming reply (phase 2 / single-phase iterations) ──────────

    #[allow(clippy::too_many_arguments)]
    async fn stream_reply(
        &self,
        ctx: &TurnContext,
        history: &Arc<Mutex<History>>,
        tools: Vec<llmrtc_domain::message::ToolDefinition>,
        tool_choice: ToolChoice,
        sampling: &SamplingConfig,
        speech: &SpeechStage,
        chunker: &mut SentenceChunker,
        sentence_index: &mut usize,
        tx: &mpsc::Sender<TurnEvent>,
        timings: &mut TurnTimings,
    ) -> ReplyEnd {
        enum End {
            Done(Vec<ToolCall>),
            Cancelled,
            Err(Error),
        }

        let config = self.orchestrator.config();
        let hooks = self.orchestrator.hooks();
        self.orchestrator
            .hooks()
            .emit(HookEvent::LlmStart {
                turn_id: ctx.turn_id.clone(),
            })
            .await;
        let started = Instant::now();
        let timeout = Duration::from_millis(config.llm_timeout_ms);

        let request = LlmRequest {
            messages: history.lock().snapshot(),
            tools,
            tool_choice,
            temperature: sampling.temperature,
            top_p: sampling.top_p,
            max_tokens: sampling.max_tokens,
        };

        let mut full_text = String::new();
        let mut assembler = ToolCallAssembler::new();
        let mut ttft_ms: Option<u64> = None;

        let end = match tokio::time::timeout(timeout, async {
            let mut stream = match self.orchestrator.llm().stream(request).await {
                Ok(stream) => stream,
                Err(e) => return End::Err(e),
            };

            loop {
                let item = tokio::select! {
                    _ = ctx.cancel.cancelled() => return End::Cancelled,
                    item = stream.next() => item,
                };
                let event = match item {
                    None => return End::Done(Vec::new()),
                    Some(Err(e)) => return End::Err(e),
                    Some(Ok(event)) => event,
                };
                match event {
                    LlmEvent::Token { text } => {
                        ttft_ms.get_or_insert_with(|| started.elapsed().as_millis() as u64);
                        let _ = tx.send(TurnEvent::LlmChunk { text: text.clone() }).await;
                        hooks
                            .emit(HookEvent::LlmChunk {
                                turn_id: ctx.turn_id.clone(),
                                text: text.clone(),
                            })
                            .await;
                        full_text.push_str(&text);
                        for sentence in chunker.push(&text) {
                            if !speech.speak(*sentence_index, sentence).await {
                                return End::Cancelled;
                            }
                            *sentence_index += 1;
                        }
                    }
                    LlmEvent::Done { tool_calls, .. } => {
                        return End::Done(tool_calls);
                    }
                    LlmEvent::Error { message } => {
                        return End::Err(Error::provider(Component::Llm, message));
                    }
                    other => assembler.apply(&other),
                }
            }
        })
        .await
        {
            Err(_) => End::Err(Error::Timeout {
                component: Component::Llm,
                timeout_ms: config.llm_timeout_ms,
            }),
            Ok(end) => end,
        };

        match end {
            End::Cancelled => ReplyEnd::Cancelled,
            End::Err(e) => {
                let hook = HookEvent::LlmError {
                    turn_id: ctx.turn_id.clone(),
                    message: e.to_string(),
                };
                self.orchestrator.report_error(ctx, tx, &e, Some(hook)).await;
                ReplyEnd::Failed
            }
            End::Done(done_calls) => {
                let elapsed = started.elapsed().as_millis() as u64;
                timings.llm_ms = Some(timings.llm_ms.unwrap_or(0) + elapsed);
                if timings.llm_ttft_ms.is_none() {
                    timings.llm_ttft_ms = ttft_ms;
                    if let Some(ttft) = ttft_ms {
                        self.orchestrator.metrics().timing(names::LLM_TTFT_MS, ttft, &[]);
                    }
                }
                self.orchestrator
                    .metrics()
                    .timing(names::LLM_DURATION_MS, elapsed, &[]);

                // Providers that emit the aggregated set on Done win; the
                // assembler covers providers that only stream fragments.
                let tool_calls = if done_calls.is_empty() {
                    assembler.into_calls()
                } else {
                    done_calls
                };
                ReplyEnd::Done {
                    text: full_text,
                    tool_calls,
                }
            }
        }
    }

    // ── Transition application ───────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    async fn evaluate_and_apply(
        &self,
        ctx: &TurnContext,
        history: &Arc<Mutex<History>>,
        state: &Arc<Mutex<PlaybookState>>,
        stage_id: &str,
        entered_at: chrono::DateTime<Utc>,
        record: &TurnRecord,
        tx: &mpsc::Sender<TurnEvent>,
    ) {
        let hooks = self.orchestrator.hooks();
        let metrics = self.orchestrator.metrics();

        let Some((transition, reason)) = evaluate(&self.playbook, stage_id, record, &self.custom)
        else {
            state.lock().turns_in_stage += 1;
            return;
        };
        let to = transition.to.clone();

        hooks
            .emit(HookEvent::StageExit {
                session_id: ctx.session_id.clone(),
                stage: stage_id.to_string(),
            })
            .await;
        let stage_ms = (Utc::now() - entered_at).num_milliseconds().max(0) as u64;
        metrics.timing(names::STAGE_DURATION_MS, stage_ms, &[("stage", stage_id)]);

        // Apply the target stage's history strategy. The history is
        // cloned out so no lock is held across the summarizer's await.
        let target = self
            .playbook
            .stage(&to)
            .expect("validated at construction");
        let new_prompt = self.playbook.layered_prompt(target);
        let mut working = history.lock().clone();
        match apply_strategy(
            &mut working,
            target.history_strategy,
            &new_prompt,
            self.orchestrator.llm(),
        )
        .await
        {
            Ok(()) => *history.lock() = working,
            Err(e) => {
                tracing::warn!(error = %e, "history strategy failed; carrying history unchanged");
            }
        }

        {
            let mut state = state.lock();
            state.current_stage = to.clone();
            state.turns_in_stage = 0;
            state.entered_at = Utc::now();
        }

        let _ = tx
            .send(TurnEvent::StageChange {
                from: stage_id.to_string(),
                to: to.clone(),
                reason: reason.clone(),
            })
            .await;
        hooks
            .emit(HookEvent::Transition {
                session_id: ctx.session_id.clone(),
                from: stage_id.to_string(),
                to: to.clone(),
                reason,
            })
            .await;
        hooks
            .emit(HookEvent::StageEnter {
                session_id: ctx.session_id.clone(),
                stage: to.clone(),
            })
            .await;
        metrics.increment(
            names::TRANSITIONS,
            1,
            &[("from", stage_id), ("to", to.as_str())],
        );

        // A stage with no way out completes the playbook.
        if self.playbook.transitions_from(&to).is_empty() {
            hooks
                .emit(HookEvent::PlaybookComplete {
                    session_id: ctx.session_id.clone(),
                })
                .await;
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn spawn_speech(&self, ctx: &TurnContext, tx: &mpsc::Sender<TurnEvent>) -> SpeechStage {
        SpeechStage::spawn(
            self.orchestrator.tts().clone(),
            self.orchestrator.config().clone(),
            ctx.clone(),
            tx.clone(),
            self.orchestrator.hooks().clone(),
            self.orchestrator.metrics().clone(),
        )
    }

    fn ensure_prompt(&self, history: &Arc<Mutex<History>>, stage: &Stage) {
        let prompt = self.playbook.layered_prompt(stage);
        let mut history = history.lock();
        let current = history.system_prompt().map(|m| m.content.clone());
        if current.as_deref() == Some(prompt.as_str()) {
            return;
        }
        let mut messages = history.snapshot();
        if current.is_some() {
            messages[0] = Message::system(prompt);
        } else {
            messages.insert(0, Message::system(prompt));
        }
        history.replace(messages);
    }

    fn merged_sampling(&self) -> SamplingConfig {
        let base = &self.orchestrator.config().sampling;
        let own = &self.playbook.llm_defaults;
        SamplingConfig {
            temperature: own.temperature.or(base.temperature),
            top_p: own.top_p.or(base.top_p),
            max_tokens: own.max_tokens.or(base.max_tokens),
        }
    }

    /// Targets reachable from `stage_id` via llm-decision transitions.
    fn decision_targets(&self, stage_id: &str) -> Vec<String> {
        let mut targets: Vec<String> = Vec::new();
        for transition in self.playbook.transitions_from(stage_id) {
            if matches!(transition.condition, TransitionCondition::LlmDecision)
                && !targets.contains(&transition.to)
            {
                targets.push(transition.to.clone());
            }
        }
        targets
    }

    fn intent_candidates(&self, stage_id: &str) -> Vec<String> {
        let mut candidates: Vec<String> = Vec::new();
        for transition in self.playbook.transitions_from(stage_id) {
            if let TransitionCondition::Intent { intent } = &transition.condition {
                if !candidates.contains(intent) {
                    candidates.push(intent.clone());
                }
            }
        }
        candidates
    }
}
