//! WebSocket endpoint for browser sessions.
//!
//! Flow:
//! 1. Client connects to `/v1/rtc/ws`; a session is opened and `ready`
//!    is sent with the protocol version.
//! 2. A `reconnect` envelope may re-attach a prior session within its
//!    grace window (the fresh session is discarded).
//! 3. Binary frames are PCM audio into the VAD gate; `speech-end` runs a
//!    turn, `speech-start` during a turn triggers the barge-in arbiter.
//! 4. Outbound turn events are framed as JSON envelopes; TTS audio rides
//!    the binary side-channel.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use llmrtc_domain::error::Error;
use llmrtc_domain::history::History;
use llmrtc_domain::message::Attachment;
use llmrtc_observe::{names, ErrorContext, HookEvent};
use llmrtc_orchestrator::{TurnEvent, TurnInput};
use llmrtc_playbook::PlaybookTurnInput;
use llmrtc_protocol::{
    decode_client, encode_server, tool_call_start, ClientMessage, Decoded, ServerMessage,
    PROTOCOL_VERSION,
};
use llmrtc_sessions::{Session, SessionState};
use llmrtc_vad::{VadEvent, VadGate};

use crate::arbiter;
use crate::state::AppState;

use base64::Engine as _;
use parking_lot::Mutex;
use std::sync::Arc;

/// GET /v1/rtc/ws — upgrade to WebSocket.
pub async fn rtc_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connection state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outbound traffic: JSON envelopes and side-channel audio.
enum Outbound {
    Frame(ServerMessage),
    Audio(Bytes),
}

struct ConnState {
    session: Arc<Mutex<Session>>,
    session_id: String,
    generation: u64,
    gate: VadGate,
    /// Attachments queued for the next utterance.
    pending_attachments: Vec<Attachment>,
    /// Buffer for externally-coordinated capture (`audio-start` path).
    external_buffer: BytesMut,
    external_capture: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Socket handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(256);

    // Writer task: forwards the outbound channel to the WS sink.
    let writer = tokio::spawn(async move {
        while let Some(out) = out_rx.recv().await {
            let msg = match out {
                Outbound::Frame(frame) => match encode_server(&frame) {
                    Ok(json) => Message::Text(json),
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to encode outbound frame");
                        continue;
                    }
                },
                Outbound::Audio(data) => Message::Binary(data.to_vec()),
            };
            if ws_sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    // Open a session and greet.
    let mut conn = open_session(&state, &out_tx).await;
    state
        .hooks
        .emit(HookEvent::Connection {
            session_id: conn.session_id.clone(),
        })
        .await;
    state
        .metrics
        .gauge(names::CONNECTIONS_ACTIVE, state.sessions.len() as f64, &[]);

    // Reader loop.
    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Text(text) => {
                handle_text(&state, &mut conn, &text, &out_tx).await;
            }
            Message::Binary(frame) => {
                handle_audio_frame(&state, &mut conn, Bytes::from(frame), &out_tx).await;
            }
            Message::Close(_) => break,
            // axum answers WS-level ping/pong itself.
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    // Transport gone: the session enters its grace window.
    state
        .sessions
        .detach(&conn.session_id, conn.generation, Utc::now());
    state
        .hooks
        .emit(HookEvent::Disconnect {
            session_id: conn.session_id.clone(),
        })
        .await;
    state
        .metrics
        .gauge(names::CONNECTIONS_ACTIVE, state.sessions.len() as f64, &[]);
    writer.abort();
    tracing::info!(session_id = %conn.session_id, "connection closed");
}

async fn open_session(state: &AppState, out_tx: &mpsc::Sender<Outbound>) -> ConnState {
    let session_config = &state.config.session;
    let (history, playbook_state) = match &state.playbook {
        Some(engine) => (
            engine.initial_history(session_config.playbook_history_limit),
            Some(engine.initial_state()),
        ),
        None => {
            let history = match &session_config.system_prompt {
                Some(prompt) => {
                    History::with_system_prompt(session_config.history_limit, prompt.as_str())
                }
                None => History::new(session_config.history_limit),
            };
            (history, None)
        }
    };

    let (session_id, session) =
        state
            .sessions
            .open(state.config.clone(), PROTOCOL_VERSION, history, playbook_state);

    let _ = out_tx
        .send(Outbound::Frame(ServerMessage::Ready {
            session_id: session_id.clone(),
            protocol_version: PROTOCOL_VERSION,
            ice_servers: state.config.server.ice_servers.clone(),
        }))
        .await;

    ConnState {
        session,
        session_id,
        generation: 1,
        gate: VadGate::new(state.config.vad.clone()),
        pending_attachments: Vec::new(),
        external_buffer: BytesMut::new(),
        external_capture: false,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inbound envelopes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_text(
    state: &AppState,
    conn: &mut ConnState,
    text: &str,
    out_tx: &mpsc::Sender<Outbound>,
) {
    let decoded = match decode_client(text, state.config.server.strict_protocol) {
        Ok(decoded) => decoded,
        Err(e) => {
            // Protocol violation: abort the current turn, keep the session.
            conn.session.lock().cancel_active_turn();
            report_transport_error(state, conn, &e, out_tx).await;
            return;
        }
    };

    let msg = match decoded {
        Decoded::Ignored(msg_type) => {
            tracing::debug!(msg_type, "ignoring unknown message type");
            return;
        }
        Decoded::Message(msg) => msg,
    };

    match msg {
        ClientMessage::Reconnect { session_id } => {
            handle_reconnect(state, conn, &session_id, out_tx).await;
        }
        ClientMessage::Attachments { attachments } => {
            conn.pending_attachments = attachments;
        }
        ClientMessage::AudioStart { .. } => {
            conn.external_capture = true;
            conn.external_buffer.clear();
        }
        ClientMessage::AudioStop => {
            conn.external_capture = false;
        }
        ClientMessage::AudioProcess => {
            let audio = std::mem::take(&mut conn.external_buffer).freeze();
            if audio.is_empty() {
                tracing::debug!("audio-process with empty buffer; ignoring");
            } else {
                spawn_turn(state, conn, audio, out_tx);
            }
        }
        ClientMessage::Audio { data } => {
            // Legacy fallback: one utterance as base64 WAV.
            match base64::engine::general_purpose::STANDARD.decode(data) {
                Ok(bytes) => spawn_turn(state, conn, Bytes::from(bytes), out_tx),
                Err(_) => {
                    let e = Error::InvalidAudioFormat(
                        "legacy audio payload is not valid base64".into(),
                    );
                    report_transport_error(state, conn, &e, out_tx).await;
                }
            }
        }
        ClientMessage::Ping { timestamp } => {
            let _ = out_tx
                .send(Outbound::Frame(ServerMessage::Pong { timestamp }))
                .await;
        }
        ClientMessage::Pong { .. } => {}
    }
}

async fn handle_reconnect(
    state: &AppState,
    conn: &mut ConnState,
    prior_id: &str,
    out_tx: &mpsc::Sender<Outbound>,
) {
    match state.sessions.reconnect(prior_id, Utc::now()) {
        Some(outcome) => {
            // The fresh session minted at connect is superseded.
            if outcome.session_id != conn.session_id {
                state.sessions.close(&conn.session_id);
            }
            conn.session = outcome.session;
            conn.session_id = outcome.session_id.clone();
            conn.generation = outcome.attach_generation;
            let _ = out_tx
                .send(Outbound::Frame(ServerMessage::ReconnectAck {
                    success: true,
                    history_recovered: outcome.history_recovered,
                    session_id: outcome.session_id,
                }))
                .await;
        }
        None => {
            // Prior session gone; the client keeps the fresh one.
            let _ = out_tx
                .send(Outbound::Frame(ServerMessage::ReconnectAck {
                    success: false,
                    history_recovered: false,
                    session_id: conn.session_id.clone(),
                }))
                .await;
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Audio path
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_audio_frame(
    state: &AppState,
    conn: &mut ConnState,
    frame: Bytes,
    out_tx: &mpsc::Sender<Outbound>,
) {
    if conn.external_capture {
        conn.external_buffer.extend_from_slice(&frame);
        return;
    }

    let confidence = state.scorer.score(&frame);
    match conn.gate.process(frame, confidence) {
        Some(VadEvent::SpeechStart) => {
            // Barge-in: the running turn (if any) is cancelled; its own
            // pipeline emits the terminal tts-cancelled frame.
            let action = arbiter::on_speech_start(&conn.session);
            tracing::debug!(?action, "speech start");
            let _ = out_tx
                .send(Outbound::Frame(ServerMessage::SpeechStart))
                .await;
            state
                .hooks
                .emit(HookEvent::SpeechStart {
                    session_id: conn.session_id.clone(),
                })
                .await;
        }
        Some(VadEvent::SpeechEnd { audio, duration_ms }) => {
            let _ = out_tx
                .send(Outbound::Frame(ServerMessage::SpeechEnd { duration_ms }))
                .await;
            state
                .hooks
                .emit(HookEvent::SpeechEnd {
                    session_id: conn.session_id.clone(),
                    duration_ms,
                })
                .await;
            spawn_turn(state, conn, audio, out_tx);
        }
        None => {}
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn spawn_turn(
    state: &AppState,
    conn: &mut ConnState,
    audio: Bytes,
    out_tx: &mpsc::Sender<Outbound>,
) {
    let state = state.clone();
    let session = conn.session.clone();
    let session_id = conn.session_id.clone();
    let attachments = std::mem::take(&mut conn.pending_attachments);
    let out_tx = out_tx.clone();
    tokio::spawn(async move {
        run_session_turn(state, session, session_id, audio, attachments, out_tx).await;
    });
}

async fn run_session_turn(
    state: AppState,
    session: Arc<Mutex<Session>>,
    session_id: String,
    audio: Bytes,
    attachments: Vec<Attachment>,
    out_tx: mpsc::Sender<Outbound>,
) {
    // Turns on one session are strictly serialized.
    let _slot = state.turn_slots.acquire(&session_id).await;

    let (history, playbook_state) = {
        let session = session.lock();
        if session.state == SessionState::Expired {
            return;
        }
        (session.history.clone(), session.playbook_state.clone())
    };

    let (handle, mut rx) = match (&state.playbook, playbook_state) {
        (Some(engine), Some(playbook_state)) => engine.run_turn_stream(PlaybookTurnInput {
            session_id: session_id.clone(),
            audio,
            attachments,
            history,
            state: playbook_state,
        }),
        _ => state.orchestrator.run_turn_stream(TurnInput {
            session_id: session_id.clone(),
            audio,
            attachments,
            history,
        }),
    };

    if let Err(e) = state.sessions.begin_turn(&session_id, handle) {
        tracing::warn!(session_id = %session_id, error = %e, "could not begin turn");
        return;
    }

    while let Some(event) = rx.recv().await {
        if !forward_event(&out_tx, event).await {
            // Transport gone; detach will cancel the pipeline.
            break;
        }
    }

    state.sessions.end_turn(&session_id);
}

/// Map a turn event onto wire frames. Returns `false` once the outbound
/// channel is closed.
async fn forward_event(out_tx: &mpsc::Sender<Outbound>, event: TurnEvent) -> bool {
    let mut outbound: Vec<Outbound> = Vec::with_capacity(2);
    match event {
        TurnEvent::Transcript { text, is_final } => {
            outbound.push(Outbound::Frame(ServerMessage::Transcript { text, is_final }));
        }
        TurnEvent::LlmChunk { text } => {
            outbound.push(Outbound::Frame(ServerMessage::LlmChunk { text }));
        }
        TurnEvent::LlmComplete { text } => {
            outbound.push(Outbound::Frame(ServerMessage::Llm { text }));
        }
        TurnEvent::TtsStart => outbound.push(Outbound::Frame(ServerMessage::TtsStart)),
        TurnEvent::TtsChunk {
            sentence_index,
            audio,
        } => {
            outbound.push(Outbound::Frame(ServerMessage::TtsChunk {
                sentence_index,
                audio: None,
            }));
            outbound.push(Outbound::Audio(audio.data));
        }
        TurnEvent::TtsComplete => outbound.push(Outbound::Frame(ServerMessage::TtsComplete)),
        TurnEvent::TtsCancelled => outbound.push(Outbound::Frame(ServerMessage::TtsCancelled)),
        TurnEvent::Cancelled => {
            outbound.push(Outbound::Frame(ServerMessage::from_error(&Error::Cancelled)));
        }
        TurnEvent::ToolCallStart { call } => {
            outbound.push(Outbound::Frame(tool_call_start(&call)));
        }
        TurnEvent::ToolCallEnd { result } => {
            outbound.push(Outbound::Frame(ServerMessage::ToolCallEnd {
                call_id: result.call_id,
                tool_name: result.tool_name,
                success: result.success,
                result: result.value,
                error: result.error,
                duration_ms: result.duration_ms,
            }));
        }
        TurnEvent::StageChange { from, to, reason } => {
            outbound.push(Outbound::Frame(ServerMessage::StageChange { from, to, reason }));
        }
        TurnEvent::Error {
            code,
            component,
            message,
            recoverable,
        } => {
            outbound.push(Outbound::Frame(ServerMessage::Error {
                code: code.as_str().to_string(),
                message,
                component,
                recoverable,
            }));
        }
    }

    for item in outbound {
        if out_tx.send(item).await.is_err() {
            return false;
        }
    }
    true
}

async fn report_transport_error(
    state: &AppState,
    conn: &ConnState,
    error: &Error,
    out_tx: &mpsc::Sender<Outbound>,
) {
    let _ = out_tx
        .send(Outbound::Frame(ServerMessage::from_error(error)))
        .await;
    state
        .hooks
        .emit(HookEvent::Error {
            context: ErrorContext::new(error, &conn.session_id, None),
            message: error.to_string(),
        })
        .await;
    let component = error.component().to_string();
    let kind = error.kind().to_string();
    state.metrics.increment(
        names::ERRORS,
        1,
        &[("component", component.as_str()), ("kind", kind.as_str())],
    );
}
