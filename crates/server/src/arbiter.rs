//! Barge-in arbiter.
//!
//! Reacts to `speech-start` while a turn is active: the running turn is
//! cancelled so the user's interruption wins. The orchestrator finalizes
//! with `tts-cancelled` when playback had begun, or a plain cancel
//! otherwise; the new utterance opens a fresh turn at its `speech-end`.

use std::sync::Arc;

use parking_lot::Mutex;

use llmrtc_sessions::Session;

/// What the arbiter did with a `speech-start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BargeIn {
    /// No turn was running; nothing to interrupt.
    Idle,
    /// A turn was cancelled before reaching TTS.
    CancelledPreTts,
    /// Playback was interrupted; the turn finalizes with `tts-cancelled`.
    CancelledPlayback,
}

pub fn on_speech_start(session: &Arc<Mutex<Session>>) -> BargeIn {
    let mut session = session.lock();
    let Some(turn) = session.active_turn.take() else {
        return BargeIn::Idle;
    };
    if turn.is_cancelled() {
        return BargeIn::Idle;
    }
    let entered_tts = turn.entered_tts();
    turn.cancel();
    tracing::debug!(
        session_id = %session.id,
        turn_id = %turn.turn_id,
        entered_tts,
        "barge-in: cancelled active turn"
    );
    if entered_tts {
        BargeIn::CancelledPlayback
    } else {
        BargeIn::CancelledPreTts
    }
}
