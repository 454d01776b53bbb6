//! Per-turn state: identity, cancellation, and phase timing marks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use llmrtc_domain::cancel::CancelToken;

/// Everything a pipeline phase needs to know about the turn it belongs to.
/// Created at turn start, dropped at turn end; owned by the orchestrator.
#[derive(Clone)]
pub struct TurnContext {
    pub turn_id: String,
    pub session_id: String,
    pub started_at: Instant,
    pub cancel: CancelToken,
    /// Set once the TTS phase has been entered; decides whether barge-in
    /// finalizes with `tts-cancelled` or a plain cancel.
    tts_entered: Arc<AtomicBool>,
}

impl TurnContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            turn_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            started_at: Instant::now(),
            cancel: CancelToken::new(),
            tts_entered: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn mark_tts_entered(&self) {
        self.tts_entered.store(true, Ordering::Release);
    }

    pub fn entered_tts(&self) -> bool {
        self.tts_entered.load(Ordering::Acquire)
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    /// Handle shared with the barge-in arbiter.
    pub fn handle(&self) -> TurnHandle {
        TurnHandle {
            turn_id: self.turn_id.clone(),
            cancel: self.cancel.clone(),
            tts_entered: self.tts_entered.clone(),
        }
    }
}

/// A lightweight reference to a running turn, held by the session while
/// the pipeline task owns the [`TurnContext`].
#[derive(Clone)]
pub struct TurnHandle {
    pub turn_id: String,
    cancel: CancelToken,
    tts_entered: Arc<AtomicBool>,
}

impl TurnHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn entered_tts(&self) -> bool {
        self.tts_entered.load(Ordering::Acquire)
    }
}

/// How a pipeline phase ended. `Failed` means the error was already
/// reported (events, hooks, metrics) by the phase itself.
#[derive(Debug)]
pub enum PhaseOutcome<T> {
    Done(T),
    Cancelled,
    Failed,
}
