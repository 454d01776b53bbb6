use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use llmrtc_domain::config::Config;
use llmrtc_domain::history::History;
use llmrtc_orchestrator::TurnHandle;
use llmrtc_playbook::PlaybookState;

/// Session lifecycle states.
///
/// `Created → Active ↔ Processing → Reconnecting → Active`, with terminal
/// `Expired`. `Reconnecting` is entered on transport detach; a sweeper
/// moves the session to `Expired` when the grace window elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Created,
    Active,
    /// A turn is running.
    Processing,
    /// Transport detached, grace window running.
    Reconnecting,
    Expired,
}

/// One tracked session. Shared as `Arc<Mutex<Session>>`; the inner
/// history and playbook state carry their own locks because the turn
/// pipeline holds them across phases while the session lock stays free.
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub protocol_version: u16,
    pub state: SessionState,
    /// Bumped on every transport attach; a stale generation's frames and
    /// detach notifications are ignored (second attach evicts the first).
    pub attach_generation: u64,
    pub detached_at: Option<DateTime<Utc>>,
    pub history: Arc<Mutex<History>>,
    pub playbook_state: Option<Arc<Mutex<PlaybookState>>>,
    /// Handle of the running turn, if any. At most one per session.
    pub active_turn: Option<TurnHandle>,
    /// Config snapshot captured at session open.
    pub config: Arc<Config>,
}

impl Session {
    pub fn grace_window_secs(&self) -> u64 {
        self.config.session.grace_window_secs
    }

    /// Whether a detached session is still within its grace window.
    pub fn within_grace_window(&self, now: DateTime<Utc>) -> bool {
        match self.detached_at {
            None => true,
            Some(detached) => {
                let elapsed = now.signed_duration_since(detached).num_seconds().max(0) as u64;
                elapsed < self.grace_window_secs()
            }
        }
    }

    /// Cancel the running turn, if any, and drop its handle.
    pub fn cancel_active_turn(&mut self) {
        if let Some(turn) = self.active_turn.take() {
            turn.cancel();
        }
    }
}
