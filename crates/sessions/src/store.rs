//! In-memory session store.
//!
//! Sessions are keyed by their opaque id. The store owns lifecycle
//! transitions; everything else (turn execution, protocol framing)
//! happens outside with the per-session `Arc` handles.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use llmrtc_domain::config::Config;
use llmrtc_domain::error::{Error, Result};
use llmrtc_domain::history::History;
use llmrtc_orchestrator::TurnHandle;
use llmrtc_playbook::PlaybookState;

use crate::session::{Session, SessionState};

/// Result of a reconnection attempt. `success = false` means the prior
/// session was gone and a fresh one was minted.
pub struct ReconnectOutcome {
    pub success: bool,
    pub history_recovered: bool,
    pub session: Arc<Mutex<Session>>,
    pub session_id: String,
    pub attach_generation: u64,
}

#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session with a config snapshot and optional playbook
    /// position. Returns the new id and the shared handle.
    pub fn open(
        &self,
        config: Arc<Config>,
        protocol_version: u16,
        history: History,
        playbook_state: Option<PlaybookState>,
    ) -> (String, Arc<Mutex<Session>>) {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let session = Session {
            id: id.clone(),
            created_at: now,
            last_activity: now,
            protocol_version,
            state: SessionState::Active,
            attach_generation: 1,
            detached_at: None,
            history: Arc::new(Mutex::new(history)),
            playbook_state: playbook_state.map(|s| Arc::new(Mutex::new(s))),
            active_turn: None,
            config,
        };
        let arc = Arc::new(Mutex::new(session));
        self.sessions.write().insert(id.clone(), arc.clone());
        tracing::info!(session_id = %id, "session opened");
        (id, arc)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Attempt to re-attach a prior session. Within the grace window the
    /// session comes back with its history and stage intact; otherwise
    /// the caller should open a fresh session and answer
    /// `success = false`.
    pub fn reconnect(&self, prior_id: &str, now: DateTime<Utc>) -> Option<ReconnectOutcome> {
        let arc = self.get(prior_id)?;
        {
            let mut session = arc.lock();
            if session.state == SessionState::Expired || !session.within_grace_window(now) {
                return None;
            }
            // A second attach for a live session evicts the prior
            // transport: the generation bump invalidates its frames.
            session.attach_generation += 1;
            session.state = SessionState::Active;
            session.detached_at = None;
            session.last_activity = now;
            tracing::info!(
                session_id = %session.id,
                generation = session.attach_generation,
                "session reconnected"
            );
        }
        let generation = arc.lock().attach_generation;
        Some(ReconnectOutcome {
            success: true,
            history_recovered: true,
            session: arc,
            session_id: prior_id.to_string(),
            attach_generation: generation,
        })
    }

    /// Transport detached. Only honored when the detaching transport is
    /// the current one; an evicted transport's late detach is a no-op.
    pub fn detach(&self, id: &str, generation: u64, now: DateTime<Utc>) {
        let Some(arc) = self.get(id) else {
            return;
        };
        let mut session = arc.lock();
        if session.attach_generation != generation || session.state == SessionState::Expired {
            return;
        }
        // A turn mid-flight has no transport to stream to; cancel it.
        session.cancel_active_turn();
        session.state = SessionState::Reconnecting;
        session.detached_at = Some(now);
        tracing::info!(session_id = %id, "session detached; grace window running");
    }

    /// Record the running turn. Enforces the one-active-turn invariant.
    pub fn begin_turn(&self, id: &str, handle: TurnHandle) -> Result<()> {
        let arc = self
            .get(id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        let mut session = arc.lock();
        if session.state == SessionState::Expired {
            return Err(Error::SessionExpired(id.to_string()));
        }
        if session
            .active_turn
            .as_ref()
            .is_some_and(|t| !t.is_cancelled())
        {
            return Err(Error::Internal(format!(
                "session {id} already has an active turn"
            )));
        }
        session.active_turn = Some(handle);
        session.state = SessionState::Processing;
        session.last_activity = Utc::now();
        Ok(())
    }

    /// The running turn finished (any way).
    pub fn end_turn(&self, id: &str) {
        if let Some(arc) = self.get(id) {
            let mut session = arc.lock();
            session.active_turn = None;
            if session.state == SessionState::Processing {
                session.state = SessionState::Active;
            }
            session.last_activity = Utc::now();
        }
    }

    /// Explicit close: cancel the active turn and drop the session.
    /// Resources release in reverse order of acquisition — turn first,
    /// then the session entry (history and playbook state fall with it).
    pub fn close(&self, id: &str) {
        let removed = self.sessions.write().remove(id);
        if let Some(arc) = removed {
            let mut session = arc.lock();
            session.cancel_active_turn();
            session.state = SessionState::Expired;
            tracing::info!(session_id = %id, "session closed");
        }
    }

    /// Expire detached sessions whose grace window elapsed. Returns the
    /// expired ids. Called periodically by the server's sweeper.
    pub fn expire_stale(&self, now: DateTime<Utc>) -> Vec<String> {
        let stale: Vec<String> = {
            let sessions = self.sessions.read();
            sessions
                .iter()
                .filter(|(_, arc)| {
                    let session = arc.lock();
                    session.state == SessionState::Reconnecting
                        && !session.within_grace_window(now)
                })
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in &stale {
            tracing::info!(session_id = %id, "session expired after grace window");
            self.close(id);
        }
        stale
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use llmrtc_domain::message::Message;

    fn store_with_session() -> (SessionStore, String) {
        let store = SessionStore::new();
        let (id, _session) = store.open(
            Arc::new(Config::default()),
            1,
            History::new(8),
            None,
        );
        (store, id)
    }

    #[test]
    fn reconnect_within_grace_window_recovers_history() {
        let (store, id) = store_with_session();

        // Two prior turns of history.
        {
            let session = store.get(&id).unwrap();
            let session = session.lock();
            let mut history = session.history.lock();
            history.push(Message::user("turn one"));
            history.push(Message::assistant("answer one"));
            history.push(Message::user("turn two"));
            history.push(Message::assistant("answer two"));
        }

        let now = Utc::now();
        store.detach(&id, 1, now);
        assert_eq!(
            store.get(&id).unwrap().lock().state,
            SessionState::Reconnecting
        );

        let outcome = store
            .reconnect(&id, now + chrono::Duration::seconds(10))
            .expect("within grace window");
        assert!(outcome.success);
        assert!(outcome.history_recovered);
        assert_eq!(outcome.session_id, id);

        let session = outcome.session.lock();
        assert_eq!(session.state, SessionState::Active);
        assert_eq!(session.history.lock().len(), 4);
        assert_eq!(session.history.lock().messages()[2].content, "turn two");
    }

    #[test]
    fn reconnect_after_grace_window_fails() {
        let (store, id) = store_with_session();
        let now = Utc::now();
        store.detach(&id, 1, now);

        // Default grace window is 60 s.
        assert!(store
            .reconnect(&id, now + chrono::Duration::seconds(61))
            .is_none());
    }

    #[test]
    fn sweeper_expires_stale_sessions() {
        let (store, id) = store_with_session();
        let now = Utc::now();
        store.detach(&id, 1, now);

        assert!(store
            .expire_stale(now + chrono::Duration::seconds(30))
            .is_empty());
        let expired = store.expire_stale(now + chrono::Duration::seconds(90));
        assert_eq!(expired, vec![id.clone()]);
        assert!(store.get(&id).is_none());
    }

    #[test]
    fn second_attach_evicts_prior_transport() {
        let (store, id) = store_with_session();
        let now = Utc::now();

        // Second transport attaches while the first is still connected.
        let outcome = store.reconnect(&id, now).unwrap();
        assert_eq!(outcome.attach_generation, 2);

        // The first transport's late detach is ignored.
        store.detach(&id, 1, now);
        assert_eq!(store.get(&id).unwrap().lock().state, SessionState::Active);

        // The current transport's detach is honored.
        store.detach(&id, 2, now);
        assert_eq!(
            store.get(&id).unwrap().lock().state,
            SessionState::Reconnecting
        );
    }

    #[test]
    fn close_removes_session() {
        let (store, id) = store_with_session();
        store.close(&id);
        assert!(store.get(&id).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn reconnect_unknown_session_fails() {
        let store = SessionStore::new();
        assert!(store.reconnect("ghost", Utc::now()).is_none());
    }

    #[test]
    fn begin_turn_enforces_single_active_turn() {
        use llmrtc_orchestrator::TurnContext;

        let (store, id) = store_with_session();
        let ctx = TurnContext::new(&id);
        store.begin_turn(&id, ctx.handle()).unwrap();
        assert_eq!(
            store.get(&id).unwrap().lock().state,
            SessionState::Processing
        );

        let ctx2 = TurnContext::new(&id);
        assert!(store.begin_turn(&id, ctx2.handle()).is_err());

        store.end_turn(&id);
        assert_eq!(store.get(&id).unwrap().lock().state, SessionState::Active);
        let ctx3 = TurnContext::new(&id);
        assert!(store.begin_turn(&id, ctx3.handle()).is_ok());
    }
}
