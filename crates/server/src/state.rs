use std::sync::Arc;

use llmrtc_domain::config::Config;
use llmrtc_observe::{HookDispatcher, MetricsSink};
use llmrtc_orchestrator::Orchestrator;
use llmrtc_playbook::PlaybookEngine;
use llmrtc_sessions::SessionStore;
use llmrtc_tools::ToolRegistry;
use llmrtc_vad::VadScorer;

use crate::turn_slot::TurnSlotMap;

/// Shared application state passed to all connection handlers.
///
/// Everything here is configured before `serve` binds and immutable
/// afterwards; per-session mutability lives inside the session store.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionStore>,
    /// Sealed before connections are accepted.
    pub registry: Arc<ToolRegistry>,
    pub orchestrator: Arc<Orchestrator>,
    /// When present, every session runs under this playbook.
    pub playbook: Option<Arc<PlaybookEngine>>,
    pub scorer: Arc<dyn VadScorer>,
    pub hooks: HookDispatcher,
    pub metrics: Arc<dyn MetricsSink>,
    /// One turn slot per session; speech-end waits its turn here.
    pub turn_slots: Arc<TurnSlotMap>,
}
