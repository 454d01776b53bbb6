use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// System prompt injected at the head of every session's history.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// History entries kept across turns (single-prompt sessions).
    #[serde(default = "d_history_limit")]
    pub history_limit: usize,
    /// History entries kept across turns when a playbook drives the session.
    #[serde(default = "d_playbook_history_limit")]
    pub playbook_history_limit: usize,
    /// Seconds a detached session is preserved for reconnection.
    #[serde(default = "d_grace_window_secs")]
    pub grace_window_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            history_limit: d_history_limit(),
            playbook_history_limit: d_playbook_history_limit(),
            grace_window_secs: d_grace_window_secs(),
        }
    }
}

fn d_history_limit() -> usize {
    8
}

fn d_playbook_history_limit() -> usize {
    50
}

fn d_grace_window_secs() -> u64 {
    60
}
