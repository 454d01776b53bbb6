//! Typed configuration tree.
//!
//! Every section has serde defaults so a partial (or absent) config file
//! yields a fully usable runtime. A session captures a snapshot of this
//! tree at open; mid-session changes apply to subsequent turns only.

mod server;
mod session;
mod tools;
mod turn;
mod vad;

pub use server::*;
pub use session::*;
pub use tools::*;
pub use turn::*;
pub use vad::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub turn: TurnConfig,
    #[serde(default)]
    pub vad: VadConfig,
    #[serde(default)]
    pub tools: ToolExecutorConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the full tree. Errors should prevent startup; warnings are
    /// logged and ignored.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        let err = |field: &str, message: String| ConfigIssue {
            severity: ConfigSeverity::Error,
            field: field.to_string(),
            message,
        };
        let warn = |field: &str, message: String| ConfigIssue {
            severity: ConfigSeverity::Warning,
            field: field.to_string(),
            message,
        };

        if self.session.history_limit == 0 {
            issues.push(err("session.history_limit", "must be at least 1".into()));
        }
        if self.session.grace_window_secs == 0 {
            issues.push(warn(
                "session.grace_window_secs",
                "0 disables reconnection entirely".into(),
            ));
        }
        if self.turn.tool_loop_cap == 0 {
            issues.push(err("turn.tool_loop_cap", "must be at least 1".into()));
        }
        if self.turn.sentence_terminators.is_empty() {
            issues.push(err(
                "turn.sentence_terminators",
                "at least one terminator character is required".into(),
            ));
        }
        if self.tools.max_concurrency == 0 {
            issues.push(err("tools.max_concurrency", "must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.vad.positive_threshold)
            || !(0.0..=1.0).contains(&self.vad.negative_threshold)
        {
            issues.push(err(
                "vad",
                "thresholds must be within [0.0, 1.0]".into(),
            ));
        }
        if self.vad.negative_threshold > self.vad.positive_threshold {
            issues.push(err(
                "vad.negative_threshold",
                "must not exceed positive_threshold".into(),
            ));
        }

        issues
    }
}
