use serde::{Deserialize, Serialize};

use crate::message::ExecutionPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecutorConfig {
    /// Policy for tools that do not declare one.
    #[serde(default = "d_default_policy")]
    pub default_policy: ExecutionPolicy,
    /// In-flight cap for parallel runs.
    #[serde(default = "d_max_concurrency")]
    pub max_concurrency: usize,
    /// Per-tool handler timeout.
    #[serde(default = "d_tool_timeout_ms")]
    pub tool_timeout_ms: u64,
    /// Validate argument maps against each tool's parameter schema before
    /// invoking the handler.
    #[serde(default = "d_true")]
    pub validate_arguments: bool,
}

impl Default for ToolExecutorConfig {
    fn default() -> Self {
        Self {
            default_policy: d_default_policy(),
            max_concurrency: d_max_concurrency(),
            tool_timeout_ms: d_tool_timeout_ms(),
            validate_arguments: true,
        }
    }
}

fn d_default_policy() -> ExecutionPolicy {
    ExecutionPolicy::Sequential
}

fn d_max_concurrency() -> usize {
    4
}

fn d_tool_timeout_ms() -> u64 {
    10_000
}

fn d_true() -> bool {
    true
}
