use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn runtime
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Wall clock for each context collector plugin.
    #[serde(default = "d_2500")]
    pub plugin_timeout_ms: u64,
    /// Context drift policy: user messages beyond this keep only the newest.
    #[serde(default = "d_8")]
    pub max_user_messages: usize,
    /// Upper bound on model↔tool iterations inside one turn.
    #[serde(default = "d_25")]
    pub max_tool_loops: usize,
    /// Tool-call iterations before a "reset reasoning" note is injected.
    #[serde(default = "d_12")]
    pub reasoning_reset_threshold: u32,
    /// Turns running in parallel across sessions.
    #[serde(default = "d_4")]
    pub worker_cap: usize,
    /// When set, turn debug snapshots are written here.
    #[serde(default)]
    pub snapshot_dir: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            plugin_timeout_ms: d_2500(),
            max_user_messages: d_8(),
            max_tool_loops: d_25(),
            reasoning_reset_threshold: d_12(),
            worker_cap: d_4(),
            snapshot_dir: None,
        }
    }
}

fn d_2500() -> u64 {
    2_500
}
fn d_8() -> usize {
    8
}
fn d_25() -> usize {
    25
}
fn d_12() -> u32 {
    12
}
fn d_4() -> usize {
    4
}
