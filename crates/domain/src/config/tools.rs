use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool router & exec sandbox
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Per-call wall clock for tool handlers.
    #[serde(default = "d_30000")]
    pub default_timeout_ms: u64,
    /// When set, only these tool names may execute; `None` allows all
    /// registered tools.
    #[serde(default)]
    pub allowlist: Option<Vec<String>>,
    /// Regexes matched against the serialized arguments of every call;
    /// a hit denies with `TOOL_DESTRUCTIVE_DENIED`.
    #[serde(default = "d_denied_patterns")]
    pub denied_patterns: Vec<String>,
    /// Binaries the exec sandbox may spawn. Empty disables exec entirely.
    #[serde(default)]
    pub allowed_exec_bins: Vec<String>,
    /// How long the approval gate waits for a human decision.
    #[serde(default = "d_300")]
    pub approval_timeout_secs: u64,
    #[serde(default)]
    pub exec: ExecSandboxConfig,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: d_30000(),
            allowlist: None,
            denied_patterns: d_denied_patterns(),
            allowed_exec_bins: Vec::new(),
            approval_timeout_secs: d_300(),
            exec: ExecSandboxConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecSandboxConfig {
    /// Hard timeout for a sandboxed process.
    #[serde(default = "d_30000")]
    pub timeout_ms: u64,
    /// Combined stdout+stderr cap; oldest output is dropped on overflow.
    #[serde(default = "d_1048576")]
    pub max_buffer_bytes: usize,
}

impl Default for ExecSandboxConfig {
    fn default() -> Self {
        Self {
            timeout_ms: d_30000(),
            max_buffer_bytes: d_1048576(),
        }
    }
}

fn d_30000() -> u64 {
    30_000
}
fn d_300() -> u64 {
    300
}
fn d_1048576() -> usize {
    1_048_576
}

fn d_denied_patterns() -> Vec<String> {
    vec![
        r"rm\s+-rf\s+/".into(),
        r"mkfs(\.\w+)?\s".into(),
        r"dd\s+if=.*of=/dev/".into(),
        r":\(\)\s*\{.*\};\s*:".into(),
        r"shutdown|reboot".into(),
    ]
}
