use serde::{Deserialize, Serialize};

use super::QuietHours;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Heartbeat
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Baseline self-prompt interval the adaptive schedule is biased toward.
    #[serde(default = "d_1800000")]
    pub every_ms: u64,
    /// Lower clamp for the adaptive interval.
    #[serde(default = "d_60000")]
    pub min_ms: u64,
    /// Upper clamp for the adaptive interval.
    #[serde(default = "d_7200000")]
    pub max_ms: u64,
    /// Synthetic channel heartbeat turns run on.
    #[serde(default = "d_channel")]
    pub channel_id: String,
    /// When set, heartbeats outside the window are skipped (not rescheduled
    /// aggressively). Same shape as quiet hours, inverted meaning.
    #[serde(default)]
    pub active_hours: Option<QuietHours>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            every_ms: d_1800000(),
            min_ms: d_60000(),
            max_ms: d_7200000(),
            channel_id: d_channel(),
            active_hours: None,
        }
    }
}

fn d_1800000() -> u64 {
    1_800_000
}
fn d_60000() -> u64 {
    60_000
}
fn d_7200000() -> u64 {
    7_200_000
}
fn d_channel() -> String {
    "heartbeat".into()
}
