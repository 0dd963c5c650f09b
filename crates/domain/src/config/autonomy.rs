use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Autonomy budget, cron, intents
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutonomyConfig {
    /// Autonomous sends allowed per channel per sliding hour.
    #[serde(default = "d_4")]
    pub hourly_cap: usize,
    /// Autonomous sends allowed per channel per sliding day.
    #[serde(default = "d_20")]
    pub daily_cap: usize,
    /// When set, autonomous sends are rejected inside this window.
    #[serde(default)]
    pub quiet_hours: Option<QuietHours>,
    /// Total cron jobs allowed in flight at once, across job ids.
    #[serde(default = "d_4usize")]
    pub max_concurrent_runs: usize,
    /// Cron tick cadence.
    #[serde(default = "d_1000")]
    pub cron_tick_ms: u64,
    /// Proactive-intent dispatch cadence.
    #[serde(default = "d_5000")]
    pub intent_tick_ms: u64,
    /// Memory integrity scan cadence.
    #[serde(default = "d_3600000")]
    pub integrity_scan_ms: u64,
    /// Pending intents older than this are marked expired instead of sent.
    #[serde(default = "d_86400000")]
    pub intent_expiry_ms: u64,
}

impl Default for AutonomyConfig {
    fn default() -> Self {
        Self {
            hourly_cap: d_4(),
            daily_cap: d_20(),
            quiet_hours: None,
            max_concurrent_runs: d_4usize(),
            cron_tick_ms: d_1000(),
            intent_tick_ms: d_5000(),
            integrity_scan_ms: d_3600000(),
            intent_expiry_ms: d_86400000(),
        }
    }
}

/// A daily wall-clock window, evaluated in `timezone`. Windows may wrap
/// midnight (`start = "22:00"`, `end = "07:00"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuietHours {
    pub start: String,
    pub end: String,
    #[serde(default = "d_utc")]
    pub timezone: String,
}

fn d_4() -> usize {
    4
}
fn d_20() -> usize {
    20
}
fn d_4usize() -> usize {
    4
}
fn d_1000() -> u64 {
    1_000
}
fn d_5000() -> u64 {
    5_000
}
fn d_3600000() -> u64 {
    3_600_000
}
fn d_86400000() -> u64 {
    86_400_000
}
fn d_utc() -> String {
    "UTC".into()
}
