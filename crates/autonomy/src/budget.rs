//! Per-channel autonomous-send budget.
//!
//! Two sliding windows per channel (hourly and daily) hold the timestamps
//! of recent autonomous sends. `try_consume` evicts aged timestamps, then
//! either rejects (a cap is reached, or quiet hours are in effect) or
//! records the send in both windows. A denial stays a denial until a
//! timestamp ages out of the relevant window.

use std::collections::HashMap;

use chrono::{DateTime, Timelike, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use perch_domain::config::{AutonomyConfig, QuietHours};
use perch_domain::trace::TraceEvent;

const HOUR_MS: i64 = 3_600_000;
const DAY_MS: i64 = 86_400_000;

/// Send timestamps (epoch ms) for one channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelWindows {
    pub hourly: Vec<i64>,
    pub daily: Vec<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetDecision {
    Allowed,
    DeniedHourly,
    DeniedDaily,
    DeniedQuietHours,
}

impl BudgetDecision {
    pub fn is_allowed(self) -> bool {
        self == BudgetDecision::Allowed
    }
}

pub struct AutonomyBudget {
    config: AutonomyConfig,
    channels: Mutex<HashMap<String, ChannelWindows>>,
}

impl AutonomyBudget {
    pub fn new(config: AutonomyConfig) -> Self {
        Self::from_snapshot(config, HashMap::new())
    }

    /// Rebuild from a persisted snapshot.
    pub fn from_snapshot(config: AutonomyConfig, snapshot: HashMap<String, ChannelWindows>) -> Self {
        Self {
            config,
            channels: Mutex::new(snapshot),
        }
    }

    /// Try to spend one autonomous send on `channel_id` at `now`.
    ///
    /// The clock is a parameter so schedulers pass their own notion of now
    /// and tests need no sleeping.
    pub fn try_consume(&self, channel_id: &str, now: DateTime<Utc>) -> BudgetDecision {
        if let Some(qh) = &self.config.quiet_hours {
            if within_window(qh, now) {
                TraceEvent::BudgetDenied {
                    channel_id: channel_id.to_owned(),
                    window: "quiet_hours".into(),
                }
                .emit();
                return BudgetDecision::DeniedQuietHours;
            }
        }

        let now_ms = now.timestamp_millis();
        let mut channels = self.channels.lock();
        let windows = channels.entry(channel_id.to_owned()).or_default();

        windows.hourly.retain(|&t| now_ms - t < HOUR_MS);
        windows.daily.retain(|&t| now_ms - t < DAY_MS);

        let denied = if windows.hourly.len() >= self.config.hourly_cap {
            Some(("hourly", BudgetDecision::DeniedHourly))
        } else if windows.daily.len() >= self.config.daily_cap {
            Some(("daily", BudgetDecision::DeniedDaily))
        } else {
            None
        };

        if let Some((window, decision)) = denied {
            TraceEvent::BudgetDenied {
                channel_id: channel_id.to_owned(),
                window: window.into(),
            }
            .emit();
            return decision;
        }

        windows.hourly.push(now_ms);
        windows.daily.push(now_ms);
        BudgetDecision::Allowed
    }

    /// Current windows, for persistence and `get_state()`.
    pub fn snapshot(&self) -> HashMap<String, ChannelWindows> {
        self.channels.lock().clone()
    }
}

/// Is `now` inside the daily wall-clock window, evaluated in the window's
/// timezone? Windows may wrap midnight; `start == end` means disabled.
pub(crate) fn within_window(window: &QuietHours, now: DateTime<Utc>) -> bool {
    let tz: chrono_tz::Tz = window.timezone.parse().unwrap_or(chrono_tz::UTC);
    let local = now.with_timezone(&tz);
    let minute = local.hour() * 60 + local.minute();

    let (Some(start), Some(end)) = (
        perch_domain::config::parse_hhmm(&window.start),
        perch_domain::config::parse_hhmm(&window.end),
    ) else {
        return false;
    };

    if start == end {
        return false;
    }
    if start < end {
        minute >= start && minute < end
    } else {
        // Wraps midnight.
        minute >= start || minute < end
    }
}
