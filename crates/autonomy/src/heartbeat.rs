//! Adaptive heartbeat scheduling.
//!
//! The heartbeat is a self-prompt: the agent wakes up on a synthetic
//! channel and decides whether anything needs saying. The interval adapts:
//! consecutive idle beats stretch it toward `max_ms`, unread events pull
//! it down toward `min_ms`, and a delivered message resets it to the
//! configured baseline.

use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};

use perch_domain::config::HeartbeatConfig;
use perch_domain::trace::TraceEvent;

use crate::budget::within_window;

/// What one heartbeat run amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// The agent had nothing to say. The interval may grow.
    Ok,
    /// Output was delivered. The interval resets.
    Sent,
    /// The run was skipped (budget, active hours). The interval holds.
    Skipped,
}

impl HeartbeatOutcome {
    fn as_str(self) -> &'static str {
        match self {
            HeartbeatOutcome::Ok => "HEARTBEAT_OK",
            HeartbeatOutcome::Sent => "SENT",
            HeartbeatOutcome::Skipped => "SKIPPED",
        }
    }
}

pub struct HeartbeatRunner {
    config: HeartbeatConfig,
    idle_streak: AtomicU32,
}

impl HeartbeatRunner {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            idle_streak: AtomicU32::new(0),
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.config.channel_id
    }

    /// Whether a heartbeat may run at `now` at all.
    pub fn in_active_hours(&self, now: DateTime<Utc>) -> bool {
        match &self.config.active_hours {
            Some(window) => within_window(window, now),
            None => true,
        }
    }

    /// The delay until the next beat, in ms.
    ///
    /// Biased toward `every_ms`; each consecutive idle beat stretches it by
    /// 1.5×, pending unread events halve it once, and the result is clamped
    /// to `[min_ms, max_ms]`.
    pub fn next_interval(&self, unread_events: usize) -> u64 {
        let streak = self.idle_streak.load(Ordering::Relaxed).min(16);
        let mut interval = self.config.every_ms as f64 * 1.5f64.powi(streak as i32);
        if unread_events > 0 {
            interval /= 2.0;
        }
        (interval as u64).clamp(self.config.min_ms, self.config.max_ms)
    }

    /// Record how a run went and adjust the streak.
    pub fn record_outcome(&self, outcome: HeartbeatOutcome, unread_events: usize) {
        match outcome {
            HeartbeatOutcome::Ok => {
                self.idle_streak.fetch_add(1, Ordering::Relaxed);
            }
            HeartbeatOutcome::Sent => {
                self.idle_streak.store(0, Ordering::Relaxed);
            }
            HeartbeatOutcome::Skipped => {}
        }
        TraceEvent::HeartbeatTick {
            channel_id: self.config.channel_id.clone(),
            outcome: outcome.as_str().into(),
            next_interval_ms: self.next_interval(unread_events),
        }
        .emit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use perch_domain::config::QuietHours;

    fn runner() -> HeartbeatRunner {
        HeartbeatRunner::new(HeartbeatConfig {
            every_ms: 600_000, // 10m
            min_ms: 60_000,    // 1m
            max_ms: 3_600_000, // 1h
            ..Default::default()
        })
    }

    #[test]
    fn baseline_interval_is_every_ms() {
        assert_eq!(runner().next_interval(0), 600_000);
    }

    #[test]
    fn idle_streak_grows_interval_up_to_max() {
        let hb = runner();
        for _ in 0..3 {
            hb.record_outcome(HeartbeatOutcome::Ok, 0);
        }
        let grown = hb.next_interval(0);
        assert!(grown > 600_000);

        for _ in 0..20 {
            hb.record_outcome(HeartbeatOutcome::Ok, 0);
        }
        assert_eq!(hb.next_interval(0), 3_600_000, "clamped to max");
    }

    #[test]
    fn unread_events_shorten_the_interval() {
        let hb = runner();
        assert!(hb.next_interval(3) < hb.next_interval(0));
    }

    #[test]
    fn sent_resets_the_streak() {
        let hb = runner();
        for _ in 0..5 {
            hb.record_outcome(HeartbeatOutcome::Ok, 0);
        }
        assert!(hb.next_interval(0) > 600_000);

        hb.record_outcome(HeartbeatOutcome::Sent, 0);
        assert_eq!(hb.next_interval(0), 600_000);
    }

    #[test]
    fn skip_holds_the_streak() {
        let hb = runner();
        hb.record_outcome(HeartbeatOutcome::Ok, 0);
        let before = hb.next_interval(0);
        hb.record_outcome(HeartbeatOutcome::Skipped, 0);
        assert_eq!(hb.next_interval(0), before);
    }

    #[test]
    fn interval_never_leaves_the_clamp() {
        let hb = HeartbeatRunner::new(HeartbeatConfig {
            every_ms: 100,
            min_ms: 60_000,
            max_ms: 120_000,
            ..Default::default()
        });
        assert_eq!(hb.next_interval(10), 60_000);
    }

    #[test]
    fn active_hours_gate_runs() {
        let hb = HeartbeatRunner::new(HeartbeatConfig {
            active_hours: Some(QuietHours {
                start: "09:00".into(),
                end: "17:00".into(),
                timezone: "UTC".into(),
            }),
            ..Default::default()
        });
        let morning = Utc.with_ymd_and_hms(2026, 6, 15, 10, 0, 0).unwrap();
        let night = Utc.with_ymd_and_hms(2026, 6, 15, 22, 0, 0).unwrap();
        assert!(hb.in_active_hours(morning));
        assert!(!hb.in_active_hours(night));
    }
}
