//! Reliability helpers: a confidence heuristic over run telemetry, the
//! reasoning-reset counter, and the envelope wrapped around every
//! externally visible action.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Confidence model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Default)]
pub struct ConfidenceInput {
    pub failure_count: u32,
    pub has_deep_scan: bool,
    pub plugin_diagnostic_count: u32,
    pub tool_call_count: u32,
    pub has_recent_tests_passing: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfidenceReport {
    /// 0–100.
    pub score: u8,
    /// One line per adjustment, for humans reading the envelope.
    pub rationale: Vec<String>,
}

const BASE_SCORE: i32 = 82;
/// Tool volume beyond this starts costing confidence.
const TOOL_VOLUME_GRACE: u32 = 6;

pub struct ConfidenceModel;

impl ConfidenceModel {
    pub fn assess(input: &ConfidenceInput) -> ConfidenceReport {
        let mut score = BASE_SCORE;
        let mut rationale = vec![format!("base {BASE_SCORE}")];

        if input.failure_count > 0 {
            let penalty = 9 * input.failure_count as i32;
            score -= penalty;
            rationale.push(format!("-{penalty}: {} failure(s)", input.failure_count));
        }
        if input.plugin_diagnostic_count > 0 {
            let penalty = 2 * input.plugin_diagnostic_count as i32;
            score -= penalty;
            rationale.push(format!(
                "-{penalty}: {} plugin diagnostic(s)",
                input.plugin_diagnostic_count
            ));
        }
        if input.tool_call_count > TOOL_VOLUME_GRACE {
            let penalty = (input.tool_call_count - TOOL_VOLUME_GRACE) as i32;
            score -= penalty;
            rationale.push(format!(
                "-{penalty}: high tool volume ({} calls)",
                input.tool_call_count
            ));
        }
        if input.has_deep_scan {
            score += 8;
            rationale.push("+8: deep scan performed".into());
        }
        if input.has_recent_tests_passing {
            score += 6;
            rationale.push("+6: recent tests passing".into());
        }

        ConfidenceReport {
            score: score.clamp(0, 100) as u8,
            rationale,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reasoning reset
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Counts tool-call iterations per session. At the threshold the caller
/// injects a "reset reasoning" note and the counter restarts; nothing
/// else is destroyed.
pub struct ReasoningResetController {
    threshold: u32,
    counters: Mutex<HashMap<String, u32>>,
}

impl ReasoningResetController {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Record one iteration. Returns `true` when the threshold was hit
    /// (and the counter has been zeroed).
    pub fn note_iteration(&self, session_id: &str) -> bool {
        let mut counters = self.counters.lock();
        let count = counters.entry(session_id.to_owned()).or_insert(0);
        *count += 1;
        if *count >= self.threshold {
            *count = 0;
            return true;
        }
        false
    }

    /// The task concluded; forget the streak.
    pub fn note_task_resolved(&self, session_id: &str) {
        self.counters.lock().remove(session_id);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Action envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Wraps every externally visible action with identity and confidence so
/// downstream consumers can triage without replaying the run.
#[derive(Debug, Clone, Serialize)]
pub struct ActionEnvelope {
    pub action_id: Uuid,
    pub run_id: Uuid,
    pub session_id: String,
    pub action_type: String,
    pub confidence_score: u8,
    pub confidence_rationale: Vec<String>,
    /// Set when the score is low enough that a human should glance at it.
    pub requires_human_hint: bool,
    pub at: DateTime<Utc>,
}

/// Scores below this suggest human review.
const HUMAN_HINT_THRESHOLD: u8 = 55;

impl ActionEnvelope {
    pub fn wrap(
        run_id: Uuid,
        session_id: &str,
        action_type: &str,
        confidence: ConfidenceReport,
    ) -> Self {
        Self {
            action_id: Uuid::new_v4(),
            run_id,
            session_id: session_id.to_owned(),
            action_type: action_type.to_owned(),
            requires_human_hint: confidence.score < HUMAN_HINT_THRESHOLD,
            confidence_score: confidence.score,
            confidence_rationale: confidence.rationale,
            at: Utc::now(),
        }
    }
}
