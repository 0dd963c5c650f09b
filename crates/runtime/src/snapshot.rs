//! Optional turn debug snapshots.
//!
//! When a snapshot directory is configured, every finished turn writes a
//! single JSON file with its inputs, tool calls, and final text, for
//! post-hoc inspection. Snapshots are diagnostics, not state: failures
//! are logged and swallowed.

use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use perch_domain::tool::{Message, ToolCall};
use perch_store::snapshot::save_json;

#[derive(Debug, Serialize)]
pub struct TurnSnapshot<'a> {
    pub run_id: Uuid,
    pub session_id: &'a str,
    pub status: &'a str,
    pub input_messages: &'a [Message],
    pub tool_calls: &'a [ToolCall],
    pub final_text: &'a str,
    pub at: chrono::DateTime<Utc>,
}

pub struct SnapshotWriter {
    dir: PathBuf,
}

impl SnapshotWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn write(&self, snapshot: &TurnSnapshot<'_>) {
        let path = self.dir.join(format!(
            "{}-{}.json",
            snapshot.at.format("%Y%m%dT%H%M%S"),
            snapshot.run_id
        ));
        if let Err(e) = save_json(&path, snapshot) {
            tracing::warn!(error = %e, run_id = %snapshot.run_id, "turn snapshot write failed");
        }
    }
}
