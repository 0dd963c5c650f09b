//! The profile-root directory layout.
//!
//! All durable state for one agent identity lives under a single
//! `profile_root`:
//!
//! ```text
//! MEMORY.md                     # append-only line-JSON after a header
//! LONGMEMORY.md                 # compacted long-term summaries
//! memory/YYYY-MM-DD.md          # per-day logs
//! memory-embeddings.json        # vector index
//! autonomy-state.json           # budget + intents snapshot
//! cron-state.json               # cron jobs + next_run_at
//! workflow-state/<id>.json      # per-workflow checkpoints
//! queues/<sanitized-session>.json
//! tmp/memory-compaction.lock
//! snapshots/                    # optional turn debug snapshots
//! ```

use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use perch_domain::session::sanitize_session_id;

#[derive(Debug, Clone)]
pub struct ProfilePaths {
    root: PathBuf,
}

impl ProfilePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn memory_file(&self) -> PathBuf {
        self.root.join("MEMORY.md")
    }

    pub fn long_memory_file(&self) -> PathBuf {
        self.root.join("LONGMEMORY.md")
    }

    pub fn daily_file(&self, date: NaiveDate) -> PathBuf {
        self.root
            .join("memory")
            .join(format!("{}.md", date.format("%Y-%m-%d")))
    }

    pub fn embeddings_file(&self) -> PathBuf {
        self.root.join("memory-embeddings.json")
    }

    pub fn autonomy_state_file(&self) -> PathBuf {
        self.root.join("autonomy-state.json")
    }

    pub fn cron_state_file(&self) -> PathBuf {
        self.root.join("cron-state.json")
    }

    pub fn workflow_state_file(&self, workflow_id: &str) -> PathBuf {
        self.root
            .join("workflow-state")
            .join(format!("{}.json", sanitize_session_id(workflow_id)))
    }

    pub fn queue_file(&self, session_id: &str) -> PathBuf {
        self.root
            .join("queues")
            .join(format!("{}.json", sanitize_session_id(session_id)))
    }

    pub fn compaction_lock_file(&self) -> PathBuf {
        self.root.join("tmp").join("memory-compaction.lock")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join("snapshots")
    }
}
