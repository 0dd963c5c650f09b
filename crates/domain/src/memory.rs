//! Long-term memory records.
//!
//! Records are immutable once written: the store only ever appends them
//! or rewrites whole files during compaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who may see a record outside the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Sensitivity {
    Public,
    PrivateUser,
    Secret,
    Operational,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MemoryCategory {
    TurnSummary,
    Note,
    UserPreference,
    Observation,
    Task,
}

/// Where a record came from and how much to trust it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    pub source_channel: String,
    /// Confidence in [0, 1].
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    pub sensitivity: Sensitivity,
}

impl Provenance {
    pub fn new(source_channel: impl Into<String>, sensitivity: Sensitivity) -> Self {
        Self {
            source_channel: source_channel.into(),
            confidence: 1.0,
            timestamp: Utc::now(),
            sensitivity,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub session_id: String,
    pub category: MemoryCategory,
    pub text: String,
    pub provenance: Provenance,
}

impl MemoryRecord {
    pub fn new(
        session_id: impl Into<String>,
        category: MemoryCategory,
        text: impl Into<String>,
        provenance: Provenance,
    ) -> Self {
        Self {
            id: new_record_id(provenance.timestamp),
            session_id: session_id.into(),
            category,
            text: text.into(),
            provenance,
        }
    }

    /// Secret records never leave the core unless the reader opts in.
    pub fn is_secret(&self) -> bool {
        self.provenance.sensitivity == Sensitivity::Secret
    }
}

/// Time-sortable record id: zero-padded epoch millis + random suffix.
/// Lexicographic order equals creation order down to the millisecond.
pub fn new_record_id(at: DateTime<Utc>) -> String {
    let ms = at.timestamp_millis().max(0) as u64;
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{ms:013}-{}", &suffix[..10])
}
