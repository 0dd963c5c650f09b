//! Append-only memory store.
//!
//! `MEMORY.md` starts with a short front-matter header; every record after
//! it is one JSON line. Lines that do not start with `{` (the header, the
//! compaction marker) are ignored by readers. Appends are serialized by an
//! in-process write chain; a truncated final line (crash mid-append) is
//! tolerated on read.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use perch_domain::config::MemoryConfig;
use perch_domain::memory::{MemoryCategory, MemoryRecord};
use perch_domain::trace::TraceEvent;
use perch_domain::{Error, Result};
use perch_store::ProfilePaths;

pub(crate) const MEMORY_HEADER: &str = "# MEMORY.md — Long-term memory\n\n---\n\n";

/// Filter for [`MemoryStore::read_all`].
#[derive(Debug, Clone, Default)]
pub struct ReadFilter {
    /// Only records with `provenance.timestamp >= since`.
    pub since: Option<DateTime<Utc>>,
    pub category: Option<MemoryCategory>,
    /// Keep only the newest `limit` records after filtering.
    pub limit: Option<usize>,
    /// Include `sensitivity = secret` records. Off by default.
    pub allow_secret: bool,
}

pub struct MemoryStore {
    paths: ProfilePaths,
    config: MemoryConfig,
    /// Serializes every write to MEMORY.md and the daily logs.
    pub(crate) write_chain: Mutex<()>,
}

impl MemoryStore {
    pub fn new(paths: ProfilePaths, config: MemoryConfig) -> Self {
        Self {
            paths,
            config,
            write_chain: Mutex::new(()),
        }
    }

    pub fn paths(&self) -> &ProfilePaths {
        &self.paths
    }

    pub(crate) fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Serialize a record to its canonical single-line form.
    pub fn to_line(record: &MemoryRecord) -> Result<String> {
        Ok(serde_json::to_string(record)?)
    }

    /// Append one record durably. Returns after the write has landed in
    /// both `MEMORY.md` and the per-day log.
    pub async fn append(&self, record: &MemoryRecord) -> Result<()> {
        if record.text.trim().is_empty() {
            return Err(Error::SchemaInvalid("memory record text is empty".into()));
        }
        if self.compaction_lock_held() {
            return Err(Error::Transient("memory compaction in progress".into()));
        }

        let line = Self::to_line(record)?;
        let memory_path = self.paths.memory_file();
        let daily_path = self.paths.daily_file(record.provenance.timestamp.date_naive());

        let _guard = self.write_chain.lock().await;
        let line_clone = line.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            append_line(&memory_path, &line_clone, Some(MEMORY_HEADER))?;
            append_line(&daily_path, &line_clone, None)?;
            Ok(())
        })
        .await
        .map_err(|e| Error::Fatal(format!("append task panicked: {e}")))??;

        TraceEvent::MemoryAppended {
            session_id: record.session_id.clone(),
            category: format!("{:?}", record.category),
            chars: record.text.len(),
        }
        .emit();

        Ok(())
    }

    /// Read records, oldest first. Read errors yield an empty vec — the
    /// store is best-effort for reads.
    pub async fn read_all(&self, filter: &ReadFilter) -> Vec<MemoryRecord> {
        let path = self.paths.memory_file();
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(error = %e, "memory read failed; returning empty");
                }
                return Vec::new();
            }
        };

        let mut records: Vec<MemoryRecord> = parse_records(&raw)
            .into_iter()
            .filter(|r| filter.allow_secret || !r.is_secret())
            .filter(|r| filter.since.map_or(true, |s| r.provenance.timestamp >= s))
            .filter(|r| filter.category.map_or(true, |c| r.category == c))
            .collect();

        if let Some(limit) = filter.limit {
            if records.len() > limit {
                records.drain(..records.len() - limit);
            }
        }
        records
    }

    /// Raw lines of MEMORY.md (header included), for the integrity scan.
    pub(crate) async fn raw_lines(&self) -> Result<Vec<String>> {
        let path = self.paths.memory_file();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = tokio::fs::read_to_string(&path).await?;
        Ok(raw.lines().map(str::to_owned).collect())
    }

    pub(crate) fn compaction_lock_held(&self) -> bool {
        self.paths.compaction_lock_file().exists()
    }
}

/// Append a line, writing `header` first when the file does not exist yet.
fn append_line(path: &PathBuf, line: &str, header: Option<&str>) -> Result<()> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let fresh = !path.exists();
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    if fresh {
        if let Some(header) = header {
            file.write_all(header.as_bytes())?;
        }
    }
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}

/// Parse JSON-looking lines, skipping header/marker lines and tolerating a
/// truncated tail.
pub fn parse_records(raw: &str) -> Vec<MemoryRecord> {
    raw.lines()
        .filter(|l| l.trim_start().starts_with('{'))
        .filter_map(|l| serde_json::from_str::<MemoryRecord>(l).ok())
        .collect()
}
