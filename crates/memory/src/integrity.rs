//! Read-only memory audit.
//!
//! Produces findings without ever mutating the store. Takes the compaction
//! lock so it never reads a half-rewritten file.

use std::collections::HashSet;

use chrono::Utc;
use serde::Serialize;

use perch_domain::memory::MemoryRecord;
use perch_domain::trace::TraceEvent;
use perch_domain::{Error, Result};
use perch_store::FileLock;

use crate::store::MemoryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityIssue {
    UnparseableLine,
    DuplicateId,
    FutureTimestamp,
    MissingProvenance,
    OversizedRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityFinding {
    pub issue: IntegrityIssue,
    /// 1-based line number in MEMORY.md.
    pub line: usize,
    pub detail: String,
}

impl MemoryStore {
    /// Scan MEMORY.md and report every malformed line or suspect record.
    ///
    /// Returns `Transient` when compaction holds the lock; callers retry
    /// on the next scheduled scan.
    pub async fn integrity_scan(&self) -> Result<Vec<IntegrityFinding>> {
        let lock = FileLock::try_acquire(&self.paths().compaction_lock_file())?
            .ok_or_else(|| Error::Transient("memory compaction in progress".into()))?;

        let lines = self.raw_lines().await?;
        let findings = scan_lines(&lines, self.config().record_max_chars);
        drop(lock);

        TraceEvent::IntegrityScanned { findings: findings.len() }.emit();
        Ok(findings)
    }
}

fn scan_lines(lines: &[String], record_max_chars: usize) -> Vec<IntegrityFinding> {
    let now = Utc::now();
    let mut findings = Vec::new();
    let mut seen_ids: HashSet<String> = HashSet::new();

    for (idx, line) in lines.iter().enumerate() {
        let line_no = idx + 1;
        if !line.trim_start().starts_with('{') {
            continue; // header or marker line
        }

        let record: MemoryRecord = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                findings.push(IntegrityFinding {
                    issue: IntegrityIssue::UnparseableLine,
                    line: line_no,
                    detail: e.to_string(),
                });
                continue;
            }
        };

        if !seen_ids.insert(record.id.clone()) {
            findings.push(IntegrityFinding {
                issue: IntegrityIssue::DuplicateId,
                line: line_no,
                detail: record.id.clone(),
            });
        }

        if record.provenance.timestamp > now {
            findings.push(IntegrityFinding {
                issue: IntegrityIssue::FutureTimestamp,
                line: line_no,
                detail: record.provenance.timestamp.to_rfc3339(),
            });
        }

        let confidence = record.provenance.confidence;
        if record.provenance.source_channel.is_empty() || !(0.0..=1.0).contains(&confidence) {
            findings.push(IntegrityFinding {
                issue: IntegrityIssue::MissingProvenance,
                line: line_no,
                detail: format!(
                    "source_channel=\"{}\" confidence={confidence}",
                    record.provenance.source_channel
                ),
            });
        }

        if line.len() > record_max_chars {
            findings.push(IntegrityFinding {
                issue: IntegrityIssue::OversizedRecord,
                line: line_no,
                detail: format!("{} chars", line.len()),
            });
        }
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ReadFilter;
    use perch_domain::config::MemoryConfig;
    use perch_domain::memory::{MemoryCategory, Provenance, Sensitivity};
    use perch_store::ProfilePaths;

    fn test_store(dir: &std::path::Path) -> MemoryStore {
        MemoryStore::new(ProfilePaths::new(dir), MemoryConfig::default())
    }

    fn record(text: &str) -> MemoryRecord {
        MemoryRecord::new(
            "s1",
            MemoryCategory::Note,
            text,
            Provenance::new("test", Sensitivity::Public),
        )
    }

    #[tokio::test]
    async fn clean_store_has_no_findings() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());
        for text in ["one", "two", "three"] {
            store.append(&record(text)).await.unwrap();
        }
        let findings = store.integrity_scan().await.unwrap();
        assert!(findings.is_empty(), "unexpected findings: {findings:?}");
    }

    #[tokio::test]
    async fn scan_never_mutates() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());
        store.append(&record("keep me")).await.unwrap();
        let before = std::fs::read_to_string(store.paths().memory_file()).unwrap();

        store.integrity_scan().await.unwrap();

        let after = std::fs::read_to_string(store.paths().memory_file()).unwrap();
        assert_eq!(before, after);
        let records = store.read_all(&ReadFilter::default()).await;
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn flags_unparseable_and_duplicates() {
        let good = serde_json::to_string(&record("ok")).unwrap();
        let mut dup = record("dup");
        dup.id = "fixed-id".into();
        let dup_line = serde_json::to_string(&dup).unwrap();

        let lines: Vec<String> = vec![
            "# MEMORY.md — Long-term memory".into(),
            good,
            "{\"id\": broken".into(),
            dup_line.clone(),
            dup_line,
        ];
        let findings = scan_lines(&lines, 16_000);
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].issue, IntegrityIssue::UnparseableLine);
        assert_eq!(findings[1].issue, IntegrityIssue::DuplicateId);
        assert_eq!(findings[1].line, 5);
    }

    #[test]
    fn flags_future_timestamps_and_bad_provenance() {
        let mut future = record("from tomorrow");
        future.provenance.timestamp = Utc::now() + chrono::Duration::days(2);
        let mut anonymous = record("who said this");
        anonymous.provenance.source_channel = String::new();
        anonymous.provenance.confidence = 1.5;

        let lines = vec![
            serde_json::to_string(&future).unwrap(),
            serde_json::to_string(&anonymous).unwrap(),
        ];
        let findings = scan_lines(&lines, 16_000);
        let issues: Vec<IntegrityIssue> = findings.iter().map(|f| f.issue).collect();
        assert!(issues.contains(&IntegrityIssue::FutureTimestamp));
        assert!(issues.contains(&IntegrityIssue::MissingProvenance));
    }

    #[test]
    fn flags_oversized_records() {
        let lines = vec![serde_json::to_string(&record(&"x".repeat(500))).unwrap()];
        let findings = scan_lines(&lines, 200);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].issue, IntegrityIssue::OversizedRecord);
    }

    #[tokio::test]
    async fn scan_defers_to_compaction_lock() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());
        let lock_path = store.paths().compaction_lock_file();
        std::fs::create_dir_all(lock_path.parent().unwrap()).unwrap();
        std::fs::write(&lock_path, b"").unwrap();

        let err = store.integrity_scan().await.unwrap_err();
        assert!(matches!(err, Error::Transient(_)));
        assert!(lock_path.exists(), "foreign lock must be left in place");
    }
}
