//! Memory compaction.
//!
//! When MEMORY.md holds more than `max_records` records, everything older
//! than `min_age_days` is merged into a summary block appended to
//! LONGMEMORY.md, and MEMORY.md is rewritten with the survivors plus a
//! marker line. LONGMEMORY.md is bounded: the oldest summary block is
//! evicted when an append would exceed `long_memory_max_chars`.

use chrono::{Duration, Utc};
use serde::Serialize;

use perch_domain::memory::MemoryRecord;
use perch_domain::trace::TraceEvent;
use perch_domain::Result;
use perch_store::FileLock;

use crate::store::{parse_records, MemoryStore, MEMORY_HEADER};

/// Marker blocks start with this prefix so eviction can split on them.
const SUMMARY_PREFIX: &str = "## Summary ";

#[derive(Debug, Clone, Serialize)]
pub struct CompactionCheck {
    pub should_run: bool,
    pub record_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompactionOutcome {
    pub ran: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub records_compacted: usize,
    pub records_after: usize,
}

impl CompactionOutcome {
    fn skipped(reason: &str) -> Self {
        Self {
            ran: false,
            reason: Some(reason.into()),
            records_compacted: 0,
            records_after: 0,
        }
    }
}

impl MemoryStore {
    /// Cheap threshold probe used by the orchestrator between full runs.
    pub async fn compaction_check(&self) -> CompactionCheck {
        let count = self
            .read_all(&crate::store::ReadFilter { allow_secret: true, ..Default::default() })
            .await
            .len();
        CompactionCheck {
            should_run: count > self.config().max_records,
            record_count: count,
        }
    }

    /// Run one compaction pass. Returns `{ran: false, reason: "lock held"}`
    /// when another process owns the lock, and is a no-op when the store is
    /// under threshold — so calling it twice back-to-back is safe.
    pub async fn compact(&self) -> Result<CompactionOutcome> {
        let Some(lock) = FileLock::try_acquire(&self.paths().compaction_lock_file())? else {
            return Ok(CompactionOutcome::skipped("lock held"));
        };

        let _guard = self.write_chain.lock().await;

        let raw = match tokio::fs::read_to_string(self.paths().memory_file()).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CompactionOutcome::skipped("no memory file"));
            }
            Err(e) => return Err(e.into()),
        };
        let records = parse_records(&raw);

        if records.len() <= self.config().max_records {
            return Ok(CompactionOutcome::skipped("under threshold"));
        }

        let cutoff = Utc::now() - Duration::days(self.config().min_age_days);
        let (old, recent): (Vec<MemoryRecord>, Vec<MemoryRecord>) = records
            .into_iter()
            .partition(|r| r.provenance.timestamp < cutoff);

        if old.is_empty() {
            return Ok(CompactionOutcome::skipped("nothing old enough"));
        }

        // Keep the newest max_records of the survivors.
        let mut kept = recent;
        let max = self.config().max_records;
        if kept.len() > max {
            kept.drain(..kept.len() - max);
        }

        self.append_long_memory(&old).await?;

        // Rewrite MEMORY.md: header, marker, survivors.
        let marker = format!(
            "<!-- compacted {} records into LONGMEMORY.md at {} -->",
            old.len(),
            Utc::now().to_rfc3339(),
        );
        let mut out = String::from(MEMORY_HEADER);
        out.push_str(&marker);
        out.push('\n');
        for record in &kept {
            out.push_str(&Self::to_line(record)?);
            out.push('\n');
        }
        let tmp = self.paths().memory_file().with_extension("md.tmp");
        tokio::fs::write(&tmp, out.as_bytes()).await?;
        tokio::fs::rename(&tmp, self.paths().memory_file()).await?;

        drop(lock);

        let outcome = CompactionOutcome {
            ran: true,
            reason: None,
            records_compacted: old.len(),
            records_after: kept.len(),
        };
        TraceEvent::MemoryCompacted {
            records_compacted: outcome.records_compacted,
            records_after: outcome.records_after,
        }
        .emit();
        Ok(outcome)
    }

    /// Append a merged summary block to LONGMEMORY.md, evicting the oldest
    /// blocks while the file would exceed `long_memory_max_chars`.
    async fn append_long_memory(&self, old: &[MemoryRecord]) -> Result<()> {
        let first = old.first().map(|r| r.provenance.timestamp.date_naive());
        let last = old.last().map(|r| r.provenance.timestamp.date_naive());
        let range = match (first, last) {
            (Some(a), Some(b)) if a != b => format!("{a} – {b}"),
            (Some(a), _) => a.to_string(),
            _ => Utc::now().date_naive().to_string(),
        };

        let mut block = format!("{SUMMARY_PREFIX}{range} ({} records)\n\n", old.len());
        for record in old {
            block.push_str(&format!(
                "- [{}] {}\n",
                record.provenance.source_channel, record.text
            ));
        }
        block.push('\n');

        let path = self.paths().long_memory_file();
        let existing = match tokio::fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let mut blocks: Vec<&str> = split_summary_blocks(&existing);
        let cap = self.config().long_memory_max_chars;
        let mut total: usize = blocks.iter().map(|b| b.len()).sum::<usize>() + block.len();
        let mut start = 0;
        while total > cap && start < blocks.len() {
            total -= blocks[start].len();
            start += 1;
        }
        blocks.drain(..start);

        let mut out = String::with_capacity(total);
        for b in blocks {
            out.push_str(b);
        }
        out.push_str(&block);

        let tmp = path.with_extension("md.tmp");
        tokio::fs::write(&tmp, out.as_bytes()).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

/// Split LONGMEMORY.md into its summary blocks (each starts at a
/// `## Summary ` heading). Content before the first heading sticks to the
/// first block.
fn split_summary_blocks(content: &str) -> Vec<&str> {
    if content.is_empty() {
        return Vec::new();
    }
    let mut starts: Vec<usize> = Vec::new();
    for (offset, _) in content.match_indices(SUMMARY_PREFIX) {
        if offset == 0 || content.as_bytes()[offset - 1] == b'\n' {
            starts.push(offset);
        }
    }
    if starts.is_empty() {
        return vec![content];
    }
    if starts[0] != 0 {
        starts.insert(0, 0);
    }
    starts
        .windows(2)
        .map(|w| &content[w[0]..w[1]])
        .chain(std::iter::once(&content[*starts.last().unwrap_or(&0)..]))
        .collect()
}
