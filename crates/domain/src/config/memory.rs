use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Memory store & compaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Records kept in MEMORY.md after compaction; exceeding this (for
    /// records old enough) triggers a compaction pass.
    #[serde(default = "d_500")]
    pub max_records: usize,
    /// Only records at least this old are eligible for compaction.
    #[serde(default = "d_7")]
    pub min_age_days: i64,
    /// Size bound for LONGMEMORY.md; the oldest summary block is evicted
    /// when an append would exceed it.
    #[serde(default = "d_60000")]
    pub long_memory_max_chars: usize,
    /// Per-record size cap enforced by the integrity scan.
    #[serde(default = "d_16000")]
    pub record_max_chars: usize,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_records: d_500(),
            min_age_days: d_7(),
            long_memory_max_chars: d_60000(),
            record_max_chars: d_16000(),
            embedding: EmbeddingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Hash-vector dimensionality.
    #[serde(default = "d_128")]
    pub dimensions: usize,
    /// Index is trimmed to this many entries, newest `updated_at` kept.
    #[serde(default = "d_2000")]
    pub max_records: usize,
    /// Include `sensitivity = secret` records in the index and results.
    #[serde(default)]
    pub allow_secret: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimensions: d_128(),
            max_records: d_2000(),
            allow_secret: false,
        }
    }
}

fn d_500() -> usize {
    500
}
fn d_7() -> i64 {
    7
}
fn d_60000() -> usize {
    60_000
}
fn d_16000() -> usize {
    16_000
}
fn d_128() -> usize {
    128
}
fn d_2000() -> usize {
    2_000
}
