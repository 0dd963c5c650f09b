//! Long-term memory: the append-only record store, its integrity scan,
//! compaction into LONGMEMORY.md, and the hash-embedding index.

pub mod compact;
pub mod embedding;
pub mod integrity;
pub mod store;

pub use compact::{CompactionCheck, CompactionOutcome};
pub use embedding::{EmbeddingHit, MemoryEmbeddingIndex};
pub use integrity::{IntegrityFinding, IntegrityIssue};
pub use store::{parse_records, MemoryStore, ReadFilter};
