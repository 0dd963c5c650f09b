//! Hash bag-of-words embedding index.
//!
//! No model calls: each record's text is tokenized and folded into a fixed
//! number of dimensions by hashing tokens, then L2-normalized. Cosine
//! similarity over these vectors is crude but dependency-free and good
//! enough for "which memories mention this" recall.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use perch_domain::config::EmbeddingConfig;
use perch_domain::memory::MemoryRecord;
use perch_domain::trace::TraceEvent;
use perch_domain::Result;
use perch_store::snapshot::{load_json, save_json};

const MAX_TOKENS_PER_DOC: usize = 2000;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    record_id: String,
    session_id: String,
    text: String,
    secret: bool,
    vector: Vec<f32>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingHit {
    pub record_id: String,
    pub session_id: String,
    pub text: String,
    pub score: f32,
}

pub struct MemoryEmbeddingIndex {
    path: PathBuf,
    config: EmbeddingConfig,
    entries: RwLock<Vec<IndexEntry>>,
    /// Serializes snapshot writes so concurrent upserts cannot interleave
    /// a stale file over a newer one.
    write_chain: Mutex<()>,
}

impl MemoryEmbeddingIndex {
    /// Open the index at `path`, loading any persisted entries.
    pub fn open(path: PathBuf, config: EmbeddingConfig) -> Result<Self> {
        let entries: Vec<IndexEntry> = load_json(&path)?.unwrap_or_default();
        Ok(Self {
            path,
            config,
            entries: RwLock::new(entries),
            write_chain: Mutex::new(()),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Index (or re-index) one record and persist the snapshot.
    ///
    /// Secret records are skipped entirely unless the index was configured
    /// with `allow_secret`; they must never be retrievable by accident.
    pub async fn upsert(&self, record: &MemoryRecord) -> Result<()> {
        if record.is_secret() && !self.config.allow_secret {
            return Ok(());
        }

        let vector = embed(&record.text, self.config.dimensions);
        let entry = IndexEntry {
            record_id: record.id.clone(),
            session_id: record.session_id.clone(),
            text: record.text.clone(),
            secret: record.is_secret(),
            vector,
            updated_at: Utc::now(),
        };

        let snapshot = {
            let mut entries = self.entries.write();
            entries.retain(|e| e.record_id != entry.record_id);
            entries.push(entry);
            // Trim to capacity, newest updated_at kept.
            if entries.len() > self.config.max_records {
                entries.sort_by_key(|e| e.updated_at);
                let excess = entries.len() - self.config.max_records;
                entries.drain(..excess);
            }
            entries.clone()
        };

        let _guard = self.write_chain.lock().await;
        save_json(&self.path, &snapshot)?;

        TraceEvent::EmbeddingIndexed {
            record_id: record.id.clone(),
            dimensions: self.config.dimensions,
        }
        .emit();
        Ok(())
    }

    /// Rank indexed records against `query` by cosine similarity,
    /// returning up to `top_k` hits with score > 0.
    pub fn query(&self, query: &str, top_k: usize) -> Vec<EmbeddingHit> {
        let qvec = embed(query, self.config.dimensions);
        let entries = self.entries.read();

        let mut hits: Vec<EmbeddingHit> = entries
            .iter()
            .filter(|e| self.config.allow_secret || !e.secret)
            .filter_map(|e| {
                let score = dot(&qvec, &e.vector);
                (score > 0.0).then(|| EmbeddingHit {
                    record_id: e.record_id.clone(),
                    session_id: e.session_id.clone(),
                    text: e.text.clone(),
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        hits
    }
}

/// Lowercase, split on non-alphanumerics, drop tokens shorter than 2,
/// cap at [`MAX_TOKENS_PER_DOC`].
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(|t| t.to_lowercase())
        .take(MAX_TOKENS_PER_DOC)
}

/// Fold tokens into `dimensions` buckets and L2-normalize.
fn embed(text: &str, dimensions: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimensions];
    for token in tokenize(text) {
        vector[token_bucket(&token, dimensions)] += 1.0;
    }
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

fn token_bucket(token: &str, dimensions: usize) -> usize {
    let digest = Sha256::digest(token.as_bytes());
    let mut first = [0u8; 8];
    first.copy_from_slice(&digest[..8]);
    (u64::from_le_bytes(first) % dimensions as u64) as usize
}

/// Both inputs are normalized, so the dot product is the cosine.
fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use perch_domain::memory::{MemoryCategory, Provenance, Sensitivity};

    fn record(text: &str) -> MemoryRecord {
        MemoryRecord::new(
            "s1",
            MemoryCategory::Note,
            text,
            Provenance::new("test", Sensitivity::Public),
        )
    }

    fn test_index(dir: &std::path::Path) -> MemoryEmbeddingIndex {
        MemoryEmbeddingIndex::open(
            dir.join("memory-embeddings.json"),
            EmbeddingConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn overlapping_tokens_score_positive() {
        let dir = tempfile::tempdir().unwrap();
        let index = test_index(dir.path());
        index.upsert(&record("deploys happen on fridays")).await.unwrap();

        let hits = index.query("when do deploys happen", 5);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score > 0.0);
    }

    #[tokio::test]
    async fn disjoint_tokens_score_zero() {
        let dir = tempfile::tempdir().unwrap();
        let index = test_index(dir.path());
        index.upsert(&record("kernel upgrade checklist")).await.unwrap();

        let hits = index.query("favorite pizza topping", 5);
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn best_match_ranks_first() {
        let dir = tempfile::tempdir().unwrap();
        let index = test_index(dir.path());
        index
            .upsert(&record("user prefers deployment on Fridays"))
            .await
            .unwrap();
        index.upsert(&record("likes green tea in the morning")).await.unwrap();
        index.upsert(&record("timezone is Europe/Stockholm")).await.unwrap();

        let hits = index.query("deployment preferences", 2);
        assert!(!hits.is_empty());
        assert!(hits[0].text.contains("Fridays"));
        assert!(hits[0].score > 0.0);
    }

    #[tokio::test]
    async fn secret_records_never_indexed_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let index = test_index(dir.path());
        let mut secret = record("production database password rotation");
        secret.provenance.sensitivity = Sensitivity::Secret;
        index.upsert(&secret).await.unwrap();

        assert!(index.is_empty());
        assert!(index.query("database password", 5).is_empty());
    }

    #[tokio::test]
    async fn allow_secret_opts_in() {
        let dir = tempfile::tempdir().unwrap();
        let config = EmbeddingConfig { allow_secret: true, ..Default::default() };
        let index =
            MemoryEmbeddingIndex::open(dir.path().join("emb.json"), config).unwrap();
        let mut secret = record("vault unseal procedure");
        secret.provenance.sensitivity = Sensitivity::Secret;
        index.upsert(&secret).await.unwrap();

        assert_eq!(index.query("vault unseal", 5).len(), 1);
    }

    #[tokio::test]
    async fn upsert_replaces_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("emb.json");
        {
            let index =
                MemoryEmbeddingIndex::open(path.clone(), EmbeddingConfig::default()).unwrap();
            let mut rec = record("original text");
            index.upsert(&rec).await.unwrap();
            rec.text = "replacement text".into();
            index.upsert(&rec).await.unwrap();
            assert_eq!(index.len(), 1);
        }

        // Reopen from disk.
        let reopened = MemoryEmbeddingIndex::open(path, EmbeddingConfig::default()).unwrap();
        assert_eq!(reopened.len(), 1);
        let hits = reopened.query("replacement", 5);
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn index_trims_to_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let config = EmbeddingConfig { max_records: 3, ..Default::default() };
        let index =
            MemoryEmbeddingIndex::open(dir.path().join("emb.json"), config).unwrap();

        for i in 0..5 {
            index.upsert(&record(&format!("entry number {i}"))).await.unwrap();
        }
        assert_eq!(index.len(), 3);
        // The oldest entries were dropped.
        assert!(index.query("entry number 0", 5).iter().all(|h| !h.text.ends_with("0")));
    }

    #[test]
    fn tokenizer_rules() {
        let tokens: Vec<String> = tokenize("A quick-brown FOX! x 42").collect();
        assert_eq!(tokens, ["quick", "brown", "fox", "42"]);
    }

    #[test]
    fn embed_is_normalized() {
        let v = embed("some repeated words some repeated words", 64);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }
}
