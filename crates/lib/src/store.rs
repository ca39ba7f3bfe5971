//! # Knowledge Store
//!
//! The boundary between the pipelines and the vector search capability. The
//! store owns batching policy on the write path and fan-out on the read
//! path; the embedding and ranking work itself lives behind the
//! `VectorIndex` trait. The store is append-only for the life of the
//! process: records are indexed once and never updated in place.

use crate::types::KnowledgeRecord;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Index operation failed: {0}")]
    Index(String),
    #[error("Search operation failed: {0}")]
    Search(String),
}

/// The opaque index/search capability.
///
/// Implementations must be safe for concurrent read and append; the store
/// adds no locking of its own.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Adds records to the index.
    async fn index(&self, records: &[KnowledgeRecord]) -> Result<(), StoreError>;
    /// Returns up to `k` records ranked by relevance to `query`.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<KnowledgeRecord>, StoreError>;
}

/// Accepts knowledge records and forwards them to the index in bounded
/// batches; exposes search to the orchestration layer.
#[derive(Clone)]
pub struct KnowledgeStore {
    index: Arc<dyn VectorIndex>,
    batch_size: usize,
}

impl KnowledgeStore {
    pub fn new(index: Arc<dyn VectorIndex>, batch_size: usize) -> Self {
        Self { index, batch_size }
    }

    /// Indexes `records`, splitting the write into groups of at most the
    /// configured batch size so no single call carries an unbounded payload.
    pub async fn add(&self, records: Vec<KnowledgeRecord>) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let total = records.len();
        for batch in records.chunks(self.batch_size) {
            debug!("Indexing batch of {} records", batch.len());
            self.index.index(batch).await?;
        }
        info!("Indexed {total} records");
        Ok(())
    }

    /// Returns up to `k` records relevant to `query`.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<KnowledgeRecord>, StoreError> {
        self.index.search(query, k).await
    }
}

/// An in-process lexical index.
///
/// Scores records by term overlap with the query. This keeps the
/// `VectorIndex` boundary honest for local runs and tests without an
/// external embedding service; a production deployment plugs a real vector
/// backend into the same trait.
#[derive(Default)]
pub struct MemoryIndex {
    records: RwLock<Vec<KnowledgeRecord>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn index(&self, records: &[KnowledgeRecord]) -> Result<(), StoreError> {
        self.records.write().await.extend_from_slice(records);
        Ok(())
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<KnowledgeRecord>, StoreError> {
        let query_terms: HashSet<String> = tokenize(query).collect();
        let records = self.records.read().await;

        let mut scored: Vec<(usize, &KnowledgeRecord)> = records
            .iter()
            .map(|r| {
                let score = tokenize(&r.content)
                    .filter(|t| query_terms.contains(t))
                    .count();
                (score, r)
            })
            .filter(|(score, _)| *score > 0)
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored.into_iter().take(k).map(|(_, r)| r.clone()).collect())
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}
