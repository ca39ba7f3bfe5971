//! # cityrag
//!
//! This crate turns heterogeneous municipal asset-management records
//! (spreadsheets, PDF reports) into a queryable corpus of knowledge records,
//! and answers natural-language questions over that corpus with a fixed
//! multi-stage orchestration pipeline that always cites its sources.
//!
//! The two halves of the crate:
//!
//! 1. **Ingestion** (`ingest`, `classify`): converts tabular and long-form
//!    sources into uniform `KnowledgeRecord`s, using an LLM to partition
//!    table columns into body vs. metadata roles and to extract structured
//!    sections from document chunks.
//! 2. **Querying** (`store`, `tools`, `orchestrator`): retrieves relevant
//!    records, optionally runs spreadsheet analytics, and drives an LLM to a
//!    cited answer with bounded retries.

pub mod classify;
pub mod errors;
pub mod ingest;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod store;
pub mod tools;
pub mod types;

pub use errors::PromptError;
pub use orchestrator::{Orchestrator, NO_RELEVANT_DATA};
pub use store::{KnowledgeStore, MemoryIndex, VectorIndex};
pub use types::{AnswerResponse, KnowledgeRecord, SourceRef};

/// Tunable values consumed by the ingestion and orchestration pipelines.
///
/// The defaults mirror the reference deployment: a 32k-character context
/// window for chunking, a retrieval fan-out of 4, indexing batches of 5000,
/// 5 sample rows for column classification, at most 3 analysis tool calls
/// and 2 reasoning attempts per query.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Character budget approximating the model's context window.
    pub context_window_size: usize,
    /// Number of records fetched per search.
    pub search_k: usize,
    /// Maximum records per `index()` call.
    pub index_batch_size: usize,
    /// Rows sent to the column classifier as context.
    pub sample_rows: usize,
    /// Upper bound on analysis tool invocations per query.
    pub max_tool_calls: usize,
    /// Upper bound on reason/validate attempts per query.
    pub max_attempts: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            context_window_size: 32_000,
            search_k: 4,
            index_batch_size: 5_000,
            sample_rows: 5,
            max_tool_calls: 3,
            max_attempts: 2,
        }
    }
}

impl PipelineConfig {
    /// Character budget per document chunk, reserving headroom for the
    /// extraction output.
    pub fn chunk_size(&self) -> usize {
        self.context_window_size / 8
    }

    /// Overlap carried between consecutive chunks.
    pub fn chunk_overlap(&self) -> usize {
        self.chunk_size() / 10
    }
}
