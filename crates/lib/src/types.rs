//! # Shared Data Types
//!
//! The core data model shared between ingestion, storage, and the query
//! orchestrator: the knowledge record that gets indexed, and the final
//! answer shape returned to callers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One retrievable unit of content + metadata.
///
/// `content` is the text intended for semantic embedding. `metadata` always
/// carries `filename` and `last_updated`, plus whatever structured fields
/// the ingestor extracted. Records are immutable once created; re-ingesting
/// a source produces fresh records with fresh ids.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeRecord {
    pub id: String,
    pub content: String,
    pub metadata: BTreeMap<String, String>,
}

impl KnowledgeRecord {
    /// The source citation for this record, read from its metadata.
    ///
    /// Records produced by our own ingestors always carry both fields;
    /// missing values degrade to empty strings rather than failing a query.
    pub fn citation(&self) -> Citation {
        Citation {
            filename: self
                .metadata
                .get("filename")
                .cloned()
                .unwrap_or_default(),
            last_updated: self
                .metadata
                .get("last_updated")
                .cloned()
                .unwrap_or_default(),
        }
    }
}

/// A `(filename, last_updated)` pair attached to a factual claim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Citation {
    pub filename: String,
    pub last_updated: String,
}

/// One entry in the `sources` list of a final answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRef {
    pub filename: String,
    #[serde(rename = "lastUpdated")]
    pub last_updated: String,
    /// Placeholder link; callers that implement source linking replace it.
    pub href: String,
}

impl From<Citation> for SourceRef {
    fn from(c: Citation) -> Self {
        SourceRef {
            filename: c.filename,
            last_updated: c.last_updated,
            href: "#".to_string(),
        }
    }
}

/// The final response shape for a single question.
///
/// `sources` is always present, even when empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub response: String,
    pub sources: Vec<SourceRef>,
}
