//! # Document Chunking and Structured Extraction
//!
//! Splits a long text document into overlapping windows sized to the
//! configured capacity budget, submits each window independently to the
//! structured-extraction capability, and turns each well-formed response
//! into one knowledge record. A malformed chunk response gets one retry and
//! is then dropped; the rest of the document still makes forward progress.

use super::IngestError;
use crate::{
    prompts::CHUNK_EXTRACTION_SYSTEM_PROMPT, providers::ai::AiProvider, types::KnowledgeRecord,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};
use uuid::Uuid;

/// Attempts allowed per chunk: the initial call plus one retry.
const MAX_CHUNK_ATTEMPTS: u32 = 2;

/// Overlapping `[start, end)` character windows covering `[0, doc_len)`.
///
/// Window `i` starts at `min(chunk_size*i, |chunk_size*i - overlap|)` so the
/// first window is pinned to 0 while every later window reaches back by
/// `overlap` characters.
pub fn chunk_windows(doc_len: usize, chunk_size: usize, overlap: usize) -> Vec<(usize, usize)> {
    if chunk_size == 0 {
        return vec![(0, doc_len)];
    }
    let count = doc_len / chunk_size + 1;
    (0..count)
        .map(|i| {
            let base = chunk_size * i;
            let start = base.min(base.abs_diff(overlap));
            let end = doc_len.min(chunk_size * (i + 1));
            (start, end)
        })
        .collect()
}

// --- The structured-extraction response contract ---

#[derive(Deserialize, Debug)]
struct ExtractedChunk {
    metadata: ChunkMetadata,
    page_content: ChunkBody,
}

#[derive(Deserialize, Debug)]
struct ChunkMetadata {
    #[serde(default)]
    service_area: String,
    #[serde(default)]
    topic: String,
    #[serde(default)]
    data_type: String,
}

#[derive(Deserialize, Debug)]
struct ChunkBody {
    #[serde(default)]
    context_header: String,
    #[serde(default)]
    content_body: String,
    #[serde(default)]
    key_metrics: Vec<String>,
}

/// Converts a long-form text source into knowledge records, one per
/// successfully extracted chunk.
pub struct DocumentExtractor<'a> {
    ai_provider: &'a dyn AiProvider,
}

impl<'a> DocumentExtractor<'a> {
    pub fn new(ai_provider: &'a dyn AiProvider) -> Self {
        Self { ai_provider }
    }

    /// Extracts records from `raw_text`, stamping each with `filename` and
    /// `last_updated`.
    ///
    /// Each chunk carries its own retry budget; a chunk that stays
    /// unparseable is dropped without affecting its neighbors. Chunk outputs
    /// are never merged or reordered.
    pub async fn extract(
        &self,
        raw_text: &str,
        filename: &str,
        last_updated: &str,
        chunk_size: usize,
        overlap: usize,
    ) -> Result<Vec<KnowledgeRecord>, IngestError> {
        if raw_text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let chars: Vec<char> = raw_text.chars().collect();
        let windows = chunk_windows(chars.len(), chunk_size, overlap);
        debug!(
            "Extracting {} in {} chunks of up to {} characters",
            filename,
            windows.len(),
            chunk_size
        );

        let mut records = Vec::new();
        for (index, (start, end)) in windows.into_iter().enumerate() {
            let chunk_text: String = chars[start..end].iter().collect();
            if chunk_text.trim().is_empty() {
                continue;
            }

            match self.extract_chunk(&chunk_text, index).await? {
                Some(extracted) => {
                    if let Some(record) = build_record(extracted, filename, last_updated) {
                        records.push(record);
                    }
                }
                None => warn!("Dropping chunk {index} of {filename} after retry"),
            }
        }
        Ok(records)
    }

    /// Runs one chunk through the extraction capability with its own
    /// attempt budget. `None` means the chunk was dropped as unparseable;
    /// transport failures still propagate.
    async fn extract_chunk(
        &self,
        chunk_text: &str,
        index: usize,
    ) -> Result<Option<ExtractedChunk>, IngestError> {
        for attempt in 1..=MAX_CHUNK_ATTEMPTS {
            let llm_response = self
                .ai_provider
                .generate(CHUNK_EXTRACTION_SYSTEM_PROMPT, chunk_text)
                .await?;

            let cleaned_response = llm_response
                .trim()
                .strip_prefix("```json")
                .unwrap_or(&llm_response)
                .strip_suffix("```")
                .unwrap_or(&llm_response)
                .trim();

            match serde_json::from_str::<ExtractedChunk>(cleaned_response) {
                Ok(parsed) => return Ok(Some(parsed)),
                Err(e) => warn!(
                    "Chunk {index} response unparseable on attempt {attempt}: {e}"
                ),
            }
        }
        Ok(None)
    }
}

/// Builds the record for one extracted chunk. A chunk whose content body is
/// empty yields nothing: content is never empty in a stored record.
fn build_record(
    extracted: ExtractedChunk,
    filename: &str,
    last_updated: &str,
) -> Option<KnowledgeRecord> {
    let content = extracted.page_content.content_body;
    if content.trim().is_empty() {
        return None;
    }

    let mut metadata = BTreeMap::new();
    metadata.insert("service_area".to_string(), extracted.metadata.service_area);
    metadata.insert("topic".to_string(), extracted.metadata.topic);
    metadata.insert("data_type".to_string(), extracted.metadata.data_type);
    metadata.insert(
        "context_header".to_string(),
        extracted.page_content.context_header,
    );
    metadata.insert(
        "key_metrics".to_string(),
        extracted.page_content.key_metrics.join("; "),
    );
    metadata.insert("filename".to_string(), filename.to_string());
    metadata.insert("last_updated".to_string(), last_updated.to_string());

    Some(KnowledgeRecord {
        id: Uuid::new_v4().to_string(),
        content,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_cover_the_document_without_gaps() {
        let (chunk_size, overlap) = (1000, 100);
        for doc_len in [1, 999, 1000, 1001, 2500, 10_000] {
            let windows = chunk_windows(doc_len, chunk_size, overlap);
            assert_eq!(windows[0].0, 0, "first window starts at 0");
            let mut covered_to = 0;
            for (start, end) in &windows {
                assert!(*start <= covered_to, "gap before {start} (len {doc_len})");
                covered_to = covered_to.max(*end);
            }
            assert!(covered_to >= doc_len, "coverage stops at {covered_to}");
        }
    }

    #[test]
    fn consecutive_windows_overlap_by_exactly_the_overlap() {
        let windows = chunk_windows(2500, 1000, 100);
        for pair in windows.windows(2) {
            let (_, prev_end) = pair[0];
            let (next_start, _) = pair[1];
            if prev_end < 2500 {
                assert_eq!(prev_end - next_start, 100);
            }
        }
    }

    #[test]
    fn window_count_follows_the_length_budget() {
        assert_eq!(chunk_windows(2500, 1000, 100).len(), 3);
        assert_eq!(chunk_windows(3000, 1000, 100).len(), 4);
    }
}
