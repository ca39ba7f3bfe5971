//! # Ingestion Pipeline
//!
//! Converts raw source files into `KnowledgeRecord`s and forwards them to
//! the `KnowledgeStore`. Two source shapes are supported: row-oriented
//! tables (`.csv`, `.xlsx`) and long-form paginated text (`.pdf`). Files of
//! any other extension are skipped without error.
//!
//! Failures are isolated per file (and per sheet, and per chunk): a broken
//! source is logged and recorded in the report, and the run moves on.

pub mod document;
pub mod pdf;
pub mod table;
mod xlsx;

use crate::{
    classify::ClassifyError, errors::PromptError, providers::ai::AiProvider,
    store::{KnowledgeStore, StoreError}, PipelineConfig,
};
use chrono::{DateTime, Utc};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

/// A generic error type for all ingestion paths.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFile(String),
    #[error("Failed to read source file: {0}")]
    Io(#[from] std::io::Error),
    #[error("File is not valid Windows-1252 text: {0}")]
    Decode(String),
    #[error("Failed to parse CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("Failed to parse workbook: {0}")]
    Workbook(String),
    #[error("Column classification failed: {0}")]
    Classification(#[from] ClassifyError),
    #[error("Failed to parse PDF content: {0}")]
    PdfParse(String),
    #[error("LLM processing failed: {0}")]
    Llm(#[from] PromptError),
    #[error("Failed to index records: {0}")]
    Store(#[from] StoreError),
    #[error("An internal error occurred: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Summary of a directory ingestion run.
#[derive(Debug, Clone, Default)]
pub struct IngestionReport {
    /// Files that produced at least an attempt at records.
    pub files_processed: usize,
    /// Files skipped for having an unsupported extension.
    pub files_skipped: usize,
    /// Records successfully forwarded to the store.
    pub records_indexed: usize,
    /// Per-file failures, as (filename, error) pairs.
    pub failures: Vec<(String, String)>,
}

/// Scans `dir` and ingests every supported file into `store`.
///
/// Each file accumulates its records locally before they are forwarded, so
/// concurrent ingestion runs never share a mutable accumulator. A failing
/// file never aborts the run.
pub async fn ingest_directory(
    dir: &Path,
    ai_provider: &dyn AiProvider,
    store: &KnowledgeStore,
    config: &PipelineConfig,
) -> Result<IngestionReport, std::io::Error> {
    let mut report = IngestionReport::default();

    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .collect();
    entries.sort_by_key(|e| e.file_name());
    info!("Ingesting {} files from {}", entries.len(), dir.display());

    for entry in entries {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();

        let result = match extension_of(&path).as_deref() {
            Some("csv") | Some("xlsx") => {
                ingest_tabular_file(&path, ai_provider, store, config).await
            }
            Some("pdf") => ingest_document_file(&path, ai_provider, store, config).await,
            _ => {
                debug!("Skipping non-supported file: {name}");
                report.files_skipped += 1;
                continue;
            }
        };

        report.files_processed += 1;
        match result {
            Ok(count) => {
                info!("Ingested {count} records from {name}");
                report.records_indexed += count;
            }
            Err(e) => {
                warn!("Failed to ingest {name}: {e}");
                report.failures.push((name, e.to_string()));
            }
        }
    }

    Ok(report)
}

/// Ingests one tabular file, sheet by sheet.
///
/// A sheet whose classification fails (after the one permitted retry) is
/// skipped with a warning; the remaining sheets still produce records.
pub async fn ingest_tabular_file(
    path: &Path,
    ai_provider: &dyn AiProvider,
    store: &KnowledgeStore,
    config: &PipelineConfig,
) -> Result<usize, IngestError> {
    let (filename, last_updated) = source_stamp(path)?;
    // Reading and parsing the file is synchronous local work.
    let load_path = path.to_path_buf();
    let tables = tokio::task::spawn_blocking(move || table::load_tables(&load_path))
        .await
        .map_err(|e| {
            IngestError::Internal(anyhow::anyhow!("Join error during table load: {e}"))
        })??;
    let ingestor = table::TableIngestor::new(ai_provider, config.sample_rows);

    let mut records = Vec::new();
    for t in &tables {
        match ingestor.ingest(t, &filename, &last_updated).await {
            Ok(mut sheet_records) => records.append(&mut sheet_records),
            Err(e) => warn!(
                "Skipping sheet '{}' of {}: {e}",
                t.name, filename
            ),
        }
    }

    let count = records.len();
    store.add(records).await?;
    Ok(count)
}

/// Ingests one PDF file through the chunked extraction pipeline.
pub async fn ingest_document_file(
    path: &Path,
    ai_provider: &dyn AiProvider,
    store: &KnowledgeStore,
    config: &PipelineConfig,
) -> Result<usize, IngestError> {
    let (filename, last_updated) = source_stamp(path)?;
    let raw_text = pdf::extract_markdown(path).await?;

    let extractor = document::DocumentExtractor::new(ai_provider);
    let records = extractor
        .extract(
            &raw_text,
            &filename,
            &last_updated,
            config.chunk_size(),
            config.chunk_overlap(),
        )
        .await?;

    let count = records.len();
    store.add(records).await?;
    Ok(count)
}

/// The source file's base name and its modification timestamp, serialized
/// deterministically.
pub fn source_stamp(path: &Path) -> Result<(String, String), IngestError> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let modified = std::fs::metadata(path)?.modified()?;
    let stamp = DateTime::<Utc>::from(modified)
        .format("%Y-%m-%d %H:%M:%S UTC")
        .to_string();
    Ok((filename, stamp))
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_lowercase())
}
