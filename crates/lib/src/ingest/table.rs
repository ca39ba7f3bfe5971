//! # Tabular Ingestion
//!
//! Loads row-oriented sources (CSV, XLSX workbooks) into `Table`s and
//! converts each table into knowledge records: the column classifier runs
//! once per table, then every row becomes at most one record whose content
//! is the join of its body-column values.

use super::{xlsx, IngestError};
use crate::{
    classify::{ClassifyError, ColumnClassifier, HeaderPartition},
    providers::ai::AiProvider,
    types::KnowledgeRecord,
};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{debug, warn};
use uuid::Uuid;

/// One sheet's worth of rows. Cells are `None` when the source cell was
/// empty or missing.
#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

/// Loads a tabular source into one table per sheet, in sheet order.
///
/// CSV files are read with the legacy Windows-1252 single-byte encoding.
/// That contract is load-bearing: bytes outside the encoding fail the load
/// rather than being silently reinterpreted as UTF-8.
pub fn load_tables(path: &Path) -> Result<Vec<Table>, IngestError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("csv") => Ok(vec![load_csv(path)?]),
        Some("xlsx") => xlsx::read_workbook(path),
        _ => Err(IngestError::UnsupportedFile(
            path.display().to_string(),
        )),
    }
}

fn load_csv(path: &Path) -> Result<Table, IngestError> {
    let bytes = std::fs::read(path)?;
    // The WHATWG decoder maps all 256 bytes, so the five bytes cp1252
    // leaves undefined must be rejected up front.
    if bytes.iter().any(|b| is_undefined_cp1252(*b)) {
        return Err(IngestError::Decode(path.display().to_string()));
    }
    let (text, _, had_errors) = encoding_rs::WINDOWS_1252.decode(&bytes);
    if had_errors {
        return Err(IngestError::Decode(path.display().to_string()));
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers: Vec<String> = reader.headers()?.iter().map(String::from).collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: Vec<Option<String>> = (0..headers.len())
            .map(|i| {
                record
                    .get(i)
                    .filter(|v| !v.trim().is_empty())
                    .map(String::from)
            })
            .collect();
        rows.push(row);
    }

    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    Ok(Table {
        name,
        headers,
        rows,
    })
}

/// True for the bytes Windows-1252 leaves undefined.
fn is_undefined_cp1252(byte: u8) -> bool {
    matches!(byte, 0x81 | 0x8D | 0x8F | 0x90 | 0x9D)
}

/// Converts one table into knowledge records.
pub struct TableIngestor<'a> {
    ai_provider: &'a dyn AiProvider,
    sample_rows: usize,
}

impl<'a> TableIngestor<'a> {
    pub fn new(ai_provider: &'a dyn AiProvider, sample_rows: usize) -> Self {
        Self {
            ai_provider,
            sample_rows,
        }
    }

    /// Ingests `table`, stamping every record with `filename` and
    /// `last_updated`.
    ///
    /// Classification runs once per table on a small row sample, with one
    /// retry on a malformed response. Rows whose body-column join is empty
    /// after trimming are dropped, not emitted.
    pub async fn ingest(
        &self,
        table: &Table,
        filename: &str,
        last_updated: &str,
    ) -> Result<Vec<KnowledgeRecord>, IngestError> {
        let sample = sample_rows_as_json(table, self.sample_rows);
        let classifier = ColumnClassifier::new(self.ai_provider);

        let partition = match classifier.classify(&table.headers, &sample).await {
            Ok(p) => p,
            Err(ClassifyError::Format(e)) => {
                warn!("Malformed classification for '{}', retrying once: {e}", table.name);
                classifier.classify(&table.headers, &sample).await?
            }
            Err(e) => return Err(e.into()),
        };
        debug!(
            "Partition for '{}': body={:?} metadata={:?}",
            table.name, partition.body_headers, partition.metadata_headers
        );

        Ok(build_records(table, &partition, filename, last_updated))
    }
}

/// Builds one record per row with non-empty body content.
fn build_records(
    table: &Table,
    partition: &HeaderPartition,
    filename: &str,
    last_updated: &str,
) -> Vec<KnowledgeRecord> {
    let body: HashSet<&str> = partition.body_headers.iter().map(String::as_str).collect();
    let meta: HashSet<&str> = partition
        .metadata_headers
        .iter()
        .map(String::as_str)
        .collect();

    let mut records = Vec::new();
    for row in &table.rows {
        let mut content_parts: Vec<&str> = Vec::new();
        let mut metadata = BTreeMap::new();

        // Source column order decides both the content join order and
        // which cell maps to which header.
        for (header, cell) in table.headers.iter().zip(row.iter()) {
            let Some(value) = cell else { continue };
            if body.contains(header.as_str()) {
                content_parts.push(value);
            } else if meta.contains(header.as_str()) {
                metadata.insert(header.clone(), value.clone());
            }
        }

        let content = content_parts.join(" ");
        if content.trim().is_empty() {
            continue;
        }

        metadata.insert("filename".to_string(), filename.to_string());
        metadata.insert("last_updated".to_string(), last_updated.to_string());

        records.push(KnowledgeRecord {
            id: Uuid::new_v4().to_string(),
            content,
            metadata,
        });
    }
    records
}

/// The first N rows as JSON objects keyed by header, for classifier context.
fn sample_rows_as_json(table: &Table, n: usize) -> Vec<Value> {
    table
        .rows
        .iter()
        .take(n)
        .map(|row| {
            let mut obj = Map::new();
            for (header, cell) in table.headers.iter().zip(row.iter()) {
                if let Some(value) = cell {
                    obj.insert(header.clone(), Value::String(value.clone()));
                }
            }
            Value::Object(obj)
        })
        .collect()
}
