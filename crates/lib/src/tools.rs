//! # Spreadsheet Analysis Tools
//!
//! A family of pure, stateless query operations over a single named table,
//! used by the orchestration layer's ANALYZE stage. Every tool resolves its
//! table lazily from the data directory, runs on the blocking thread pool,
//! and returns a human-readable string: the sole consumer is a reasoning
//! stage that reads tool output as context. A missing file or column comes
//! back as a descriptive message, never as a fault, and oversized results
//! are truncated with an explicit instruction to narrow the query. Together
//! these policies make the tools a controlled narrowing interface between
//! raw tables and the reasoning stage.

use crate::ingest::table::{load_tables, Table};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Result sets above this many cells are truncated.
const MAX_RESULT_CELLS: usize = 200;
/// Rows kept when a result is truncated.
const TRUNCATED_ROW_COUNT: usize = 10;
/// Distinct values reported by `unique_values`.
const UNIQUE_VALUES_CAP: usize = 20;
/// Rows shown by `info`.
const INFO_ROW_COUNT: usize = 5;

/// A validated, dispatchable analysis request. The orchestrator parses
/// LLM-planned calls into this enum before anything touches a file.
#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolCall {
    Info { filename: String },
    Mean { filename: String, column: String },
    Min { filename: String, column: String },
    Max { filename: String, column: String },
    Sum { filename: String, column: String },
    FilterValues {
        filename: String,
        columns: Vec<String>,
        keyword: String,
    },
    FilterValuesInRange {
        filename: String,
        column: String,
        min: f64,
        max: f64,
    },
    UniqueValues { filename: String, column: String },
    CountValues { filename: String, column: String },
}

/// The registry of spreadsheet analysis tools, rooted at one data directory.
#[derive(Clone)]
pub struct ToolRegistry {
    data_dir: PathBuf,
}

impl ToolRegistry {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Runs one validated tool call.
    pub async fn dispatch(&self, call: ToolCall) -> String {
        debug!("Dispatching analysis tool: {call:?}");
        match call {
            ToolCall::Info { filename } => self.run(filename, info_impl).await,
            ToolCall::Mean { filename, column } => {
                self.run(filename, move |t, f| aggregate_impl(&t, f, &column, Aggregate::Mean))
                    .await
            }
            ToolCall::Min { filename, column } => {
                self.run(filename, move |t, f| aggregate_impl(&t, f, &column, Aggregate::Min))
                    .await
            }
            ToolCall::Max { filename, column } => {
                self.run(filename, move |t, f| aggregate_impl(&t, f, &column, Aggregate::Max))
                    .await
            }
            ToolCall::Sum { filename, column } => {
                self.run(filename, move |t, f| aggregate_impl(&t, f, &column, Aggregate::Sum))
                    .await
            }
            ToolCall::FilterValues {
                filename,
                columns,
                keyword,
            } => {
                self.run(filename, move |t, f| filter_values_impl(&t, f, &columns, &keyword))
                    .await
            }
            ToolCall::FilterValuesInRange {
                filename,
                column,
                min,
                max,
            } => {
                self.run(filename, move |t, f| {
                    filter_range_impl(&t, f, &column, min, max)
                })
                .await
            }
            ToolCall::UniqueValues { filename, column } => {
                self.run(filename, move |t, f| unique_values_impl(&t, f, &column))
                    .await
            }
            ToolCall::CountValues { filename, column } => {
                self.run(filename, move |t, f| count_values_impl(&t, f, &column))
                    .await
            }
        }
    }

    /// Header and first rows of the file.
    pub async fn info(&self, filename: &str) -> String {
        self.dispatch(ToolCall::Info {
            filename: filename.to_string(),
        })
        .await
    }

    /// Loads the named table and applies `op` on the blocking pool. Table
    /// loading and scanning are synchronous local work, so they must not
    /// occupy the cooperative scheduler.
    async fn run<F>(&self, filename: String, op: F) -> String
    where
        F: FnOnce(Table, &str) -> String + Send + 'static,
    {
        let data_dir = self.data_dir.clone();
        let result = tokio::task::spawn_blocking(move || {
            match load_named_table(&data_dir, &filename) {
                Ok(table) => op(table, &filename),
                Err(message) => message,
            }
        })
        .await;
        result.unwrap_or_else(|e| format!("Analysis tool failed: {e}"))
    }
}

/// Resolves a filename inside the data directory to its first table.
/// Workbooks are analyzed on their first sheet.
fn load_named_table(data_dir: &Path, filename: &str) -> Result<Table, String> {
    // Reject path separators so a planned call can only name files inside
    // the data directory.
    if filename.contains('/') || filename.contains('\\') {
        return Err(format!("File not found: {filename}"));
    }
    let path = data_dir.join(filename);
    if !path.is_file() {
        return Err(format!("File not found: {filename}"));
    }
    let mut tables =
        load_tables(&path).map_err(|e| format!("Could not load {filename}: {e}"))?;
    if tables.is_empty() {
        return Err(format!("File {filename} contains no tables"));
    }
    Ok(tables.remove(0))
}

enum Aggregate {
    Mean,
    Min,
    Max,
    Sum,
}

fn info_impl(table: Table, filename: &str) -> String {
    let mut out = format!("Columns of {filename}: {}\n", table.headers.join(" | "));
    for row in table.rows.iter().take(INFO_ROW_COUNT) {
        out.push_str(&format_row(row));
        out.push('\n');
    }
    if table.rows.len() > INFO_ROW_COUNT {
        out.push_str(&format!(
            "... {} more rows not shown.",
            table.rows.len() - INFO_ROW_COUNT
        ));
    }
    out.trim_end().to_string()
}

fn aggregate_impl(table: &Table, filename: &str, column: &str, agg: Aggregate) -> String {
    let values = match numeric_column(table, filename, column) {
        Ok(v) => v,
        Err(message) => return message,
    };
    if values.is_empty() {
        return format!("Column '{column}' of {filename} has no numeric values");
    }
    let result = match agg {
        Aggregate::Mean => values.iter().sum::<f64>() / values.len() as f64,
        Aggregate::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
        Aggregate::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        Aggregate::Sum => values.iter().sum(),
    };
    let name = match agg {
        Aggregate::Mean => "Mean",
        Aggregate::Min => "Min",
        Aggregate::Max => "Max",
        Aggregate::Sum => "Sum",
    };
    format!("{name} of '{column}' in {filename}: {result}")
}

fn filter_values_impl(
    table: &Table,
    filename: &str,
    columns: &[String],
    keyword: &str,
) -> String {
    let mut indices = Vec::new();
    for column in columns {
        match column_position(table, column) {
            Some(i) => indices.push(i),
            None => return column_not_found(column, filename),
        }
    }

    let needle = keyword.to_lowercase();
    let matches: Vec<&Vec<Option<String>>> = table
        .rows
        .iter()
        .filter(|row| {
            indices.iter().any(|&i| {
                row.get(i)
                    .and_then(|c| c.as_ref())
                    .is_some_and(|v| v.to_lowercase().contains(&needle))
            })
        })
        .collect();

    if matches.is_empty() {
        return format!("No rows found matching '{keyword}' in {filename}.");
    }
    render_rows(table, filename, &matches)
}

fn filter_range_impl(table: &Table, filename: &str, column: &str, min: f64, max: f64) -> String {
    let Some(index) = column_position(table, column) else {
        return column_not_found(column, filename);
    };

    let matches: Vec<&Vec<Option<String>>> = table
        .rows
        .iter()
        .filter(|row| {
            row.get(index)
                .and_then(|c| c.as_ref())
                .and_then(|v| v.trim().parse::<f64>().ok())
                .is_some_and(|v| v >= min && v <= max)
        })
        .collect();

    if matches.is_empty() {
        return format!(
            "No rows found with '{column}' between {min} and {max} in {filename}."
        );
    }
    render_rows(table, filename, &matches)
}

fn unique_values_impl(table: &Table, filename: &str, column: &str) -> String {
    let Some(index) = column_position(table, column) else {
        return column_not_found(column, filename);
    };

    let mut seen = std::collections::HashSet::new();
    let mut values = Vec::new();
    for row in &table.rows {
        if let Some(value) = row.get(index).and_then(|c| c.as_ref()) {
            if seen.insert(value.clone()) {
                values.push(value.clone());
            }
        }
    }

    let total = values.len();
    let mut out = format!(
        "Distinct values of '{column}' in {filename}:\n{}",
        values
            .iter()
            .take(UNIQUE_VALUES_CAP)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    );
    if total > UNIQUE_VALUES_CAP {
        out.push_str(&format!(
            "\n... {} more distinct values exist beyond the first {UNIQUE_VALUES_CAP}.",
            total - UNIQUE_VALUES_CAP
        ));
    }
    out
}

fn count_values_impl(table: &Table, filename: &str, column: &str) -> String {
    let Some(index) = column_position(table, column) else {
        return column_not_found(column, filename);
    };

    let mut counts: std::collections::BTreeMap<String, usize> = std::collections::BTreeMap::new();
    for row in &table.rows {
        if let Some(value) = row.get(index).and_then(|c| c.as_ref()) {
            *counts.entry(value.clone()).or_default() += 1;
        }
    }

    let mut entries: Vec<(String, usize)> = counts.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let body = entries
        .into_iter()
        .map(|(value, count)| format!("{value}: {count}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("Value counts of '{column}' in {filename}:\n{body}")
}

// --- Shared helpers ---

fn column_position(table: &Table, column: &str) -> Option<usize> {
    table.headers.iter().position(|h| h == column)
}

fn column_not_found(column: &str, filename: &str) -> String {
    format!("Column '{column}' not found in {filename}")
}

fn format_row(row: &[Option<String>]) -> String {
    row.iter()
        .map(|c| c.as_deref().unwrap_or(""))
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Renders matching rows, truncating oversized results with an explicit
/// instruction to narrow the query.
fn render_rows(table: &Table, filename: &str, matches: &[&Vec<Option<String>>]) -> String {
    let total_cells = matches.len() * table.headers.len();
    let truncated = total_cells > MAX_RESULT_CELLS;
    let shown = if truncated {
        TRUNCATED_ROW_COUNT.min(matches.len())
    } else {
        matches.len()
    };

    let mut out = format!(
        "{} matching rows in {filename} (columns: {}):\n",
        matches.len(),
        table.headers.join(" | ")
    );
    for row in matches.iter().take(shown) {
        out.push_str(&format_row(row));
        out.push('\n');
    }
    if truncated {
        out.push_str(&format!(
            "Result truncated to {shown} rows. Please narrow down your query."
        ));
    }
    out.trim_end().to_string()
}

/// Extracts the numeric values of a column, skipping blank and non-numeric
/// cells. The column itself must exist.
fn numeric_column(table: &Table, filename: &str, column: &str) -> Result<Vec<f64>, String> {
    let index = column_position(table, column)
        .ok_or_else(|| column_not_found(column, filename))?;
    Ok(table
        .rows
        .iter()
        .filter_map(|row| {
            row.get(index)
                .and_then(|c| c.as_ref())
                .and_then(|v| v.trim().parse::<f64>().ok())
        })
        .collect())
}
