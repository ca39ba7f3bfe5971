//! # Column Role Classification
//!
//! Partitions table headers into "body text" vs. "metadata" roles using the
//! configured AI provider. The semantic decision is delegated to the model,
//! but the response is never trusted as-is: it must parse as a strict
//! two-key JSON object, and every returned header is validated against the
//! filtered input (no invention, no overlap) before the partition is used.

use crate::{errors::PromptError, prompts::COLUMN_CLASSIFICATION_SYSTEM_PROMPT, providers::ai::AiProvider};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;

/// Errors from the classification step.
#[derive(Error, Debug)]
pub enum ClassifyError {
    /// The response was unparseable or violated the no-overlap/no-invention
    /// invariant. Recoverable with one retry at the table-ingestion level.
    #[error("Classification response was malformed: {0}")]
    Format(String),
    #[error("LLM call failed: {0}")]
    Llm(#[from] PromptError),
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

/// Disjoint header sets produced by classification.
///
/// Every header in either set is drawn verbatim from the filtered input
/// header list. Headers that are not plain ASCII-letter-containing strings
/// never appear in either set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderPartition {
    pub body_headers: Vec<String>,
    pub metadata_headers: Vec<String>,
}

/// The strict two-key response contract expected from the model. Both keys
/// are required and no other key is accepted: a wrong-shaped object must
/// surface as a format error, not as an empty partition.
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct PartitionResponse {
    page_content: Vec<String>,
    metadata: Vec<String>,
}

/// Classifies table headers into body vs. metadata roles.
pub struct ColumnClassifier<'a> {
    ai_provider: &'a dyn AiProvider,
}

impl<'a> ColumnClassifier<'a> {
    pub fn new(ai_provider: &'a dyn AiProvider) -> Self {
        Self { ai_provider }
    }

    /// Partitions `headers` given a few `sample_rows` for context.
    ///
    /// Non-English-looking headers are excluded from the request and from
    /// both output sets. A response that fails the shape or invariant checks
    /// is a `ClassifyError::Format`; the caller decides whether to retry.
    pub async fn classify(
        &self,
        headers: &[String],
        sample_rows: &[Value],
    ) -> Result<HeaderPartition, ClassifyError> {
        let letter_re = Regex::new("[A-Za-z]")?;
        let filtered: Vec<&String> = headers
            .iter()
            .filter(|h| is_english_header(h, &letter_re))
            .collect();

        if filtered.is_empty() {
            return Ok(HeaderPartition {
                body_headers: Vec::new(),
                metadata_headers: Vec::new(),
            });
        }

        let user_prompt = format!(
            "{{\"headers\":{},\"sample_rows\":{}}}",
            serde_json::to_string(&filtered).map_err(|e| ClassifyError::Format(e.to_string()))?,
            serde_json::to_string(sample_rows).map_err(|e| ClassifyError::Format(e.to_string()))?,
        );

        let llm_response = self
            .ai_provider
            .generate(COLUMN_CLASSIFICATION_SYSTEM_PROMPT, &user_prompt)
            .await?;
        debug!("LLM classification response: {}", llm_response);

        let cleaned_response = llm_response
            .trim()
            .strip_prefix("```json")
            .unwrap_or(&llm_response)
            .strip_suffix("```")
            .unwrap_or(&llm_response)
            .trim();

        let parsed: PartitionResponse = serde_json::from_str(cleaned_response)
            .map_err(|e| ClassifyError::Format(e.to_string()))?;

        validate_partition(&parsed, &filtered)?;

        Ok(HeaderPartition {
            body_headers: parsed.page_content,
            metadata_headers: parsed.metadata,
        })
    }
}

/// True if the header is a plain string containing at least one ASCII letter
/// and no non-ASCII byte.
fn is_english_header(h: &str, letter_re: &Regex) -> bool {
    h.is_ascii() && letter_re.is_match(h)
}

/// Enforces the no-invention and no-overlap invariants post-hoc.
fn validate_partition(
    parsed: &PartitionResponse,
    filtered: &[&String],
) -> Result<(), ClassifyError> {
    let allowed: HashSet<&str> = filtered.iter().map(|h| h.as_str()).collect();
    let mut seen: HashSet<&str> = HashSet::new();

    for header in parsed.page_content.iter().chain(parsed.metadata.iter()) {
        if !allowed.contains(header.as_str()) {
            return Err(ClassifyError::Format(format!(
                "header '{header}' is not in the filtered input"
            )));
        }
        if !seen.insert(header.as_str()) {
            return Err(ClassifyError::Format(format!(
                "header '{header}' appears in more than one set"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn english_header_filter() {
        let re = Regex::new("[A-Za-z]").unwrap();
        assert!(is_english_header("Notes", &re));
        assert!(is_english_header("Asset ID_2", &re));
        assert!(!is_english_header("Résumé", &re));
        assert!(!is_english_header("12345", &re));
        assert!(!is_english_header("", &re));
    }

    #[test]
    fn partition_rejects_invented_headers() {
        let parsed = PartitionResponse {
            page_content: vec!["Made Up".to_string()],
            metadata: vec![],
        };
        let input = "Notes".to_string();
        let filtered = vec![&input];
        assert!(matches!(
            validate_partition(&parsed, &filtered),
            Err(ClassifyError::Format(_))
        ));
    }

    #[test]
    fn partition_rejects_overlap() {
        let parsed = PartitionResponse {
            page_content: vec!["Notes".to_string()],
            metadata: vec!["Notes".to_string()],
        };
        let input = "Notes".to_string();
        let filtered = vec![&input];
        assert!(matches!(
            validate_partition(&parsed, &filtered),
            Err(ClassifyError::Format(_))
        ));
    }
}
