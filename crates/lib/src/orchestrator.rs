//! # Query Orchestration
//!
//! Drives one question through the fixed stage pipeline
//! FETCH → ANALYZE? → REASON → VALIDATE → FORMAT. Every stage suspends at
//! its external call; the per-query state is owned by the single run and
//! discarded when it completes, so concurrent queries never share mutable
//! state. The user-visible contract is "always an answer or an explicit
//! refusal": after the bounded retry budget is spent, the last draft is
//! accepted rather than surfacing an error.

use crate::{
    errors::PromptError,
    prompts::{ANALYSIS_PLANNING_SYSTEM_PROMPT, REASONER_SYSTEM_PROMPT},
    providers::ai::AiProvider,
    store::{KnowledgeStore, StoreError},
    tools::{ToolCall, ToolRegistry},
    types::{AnswerResponse, Citation, KnowledgeRecord, SourceRef},
    PipelineConfig,
};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info, warn};

/// The fixed refusal emitted when no usable context exists. Never a
/// fabricated answer.
pub const NO_RELEVANT_DATA: &str = "I could not find any relevant information.";

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Search failed: {0}")]
    Store(#[from] StoreError),
    #[error("LLM call failed: {0}")]
    Llm(#[from] PromptError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValidationStatus {
    Pending,
    Valid,
    Invalid,
}

/// One fetched snippet with its citation.
#[derive(Debug, Clone)]
struct ContextSnippet {
    text: String,
    citation: Citation,
}

/// Per-query working memory. Owned exclusively by one run.
#[derive(Debug)]
struct OrchestrationState {
    question: String,
    fetched_context: Vec<ContextSnippet>,
    analysis_results: Vec<String>,
    draft_answer: String,
    validation_status: ValidationStatus,
    attempt_count: u32,
}

impl OrchestrationState {
    fn new(question: &str) -> Self {
        Self {
            question: question.to_string(),
            fetched_context: Vec::new(),
            analysis_results: Vec::new(),
            draft_answer: String::new(),
            validation_status: ValidationStatus::Pending,
            attempt_count: 0,
        }
    }
}

/// The query-time entry point: routes a question through retrieval,
/// optional spreadsheet analysis, and the citing reasoner.
pub struct Orchestrator {
    ai_provider: Box<dyn AiProvider>,
    store: KnowledgeStore,
    tools: ToolRegistry,
    config: PipelineConfig,
}

impl Orchestrator {
    pub fn new(
        ai_provider: Box<dyn AiProvider>,
        store: KnowledgeStore,
        tools: ToolRegistry,
        config: PipelineConfig,
    ) -> Self {
        Self {
            ai_provider,
            store,
            tools,
            config,
        }
    }

    /// Answers `question` with a cited response.
    pub async fn answer(&self, question: &str) -> Result<AnswerResponse, OrchestratorError> {
        let mut state = OrchestrationState::new(question);

        // --- FETCH ---
        let records = self.store.search(question, self.config.search_k).await?;
        info!("Fetched {} records for question", records.len());
        let flagged_files = flag_tabular_sources(&records);
        for record in records {
            let citation = record.citation();
            state.fetched_context.push(ContextSnippet {
                text: record.content,
                citation,
            });
        }

        // --- ANALYZE (only when FETCH flagged a tabular source) ---
        if !flagged_files.is_empty() {
            let plan = self.plan_analysis(&state.question, &flagged_files).await;
            for call in plan.into_iter().take(self.config.max_tool_calls) {
                let output = self.tools.dispatch(call).await;
                state.analysis_results.push(output);
            }
        }

        // --- REASON / VALIDATE, bounded ---
        while state.attempt_count < self.config.max_attempts {
            state.attempt_count += 1;
            state.draft_answer = self.reason(&state).await?;
            state.validation_status = validate_draft(&state.draft_answer);
            match state.validation_status {
                ValidationStatus::Valid => break,
                _ => debug!(
                    "Draft failed validation on attempt {}",
                    state.attempt_count
                ),
            }
        }
        if state.validation_status != ValidationStatus::Valid {
            // Graceful degradation: the last draft stands.
            warn!(
                "Accepting unvalidated draft after {} attempts",
                state.attempt_count
            );
        }

        // --- FORMAT ---
        Ok(format_answer(state))
    }

    /// Asks the model for an analysis plan over the flagged files and
    /// validates it against the tool-call schema. An unparseable plan
    /// degrades to a table preview per flagged file.
    async fn plan_analysis(&self, question: &str, flagged_files: &[String]) -> Vec<ToolCall> {
        let user_prompt = format!(
            "Question: {question}\nRelevant spreadsheet files: {}",
            flagged_files.join(", ")
        );
        let plan = match self
            .ai_provider
            .generate(ANALYSIS_PLANNING_SYSTEM_PROMPT, &user_prompt)
            .await
        {
            Ok(response) => {
                let cleaned = response
                    .trim()
                    .strip_prefix("```json")
                    .unwrap_or(&response)
                    .strip_suffix("```")
                    .unwrap_or(&response)
                    .trim()
                    .to_string();
                serde_json::from_str::<Vec<ToolCall>>(&cleaned).ok()
            }
            Err(e) => {
                warn!("Analysis planning call failed: {e}");
                None
            }
        };

        plan.unwrap_or_else(|| {
            debug!("Falling back to table previews for flagged files");
            flagged_files
                .iter()
                .take(self.config.max_tool_calls)
                .map(|f| ToolCall::Info {
                    filename: f.clone(),
                })
                .collect()
        })
    }

    /// Produces a draft answer from the accumulated context, or the fixed
    /// refusal when there is nothing to reason over.
    async fn reason(&self, state: &OrchestrationState) -> Result<String, OrchestratorError> {
        if state.fetched_context.is_empty() && state.analysis_results.is_empty() {
            return Ok(NO_RELEVANT_DATA.to_string());
        }

        let mut user_prompt = format!("# Question\n{}\n\n# Retrieved records\n", state.question);
        for snippet in &state.fetched_context {
            user_prompt.push_str(&format!(
                "- (Source: {}, Last Updated: {})\n{}\n",
                snippet.citation.filename, snippet.citation.last_updated, snippet.text
            ));
        }
        if !state.analysis_results.is_empty() {
            user_prompt.push_str("\n# Analysis results\n");
            for result in &state.analysis_results {
                user_prompt.push_str(result);
                user_prompt.push('\n');
            }
        }
        if state.attempt_count > 1 {
            user_prompt.push_str(
                "\nYour previous draft was missing citations. Cite every claim as (Source: [filename], Last Updated: [date]).\n",
            );
        }

        Ok(self
            .ai_provider
            .generate(REASONER_SYSTEM_PROMPT, &user_prompt)
            .await?)
    }
}

/// Citation-completeness check: a draft is valid when it is the explicit
/// refusal or carries at least one source citation.
fn validate_draft(draft: &str) -> ValidationStatus {
    if draft.trim() == NO_RELEVANT_DATA || draft.contains("(Source:") {
        ValidationStatus::Valid
    } else {
        ValidationStatus::Invalid
    }
}

/// Filenames of fetched records that point at a tabular source, deduplicated
/// in fetch order. This structured signal is the only trigger for ANALYZE.
fn flag_tabular_sources(records: &[KnowledgeRecord]) -> Vec<String> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter_map(|r| r.metadata.get("filename"))
        .filter(|f| {
            let lower = f.to_lowercase();
            lower.ends_with(".csv") || lower.ends_with(".xlsx")
        })
        .filter(|f| seen.insert(f.to_string()))
        .cloned()
        .collect()
}

/// Renders the accepted draft into the final response shape. Sources are
/// deduplicated citations of the fetched context; an empty list is still an
/// explicit empty sequence.
fn format_answer(state: OrchestrationState) -> AnswerResponse {
    let mut seen = HashSet::new();
    let sources: Vec<SourceRef> = state
        .fetched_context
        .into_iter()
        .map(|s| s.citation)
        .filter(|c| seen.insert(c.clone()))
        .map(SourceRef::from)
        .collect();

    AnswerResponse {
        response: state.draft_answer,
        sources,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn refusal_and_cited_drafts_are_valid() {
        assert_eq!(validate_draft(NO_RELEVANT_DATA), ValidationStatus::Valid);
        assert_eq!(
            validate_draft("Budget is $2M (Source: budget.pdf, Last Updated: 2024-01-01)"),
            ValidationStatus::Valid
        );
        assert_eq!(
            validate_draft("Budget is probably around $2M"),
            ValidationStatus::Invalid
        );
    }

    #[test]
    fn tabular_sources_are_flagged_once_each() {
        let record = |filename: &str| {
            let mut metadata = BTreeMap::new();
            metadata.insert("filename".to_string(), filename.to_string());
            KnowledgeRecord {
                id: "x".to_string(),
                content: "c".to_string(),
                metadata,
            }
        };
        let records = vec![
            record("roads.csv"),
            record("report.pdf"),
            record("roads.csv"),
            record("Bridges.XLSX"),
        ];
        assert_eq!(
            flag_tabular_sources(&records),
            vec!["roads.csv".to_string(), "Bridges.XLSX".to_string()]
        );
    }
}
