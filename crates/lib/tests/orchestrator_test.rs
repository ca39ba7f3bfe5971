//! End-to-end tests of the query pipeline against the in-process index and
//! the scripted mock provider: refusal on an empty corpus, the bounded
//! citation retry, the spreadsheet-analysis stage, and the response shape.

mod common;

use cityrag::orchestrator::Orchestrator;
use cityrag::tools::ToolRegistry;
use cityrag::{KnowledgeRecord, KnowledgeStore, MemoryIndex, PipelineConfig, NO_RELEVANT_DATA};
use common::{setup_tracing, write_csv, MockAiProvider};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

fn record(id: &str, content: &str, filename: &str) -> KnowledgeRecord {
    let mut metadata = BTreeMap::new();
    metadata.insert("filename".to_string(), filename.to_string());
    metadata.insert(
        "last_updated".to_string(),
        "2024-03-01 09:00:00 UTC".to_string(),
    );
    KnowledgeRecord {
        id: id.to_string(),
        content: content.to_string(),
        metadata,
    }
}

async fn orchestrator_with(
    mock_ai: &MockAiProvider,
    records: Vec<KnowledgeRecord>,
) -> (Orchestrator, TempDir) {
    let data_dir = tempdir().expect("tempdir");
    write_csv(
        data_dir.path(),
        "assets.csv",
        "Asset,Cost\nMain St bridge,1200\nOak Ave culvert,300\n",
    );

    let store = KnowledgeStore::new(Arc::new(MemoryIndex::new()), 5000);
    store.add(records).await.expect("seed index");

    let orchestrator = Orchestrator::new(
        Box::new(mock_ai.clone()),
        store,
        ToolRegistry::new(data_dir.path()),
        PipelineConfig::default(),
    );
    (orchestrator, data_dir)
}

#[tokio::test]
async fn empty_corpus_refuses_without_calling_the_model() {
    setup_tracing();
    let mock_ai = MockAiProvider::new(vec![]);
    let (orchestrator, _guard) = orchestrator_with(&mock_ai, vec![]).await;

    let answer = orchestrator
        .answer("what is the bridge repair backlog?")
        .await
        .expect("refusal is not an error");

    assert_eq!(answer.response, NO_RELEVANT_DATA);
    assert!(answer.sources.is_empty());
    assert_eq!(mock_ai.calls(), 0);
}

#[tokio::test]
async fn cited_first_draft_is_accepted_without_a_retry() {
    let mock_ai = MockAiProvider::new(vec![
        "The bridge repair backlog totals $2M (Source: report.pdf, Last Updated: 2024-03-01 09:00:00 UTC).",
    ]);
    let records = vec![record("1", "bridge repair backlog totals", "report.pdf")];
    let (orchestrator, _guard) = orchestrator_with(&mock_ai, records).await;

    let answer = orchestrator
        .answer("bridge repair backlog")
        .await
        .expect("answer");

    assert!(answer.response.contains("(Source: report.pdf"));
    assert_eq!(mock_ai.calls(), 1);
    assert_eq!(answer.sources.len(), 1);
    assert_eq!(answer.sources[0].filename, "report.pdf");
    assert_eq!(answer.sources[0].href, "#");
}

#[tokio::test]
async fn uncited_draft_gets_exactly_one_retry_and_the_last_draft_stands() {
    let mock_ai = MockAiProvider::new(vec![
        "The backlog is about $2M.",
        "Still no citation, sorry.",
    ]);
    let records = vec![record("1", "bridge repair backlog totals", "report.pdf")];
    let (orchestrator, _guard) = orchestrator_with(&mock_ai, records).await;

    let answer = orchestrator
        .answer("bridge repair backlog")
        .await
        .expect("degraded answer");

    // Two reasoning attempts, then graceful degradation to the last draft.
    assert_eq!(mock_ai.calls(), 2);
    assert_eq!(answer.response, "Still no citation, sorry.");

    let history = mock_ai.call_history.read().unwrap();
    let (_, retry_prompt) = &history[1];
    assert!(
        retry_prompt.contains("missing citations"),
        "retry prompt carries the corrective hint"
    );
}

#[tokio::test]
async fn tabular_sources_trigger_planned_analysis_before_reasoning() {
    let mock_ai = MockAiProvider::new(vec![
        r#"[{"tool":"mean","filename":"assets.csv","column":"Cost"}]"#,
        "Average cost is 750 (Source: assets.csv, Last Updated: 2024-03-01 09:00:00 UTC).",
    ]);
    let records = vec![record("1", "asset cost inventory", "assets.csv")];
    let (orchestrator, _guard) = orchestrator_with(&mock_ai, records).await;

    let answer = orchestrator.answer("asset cost").await.expect("answer");

    // One planning call, one reasoning call.
    assert_eq!(mock_ai.calls(), 2);
    assert!(answer.response.contains("(Source: assets.csv"));

    let history = mock_ai.call_history.read().unwrap();
    let (_, planning_prompt) = &history[0];
    assert!(planning_prompt.contains("assets.csv"));
    let (_, reason_prompt) = &history[1];
    assert!(reason_prompt.contains("# Analysis results"));
    assert!(reason_prompt.contains("Mean of 'Cost' in assets.csv: 750"));
}

#[tokio::test]
async fn unparseable_plan_degrades_to_a_table_preview() {
    let mock_ai = MockAiProvider::new(vec![
        "I think you should look at the spreadsheet yourself.",
        "Costs range from 300 to 1200 (Source: assets.csv, Last Updated: 2024-03-01 09:00:00 UTC).",
    ]);
    let records = vec![record("1", "asset cost inventory", "assets.csv")];
    let (orchestrator, _guard) = orchestrator_with(&mock_ai, records).await;

    orchestrator.answer("asset cost").await.expect("answer");

    let history = mock_ai.call_history.read().unwrap();
    let (_, reason_prompt) = &history[1];
    assert!(
        reason_prompt.contains("Columns of assets.csv: Asset | Cost"),
        "fallback preview feeds the reasoner"
    );
}

#[tokio::test]
async fn non_tabular_sources_skip_the_analysis_stage() {
    let mock_ai = MockAiProvider::new(vec![
        "Backlog is $2M (Source: report.pdf, Last Updated: 2024-03-01 09:00:00 UTC).",
    ]);
    let records = vec![record("1", "bridge repair backlog totals", "report.pdf")];
    let (orchestrator, _guard) = orchestrator_with(&mock_ai, records).await;

    orchestrator.answer("bridge repair backlog").await.expect("answer");

    // No planning call: the single call is the reasoner.
    assert_eq!(mock_ai.calls(), 1);
    let history = mock_ai.call_history.read().unwrap();
    let (_, reason_prompt) = &history[0];
    assert!(!reason_prompt.contains("# Analysis results"));
}

#[tokio::test]
async fn duplicate_citations_collapse_in_the_sources_list() {
    let mock_ai = MockAiProvider::new(vec![
        "Two findings, one file (Source: report.pdf, Last Updated: 2024-03-01 09:00:00 UTC).",
    ]);
    let records = vec![
        record("1", "bridge repair backlog totals", "report.pdf"),
        record("2", "bridge repair funding plan", "report.pdf"),
    ];
    let (orchestrator, _guard) = orchestrator_with(&mock_ai, records).await;

    let answer = orchestrator
        .answer("bridge repair")
        .await
        .expect("answer");
    assert_eq!(answer.sources.len(), 1);
}

#[tokio::test]
async fn answer_serializes_with_the_camel_case_source_field() {
    let mock_ai = MockAiProvider::new(vec![
        "Backlog is $2M (Source: report.pdf, Last Updated: 2024-03-01 09:00:00 UTC).",
    ]);
    let records = vec![record("1", "bridge repair backlog totals", "report.pdf")];
    let (orchestrator, _guard) = orchestrator_with(&mock_ai, records).await;

    let answer = orchestrator
        .answer("bridge repair backlog")
        .await
        .expect("answer");
    let json = serde_json::to_string(&answer).expect("serialize");

    assert!(json.contains("\"lastUpdated\":\"2024-03-01 09:00:00 UTC\""));
    assert!(json.contains("\"href\":\"#\""));
    assert!(!json.contains("last_updated"));
}
