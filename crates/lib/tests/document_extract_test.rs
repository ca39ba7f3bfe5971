//! Tests for long-form document extraction: chunk-by-chunk structured
//! extraction, the per-chunk retry budget, and the non-empty-content rule.

mod common;

use cityrag::ingest::document::DocumentExtractor;
use common::{setup_tracing, MockAiProvider};

fn chunk_json(body: &str) -> String {
    format!(
        concat!(
            r#"{{"metadata":{{"service_area":"Public Works","topic":"Paving","#,
            r#""data_type":"report"}},"page_content":{{"context_header":"2024 plan","#,
            r#""content_body":"{}","key_metrics":["4.2 lane-miles","$1.1M budget"]}}}}"#
        ),
        body
    )
}

/// A document of exactly `len` characters with no long whitespace runs.
fn document_of(len: usize) -> String {
    "abcdefghij".chars().cycle().take(len).collect()
}

#[tokio::test]
async fn each_window_yields_one_record() {
    setup_tracing();
    let first = chunk_json("Main St resurfacing scheduled for Q3.");
    let second = chunk_json("Oak Ave culvert replacement deferred.");
    let third = chunk_json("Bridge deck sealing complete.");
    let mock_ai = MockAiProvider::new(vec![first.as_str(), second.as_str(), third.as_str()]);

    let extractor = DocumentExtractor::new(&mock_ai);
    // 120 characters at chunk size 50 gives three windows.
    let records = extractor
        .extract(
            &document_of(120),
            "plan.pdf",
            "2024-01-01 00:00:00 UTC",
            50,
            5,
        )
        .await
        .expect("extraction should succeed");

    assert_eq!(records.len(), 3);
    assert_eq!(mock_ai.calls(), 3);
    assert_eq!(records[0].content, "Main St resurfacing scheduled for Q3.");
    assert_eq!(
        records[0].metadata.get("service_area").map(String::as_str),
        Some("Public Works")
    );
    assert_eq!(
        records[0].metadata.get("key_metrics").map(String::as_str),
        Some("4.2 lane-miles; $1.1M budget")
    );
    assert_eq!(
        records[0].metadata.get("filename").map(String::as_str),
        Some("plan.pdf")
    );
    // Chunk order is preserved in the output.
    assert_eq!(records[2].content, "Bridge deck sealing complete.");
}

#[tokio::test]
async fn persistently_malformed_chunk_is_dropped_after_one_retry() {
    let good = chunk_json("Oak Ave culvert replacement deferred.");
    let mock_ai = MockAiProvider::new(vec!["not json", "still not json", good.as_str()]);

    let extractor = DocumentExtractor::new(&mock_ai);
    // 80 characters at chunk size 50 gives two windows. The first chunk
    // burns both attempts and is dropped; the second succeeds.
    let records = extractor
        .extract(
            &document_of(80),
            "plan.pdf",
            "2024-01-01 00:00:00 UTC",
            50,
            5,
        )
        .await
        .expect("remaining chunks should survive");

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].content, "Oak Ave culvert replacement deferred.");
    assert_eq!(mock_ai.calls(), 3);
}

#[tokio::test]
async fn malformed_chunk_recovers_on_its_retry() {
    let good = chunk_json("Pump station telemetry upgraded.");
    let mock_ai = MockAiProvider::new(vec!["garbage", good.as_str()]);

    let extractor = DocumentExtractor::new(&mock_ai);
    let records = extractor
        .extract(
            &document_of(40),
            "plan.pdf",
            "2024-01-01 00:00:00 UTC",
            50,
            5,
        )
        .await
        .expect("retry should recover");

    assert_eq!(records.len(), 1);
    assert_eq!(mock_ai.calls(), 2);
}

#[tokio::test]
async fn chunks_with_empty_content_body_produce_no_record() {
    let empty_body = chunk_json("   ");
    let mock_ai = MockAiProvider::new(vec![empty_body.as_str()]);

    let extractor = DocumentExtractor::new(&mock_ai);
    let records = extractor
        .extract(
            &document_of(40),
            "plan.pdf",
            "2024-01-01 00:00:00 UTC",
            50,
            5,
        )
        .await
        .expect("extraction should succeed");

    assert!(records.is_empty());
    assert_eq!(mock_ai.calls(), 1);
}

#[tokio::test]
async fn blank_documents_never_reach_the_model() {
    let mock_ai = MockAiProvider::new(vec![]);
    let extractor = DocumentExtractor::new(&mock_ai);

    let records = extractor
        .extract("   \n\n  ", "plan.pdf", "2024-01-01 00:00:00 UTC", 50, 5)
        .await
        .expect("blank document is a no-op");

    assert!(records.is_empty());
    assert_eq!(mock_ai.calls(), 0);
}
