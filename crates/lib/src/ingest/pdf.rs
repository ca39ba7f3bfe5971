//! # PDF Text Extraction
//!
//! Local extraction of raw text from a PDF, page by page. The output feeds
//! the chunked structured-extraction pipeline in `ingest::document`. Parsing
//! is CPU-intensive, so it runs on the blocking thread pool.

use super::IngestError;
use pdf::file::FileOptions;
use std::path::Path;
use tracing::{info, warn};

/// Extracts the text of every page of a PDF as one markdown-ish string.
///
/// Fails with `UnsupportedFile` for a path that is not a `.pdf`.
pub async fn extract_markdown(path: &Path) -> Result<String, IngestError> {
    if path.extension().and_then(|e| e.to_str()) != Some("pdf") {
        return Err(IngestError::UnsupportedFile(path.display().to_string()));
    }

    let load_path = path.to_path_buf();
    let text_result = tokio::task::spawn_blocking(move || -> Result<String, IngestError> {
        let data = std::fs::read(load_path)?;
        let file = FileOptions::cached()
            .load(&data[..])
            .map_err(|e| IngestError::PdfParse(e.to_string()))?;

        let resolver = file.resolver();
        let mut full_text = String::new();

        for page_num in 0..file.num_pages() {
            let page = file
                .get_page(page_num)
                .map_err(|e| IngestError::PdfParse(e.to_string()))?;

            if let Some(content) = &page.contents {
                let operations = content
                    .operations(&resolver)
                    .map_err(|e| IngestError::PdfParse(e.to_string()))?;
                for op in operations.iter() {
                    match op {
                        pdf::content::Op::TextDraw { text } => {
                            full_text.push_str(&text.to_string_lossy());
                        }
                        pdf::content::Op::TextDrawAdjusted { array } => {
                            for item in array.iter() {
                                if let pdf::content::TextDrawAdjusted::Text(text) = item {
                                    full_text.push_str(&text.to_string_lossy());
                                }
                            }
                        }
                        _ => {}
                    }
                }
                full_text.push_str("\n\n");
            } else {
                warn!("Page {} has no content stream.", page_num);
            }
        }
        Ok(full_text)
    })
    .await;

    let text = text_result
        .map_err(|e| IngestError::Internal(anyhow::anyhow!("Join error during PDF parsing: {e}")))??;

    info!(
        "Extracted text from {}: {} characters.",
        path.display(),
        text.len()
    );
    Ok(text)
}
