use async_trait::async_trait;
use lopdf::Document;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use std::path::Path;

use crate::application::ports::{TextExtraction, TextExtractionError, TextExtractor};

/// PDF extractor: one extraction per page, extracted in parallel, emitted
/// in page order so chunk indexes stay contiguous.
pub struct PdfExtractor;

impl PdfExtractor {
    pub fn new() -> Self {
        Self
    }

    fn extract_document(doc: &Document) -> Result<Vec<TextExtraction>, TextExtractionError> {
        let pages: Vec<u32> = doc.get_pages().keys().copied().collect();

        let mut extracted: Vec<(u32, String)> = pages
            .into_par_iter()
            .map(|page_num| {
                let text = doc
                    .extract_text(&[page_num])
                    .map_err(|e| format!("page {}: {}", page_num, e))?;
                Ok((page_num, text))
            })
            .collect::<Result<Vec<_>, String>>()
            .map_err(TextExtractionError::ExtractionFailed)?;

        extracted.sort_by_key(|(page_num, _)| *page_num);

        Ok(extracted
            .into_iter()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(page_num, text)| {
                TextExtraction::new(text, "application/pdf").with_page(page_num as i32)
            })
            .collect())
    }
}

impl Default for PdfExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextExtractor for PdfExtractor {
    fn supports(&self, extension: &str) -> bool {
        extension == "pdf"
    }

    fn supported_extensions(&self) -> Vec<String> {
        vec!["pdf".to_string()]
    }

    async fn extract(&self, path: &Path) -> Result<Vec<TextExtraction>, TextExtractionError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let doc = Document::load(&path)
                .map_err(|e| TextExtractionError::CorruptedInput(e.to_string()))?;
            Self::extract_document(&doc)
        })
        .await
        .map_err(|e| TextExtractionError::ExtractionFailed(e.to_string()))?
    }

    async fn extract_bytes(
        &self,
        data: &[u8],
        _content_type: &str,
    ) -> Result<Vec<TextExtraction>, TextExtractionError> {
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || {
            let doc = Document::load_mem(&data)
                .map_err(|e| TextExtractionError::CorruptedInput(e.to_string()))?;
            Self::extract_document(&doc)
        })
        .await
        .map_err(|e| TextExtractionError::ExtractionFailed(e.to_string()))?
    }
}
