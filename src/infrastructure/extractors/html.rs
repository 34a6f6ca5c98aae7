use async_trait::async_trait;
use std::path::Path;

use crate::application::ports::{TextExtraction, TextExtractionError, TextExtractor};

const WRAP_WIDTH: usize = 120;

/// Tag-stripping extractor for HTML sources.
pub struct HtmlExtractor;

impl HtmlExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HtmlExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextExtractor for HtmlExtractor {
    fn supports(&self, extension: &str) -> bool {
        matches!(extension, "html" | "htm")
    }

    fn supported_extensions(&self) -> Vec<String> {
        vec!["html".to_string(), "htm".to_string()]
    }

    async fn extract(&self, path: &Path) -> Result<Vec<TextExtraction>, TextExtractionError> {
        let bytes = tokio::fs::read(path).await?;
        self.extract_bytes(&bytes, "text/html").await
    }

    async fn extract_bytes(
        &self,
        data: &[u8],
        _content_type: &str,
    ) -> Result<Vec<TextExtraction>, TextExtractionError> {
        let text = html2text::from_read(data, WRAP_WIDTH);
        Ok(vec![TextExtraction::new(text, "text/html")])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_strips_markup() {
        let extractor = HtmlExtractor::new();
        let html = "<html><body><h1>Title</h1><p>First paragraph.</p></body></html>";
        let out = extractor.extract_bytes(html.as_bytes(), "text/html").await.unwrap();

        assert_eq!(out.len(), 1);
        assert!(out[0].text.contains("Title"));
        assert!(out[0].text.contains("First paragraph."));
        assert!(!out[0].text.contains("<p>"));
    }

    #[test]
    fn test_supports_only_html() {
        let extractor = HtmlExtractor::new();
        assert!(extractor.supports("html"));
        assert!(extractor.supports("htm"));
        assert!(!extractor.supports("txt"));
    }
}
