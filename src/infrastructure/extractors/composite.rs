use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::application::ports::{TextExtraction, TextExtractionError, TextExtractor};

use super::{HtmlExtractor, PdfExtractor, PlainTextExtractor};

/// Routes each input to the first extractor claiming its extension.
/// Registration order matters: more specific extractors come first, the
/// plain-text fallback last.
pub struct CompositeExtractor {
    extractors: Vec<Arc<dyn TextExtractor>>,
}

impl CompositeExtractor {
    pub fn new(extractors: Vec<Arc<dyn TextExtractor>>) -> Self {
        Self { extractors }
    }

    /// The default stack: PDF, HTML, then plain text.
    pub fn standard() -> Self {
        Self::new(vec![
            Arc::new(PdfExtractor::new()),
            Arc::new(HtmlExtractor::new()),
            Arc::new(PlainTextExtractor::new()),
        ])
    }

    fn extractor_for_extension(&self, extension: &str) -> Option<&Arc<dyn TextExtractor>> {
        self.extractors.iter().find(|e| e.supports(extension))
    }

    fn extractor_for_content_type(&self, content_type: &str) -> &Arc<dyn TextExtractor> {
        let extension = match content_type {
            "application/pdf" => "pdf",
            "text/html" => "html",
            _ => "txt",
        };
        self.extractor_for_extension(extension)
            .unwrap_or_else(|| self.extractors.last().expect("at least one extractor"))
    }
}

#[async_trait]
impl TextExtractor for CompositeExtractor {
    fn supports(&self, extension: &str) -> bool {
        self.extractors.iter().any(|e| e.supports(extension))
    }

    fn supported_extensions(&self) -> Vec<String> {
        let mut extensions: Vec<String> = self
            .extractors
            .iter()
            .flat_map(|e| e.supported_extensions())
            .collect();
        extensions.sort();
        extensions.dedup();
        extensions
    }

    async fn extract(&self, path: &Path) -> Result<Vec<TextExtraction>, TextExtractionError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        let extractor = self
            .extractor_for_extension(&extension)
            .ok_or_else(|| TextExtractionError::UnsupportedFormat(extension.clone()))?;

        extractor.extract(path).await
    }

    async fn extract_bytes(
        &self,
        data: &[u8],
        content_type: &str,
    ) -> Result<Vec<TextExtraction>, TextExtractionError> {
        self.extractor_for_content_type(content_type)
            .extract_bytes(data, content_type)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_prefers_specific_extractors() {
        let composite = CompositeExtractor::standard();
        assert!(composite.supports("pdf"));
        assert!(composite.supports("html"));
        assert!(composite.supports("txt"));
        assert!(!composite.supports("exe"));
    }

    #[test]
    fn test_supported_extensions_are_deduplicated() {
        let composite = CompositeExtractor::standard();
        let extensions = composite.supported_extensions();
        let mut deduped = extensions.clone();
        deduped.dedup();
        assert_eq!(extensions, deduped);
        // html appears in both the html and plain-text extractors.
        assert_eq!(extensions.iter().filter(|e| *e == "html").count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_extension_is_unsupported() {
        let composite = CompositeExtractor::standard();
        let result = composite.extract(Path::new("/tmp/archive.zip")).await;
        assert!(matches!(
            result,
            Err(TextExtractionError::UnsupportedFormat(_))
        ));
    }
}
