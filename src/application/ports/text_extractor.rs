use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TextExtractionError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("corrupted input: {0}")]
    CorruptedInput(String),
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TextExtractionError {
    fn from(err: std::io::Error) -> Self {
        TextExtractionError::Io(err.to_string())
    }
}

/// One unit of extracted text. Extractors that understand pagination emit
/// one of these per page; everything else emits a single record covering
/// the whole body.
#[derive(Debug, Clone, PartialEq)]
pub struct TextExtraction {
    pub text: String,
    pub content_type: String,
    pub page_number: Option<i32>,
    pub source_location: Option<String>,
}

impl TextExtraction {
    pub fn new(text: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            content_type: content_type.into(),
            page_number: None,
            source_location: None,
        }
    }

    pub fn with_page(mut self, page_number: i32) -> Self {
        self.page_number = Some(page_number);
        self.source_location = Some(format!("page:{}", page_number));
        self
    }
}

/// Capability contract for turning files or byte streams into text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Whether this extractor handles the given lowercase file extension
    /// (without the leading dot).
    fn supports(&self, extension: &str) -> bool;

    fn supported_extensions(&self) -> Vec<String>;

    async fn extract(&self, path: &Path) -> Result<Vec<TextExtraction>, TextExtractionError>;

    async fn extract_bytes(
        &self,
        data: &[u8],
        content_type: &str,
    ) -> Result<Vec<TextExtraction>, TextExtractionError>;
}
