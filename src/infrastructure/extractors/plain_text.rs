use async_trait::async_trait;
use std::path::Path;

use crate::application::ports::{TextExtraction, TextExtractionError, TextExtractor};

const EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "csv", "json", "xml", "html", "htm", "log", "ini", "cfg", "yaml",
    "yml",
];

/// Fallback extractor: the whole file body decoded as UTF-8, one extraction.
pub struct PlainTextExtractor;

impl PlainTextExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn content_type_for(extension: &str) -> &'static str {
        match extension {
            "md" | "markdown" => "text/markdown",
            "csv" => "text/csv",
            "json" => "application/json",
            "xml" => "application/xml",
            "html" | "htm" => "text/html",
            "yaml" | "yml" => "application/yaml",
            _ => "text/plain",
        }
    }
}

impl Default for PlainTextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    fn supports(&self, extension: &str) -> bool {
        EXTENSIONS.contains(&extension)
    }

    fn supported_extensions(&self) -> Vec<String> {
        EXTENSIONS.iter().map(|e| e.to_string()).collect()
    }

    async fn extract(&self, path: &Path) -> Result<Vec<TextExtraction>, TextExtractionError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        let bytes = tokio::fs::read(path).await?;
        self.extract_bytes(&bytes, Self::content_type_for(&extension))
            .await
    }

    async fn extract_bytes(
        &self,
        data: &[u8],
        content_type: &str,
    ) -> Result<Vec<TextExtraction>, TextExtractionError> {
        let text = String::from_utf8_lossy(data).into_owned();
        Ok(vec![TextExtraction::new(text, content_type)])
    }
}
