use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::value_objects::{deterministic_chunk_id, ContentHash};

/// A contiguous substring of a source document treated as one unit of
/// retrieval.
///
/// The id is a pure function of `(source_id, content_hash)`, so writing the
/// same text for the same source twice lands on the same row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    id: Uuid,
    content_hash: ContentHash,
    source_id: String,
    chunk_index: i32,
    text: String,
    start_index: Option<i32>,
    end_index: Option<i32>,
    page_number: Option<i32>,
    source_location: Option<String>,
    created_at: DateTime<Utc>,
    version: String,
}

impl Chunk {
    pub fn new(
        source_id: impl Into<String>,
        text: impl Into<String>,
        chunk_index: i32,
        start_index: Option<i32>,
        end_index: Option<i32>,
        page_number: Option<i32>,
        source_location: Option<String>,
    ) -> Self {
        let source_id = source_id.into();
        let text = text.into();
        let content_hash = ContentHash::of_text(&text);
        let id = deterministic_chunk_id(&source_id, &content_hash);

        Self {
            id,
            content_hash,
            source_id,
            chunk_index,
            text,
            start_index,
            end_index,
            page_number,
            source_location,
            created_at: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Rebuild a chunk from persisted fields (archive or index read path).
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: Uuid,
        content_hash: ContentHash,
        source_id: String,
        chunk_index: i32,
        text: String,
        start_index: Option<i32>,
        end_index: Option<i32>,
        page_number: Option<i32>,
        source_location: Option<String>,
        created_at: DateTime<Utc>,
        version: String,
    ) -> Self {
        Self {
            id,
            content_hash,
            source_id,
            chunk_index,
            text,
            start_index,
            end_index,
            page_number,
            source_location,
            created_at,
            version,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn content_hash(&self) -> &ContentHash {
        &self.content_hash
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn chunk_index(&self) -> i32 {
        self.chunk_index
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn start_index(&self) -> Option<i32> {
        self.start_index
    }

    pub fn end_index(&self) -> Option<i32> {
        self.end_index
    }

    pub fn page_number(&self) -> Option<i32> {
        self.page_number
    }

    pub fn source_location(&self) -> Option<&str> {
        self.source_location.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn character_count(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Source-level metadata stamped into every archive row so a chunk file is
/// interpretable without the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub source_name: String,
    pub source_content_type: Option<String>,
    pub source_file_size: Option<i64>,
    pub source_file_hash: Option<String>,
}

impl SourceMetadata {
    pub fn new(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            source_content_type: None,
            source_file_size: None,
            source_file_hash: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.source_content_type = Some(content_type.into());
        self
    }

    pub fn with_file_size(mut self, size: i64) -> Self {
        self.source_file_size = Some(size);
        self
    }

    pub fn with_file_hash(mut self, hash: impl Into<String>) -> Self {
        self.source_file_hash = Some(hash.into());
        self
    }
}
