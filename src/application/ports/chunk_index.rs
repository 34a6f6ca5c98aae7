use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::entities::{Chunk, SourceFile};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("database error: {0}")]
    Database(String),
    #[error("migration error: {0}")]
    Migration(String),
    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

/// A chunk row as seen by the embedding backfill: just enough to embed the
/// text and write the vector back.
#[derive(Debug, Clone, PartialEq)]
pub struct UnembeddedChunk {
    pub id: Uuid,
    pub source_path: String,
    pub text: String,
}

/// Relational store over source files, chunks, and embeddings.
///
/// All writes funnel through one logical connection; callers never see
/// partial transactions.
#[async_trait]
pub trait ChunkIndex: Send + Sync {
    /// INSERT … ON CONFLICT(path) UPDATE of every mutable field.
    async fn upsert_source_file(&self, record: &SourceFile) -> Result<(), IndexError>;

    async fn get_source_file(&self, path: &str) -> Result<Option<SourceFile>, IndexError>;

    /// Transactional per-row upsert keyed on chunk id; `source_hash` is the
    /// file hash the chunks were cut from.
    async fn insert_chunks(&self, source_hash: &str, chunks: &[Chunk]) -> Result<(), IndexError>;

    async fn save_embedding(&self, chunk_id: Uuid, embedding: &[f32]) -> Result<(), IndexError>;

    async fn save_embeddings_batch(
        &self,
        pairs: &[(Uuid, Vec<f32>)],
    ) -> Result<(), IndexError>;

    /// Remove every chunk of a source and their embeddings (embeddings
    /// first, via subquery on the chunk ids).
    async fn delete_chunks_by_source_path(&self, path: &str) -> Result<usize, IndexError>;

    /// Remove the source row itself along with its chunks and embeddings.
    async fn delete_source_file(&self, path: &str) -> Result<(), IndexError>;

    async fn get_chunks_without_embedding(
        &self,
        limit: i64,
    ) -> Result<Vec<UnembeddedChunk>, IndexError>;

    async fn count_chunks_without_embedding(&self, source_path: &str)
        -> Result<i64, IndexError>;

    async fn count_chunks_by_source_path(&self, source_path: &str) -> Result<i64, IndexError>;

    /// Completed sources whose chunks have not all been embedded yet.
    async fn get_unsynced_source_files(&self, limit: i64) -> Result<Vec<SourceFile>, IndexError>;

    async fn mark_source_file_as_synced(&self, path: &str) -> Result<(), IndexError>;
}
