use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

use crate::domain::entities::{Chunk, SourceMetadata};

#[derive(Debug, Error)]
pub enum ChunkStorageError {
    #[error("io error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("missing required column: {0}")]
    MissingColumn(String),
    #[error("malformed archive: {0}")]
    Malformed(String),
}

impl From<std::io::Error> for ChunkStorageError {
    fn from(err: std::io::Error) -> Self {
        ChunkStorageError::Io(err.to_string())
    }
}

/// Capability contract for the self-describing per-source chunk archive.
///
/// A written file must be interpretable on its own: every row carries the
/// source metadata alongside the chunk fields.
#[async_trait]
pub trait ChunkStorage: Send + Sync {
    async fn write_chunks(
        &self,
        chunks: &[Chunk],
        metadata: &SourceMetadata,
        target_path: &Path,
    ) -> Result<(), ChunkStorageError>;

    /// Load a previously written archive, preserving chunk order and the
    /// null-versus-zero distinction on optional fields.
    async fn read_chunks(&self, path: &Path) -> Result<Vec<Chunk>, ChunkStorageError>;
}
