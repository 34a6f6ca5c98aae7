//! Vault document ingestion engine.
//!
//! Watches a directory tree (typically exposed over WebDAV by the host
//! application), splits changed documents into semantically coherent chunks
//! with a sentence-embedding model as the boundary oracle, writes one
//! self-describing Parquet archive per source, and keeps a relational index
//! of sources, chunks, and embeddings up to date through a debounced,
//! locked, versioned work queue.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod workers;

pub use application::ports;
pub use application::services::{ChunkingOptions, SemanticChunker};
pub use config::{EmbeddingBackend, VaultConfig};
pub use domain::entities::{
    ChangeKind, ChangeOrigin, Chunk, FileChangeEvent, ProcessingTask, SourceFile, SourceMetadata,
};
pub use infrastructure::{AppContainer, ContainerError};
