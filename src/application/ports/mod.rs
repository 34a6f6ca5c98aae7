pub mod chunk_index;
pub mod chunk_storage;
pub mod embedding_provider;
pub mod file_processor;
pub mod text_extractor;

pub use chunk_index::{ChunkIndex, IndexError, UnembeddedChunk};
pub use chunk_storage::{ChunkStorage, ChunkStorageError};
pub use embedding_provider::{EmbeddingError, EmbeddingProvider};
pub use file_processor::{FileProcessor, ProcessingFailure, ProcessingReport};
pub use text_extractor::{TextExtraction, TextExtractionError, TextExtractor};
