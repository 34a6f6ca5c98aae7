pub mod semantic_chunker;
pub mod vault_processor;

pub use semantic_chunker::{ChunkingOptions, SemanticChunker};
pub use vault_processor::VaultFileProcessor;
