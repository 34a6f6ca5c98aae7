pub mod embedding_sync;
pub mod processing;

pub use embedding_sync::EmbeddingSyncWorker;
pub use processing::{ProcessingWorker, TaskOutcome};
