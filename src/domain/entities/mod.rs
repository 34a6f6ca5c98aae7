pub mod chunk;
pub mod file_change_event;
pub mod processing_task;
pub mod source_file;

pub use chunk::{Chunk, SourceMetadata};
pub use file_change_event::{ChangeKind, ChangeOrigin, FileChangeEvent};
pub use processing_task::ProcessingTask;
pub use source_file::SourceFile;
