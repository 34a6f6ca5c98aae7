pub mod content_hash;
pub mod source_status;

pub use content_hash::{deterministic_chunk_id, ContentHash};
pub use source_status::SourceStatus;
