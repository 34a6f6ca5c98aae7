use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::SourceStatus;

/// Index row describing one source file under the vault root.
///
/// `path` is the relative POSIX-style path and the primary key. `is_synced`
/// is true only when every chunk of this source has an embedding row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFile {
    path: String,
    hash: String,
    file_size: i64,
    chunk_count: i32,
    archive_path: Option<String>,
    status: SourceStatus,
    processed_at: DateTime<Utc>,
    is_synced: bool,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, hash: impl Into<String>, file_size: i64) -> Self {
        Self {
            path: path.into(),
            hash: hash.into(),
            file_size,
            chunk_count: 0,
            archive_path: None,
            status: SourceStatus::Pending,
            processed_at: Utc::now(),
            is_synced: false,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        path: String,
        hash: String,
        file_size: i64,
        chunk_count: i32,
        archive_path: Option<String>,
        status: SourceStatus,
        processed_at: DateTime<Utc>,
        is_synced: bool,
    ) -> Self {
        Self {
            path,
            hash,
            file_size,
            chunk_count,
            archive_path,
            status,
            processed_at,
            is_synced,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn file_size(&self) -> i64 {
        self.file_size
    }

    pub fn chunk_count(&self) -> i32 {
        self.chunk_count
    }

    pub fn archive_path(&self) -> Option<&str> {
        self.archive_path.as_deref()
    }

    pub fn status(&self) -> SourceStatus {
        self.status
    }

    pub fn processed_at(&self) -> DateTime<Utc> {
        self.processed_at
    }

    pub fn is_synced(&self) -> bool {
        self.is_synced
    }

    pub fn start_processing(&mut self) {
        self.status = SourceStatus::Processing;
        self.processed_at = Utc::now();
    }

    /// Record a successful archive write + chunk upsert. Embeddings lag
    /// behind, so the sync flag drops until the backfill worker catches up.
    pub fn complete(&mut self, chunk_count: i32, archive_path: impl Into<String>) {
        self.status = SourceStatus::Completed;
        self.chunk_count = chunk_count;
        self.archive_path = Some(archive_path.into());
        self.processed_at = Utc::now();
        self.is_synced = false;
    }

    pub fn fail(&mut self) {
        self.status = SourceStatus::Failed;
        self.processed_at = Utc::now();
    }

    pub fn mark_synced(&mut self) {
        self.is_synced = true;
    }

    pub fn update_hash(&mut self, hash: impl Into<String>, file_size: i64) {
        self.hash = hash.into();
        self.file_size = file_size;
    }
}
