use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One unit of work for the processing worker: transform (or forget) a
/// single source file at a specific observed content hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingTask {
    relative_path: String,
    physical_path: PathBuf,
    file_hash: String,
    created_at: DateTime<Utc>,
    retry_count: u32,
    is_deletion: bool,
}

impl ProcessingTask {
    pub fn new(
        relative_path: impl Into<String>,
        physical_path: impl Into<PathBuf>,
        file_hash: impl Into<String>,
    ) -> Self {
        Self {
            relative_path: relative_path.into(),
            physical_path: physical_path.into(),
            file_hash: file_hash.into(),
            created_at: Utc::now(),
            retry_count: 0,
            is_deletion: false,
        }
    }

    pub fn deletion(
        relative_path: impl Into<String>,
        physical_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            relative_path: relative_path.into(),
            physical_path: physical_path.into(),
            file_hash: String::new(),
            created_at: Utc::now(),
            retry_count: 0,
            is_deletion: true,
        }
    }

    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    pub fn physical_path(&self) -> &PathBuf {
        &self.physical_path
    }

    pub fn file_hash(&self) -> &str {
        &self.file_hash
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn is_deletion(&self) -> bool {
        self.is_deletion
    }

    pub fn increment_retry(&mut self) {
        self.retry_count += 1;
    }

    pub fn has_retries_left(&self, max_retries: u32) -> bool {
        self.retry_count < max_retries
    }
}
