use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::domain::entities::ProcessingTask;

/// Failure taxonomy at the worker boundary. The worker decides retry
/// behavior from the variant, not from the message.
#[derive(Debug, Error)]
pub enum ProcessingFailure {
    /// Physical path missing when processing begins; the task is skipped
    /// until the next change arrives.
    #[error("input file not found")]
    InputNotFound,
    /// No extractor matches; the source is marked failed and not retried.
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),
    #[error("extraction error: {0}")]
    Extraction(String),
    #[error("embedding error: {0}")]
    Embedding(String),
    #[error("archive write error: {0}")]
    ArchiveWrite(String),
    #[error("index error: {0}")]
    Index(String),
    #[error("cancelled")]
    Cancelled,
}

impl ProcessingFailure {
    /// Transient failures are retried up to the configured budget; the
    /// rest either skip or fail the source outright.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProcessingFailure::Extraction(_)
                | ProcessingFailure::Embedding(_)
                | ProcessingFailure::ArchiveWrite(_)
                | ProcessingFailure::Index(_)
        )
    }
}

/// Structured per-file result surfaced to callers (CLI, logs).
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingReport {
    pub success: bool,
    pub output_path: Option<PathBuf>,
    pub chunk_count: usize,
    pub error_message: Option<String>,
    pub duration: Duration,
}

impl ProcessingReport {
    pub fn success(output_path: PathBuf, chunk_count: usize, duration: Duration) -> Self {
        Self {
            success: true,
            output_path: Some(output_path),
            chunk_count,
            error_message: None,
            duration,
        }
    }

    pub fn failure(error_message: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: false,
            output_path: None,
            chunk_count: 0,
            error_message: Some(error_message.into()),
            duration,
        }
    }
}

/// The pluggable body of the processing worker: extract, chunk, archive,
/// and index one source file, or forget one.
#[async_trait]
pub trait FileProcessor: Send + Sync {
    async fn process_file(
        &self,
        task: &ProcessingTask,
        cancel: &CancellationToken,
    ) -> Result<ProcessingReport, ProcessingFailure>;

    /// Drop every trace of a deleted source: chunks, embeddings, source
    /// row, and the archive file if one exists.
    async fn process_deletion(&self, task: &ProcessingTask) -> Result<(), ProcessingFailure>;
}
