use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::ports::{ChunkIndex, FileProcessor, ProcessingFailure};
use crate::domain::entities::{ProcessingTask, SourceFile};
use crate::domain::value_objects::ContentHash;
use crate::infrastructure::queue::ProcessingQueue;

const IDLE_POLL: Duration = Duration::from_millis(100);

/// What a single task iteration amounted to. The worker loop only logs
/// these; tests assert on them.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Success,
    Skipped,
    LockBusy,
    Retried,
    GaveUp,
    VersionMismatch,
    Deleted,
    Cancelled,
}

/// Pulls tasks off the ready queue and drives the file processor under the
/// per-path lock. Multiple instances may run; the lock table keeps any one
/// path single-writer.
pub struct ProcessingWorker {
    queue: Arc<ProcessingQueue>,
    processor: Arc<dyn FileProcessor>,
    index: Arc<dyn ChunkIndex>,
    max_retries: u32,
}

impl ProcessingWorker {
    pub fn new(
        queue: Arc<ProcessingQueue>,
        processor: Arc<dyn FileProcessor>,
        index: Arc<dyn ChunkIndex>,
        max_retries: u32,
    ) -> Self {
        Self {
            queue,
            processor,
            index,
            max_retries,
        }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        info!("processing worker started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            match self.queue.try_dequeue() {
                Some(task) => {
                    self.handle_task(task, &cancel).await;
                }
                None => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(IDLE_POLL) => {}
                    }
                }
            }
        }
        debug!("processing worker stopped");
    }

    /// Process at most one queued task. Exposed for the drain path and for
    /// tests; `run` is just this in a loop.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Option<TaskOutcome> {
        let task = self.queue.try_dequeue()?;
        Some(self.handle_task(task, cancel).await)
    }

    async fn handle_task(&self, task: ProcessingTask, cancel: &CancellationToken) -> TaskOutcome {
        let path = task.relative_path().to_string();

        let Some(_guard) = self.queue.try_acquire_lock(&path) else {
            debug!(path, "path locked elsewhere, requeueing");
            self.queue.requeue(task);
            return TaskOutcome::LockBusy;
        };

        if task.is_deletion() {
            return match self.processor.process_deletion(&task).await {
                Ok(()) => {
                    self.queue.remove_version(&path);
                    TaskOutcome::Deleted
                }
                Err(failure) => self.handle_failure(task, failure).await,
            };
        }

        // Unchanged since the last successful run: nothing to do.
        if self.queue.get_version(&path).as_deref() == Some(task.file_hash()) {
            debug!(path, "version already processed, skipping");
            return TaskOutcome::Skipped;
        }

        match self.processor.process_file(&task, cancel).await {
            Ok(report) => self.confirm_version(&task, report.chunk_count).await,
            Err(failure) => self.handle_failure(task, failure).await,
        }
    }

    /// A successful run only counts if the file still hashes to what the
    /// task observed; otherwise the work is stale and the fresh content is
    /// re-enqueued directly.
    async fn confirm_version(&self, task: &ProcessingTask, chunk_count: usize) -> TaskOutcome {
        let path = task.relative_path();

        let current_hash = match tokio::fs::read(task.physical_path()).await {
            Ok(bytes) => ContentHash::of_bytes(&bytes).to_string(),
            Err(e) => {
                // Deleted mid-flight; the delete event will clean up.
                debug!(path, error = %e, "source vanished after processing");
                return TaskOutcome::Success;
            }
        };

        if current_hash == task.file_hash() {
            self.queue.set_version(path, &current_hash);
            info!(path, chunk_count, "source processed");
            TaskOutcome::Success
        } else {
            info!(path, "file changed during processing, re-enqueueing");
            self.queue.enqueue_direct(ProcessingTask::new(
                path,
                task.physical_path().clone(),
                current_hash,
            ));
            TaskOutcome::VersionMismatch
        }
    }

    async fn handle_failure(
        &self,
        task: ProcessingTask,
        failure: ProcessingFailure,
    ) -> TaskOutcome {
        let path = task.relative_path().to_string();

        match failure {
            ProcessingFailure::Cancelled => TaskOutcome::Cancelled,
            ProcessingFailure::InputNotFound => {
                debug!(path, "input missing, skipping until the next change");
                TaskOutcome::Skipped
            }
            ProcessingFailure::UnsupportedType(extension) => {
                warn!(path, extension, "no extractor for source, marking failed");
                TaskOutcome::GaveUp
            }
            transient if transient.is_transient() => {
                if task.retry_count() < self.max_retries {
                    warn!(
                        path,
                        retry = task.retry_count() + 1,
                        error = %transient,
                        "processing failed, retrying"
                    );
                    self.queue.requeue(task);
                    TaskOutcome::Retried
                } else {
                    error!(path, error = %transient, "retries exhausted, giving up");
                    self.mark_source_failed(&path, &task).await;
                    TaskOutcome::GaveUp
                }
            }
            other => {
                error!(path, error = %other, "unretryable processing failure");
                self.mark_source_failed(&path, &task).await;
                TaskOutcome::GaveUp
            }
        }
    }

    async fn mark_source_failed(&self, path: &str, task: &ProcessingTask) {
        let mut record = match self.index.get_source_file(path).await {
            Ok(Some(existing)) => existing,
            Ok(None) => SourceFile::new(path, task.file_hash(), 0),
            Err(e) => {
                error!(path, error = %e, "could not load source row to mark failed");
                return;
            }
        };
        record.fail();
        if let Err(e) = self.index.upsert_source_file(&record).await {
            error!(path, error = %e, "could not mark source failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{IndexError, ProcessingReport, UnembeddedChunk};
    use crate::domain::entities::Chunk;
    use crate::infrastructure::queue::VersionMap;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    /// Scriptable processor: fails the first `fail_times` calls, then
    /// succeeds. Counts invocations.
    struct ScriptedProcessor {
        calls: AtomicUsize,
        fail_times: usize,
        failure: fn() -> ProcessingFailure,
    }

    impl ScriptedProcessor {
        fn succeeding() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_times: 0,
                failure: || ProcessingFailure::Extraction("unused".into()),
            }
        }

        fn failing_forever(failure: fn() -> ProcessingFailure) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_times: usize::MAX,
                failure,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FileProcessor for ScriptedProcessor {
        async fn process_file(
            &self,
            _task: &ProcessingTask,
            _cancel: &CancellationToken,
        ) -> Result<ProcessingReport, ProcessingFailure> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Err((self.failure)())
            } else {
                Ok(ProcessingReport::success(
                    "out.parquet".into(),
                    1,
                    Duration::from_millis(1),
                ))
            }
        }

        async fn process_deletion(&self, _task: &ProcessingTask) -> Result<(), ProcessingFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Index stub that remembers at most one source row.
    #[derive(Default)]
    struct NullIndex {
        failed: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChunkIndex for NullIndex {
        async fn upsert_source_file(&self, record: &SourceFile) -> Result<(), IndexError> {
            if record.status() == crate::domain::value_objects::SourceStatus::Failed {
                self.failed.lock().unwrap().push(record.path().to_string());
            }
            Ok(())
        }
        async fn get_source_file(&self, _path: &str) -> Result<Option<SourceFile>, IndexError> {
            Ok(None)
        }
        async fn insert_chunks(&self, _h: &str, _c: &[Chunk]) -> Result<(), IndexError> {
            Ok(())
        }
        async fn save_embedding(&self, _id: Uuid, _e: &[f32]) -> Result<(), IndexError> {
            Ok(())
        }
        async fn save_embeddings_batch(
            &self,
            _p: &[(Uuid, Vec<f32>)],
        ) -> Result<(), IndexError> {
            Ok(())
        }
        async fn delete_chunks_by_source_path(&self, _p: &str) -> Result<usize, IndexError> {
            Ok(0)
        }
        async fn delete_source_file(&self, _p: &str) -> Result<(), IndexError> {
            Ok(())
        }
        async fn get_chunks_without_embedding(
            &self,
            _l: i64,
        ) -> Result<Vec<UnembeddedChunk>, IndexError> {
            Ok(Vec::new())
        }
        async fn count_chunks_without_embedding(&self, _p: &str) -> Result<i64, IndexError> {
            Ok(0)
        }
        async fn count_chunks_by_source_path(&self, _p: &str) -> Result<i64, IndexError> {
            Ok(0)
        }
        async fn get_unsynced_source_files(&self, _l: i64) -> Result<Vec<SourceFile>, IndexError> {
            Ok(Vec::new())
        }
        async fn mark_source_file_as_synced(&self, _p: &str) -> Result<(), IndexError> {
            Ok(())
        }
    }

    fn make_queue(dir: &std::path::Path) -> Arc<ProcessingQueue> {
        Arc::new(ProcessingQueue::new(
            Arc::new(VersionMap::load(dir.join("versions.json"))),
            Duration::from_millis(10),
        ))
    }

    async fn write_vault_file(dir: &std::path::Path, name: &str, body: &str) -> (String, String) {
        let physical = dir.join(name);
        tokio::fs::write(&physical, body).await.unwrap();
        let hash = ContentHash::of_bytes(body.as_bytes()).to_string();
        (physical.to_string_lossy().into_owned(), hash)
    }

    #[tokio::test]
    async fn test_successful_task_records_version() {
        let dir = tempfile::tempdir().unwrap();
        let queue = make_queue(dir.path());
        let processor = Arc::new(ScriptedProcessor::succeeding());
        let worker = ProcessingWorker::new(
            queue.clone(),
            processor.clone(),
            Arc::new(NullIndex::default()),
            3,
        );

        let (physical, hash) = write_vault_file(dir.path(), "a.txt", "hello").await;
        queue.enqueue_direct(ProcessingTask::new("a.txt", physical, &hash));

        let outcome = worker.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Success);
        assert_eq!(queue.get_version("a.txt"), Some(hash));
        assert_eq!(processor.calls(), 1);
    }

    #[tokio::test]
    async fn test_known_version_is_skipped_without_processing() {
        let dir = tempfile::tempdir().unwrap();
        let queue = make_queue(dir.path());
        let processor = Arc::new(ScriptedProcessor::succeeding());
        let worker = ProcessingWorker::new(
            queue.clone(),
            processor.clone(),
            Arc::new(NullIndex::default()),
            3,
        );

        let (physical, hash) = write_vault_file(dir.path(), "a.txt", "hello").await;
        queue.set_version("a.txt", &hash);
        queue.enqueue_direct(ProcessingTask::new("a.txt", physical, &hash));

        let outcome = worker.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Skipped);
        assert_eq!(processor.calls(), 0);
    }

    #[tokio::test]
    async fn test_mid_flight_rewrite_triggers_direct_reenqueue() {
        let dir = tempfile::tempdir().unwrap();
        let queue = make_queue(dir.path());
        let worker = ProcessingWorker::new(
            queue.clone(),
            Arc::new(ScriptedProcessor::succeeding()),
            Arc::new(NullIndex::default()),
            3,
        );

        // The task carries a stale hash: by the time processing finishes,
        // the on-disk content says otherwise.
        let (physical, _) = write_vault_file(dir.path(), "c.txt", "rewritten body").await;
        let stale_hash = ContentHash::of_text("original body").to_string();
        queue.enqueue_direct(ProcessingTask::new("c.txt", physical, &stale_hash));

        let outcome = worker.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, TaskOutcome::VersionMismatch);
        assert_eq!(queue.get_version("c.txt"), None, "stale work is not recorded");

        let follow_up = queue.try_dequeue().expect("fresh task enqueued directly");
        assert_eq!(
            follow_up.file_hash(),
            ContentHash::of_text("rewritten body").to_string()
        );
        assert_eq!(follow_up.retry_count(), 0);

        // The follow-up run processes cleanly and pins the new version.
        queue.enqueue_direct(follow_up);
        let outcome = worker.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Success);
        assert_eq!(
            queue.get_version("c.txt"),
            Some(ContentHash::of_text("rewritten body").to_string())
        );
    }

    #[tokio::test]
    async fn test_transient_failure_retries_then_gives_up() {
        let dir = tempfile::tempdir().unwrap();
        let queue = make_queue(dir.path());
        let processor = Arc::new(ScriptedProcessor::failing_forever(|| {
            ProcessingFailure::ArchiveWrite("disk on fire".into())
        }));
        let index = Arc::new(NullIndex::default());
        let worker = ProcessingWorker::new(queue.clone(), processor.clone(), index.clone(), 3);

        let (physical, hash) = write_vault_file(dir.path(), "a.txt", "hello").await;
        queue.enqueue_direct(ProcessingTask::new("a.txt", physical, &hash));

        let cancel = CancellationToken::new();
        let mut outcomes = Vec::new();
        while let Some(outcome) = worker.run_once(&cancel).await {
            outcomes.push(outcome);
        }

        assert_eq!(
            outcomes,
            vec![
                TaskOutcome::Retried,
                TaskOutcome::Retried,
                TaskOutcome::Retried,
                TaskOutcome::GaveUp
            ]
        );
        assert_eq!(processor.calls(), 4);
        assert_eq!(queue.get_version("a.txt"), None);
        assert_eq!(index.failed.lock().unwrap().as_slice(), ["a.txt"]);
    }

    #[tokio::test]
    async fn test_missing_input_is_skipped_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let queue = make_queue(dir.path());
        let processor = Arc::new(ScriptedProcessor::failing_forever(|| {
            ProcessingFailure::InputNotFound
        }));
        let worker = ProcessingWorker::new(
            queue.clone(),
            processor,
            Arc::new(NullIndex::default()),
            3,
        );

        queue.enqueue_direct(ProcessingTask::new(
            "gone.txt",
            dir.path().join("gone.txt"),
            &"0".repeat(64),
        ));

        let outcome = worker.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Skipped);
        assert!(queue.try_dequeue().is_none());
    }

    #[tokio::test]
    async fn test_deletion_clears_version_entry() {
        let dir = tempfile::tempdir().unwrap();
        let queue = make_queue(dir.path());
        let worker = ProcessingWorker::new(
            queue.clone(),
            Arc::new(ScriptedProcessor::succeeding()),
            Arc::new(NullIndex::default()),
            3,
        );

        queue.set_version("a.txt", &"1".repeat(64));
        queue.enqueue_direct(ProcessingTask::deletion("a.txt", dir.path().join("a.txt")));

        let outcome = worker.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Deleted);
        assert_eq!(queue.get_version("a.txt"), None);
    }

    #[tokio::test]
    async fn test_locked_path_is_requeued() {
        let dir = tempfile::tempdir().unwrap();
        let queue = make_queue(dir.path());
        let worker = ProcessingWorker::new(
            queue.clone(),
            Arc::new(ScriptedProcessor::succeeding()),
            Arc::new(NullIndex::default()),
            3,
        );

        let _held = queue.try_acquire_lock("a.txt").unwrap();
        let (physical, hash) = write_vault_file(dir.path(), "a.txt", "hello").await;
        queue.enqueue_direct(ProcessingTask::new("a.txt", physical, &hash));

        let outcome = worker.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, TaskOutcome::LockBusy);
        assert_eq!(queue.try_dequeue().unwrap().retry_count(), 1);
    }
}
