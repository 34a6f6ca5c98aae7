use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::ports::{
    ChunkIndex, ChunkStorage, EmbeddingProvider, FileProcessor, IndexError, TextExtractor,
};
use crate::application::services::{SemanticChunker, VaultFileProcessor};
use crate::config::{EmbeddingBackend, VaultConfig};
use crate::domain::entities::{ChangeKind, FileChangeEvent, ProcessingTask};
use crate::domain::value_objects::ContentHash;
use crate::infrastructure::archive::ParquetChunkStorage;
use crate::infrastructure::embeddings::{
    DeterministicEmbeddingProvider, LocalOnnxEmbeddingProvider, RemoteEmbeddingConfig,
    RemoteEmbeddingProvider,
};
use crate::infrastructure::extractors::CompositeExtractor;
use crate::infrastructure::index::SqliteIndex;
use crate::infrastructure::notifier::ChangeNotifier;
use crate::infrastructure::queue::{ProcessingQueue, VersionMap};
use crate::workers::{EmbeddingSyncWorker, ProcessingWorker};

const DRAIN_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    #[error("watcher error: {0}")]
    Watcher(#[from] notify::Error),
    #[error("embedding backend error: {0}")]
    Embedding(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wires the whole ingestion engine together and owns its lifecycle: the
/// notifier, the queue with its timers, the processing worker, and the
/// embedding sync worker.
///
/// The two process-wide resources (index connection, notifier) live here
/// with explicit start/shutdown instead of as statics.
pub struct AppContainer {
    config: VaultConfig,
    vault_root: PathBuf,
    notifier: Arc<ChangeNotifier>,
    queue: Arc<ProcessingQueue>,
    index: Arc<SqliteIndex>,
    processor: Arc<dyn FileProcessor>,
    cancel: CancellationToken,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl AppContainer {
    /// Build every component, arm the watcher, and launch the background
    /// workers.
    pub async fn start(
        vault_root: impl Into<PathBuf>,
        config: VaultConfig,
    ) -> Result<Arc<Self>, ContainerError> {
        let vault_root = vault_root.into();
        std::fs::create_dir_all(&config.data_path)?;
        std::fs::create_dir_all(config.archives_dir())?;

        let index = Arc::new(SqliteIndex::open(
            &config.index_path(),
            config.embedding_dimension,
        )?);
        let embedding_provider = build_embedding_provider(&config)?;
        let extractor: Arc<dyn TextExtractor> = Arc::new(CompositeExtractor::standard());
        let storage: Arc<dyn ChunkStorage> = Arc::new(ParquetChunkStorage::new());
        let chunker = Arc::new(SemanticChunker::new(
            embedding_provider.clone(),
            config.chunking.clone(),
        ));

        let processor: Arc<dyn FileProcessor> = Arc::new(VaultFileProcessor::new(
            extractor,
            chunker,
            storage,
            index.clone() as Arc<dyn ChunkIndex>,
            config.archives_dir(),
        ));

        let versions = Arc::new(VersionMap::load(config.versions_path()));
        let queue = Arc::new(ProcessingQueue::new(
            versions,
            Duration::from_millis(config.debounce_delay_ms),
        ));

        let notifier = Arc::new(ChangeNotifier::new(vault_root.clone()));
        notifier.start()?;

        let cancel = CancellationToken::new();
        queue.spawn_timers(cancel.clone());

        let container = Arc::new(Self {
            config,
            vault_root,
            notifier,
            queue,
            index,
            processor,
            cancel,
            workers: std::sync::Mutex::new(Vec::new()),
        });

        container.spawn_event_bridge();
        container.spawn_workers(embedding_provider);

        info!(vault = %container.vault_root.display(), "ingestion engine started");
        Ok(container)
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }

    pub fn queue(&self) -> &Arc<ProcessingQueue> {
        &self.queue
    }

    pub fn index(&self) -> &Arc<SqliteIndex> {
        &self.index
    }

    /// Turn change events into debounced processing tasks.
    fn spawn_event_bridge(self: &Arc<Self>) {
        let container = self.clone();
        let mut events = self.notifier.subscribe();
        let cancel = self.cancel.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = events.recv() => match received {
                        Ok(event) => container.enqueue_event(event).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            // Lossy by design; the hash dedup catches up.
                            warn!(missed, "event stream lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });
        self.workers.lock().expect("worker list poisoned").push(handle);
    }

    async fn enqueue_event(&self, event: FileChangeEvent) {
        if event.is_directory {
            // Subtree changes arrive as per-file events.
            return;
        }
        if !self.config.should_process(&event.relative_path) {
            debug!(path = event.relative_path, "filtered out by configuration");
            return;
        }

        match event.kind {
            ChangeKind::Deleted => {
                self.queue.enqueue_change(ProcessingTask::deletion(
                    event.relative_path,
                    event.physical_path,
                ));
            }
            ChangeKind::Renamed | ChangeKind::Moved => {
                if let (Some(old_rel), Some(old_phys)) =
                    (event.old_relative_path, event.old_physical_path)
                {
                    self.queue
                        .enqueue_change(ProcessingTask::deletion(old_rel, old_phys));
                }
                self.enqueue_content_task(event.relative_path, event.physical_path)
                    .await;
            }
            ChangeKind::Created | ChangeKind::Modified | ChangeKind::Copied => {
                self.enqueue_content_task(event.relative_path, event.physical_path)
                    .await;
            }
        }
    }

    async fn enqueue_content_task(&self, relative_path: String, physical_path: PathBuf) {
        match tokio::fs::read(&physical_path).await {
            Ok(bytes) => {
                let hash = ContentHash::of_bytes(&bytes).to_string();
                self.queue
                    .enqueue_change(ProcessingTask::new(relative_path, physical_path, hash));
            }
            Err(e) => {
                // Gone already; a delete event follows or the next change
                // re-reports it.
                debug!(path = relative_path, error = %e, "could not hash changed file");
            }
        }
    }

    fn spawn_workers(self: &Arc<Self>, embedding_provider: Arc<dyn EmbeddingProvider>) {
        let worker = ProcessingWorker::new(
            self.queue.clone(),
            self.processor.clone(),
            self.index.clone() as Arc<dyn ChunkIndex>,
            self.config.max_retries,
        );
        let cancel = self.cancel.clone();
        let processing = tokio::spawn(async move { worker.run(cancel).await });

        let sync_worker = EmbeddingSyncWorker::new(
            self.index.clone() as Arc<dyn ChunkIndex>,
            embedding_provider,
            self.config.embedding_batch_size,
            Duration::from_secs(self.config.embedding_sync_interval_secs),
        );
        let cancel = self.cancel.clone();
        let syncing = tokio::spawn(async move { sync_worker.run(cancel).await });

        let mut workers = self.workers.lock().expect("worker list poisoned");
        workers.push(processing);
        workers.push(syncing);
    }

    /// Orderly stop: no new events, drain queued work up to the configured
    /// deadline, cancel workers, persist the version map.
    pub async fn shutdown(&self) {
        info!("ingestion engine shutting down");
        self.notifier.shutdown();

        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(self.config.lock_timeout_seconds);
        while self.queue.has_work() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(DRAIN_POLL).await;
        }
        if self.queue.has_work() {
            warn!(
                pending = self.queue.pending_count(),
                ready = self.queue.ready_count(),
                "shutdown deadline reached with work remaining"
            );
        }

        self.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = {
            let mut workers = self.workers.lock().expect("worker list poisoned");
            workers.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }

        if let Err(e) = self.queue.persist_versions() {
            error!(error = %e, "failed to persist version map at shutdown");
        }
        info!("ingestion engine stopped");
    }
}

fn build_embedding_provider(
    config: &VaultConfig,
) -> Result<Arc<dyn EmbeddingProvider>, ContainerError> {
    let provider: Arc<dyn EmbeddingProvider> = match &config.embedding {
        EmbeddingBackend::Deterministic => {
            Arc::new(DeterministicEmbeddingProvider::new(config.embedding_dimension))
        }
        EmbeddingBackend::Remote { service_url } => Arc::new(
            RemoteEmbeddingProvider::new(RemoteEmbeddingConfig::new(
                service_url.clone(),
                config.embedding_dimension,
            ))
            .map_err(|e| ContainerError::Embedding(e.to_string()))?,
        ),
        EmbeddingBackend::LocalOnnx {
            model_path,
            tokenizer_path,
            max_tokens,
        } => Arc::new(
            LocalOnnxEmbeddingProvider::load(
                model_path,
                tokenizer_path,
                config.embedding_dimension,
                *max_tokens,
            )
            .map_err(|e| ContainerError::Embedding(e.to_string()))?,
        ),
    };
    Ok(provider)
}
