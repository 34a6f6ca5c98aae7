use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::ports::{ChunkIndex, EmbeddingError, EmbeddingProvider, IndexError};

const ERROR_BACKOFF: Duration = Duration::from_secs(10);
const SOURCE_SCAN_LIMIT: i64 = 50;

/// Background backfill: pulls chunks that have no embedding row, embeds
/// them in batches, writes the vectors back, and flips a source's sync flag
/// once every one of its chunks is covered.
pub struct EmbeddingSyncWorker {
    index: Arc<dyn ChunkIndex>,
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    interval: Duration,
}

impl EmbeddingSyncWorker {
    pub fn new(
        index: Arc<dyn ChunkIndex>,
        provider: Arc<dyn EmbeddingProvider>,
        batch_size: usize,
        interval: Duration,
    ) -> Self {
        Self {
            index,
            provider,
            batch_size: batch_size.max(1),
            interval,
        }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            batch_size = self.batch_size,
            interval_secs = self.interval.as_secs(),
            "embedding sync worker started"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let backoff = match self.run_once().await {
                Ok(embedded) => {
                    if embedded > 0 {
                        debug!(embedded, "embedding sync pass complete");
                    }
                    self.interval
                }
                Err(e) => {
                    error!(error = %e, "embedding sync pass failed");
                    ERROR_BACKOFF
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
        }
        debug!("embedding sync worker stopped");
    }

    /// One tick: embed up to `batch_size` chunks and advance sync flags.
    /// Returns how many embeddings were written.
    pub async fn run_once(&self) -> Result<usize, IndexError> {
        let pending = self
            .index
            .get_chunks_without_embedding(self.batch_size as i64)
            .await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = pending.iter().map(|c| c.text.clone()).collect();
        let pairs: Vec<(Uuid, Vec<f32>)> = match self.provider.generate_batch(&texts).await {
            Ok(vectors) => pending
                .iter()
                .map(|c| c.id)
                .zip(vectors)
                .collect(),
            Err(batch_error) => {
                // Batch failed; degrade to per-chunk calls so one poisoned
                // text cannot stall the whole backfill.
                warn!(error = %batch_error, "batch embedding failed, falling back per chunk");
                let mut recovered = Vec::new();
                for chunk in &pending {
                    match self.provider.generate(&chunk.text).await {
                        Ok(vector) => recovered.push((chunk.id, vector)),
                        Err(EmbeddingError::Cancelled) => break,
                        Err(e) => {
                            warn!(chunk_id = %chunk.id, error = %e, "skipping chunk this pass");
                        }
                    }
                }
                recovered
            }
        };

        if !pairs.is_empty() {
            self.index.save_embeddings_batch(&pairs).await?;
        }
        let embedded = pairs.len();

        for source in self
            .index
            .get_unsynced_source_files(SOURCE_SCAN_LIMIT)
            .await?
        {
            let remaining = self
                .index
                .count_chunks_without_embedding(source.path())
                .await?;
            if remaining == 0 {
                self.index.mark_source_file_as_synced(source.path()).await?;
                info!(path = source.path(), "source fully embedded");
            }
        }

        Ok(embedded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::ChunkIndex;
    use crate::domain::entities::{Chunk, SourceFile};
    use crate::infrastructure::embeddings::DeterministicEmbeddingProvider;
    use crate::infrastructure::index::SqliteIndex;
    use async_trait::async_trait;

    const DIM: usize = 8;

    async fn seed_source(index: &SqliteIndex, path: &str, texts: &[&str]) -> Vec<Chunk> {
        let mut record = SourceFile::new(path, "ab".repeat(32), 100);
        record.start_processing();
        record.complete(texts.len() as i32, format!("{}.chunks.parquet", path));
        index.upsert_source_file(&record).await.unwrap();

        let chunks: Vec<Chunk> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| Chunk::new(path, *t, i as i32, None, None, None, None))
            .collect();
        index.insert_chunks(&"ab".repeat(32), &chunks).await.unwrap();
        chunks
    }

    #[tokio::test]
    async fn test_backfill_advances_sync_flag() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(SqliteIndex::open(&dir.path().join("index.db"), DIM).unwrap());
        let chunks = seed_source(&index, "docs/a.txt", &["one.", "two.", "three."]).await;

        let worker = EmbeddingSyncWorker::new(
            index.clone(),
            Arc::new(DeterministicEmbeddingProvider::new(DIM)),
            2,
            Duration::from_secs(30),
        );

        // Batch size 2: the first pass leaves one chunk uncovered.
        assert_eq!(worker.run_once().await.unwrap(), 2);
        assert!(!index
            .get_source_file("docs/a.txt")
            .await
            .unwrap()
            .unwrap()
            .is_synced());

        // Second pass covers the remainder and flips the flag in the same
        // tick.
        assert_eq!(worker.run_once().await.unwrap(), 1);
        assert!(index
            .get_source_file("docs/a.txt")
            .await
            .unwrap()
            .unwrap()
            .is_synced());

        // Idle pass.
        assert_eq!(worker.run_once().await.unwrap(), 0);

        for chunk in &chunks {
            let vector = index.get_embedding(chunk.id()).await.unwrap().unwrap();
            assert_eq!(vector.len(), DIM);
            let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-4);
        }
    }

    /// Provider whose batch endpoint is broken and which rejects one
    /// specific text, to exercise the per-chunk fallback.
    struct FlakyProvider {
        inner: DeterministicEmbeddingProvider,
        poison: String,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyProvider {
        async fn generate(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            if text == self.poison {
                return Err(EmbeddingError::Inference("poisoned text".into()));
            }
            self.inner.generate(text).await
        }

        async fn generate_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Err(EmbeddingError::ServiceUnavailable)
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }
    }

    #[tokio::test]
    async fn test_batch_failure_degrades_to_per_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(SqliteIndex::open(&dir.path().join("index.db"), DIM).unwrap());
        seed_source(&index, "docs/a.txt", &["good one.", "bad one.", "good two."]).await;

        let worker = EmbeddingSyncWorker::new(
            index.clone(),
            Arc::new(FlakyProvider {
                inner: DeterministicEmbeddingProvider::new(DIM),
                poison: "bad one.".to_string(),
            }),
            10,
            Duration::from_secs(30),
        );

        // Two of three succeed; the poisoned chunk stays pending and the
        // source stays unsynced.
        assert_eq!(worker.run_once().await.unwrap(), 2);
        assert_eq!(
            index.count_chunks_without_embedding("docs/a.txt").await.unwrap(),
            1
        );
        assert!(!index
            .get_source_file("docs/a.txt")
            .await
            .unwrap()
            .unwrap()
            .is_synced());
    }
}
