use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::ports::{
    ChunkIndex, ChunkStorage, EmbeddingError, FileProcessor, ProcessingFailure,
    ProcessingReport, TextExtractor,
};
use crate::application::services::SemanticChunker;
use crate::domain::entities::{Chunk, ProcessingTask, SourceFile, SourceMetadata};

/// Default `FileProcessor`: extract text, cut semantic chunks, write the
/// per-source archive, and reconcile the chunk index.
///
/// Runs strictly under the queue manager's per-path lock, so it never races
/// itself on one source.
pub struct VaultFileProcessor {
    extractor: Arc<dyn TextExtractor>,
    chunker: Arc<SemanticChunker>,
    storage: Arc<dyn ChunkStorage>,
    index: Arc<dyn ChunkIndex>,
    archive_dir: PathBuf,
}

impl VaultFileProcessor {
    pub fn new(
        extractor: Arc<dyn TextExtractor>,
        chunker: Arc<SemanticChunker>,
        storage: Arc<dyn ChunkStorage>,
        index: Arc<dyn ChunkIndex>,
        archive_dir: PathBuf,
    ) -> Self {
        Self {
            extractor,
            chunker,
            storage,
            index,
            archive_dir,
        }
    }

    /// One archive file per source: the relative path flattened into a
    /// single file name.
    pub fn archive_path_for(&self, relative_path: &str) -> PathBuf {
        self.archive_dir.join(archive_file_name(relative_path))
    }

    async fn cut_chunks(
        &self,
        task: &ProcessingTask,
        cancel: &CancellationToken,
    ) -> Result<(Vec<Chunk>, Option<String>), ProcessingFailure> {
        let extractions = self
            .extractor
            .extract(task.physical_path())
            .await
            .map_err(|e| ProcessingFailure::Extraction(e.to_string()))?;

        let content_type = extractions.first().map(|e| e.content_type.clone());

        let mut chunks = Vec::new();
        let mut next_index: i32 = 0;

        for extraction in &extractions {
            if cancel.is_cancelled() {
                return Err(ProcessingFailure::Cancelled);
            }

            let pieces = self.chunker.chunk(&extraction.text).await.map_err(|e| match e {
                EmbeddingError::Cancelled => ProcessingFailure::Cancelled,
                other => ProcessingFailure::Embedding(other.to_string()),
            })?;

            // Paged extractions locate chunks by page; byte offsets only
            // make sense against a whole-body extraction.
            let paged = extraction.page_number.is_some();

            for piece in pieces {
                let (start, end) = if paged {
                    (None, None)
                } else {
                    (Some(piece.start_index as i32), Some(piece.end_index as i32))
                };
                chunks.push(Chunk::new(
                    task.relative_path(),
                    piece.text,
                    next_index,
                    start,
                    end,
                    extraction.page_number,
                    extraction.source_location.clone(),
                ));
                next_index += 1;
            }
        }

        Ok((chunks, content_type))
    }
}

#[async_trait]
impl FileProcessor for VaultFileProcessor {
    async fn process_file(
        &self,
        task: &ProcessingTask,
        cancel: &CancellationToken,
    ) -> Result<ProcessingReport, ProcessingFailure> {
        let started = Instant::now();
        let path = task.relative_path();

        let metadata = match tokio::fs::metadata(task.physical_path()).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProcessingFailure::InputNotFound);
            }
            Err(e) => return Err(ProcessingFailure::Extraction(e.to_string())),
        };
        let file_size = metadata.len() as i64;

        let extension = task
            .physical_path()
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        if !self.extractor.supports(&extension) {
            let mut record = match self.index.get_source_file(path).await {
                Ok(Some(existing)) => existing,
                _ => SourceFile::new(path, task.file_hash(), file_size),
            };
            record.fail();
            if let Err(e) = self.index.upsert_source_file(&record).await {
                warn!(path, error = %e, "failed to record unsupported source");
            }
            return Err(ProcessingFailure::UnsupportedType(extension));
        }

        let mut record = match self
            .index
            .get_source_file(path)
            .await
            .map_err(|e| ProcessingFailure::Index(e.to_string()))?
        {
            Some(existing) => existing,
            None => SourceFile::new(path, task.file_hash(), file_size),
        };
        record.update_hash(task.file_hash(), file_size);
        record.start_processing();
        self.index
            .upsert_source_file(&record)
            .await
            .map_err(|e| ProcessingFailure::Index(e.to_string()))?;

        let (chunks, content_type) = self.cut_chunks(task, cancel).await?;
        debug!(path, chunk_count = chunks.len(), "chunked source");

        if cancel.is_cancelled() {
            return Err(ProcessingFailure::Cancelled);
        }

        let file_name = Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(path)
            .to_string();
        let mut source_meta = SourceMetadata::new(file_name)
            .with_file_size(file_size)
            .with_file_hash(task.file_hash());
        if let Some(ct) = content_type {
            source_meta.source_content_type = Some(ct);
        }

        let archive_path = self.archive_path_for(path);
        self.storage
            .write_chunks(&chunks, &source_meta, &archive_path)
            .await
            .map_err(|e| ProcessingFailure::ArchiveWrite(e.to_string()))?;

        // The index is the recovery authority: replace this source's rows
        // wholesale, then flip the source row to completed.
        self.index
            .delete_chunks_by_source_path(path)
            .await
            .map_err(|e| ProcessingFailure::Index(e.to_string()))?;
        self.index
            .insert_chunks(task.file_hash(), &chunks)
            .await
            .map_err(|e| ProcessingFailure::Index(e.to_string()))?;

        record.complete(chunks.len() as i32, archive_path.to_string_lossy());
        self.index
            .upsert_source_file(&record)
            .await
            .map_err(|e| ProcessingFailure::Index(e.to_string()))?;

        info!(
            path,
            chunk_count = chunks.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "processed source"
        );

        Ok(ProcessingReport::success(
            archive_path,
            chunks.len(),
            started.elapsed(),
        ))
    }

    async fn process_deletion(&self, task: &ProcessingTask) -> Result<(), ProcessingFailure> {
        let path = task.relative_path();

        let archive = match self
            .index
            .get_source_file(path)
            .await
            .map_err(|e| ProcessingFailure::Index(e.to_string()))?
        {
            Some(record) => record.archive_path().map(PathBuf::from),
            None => Some(self.archive_path_for(path)),
        };

        self.index
            .delete_source_file(path)
            .await
            .map_err(|e| ProcessingFailure::Index(e.to_string()))?;

        if let Some(archive) = archive {
            match tokio::fs::remove_file(&archive).await {
                Ok(()) => debug!(path, archive = %archive.display(), "removed archive"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path, error = %e, "failed to remove archive file"),
            }
        }

        info!(path, "deleted source");
        Ok(())
    }
}

/// Flatten a relative source path into a single archive file name.
pub fn archive_file_name(relative_path: &str) -> String {
    format!("{}.chunks.parquet", relative_path.replace('/', "__"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_file_name_flattens_separators() {
        assert_eq!(
            archive_file_name("docs/notes/a.txt"),
            "docs__notes__a.txt.chunks.parquet"
        );
        assert_eq!(archive_file_name("a.md"), "a.md.chunks.parquet");
    }
}
