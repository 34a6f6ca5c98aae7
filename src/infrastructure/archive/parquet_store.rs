use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, Int32Array, Int64Array, StringArray, TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::DateTime;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use uuid::Uuid;

use crate::application::ports::{ChunkStorage, ChunkStorageError};
use crate::domain::entities::{Chunk, SourceMetadata};
use crate::domain::value_objects::ContentHash;

/// Per-source chunk archive in Parquet with Zstandard compression.
///
/// Every row repeats the source metadata, so a single file round-trips
/// without consulting the index. Readers accept any number of row groups
/// and ignore columns they don't know.
pub struct ParquetChunkStorage;

impl ParquetChunkStorage {
    pub fn new() -> Self {
        Self
    }

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("content_hash", DataType::Utf8, false),
            Field::new("source_id", DataType::Utf8, false),
            Field::new("source_name", DataType::Utf8, false),
            Field::new("version", DataType::Utf8, false),
            Field::new(
                "created_at",
                DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
                false,
            ),
            Field::new("source_content_type", DataType::Utf8, true),
            Field::new("source_file_size", DataType::Int64, true),
            Field::new("source_file_hash", DataType::Utf8, true),
            Field::new("text", DataType::Utf8, false),
            Field::new("chunk_index", DataType::Int32, false),
            Field::new("start_index", DataType::Int32, true),
            Field::new("end_index", DataType::Int32, true),
            Field::new("page_number", DataType::Int32, true),
            Field::new("source_location", DataType::Utf8, true),
        ]))
    }

    pub(crate) fn build_record_batch(
        chunks: &[Chunk],
        metadata: &SourceMetadata,
    ) -> Result<RecordBatch, ChunkStorageError> {
        let ids: Vec<String> = chunks.iter().map(|c| c.id().to_string()).collect();
        let hashes: Vec<&str> = chunks.iter().map(|c| c.content_hash().as_str()).collect();
        let source_ids: Vec<&str> = chunks.iter().map(|c| c.source_id()).collect();
        let names: Vec<&str> = chunks.iter().map(|_| metadata.source_name.as_str()).collect();
        let versions: Vec<&str> = chunks.iter().map(|c| c.version()).collect();
        let created: Vec<i64> = chunks
            .iter()
            .map(|c| c.created_at().timestamp_micros())
            .collect();
        let content_types: Vec<Option<&str>> = chunks
            .iter()
            .map(|_| metadata.source_content_type.as_deref())
            .collect();
        let file_sizes: Vec<Option<i64>> =
            chunks.iter().map(|_| metadata.source_file_size).collect();
        let file_hashes: Vec<Option<&str>> = chunks
            .iter()
            .map(|_| metadata.source_file_hash.as_deref())
            .collect();
        let texts: Vec<&str> = chunks.iter().map(|c| c.text()).collect();
        let indexes: Vec<i32> = chunks.iter().map(|c| c.chunk_index()).collect();
        let starts: Vec<Option<i32>> = chunks.iter().map(|c| c.start_index()).collect();
        let ends: Vec<Option<i32>> = chunks.iter().map(|c| c.end_index()).collect();
        let pages: Vec<Option<i32>> = chunks.iter().map(|c| c.page_number()).collect();
        let locations: Vec<Option<&str>> =
            chunks.iter().map(|c| c.source_location()).collect();

        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(StringArray::from(hashes)),
            Arc::new(StringArray::from(source_ids)),
            Arc::new(StringArray::from(names)),
            Arc::new(StringArray::from(versions)),
            Arc::new(TimestampMicrosecondArray::from(created).with_timezone("UTC")),
            Arc::new(StringArray::from(content_types)),
            Arc::new(Int64Array::from(file_sizes)),
            Arc::new(StringArray::from(file_hashes)),
            Arc::new(StringArray::from(texts)),
            Arc::new(Int32Array::from(indexes)),
            Arc::new(Int32Array::from(starts)),
            Arc::new(Int32Array::from(ends)),
            Arc::new(Int32Array::from(pages)),
            Arc::new(StringArray::from(locations)),
        ];

        RecordBatch::try_new(Self::schema(), columns)
            .map_err(|e| ChunkStorageError::Serialization(e.to_string()))
    }

    fn write_sync(
        chunks: &[Chunk],
        metadata: &SourceMetadata,
        target_path: &Path,
    ) -> Result<(), ChunkStorageError> {
        if let Some(parent) = target_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let batch = Self::build_record_batch(chunks, metadata)?;
        let properties = WriterProperties::builder()
            .set_compression(Compression::ZSTD(ZstdLevel::default()))
            .build();

        let file = File::create(target_path)?;
        let mut writer = ArrowWriter::try_new(file, Self::schema(), Some(properties))
            .map_err(|e| ChunkStorageError::Serialization(e.to_string()))?;
        writer
            .write(&batch)
            .map_err(|e| ChunkStorageError::Serialization(e.to_string()))?;
        writer
            .close()
            .map_err(|e| ChunkStorageError::Serialization(e.to_string()))?;

        Ok(())
    }

    fn read_sync(path: &Path) -> Result<Vec<Chunk>, ChunkStorageError> {
        let file = File::open(path)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| ChunkStorageError::Malformed(e.to_string()))?
            .build()
            .map_err(|e| ChunkStorageError::Malformed(e.to_string()))?;

        let mut chunks = Vec::new();
        for batch in reader {
            let batch = batch.map_err(|e| ChunkStorageError::Malformed(e.to_string()))?;
            Self::decode_batch(&batch, &mut chunks)?;
        }
        Ok(chunks)
    }

    fn decode_batch(batch: &RecordBatch, out: &mut Vec<Chunk>) -> Result<(), ChunkStorageError> {
        let ids = string_column(batch, "id")?;
        let content_hashes = string_column(batch, "content_hash")?;
        let source_ids = string_column(batch, "source_id")?;
        let versions = string_column(batch, "version")?;
        let created = timestamp_column(batch, "created_at")?;
        let texts = string_column(batch, "text")?;
        let indexes = int32_column(batch, "chunk_index")?;
        let starts = int32_column(batch, "start_index")?;
        let ends = int32_column(batch, "end_index")?;
        let pages = int32_column(batch, "page_number")?;
        let locations = string_column(batch, "source_location")?;

        for row in 0..batch.num_rows() {
            let id = Uuid::parse_str(ids.value(row))
                .map_err(|e| ChunkStorageError::Malformed(format!("chunk id: {}", e)))?;
            let content_hash = ContentHash::parse(content_hashes.value(row).to_string())
                .map_err(ChunkStorageError::Malformed)?;
            let created_at = DateTime::from_timestamp_micros(created.value(row))
                .ok_or_else(|| ChunkStorageError::Malformed("created_at out of range".into()))?;

            out.push(Chunk::from_parts(
                id,
                content_hash,
                source_ids.value(row).to_string(),
                indexes.value(row),
                texts.value(row).to_string(),
                optional_i32(starts, row),
                optional_i32(ends, row),
                optional_i32(pages, row),
                optional_string(locations, row),
                created_at,
                versions.value(row).to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ParquetChunkStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn string_column<'a>(
    batch: &'a RecordBatch,
    name: &str,
) -> Result<&'a StringArray, ChunkStorageError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| ChunkStorageError::MissingColumn(name.to_string()))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| ChunkStorageError::Malformed(format!("column {} is not utf8", name)))
}

fn int32_column<'a>(
    batch: &'a RecordBatch,
    name: &str,
) -> Result<&'a Int32Array, ChunkStorageError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| ChunkStorageError::MissingColumn(name.to_string()))?
        .as_any()
        .downcast_ref::<Int32Array>()
        .ok_or_else(|| ChunkStorageError::Malformed(format!("column {} is not int32", name)))
}

fn timestamp_column<'a>(
    batch: &'a RecordBatch,
    name: &str,
) -> Result<&'a TimestampMicrosecondArray, ChunkStorageError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| ChunkStorageError::MissingColumn(name.to_string()))?
        .as_any()
        .downcast_ref::<TimestampMicrosecondArray>()
        .ok_or_else(|| ChunkStorageError::Malformed(format!("column {} is not a timestamp", name)))
}

fn optional_i32(array: &Int32Array, row: usize) -> Option<i32> {
    if array.is_null(row) {
        None
    } else {
        Some(array.value(row))
    }
}

fn optional_string(array: &StringArray, row: usize) -> Option<String> {
    if array.is_null(row) {
        None
    } else {
        Some(array.value(row).to_string())
    }
}

#[async_trait]
impl ChunkStorage for ParquetChunkStorage {
    async fn write_chunks(
        &self,
        chunks: &[Chunk],
        metadata: &SourceMetadata,
        target_path: &Path,
    ) -> Result<(), ChunkStorageError> {
        let chunks = chunks.to_vec();
        let metadata = metadata.clone();
        let target = target_path.to_path_buf();
        tokio::task::spawn_blocking(move || Self::write_sync(&chunks, &metadata, &target))
            .await
            .map_err(|e| ChunkStorageError::Io(e.to_string()))?
    }

    async fn read_chunks(&self, path: &Path) -> Result<Vec<Chunk>, ChunkStorageError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || Self::read_sync(&path))
            .await
            .map_err(|e| ChunkStorageError::Io(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_chunks() -> Vec<Chunk> {
        vec![
            Chunk::new(
                "docs/a.txt",
                "First chunk text.",
                0,
                Some(0),
                Some(17),
                None,
                None,
            ),
            // start_index of zero must survive as Some(0), distinct from
            // the None on the third chunk.
            Chunk::new("docs/a.txt", "Second chunk text.", 1, Some(0), Some(18), None, None),
            Chunk::new(
                "docs/a.txt",
                "Paged chunk text.",
                2,
                None,
                None,
                Some(4),
                Some("page:4".to_string()),
            ),
        ]
    }

    fn sample_metadata() -> SourceMetadata {
        SourceMetadata::new("a.txt")
            .with_content_type("text/plain")
            .with_file_size(4096)
            .with_file_hash("cd".repeat(32))
    }

    #[tokio::test]
    async fn test_round_trip_preserves_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt.chunks.parquet");
        let storage = ParquetChunkStorage::new();
        let chunks = sample_chunks();

        storage
            .write_chunks(&chunks, &sample_metadata(), &path)
            .await
            .unwrap();
        let loaded = storage.read_chunks(&path).await.unwrap();

        assert_eq!(loaded.len(), chunks.len());
        for (original, read) in chunks.iter().zip(&loaded) {
            assert_eq!(read.id(), original.id());
            assert_eq!(read.content_hash(), original.content_hash());
            assert_eq!(read.source_id(), original.source_id());
            assert_eq!(read.chunk_index(), original.chunk_index());
            assert_eq!(read.text(), original.text());
            assert_eq!(read.start_index(), original.start_index());
            assert_eq!(read.end_index(), original.end_index());
            assert_eq!(read.page_number(), original.page_number());
            assert_eq!(read.source_location(), original.source_location());
            assert_eq!(read.version(), original.version());
            // Microsecond precision is what the column stores.
            assert_eq!(
                read.created_at().timestamp_micros(),
                original.created_at().timestamp_micros()
            );
        }

        // Null-versus-zero on optional ints.
        assert_eq!(loaded[1].start_index(), Some(0));
        assert_eq!(loaded[2].start_index(), None);
    }

    #[tokio::test]
    async fn test_empty_chunk_list_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.chunks.parquet");
        let storage = ParquetChunkStorage::new();

        storage
            .write_chunks(&[], &sample_metadata(), &path)
            .await
            .unwrap();
        let loaded = storage.read_chunks(&path).await.unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn test_multi_row_group_files_are_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grouped.chunks.parquet");
        let chunks = sample_chunks();

        let batch = ParquetChunkStorage::build_record_batch(&chunks, &sample_metadata()).unwrap();
        let properties = WriterProperties::builder()
            .set_compression(Compression::ZSTD(ZstdLevel::default()))
            .set_max_row_group_size(1)
            .build();
        let file = File::create(&path).unwrap();
        let mut writer =
            ArrowWriter::try_new(file, batch.schema(), Some(properties)).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let loaded = ParquetChunkStorage::new().read_chunks(&path).await.unwrap();
        assert_eq!(loaded.len(), chunks.len());
        assert_eq!(loaded[0].text(), chunks[0].text());
        assert_eq!(loaded[2].page_number(), Some(4));
    }

    #[tokio::test]
    async fn test_missing_required_column_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.parquet");

        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Utf8, false)]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(StringArray::from(vec!["only-ids"])) as ArrayRef],
        )
        .unwrap();
        let file = File::create(&path).unwrap();
        let mut writer = ArrowWriter::try_new(file, schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let result = ParquetChunkStorage::new().read_chunks(&path).await;
        assert!(matches!(result, Err(ChunkStorageError::MissingColumn(_))));
    }
}
