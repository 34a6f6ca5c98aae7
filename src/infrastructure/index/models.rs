use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::prelude::*;

use crate::application::ports::IndexError;
use crate::domain::entities::{Chunk, SourceFile};
use crate::domain::value_objects::SourceStatus;

use super::schema::{chunks, embeddings, source_files};

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Insertable, AsChangeset)]
#[diesel(table_name = source_files)]
#[diesel(primary_key(path))]
#[diesel(treat_none_as_null = true)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SourceFileModel {
    pub path: String,
    pub hash: String,
    pub file_size: i64,
    pub chunk_count: i32,
    pub archive_path: Option<String>,
    pub status: String,
    pub processed_at: NaiveDateTime,
    pub is_synced: bool,
}

impl From<&SourceFile> for SourceFileModel {
    fn from(record: &SourceFile) -> Self {
        Self {
            path: record.path().to_string(),
            hash: record.hash().to_string(),
            file_size: record.file_size(),
            chunk_count: record.chunk_count(),
            archive_path: record.archive_path().map(|p| p.to_string()),
            status: record.status().as_str().to_string(),
            processed_at: record.processed_at().naive_utc(),
            is_synced: record.is_synced(),
        }
    }
}

impl TryFrom<SourceFileModel> for SourceFile {
    type Error = IndexError;

    fn try_from(model: SourceFileModel) -> Result<Self, Self::Error> {
        let status = SourceStatus::parse(&model.status).map_err(IndexError::CorruptRow)?;
        Ok(SourceFile::from_parts(
            model.path,
            model.hash,
            model.file_size,
            model.chunk_count,
            model.archive_path,
            status,
            DateTime::<Utc>::from_naive_utc_and_offset(model.processed_at, Utc),
            model.is_synced,
        ))
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Insertable)]
#[diesel(table_name = chunks)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ChunkModel {
    pub id: String,
    pub source_path: String,
    pub source_hash: String,
    pub chunk_index: i32,
    pub text: String,
    pub content_hash: String,
    pub page_number: Option<i32>,
    pub source_location: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl ChunkModel {
    pub fn from_chunk(source_hash: &str, chunk: &Chunk) -> Self {
        let created = chunk.created_at().naive_utc();
        Self {
            id: chunk.id().to_string(),
            source_path: chunk.source_id().to_string(),
            source_hash: source_hash.to_string(),
            chunk_index: chunk.chunk_index(),
            text: chunk.text().to_string(),
            content_hash: chunk.content_hash().as_str().to_string(),
            page_number: chunk.page_number(),
            source_location: chunk.source_location().map(|s| s.to_string()),
            created_at: created,
            updated_at: created,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Insertable)]
#[diesel(table_name = embeddings)]
#[diesel(primary_key(chunk_id))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EmbeddingModel {
    pub chunk_id: String,
    pub embedding: Vec<u8>,
}

/// Raw little-endian f32 payload, `4 * dimension` bytes.
pub fn embedding_to_bytes(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

pub fn embedding_from_bytes(bytes: &[u8], dimension: usize) -> Result<Vec<f32>, IndexError> {
    if bytes.len() != dimension * 4 {
        return Err(IndexError::CorruptRow(format!(
            "embedding blob is {} bytes, expected {}",
            bytes.len(),
            dimension * 4
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_bytes_round_trip() {
        let vector = vec![0.25f32, -1.5, 3.75, 0.0];
        let bytes = embedding_to_bytes(&vector);
        assert_eq!(bytes.len(), 16);
        assert_eq!(embedding_from_bytes(&bytes, 4).unwrap(), vector);
    }

    #[test]
    fn test_embedding_length_is_validated() {
        let bytes = embedding_to_bytes(&[1.0f32, 2.0]);
        assert!(embedding_from_bytes(&bytes, 4).is_err());
        assert!(embedding_from_bytes(&bytes[..7], 2).is_err());
    }

    #[test]
    fn test_source_file_model_round_trip() {
        let mut record = SourceFile::new("docs/a.txt", "ab".repeat(32), 10);
        record.start_processing();
        record.complete(3, "archives/docs__a.txt.chunks.parquet");

        let model = SourceFileModel::from(&record);
        assert_eq!(model.status, "completed");

        let back = SourceFile::try_from(model).unwrap();
        assert_eq!(back.path(), record.path());
        assert_eq!(back.status(), record.status());
        assert_eq!(back.chunk_count(), 3);
    }

    #[test]
    fn test_bad_status_is_a_corrupt_row() {
        let model = SourceFileModel {
            path: "a".into(),
            hash: "b".into(),
            file_size: 0,
            chunk_count: 0,
            archive_path: None,
            status: "limbo".into(),
            processed_at: chrono::Utc::now().naive_utc(),
            is_synced: false,
        };
        assert!(matches!(
            SourceFile::try_from(model),
            Err(IndexError::CorruptRow(_))
        ));
    }
}
