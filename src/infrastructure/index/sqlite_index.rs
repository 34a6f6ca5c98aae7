use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use std::path::Path;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::application::ports::{ChunkIndex, IndexError, UnembeddedChunk};
use crate::domain::entities::{Chunk, SourceFile};

use super::connection::establish;
use super::models::{
    embedding_from_bytes, embedding_to_bytes, ChunkModel, EmbeddingModel, SourceFileModel,
};
use super::schema::{chunks, embeddings, source_files};

/// Diesel/SQLite implementation of the chunk index.
///
/// Holds the process's single writer connection; every operation takes the
/// connection lock, and multi-statement operations run in one transaction.
pub struct SqliteIndex {
    conn: Mutex<SqliteConnection>,
    dimension: usize,
}

impl SqliteIndex {
    pub fn open(database_path: &Path, dimension: usize) -> Result<Self, IndexError> {
        let conn = establish(database_path)?;
        Ok(Self {
            conn: Mutex::new(conn),
            dimension,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embedding vector for one chunk, with the blob length validated
    /// against the configured dimension.
    pub async fn get_embedding(&self, chunk_id: Uuid) -> Result<Option<Vec<f32>>, IndexError> {
        let mut conn = self.conn.lock().await;
        let bytes: Option<Vec<u8>> = embeddings::table
            .find(chunk_id.to_string())
            .select(embeddings::embedding)
            .first::<Vec<u8>>(&mut *conn)
            .optional()
            .map_err(|e| IndexError::Database(e.to_string()))?;

        bytes
            .map(|b| embedding_from_bytes(&b, self.dimension))
            .transpose()
    }
}

#[async_trait]
impl ChunkIndex for SqliteIndex {
    async fn upsert_source_file(&self, record: &SourceFile) -> Result<(), IndexError> {
        let model = SourceFileModel::from(record);
        let mut conn = self.conn.lock().await;

        diesel::insert_into(source_files::table)
            .values(&model)
            .on_conflict(source_files::path)
            .do_update()
            .set(&model)
            .execute(&mut *conn)
            .map_err(|e| IndexError::Database(e.to_string()))?;
        Ok(())
    }

    async fn get_source_file(&self, path: &str) -> Result<Option<SourceFile>, IndexError> {
        let mut conn = self.conn.lock().await;
        let model = source_files::table
            .find(path)
            .first::<SourceFileModel>(&mut *conn)
            .optional()
            .map_err(|e| IndexError::Database(e.to_string()))?;

        model.map(SourceFile::try_from).transpose()
    }

    async fn insert_chunks(
        &self,
        source_hash: &str,
        chunk_list: &[Chunk],
    ) -> Result<(), IndexError> {
        if chunk_list.is_empty() {
            return Ok(());
        }

        let now = Utc::now().naive_utc();
        let models: Vec<ChunkModel> = chunk_list
            .iter()
            .map(|c| ChunkModel::from_chunk(source_hash, c))
            .collect();

        let mut conn = self.conn.lock().await;
        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            for model in &models {
                diesel::insert_into(chunks::table)
                    .values(model)
                    .on_conflict(chunks::id)
                    .do_update()
                    .set((
                        chunks::text.eq(&model.text),
                        chunks::content_hash.eq(&model.content_hash),
                        chunks::updated_at.eq(now),
                    ))
                    .execute(conn)?;
            }
            Ok(())
        })
        .map_err(|e| IndexError::Database(e.to_string()))
    }

    async fn save_embedding(&self, chunk_id: Uuid, embedding: &[f32]) -> Result<(), IndexError> {
        self.save_embeddings_batch(&[(chunk_id, embedding.to_vec())])
            .await
    }

    async fn save_embeddings_batch(
        &self,
        pairs: &[(Uuid, Vec<f32>)],
    ) -> Result<(), IndexError> {
        if pairs.is_empty() {
            return Ok(());
        }

        let models: Vec<EmbeddingModel> = pairs
            .iter()
            .map(|(id, vector)| EmbeddingModel {
                chunk_id: id.to_string(),
                embedding: embedding_to_bytes(vector),
            })
            .collect();

        let mut conn = self.conn.lock().await;
        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            for model in &models {
                diesel::insert_into(embeddings::table)
                    .values(model)
                    .on_conflict(embeddings::chunk_id)
                    .do_update()
                    .set(embeddings::embedding.eq(&model.embedding))
                    .execute(conn)?;
            }
            Ok(())
        })
        .map_err(|e| IndexError::Database(e.to_string()))
    }

    async fn delete_chunks_by_source_path(&self, path: &str) -> Result<usize, IndexError> {
        let mut conn = self.conn.lock().await;
        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            let ids = chunks::table
                .filter(chunks::source_path.eq(path))
                .select(chunks::id);
            diesel::delete(embeddings::table.filter(embeddings::chunk_id.eq_any(ids)))
                .execute(conn)?;
            diesel::delete(chunks::table.filter(chunks::source_path.eq(path))).execute(conn)
        })
        .map_err(|e| IndexError::Database(e.to_string()))
    }

    async fn delete_source_file(&self, path: &str) -> Result<(), IndexError> {
        let mut conn = self.conn.lock().await;
        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            let ids = chunks::table
                .filter(chunks::source_path.eq(path))
                .select(chunks::id);
            diesel::delete(embeddings::table.filter(embeddings::chunk_id.eq_any(ids)))
                .execute(conn)?;
            diesel::delete(chunks::table.filter(chunks::source_path.eq(path))).execute(conn)?;
            diesel::delete(source_files::table.find(path)).execute(conn)?;
            Ok(())
        })
        .map_err(|e| IndexError::Database(e.to_string()))
    }

    async fn get_chunks_without_embedding(
        &self,
        limit: i64,
    ) -> Result<Vec<UnembeddedChunk>, IndexError> {
        let mut conn = self.conn.lock().await;
        let rows: Vec<(String, String, String)> = chunks::table
            .left_join(embeddings::table)
            .filter(embeddings::chunk_id.nullable().is_null())
            .order((chunks::source_path.asc(), chunks::chunk_index.asc()))
            .limit(limit)
            .select((chunks::id, chunks::source_path, chunks::text))
            .load(&mut *conn)
            .map_err(|e| IndexError::Database(e.to_string()))?;

        rows.into_iter()
            .map(|(id, source_path, text)| {
                let id = Uuid::parse_str(&id)
                    .map_err(|e| IndexError::CorruptRow(format!("chunk id: {}", e)))?;
                Ok(UnembeddedChunk {
                    id,
                    source_path,
                    text,
                })
            })
            .collect()
    }

    async fn count_chunks_without_embedding(
        &self,
        source_path: &str,
    ) -> Result<i64, IndexError> {
        let mut conn = self.conn.lock().await;
        chunks::table
            .left_join(embeddings::table)
            .filter(embeddings::chunk_id.nullable().is_null())
            .filter(chunks::source_path.eq(source_path))
            .count()
            .get_result(&mut *conn)
            .map_err(|e| IndexError::Database(e.to_string()))
    }

    async fn count_chunks_by_source_path(&self, source_path: &str) -> Result<i64, IndexError> {
        let mut conn = self.conn.lock().await;
        chunks::table
            .filter(chunks::source_path.eq(source_path))
            .count()
            .get_result(&mut *conn)
            .map_err(|e| IndexError::Database(e.to_string()))
    }

    async fn get_unsynced_source_files(
        &self,
        limit: i64,
    ) -> Result<Vec<SourceFile>, IndexError> {
        let mut conn = self.conn.lock().await;
        let models: Vec<SourceFileModel> = source_files::table
            .filter(source_files::status.eq("completed"))
            .filter(source_files::is_synced.eq(false))
            .order(source_files::path.asc())
            .limit(limit)
            .load(&mut *conn)
            .map_err(|e| IndexError::Database(e.to_string()))?;

        models.into_iter().map(SourceFile::try_from).collect()
    }

    async fn mark_source_file_as_synced(&self, path: &str) -> Result<(), IndexError> {
        let mut conn = self.conn.lock().await;
        diesel::update(source_files::table.find(path))
            .set(source_files::is_synced.eq(true))
            .execute(&mut *conn)
            .map_err(|e| IndexError::Database(e.to_string()))?;
        Ok(())
    }
}
