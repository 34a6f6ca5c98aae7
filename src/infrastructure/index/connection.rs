use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use std::path::Path;

use crate::application::ports::IndexError;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Open (or create) the index database and bring the schema up to date.
///
/// One writer connection per process; callers serialize access behind an
/// async mutex.
pub fn establish(database_path: &Path) -> Result<SqliteConnection, IndexError> {
    if let Some(parent) = database_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| IndexError::Database(format!("create index directory: {}", e)))?;
    }

    let url = database_path.to_string_lossy();
    let mut conn = SqliteConnection::establish(&url)
        .map_err(|e| IndexError::Database(format!("open {}: {}", url, e)))?;

    conn.batch_execute(
        "PRAGMA foreign_keys = ON;
         PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| IndexError::Database(e.to_string()))?;

    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| IndexError::Migration(e.to_string()))?;

    Ok(conn)
}
