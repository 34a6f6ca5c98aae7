pub mod connection;
pub mod models;
pub mod schema;
pub mod sqlite_index;

pub use sqlite_index::SqliteIndex;
