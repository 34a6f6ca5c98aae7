pub mod parquet_store;

pub use parquet_store::ParquetChunkStorage;
