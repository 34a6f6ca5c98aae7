pub mod deterministic;
pub mod onnx_local;
pub mod remote;

pub use deterministic::DeterministicEmbeddingProvider;
pub use onnx_local::LocalOnnxEmbeddingProvider;
pub use remote::{RemoteEmbeddingConfig, RemoteEmbeddingProvider};
