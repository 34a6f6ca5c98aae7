use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("network error: {0}")]
    Network(String),
    #[error("inference error: {0}")]
    Inference(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("embedding service unavailable")]
    ServiceUnavailable,
    #[error("cancelled")]
    Cancelled,
}

/// Capability contract for mapping strings to L2-normalized vectors of a
/// fixed dimension.
///
/// Batch order is significant: `generate_batch` returns one vector per input
/// text, in input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn generate(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    async fn generate_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    fn dimension(&self) -> usize;
}
