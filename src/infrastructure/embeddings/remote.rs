use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::application::ports::{EmbeddingError, EmbeddingProvider};

#[derive(Debug, Clone)]
pub struct RemoteEmbeddingConfig {
    pub service_url: String,
    pub dimension: usize,
    pub max_retries: u32,
    pub timeout_secs: u64,
    pub backoff_factor: f64,
}

impl RemoteEmbeddingConfig {
    pub fn new(service_url: impl Into<String>, dimension: usize) -> Self {
        Self {
            service_url: service_url.into(),
            dimension,
            max_retries: 3,
            timeout_secs: 30,
            backoff_factor: 1.5,
        }
    }
}

#[derive(Serialize)]
struct EmbeddingsRequest {
    text: TextInput,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum TextInput {
    Single(String),
    Multiple(Vec<String>),
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    embeddings: Vec<Vec<f32>>,
}

/// HTTP inference client with bounded retries and exponential backoff.
pub struct RemoteEmbeddingProvider {
    client: Client,
    config: RemoteEmbeddingConfig,
}

impl RemoteEmbeddingProvider {
    pub fn new(config: RemoteEmbeddingConfig) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::Network(e.to_string()))?;

        Ok(Self { client, config })
    }

    async fn send_request(
        &self,
        request: &EmbeddingsRequest,
    ) -> Result<EmbeddingsResponse, EmbeddingError> {
        let mut attempts = 0u32;
        let mut last_error = None;

        loop {
            attempts += 1;

            match self.execute_request(request).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    warn!(attempt = attempts, error = %e, "embedding request failed");
                    last_error = Some(e);

                    if attempts > self.config.max_retries {
                        break;
                    }

                    let backoff = Duration::from_millis(
                        (self.config.backoff_factor.powi(attempts as i32 - 1) * 1000.0) as u64,
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }

        Err(last_error.unwrap_or(EmbeddingError::ServiceUnavailable))
    }

    async fn execute_request(
        &self,
        request: &EmbeddingsRequest,
    ) -> Result<EmbeddingsResponse, EmbeddingError> {
        let response = self
            .client
            .post(&self.config.service_url)
            .json(request)
            .send()
            .await
            .map_err(|e| EmbeddingError::Network(e.without_url().to_string()))?;

        let response = response
            .error_for_status()
            .map_err(|e| EmbeddingError::Network(e.without_url().to_string()))?;

        response
            .json::<EmbeddingsResponse>()
            .await
            .map_err(|e| EmbeddingError::Inference(e.to_string()))
    }

    fn check_and_normalize(&self, mut vectors: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        for v in &mut vectors {
            if v.len() != self.config.dimension {
                return Err(EmbeddingError::Inference(format!(
                    "service returned dimension {}, expected {}",
                    v.len(),
                    self.config.dimension
                )));
            }
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > 0.0 {
                for x in v.iter_mut() {
                    *x /= norm;
                }
            }
        }
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbeddingProvider {
    async fn generate(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let request = EmbeddingsRequest {
            text: TextInput::Single(text.to_string()),
        };
        let response = self.send_request(&request).await?;
        let mut vectors = self.check_and_normalize(response.embeddings)?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::Inference("no embeddings returned".to_string()))
    }

    async fn generate_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let request = EmbeddingsRequest {
            text: TextInput::Multiple(texts.to_vec()),
        };
        let response = self.send_request(&request).await?;
        let vectors = self.check_and_normalize(response.embeddings)?;
        if vectors.len() != texts.len() {
            return Err(EmbeddingError::Inference(format!(
                "service returned {} embeddings for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization_shapes() {
        let single = EmbeddingsRequest {
            text: TextInput::Single("hello".to_string()),
        };
        let json = serde_json::to_value(&single).unwrap();
        assert_eq!(json["text"], "hello");

        let multiple = EmbeddingsRequest {
            text: TextInput::Multiple(vec!["a".to_string(), "b".to_string()]),
        };
        let json = serde_json::to_value(&multiple).unwrap();
        assert_eq!(json["text"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_dimension_check() {
        let provider = RemoteEmbeddingProvider::new(RemoteEmbeddingConfig::new(
            "http://localhost:9000/embed",
            3,
        ))
        .unwrap();

        let ok = provider.check_and_normalize(vec![vec![3.0, 0.0, 4.0]]).unwrap();
        let norm: f32 = ok[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);

        assert!(provider.check_and_normalize(vec![vec![1.0, 2.0]]).is_err());
    }
}
