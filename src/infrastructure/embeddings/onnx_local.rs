use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tract_onnx::prelude::*;

use crate::application::ports::{EmbeddingError, EmbeddingProvider};

const DEFAULT_MAX_TOKENS: usize = 8192;
const INFERENCE_BATCH: usize = 16;

/// Local transformer inference: `tokenizers` for the vocabulary, tract for
/// the ONNX graph. Pure Rust, no runtime system dependencies.
///
/// Graphs that emit a 2-D `sentence_embedding` tensor are consumed as-is;
/// 3-D last-hidden-state outputs are mean-pooled under the attention mask.
/// Either way the result is L2-normalized.
pub struct LocalOnnxEmbeddingProvider {
    model: Arc<TypedSimplePlan<TypedModel>>,
    tokenizer: Arc<tokenizers::Tokenizer>,
    dimension: usize,
    max_tokens: usize,
    input_count: usize,
}

impl LocalOnnxEmbeddingProvider {
    pub fn load(
        model_path: &Path,
        tokenizer_path: &Path,
        dimension: usize,
        max_tokens: Option<usize>,
    ) -> Result<Self, EmbeddingError> {
        let tokenizer = tokenizers::Tokenizer::from_file(tokenizer_path)
            .map_err(|e| EmbeddingError::Inference(format!("load tokenizer: {}", e)))?;

        let inference = tract_onnx::onnx()
            .model_for_path(model_path)
            .map_err(|e| EmbeddingError::Inference(format!("load onnx model: {}", e)))?;
        // Some sentence-transformer exports declare token_type_ids as a
        // third input; remember the arity before optimization.
        let input_count = inference.inputs.len();

        let model = inference
            .into_optimized()
            .map_err(|e| EmbeddingError::Inference(format!("optimize model: {}", e)))?
            .into_runnable()
            .map_err(|e| EmbeddingError::Inference(format!("build runnable model: {}", e)))?;

        Ok(Self {
            model: Arc::new(model),
            tokenizer: Arc::new(tokenizer),
            dimension,
            max_tokens: max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            input_count,
        })
    }

    fn run_batch(
        model: &TypedSimplePlan<TypedModel>,
        tokenizer: &tokenizers::Tokenizer,
        dimension: usize,
        max_tokens: usize,
        input_count: usize,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut all_embeddings = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(INFERENCE_BATCH) {
            let encodings: Vec<_> = chunk
                .iter()
                .map(|s| {
                    tokenizer
                        .encode(s.as_str(), true)
                        .map_err(|e| EmbeddingError::Inference(format!("tokenize: {}", e)))
                })
                .collect::<Result<Vec<_>, _>>()?;

            // Keep the *last* max_tokens tokens of each input.
            let truncated: Vec<Vec<u32>> = encodings
                .iter()
                .map(|enc| {
                    let ids = enc.get_ids();
                    let start = ids.len().saturating_sub(max_tokens);
                    ids[start..].to_vec()
                })
                .collect();

            let max_len = truncated.iter().map(|ids| ids.len()).max().unwrap_or(1).max(1);
            let rows = truncated.len();

            let mut input_ids = vec![0i64; rows * max_len];
            let mut attention_mask = vec![0i64; rows * max_len];

            for (i, ids) in truncated.iter().enumerate() {
                for (j, &id) in ids.iter().enumerate() {
                    input_ids[i * max_len + j] = id as i64;
                    attention_mask[i * max_len + j] = 1;
                }
            }

            let input_ids_tensor = ndarray::Array2::from_shape_vec((rows, max_len), input_ids)
                .map_err(|e| EmbeddingError::Inference(format!("input ids shape: {}", e)))?;
            let attention_tensor =
                ndarray::Array2::from_shape_vec((rows, max_len), attention_mask)
                    .map_err(|e| EmbeddingError::Inference(format!("attention shape: {}", e)))?;

            let input_ids_t: Tensor = input_ids_tensor.into();
            let attention_t: Tensor = attention_tensor.into();

            let mut inputs: TVec<TValue> = tvec!(input_ids_t.into(), attention_t.into());
            if input_count >= 3 {
                let token_types = ndarray::Array2::<i64>::zeros((rows, max_len));
                let token_types_t: Tensor = token_types.into();
                inputs.push(token_types_t.into());
            }

            let result = model
                .run(inputs)
                .map_err(|e| EmbeddingError::Inference(format!("inference: {}", e)))?;

            let output = result
                .into_iter()
                .next()
                .ok_or_else(|| EmbeddingError::Inference("no output tensor".to_string()))?;
            let view = output
                .to_array_view::<f32>()
                .map_err(|e| EmbeddingError::Inference(format!("output view: {}", e)))?;

            let shape = view.shape().to_vec();
            match shape.len() {
                2 => {
                    if shape[1] != dimension {
                        return Err(EmbeddingError::Inference(format!(
                            "model emits dimension {}, expected {}",
                            shape[1], dimension
                        )));
                    }
                    for i in 0..shape[0] {
                        let row: Vec<f32> = view.slice(ndarray::s![i, ..]).iter().copied().collect();
                        all_embeddings.push(normalize_l2(row));
                    }
                }
                3 => {
                    let seq_len = shape[1];
                    for (i, ids) in truncated.iter().enumerate() {
                        let valid_len = ids.len().min(seq_len);
                        let mut sum = vec![0f32; dimension];
                        let mut count = 0f32;
                        for j in 0..valid_len {
                            for (k, &v) in view.slice(ndarray::s![i, j, ..]).iter().enumerate() {
                                if k < dimension {
                                    sum[k] += v;
                                }
                            }
                            count += 1.0;
                        }
                        if count > 0.0 {
                            for x in &mut sum {
                                *x /= count;
                            }
                        }
                        all_embeddings.push(normalize_l2(sum));
                    }
                }
                other => {
                    return Err(EmbeddingError::Inference(format!(
                        "unexpected output rank: {}",
                        other
                    )));
                }
            }
        }

        Ok(all_embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for LocalOnnxEmbeddingProvider {
    async fn generate(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.generate_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::Inference("empty batch result".to_string()))
    }

    async fn generate_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = self.model.clone();
        let tokenizer = self.tokenizer.clone();
        let dimension = self.dimension;
        let max_tokens = self.max_tokens;
        let input_count = self.input_count;
        let texts = texts.to_vec();

        // Inference is CPU-bound; keep it off the I/O threads.
        tokio::task::spawn_blocking(move || {
            Self::run_batch(&model, &tokenizer, dimension, max_tokens, input_count, &texts)
        })
        .await
        .map_err(|e| EmbeddingError::Inference(format!("inference task: {}", e)))?
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn normalize_l2(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-9 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_l2() {
        let v = normalize_l2(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        // Near-zero vectors pass through untouched.
        let z = normalize_l2(vec![0.0, 0.0]);
        assert_eq!(z, vec![0.0, 0.0]);
    }
}
