use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::application::ports::{EmbeddingError, EmbeddingProvider};

/// Tuning knobs for semantic boundary detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingOptions {
    /// Adjacent-sentence cosine similarity below this marks a boundary.
    pub similarity_threshold: f32,
    /// Chunks shorter than this never break, even at a boundary.
    pub min_chunk_size: usize,
    /// Soft upper bound in characters; only a single oversized sentence
    /// may exceed it.
    pub max_chunk_size: usize,
    /// Sentence delimiters, checked in order at every position.
    pub delimiters: Vec<String>,
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.5,
            min_chunk_size: 100,
            max_chunk_size: 1000,
            delimiters: vec![
                ".".to_string(),
                "!".to_string(),
                "?".to_string(),
                "。".to_string(),
                "！".to_string(),
                "？".to_string(),
                "\n\n".to_string(),
            ],
        }
    }
}

/// One emitted chunk: trimmed text plus byte offsets into the source.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub text: String,
    pub start_index: usize,
    pub end_index: usize,
    pub chunk_index: usize,
}

/// Transient sentence record; offsets bracket the trimmed text exactly.
#[derive(Debug, Clone)]
struct Sentence {
    text: String,
    start_index: usize,
    end_index: usize,
}

/// Splits text into chunks at semantic boundaries, using an embedding
/// provider as the boundary oracle.
pub struct SemanticChunker {
    provider: Arc<dyn EmbeddingProvider>,
    options: ChunkingOptions,
}

impl SemanticChunker {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, options: ChunkingOptions) -> Self {
        Self { provider, options }
    }

    pub fn options(&self) -> &ChunkingOptions {
        &self.options
    }

    /// Chunk `text`. Empty input yields an empty list; a single sentence
    /// yields one chunk spanning the whole input.
    pub async fn chunk(&self, text: &str) -> Result<Vec<TextChunk>, EmbeddingError> {
        let sentences = self.split_sentences(text);

        if sentences.is_empty() {
            return Ok(Vec::new());
        }

        if sentences.len() == 1 {
            return Ok(vec![TextChunk {
                text: text.trim().to_string(),
                start_index: 0,
                end_index: text.len(),
                chunk_index: 0,
            }]);
        }

        let texts: Vec<String> = sentences.iter().map(|s| s.text.clone()).collect();
        let embeddings = self.provider.generate_batch(&texts).await?;

        if embeddings.len() != sentences.len() {
            return Err(EmbeddingError::Inference(format!(
                "expected {} embeddings, got {}",
                sentences.len(),
                embeddings.len()
            )));
        }

        // A candidate break sits *before* sentence i when similarity between
        // sentences i-1 and i falls under the threshold.
        let mut is_break = vec![false; sentences.len() + 1];
        for i in 0..sentences.len() - 1 {
            let similarity = cosine_similarity(&embeddings[i], &embeddings[i + 1]);
            if similarity < self.options.similarity_threshold {
                is_break[i + 1] = true;
            }
        }

        Ok(self.assemble(text, &sentences, &is_break))
    }

    /// Left-to-right scan emitting trimmed sentences between delimiters.
    /// Whitespace-only spans are discarded but still advance the cursor.
    fn split_sentences(&self, text: &str) -> Vec<Sentence> {
        let mut sentences = Vec::new();
        let mut current_start = 0usize;
        let mut i = 0usize;

        while i < text.len() {
            let rest = &text[i..];
            if let Some(delim) = self
                .options
                .delimiters
                .iter()
                .find(|d| rest.starts_with(d.as_str()))
            {
                let end = i + delim.len();
                push_trimmed_sentence(text, current_start, end, &mut sentences);
                current_start = end;
                i = end;
            } else {
                i += rest.chars().next().map(char::len_utf8).unwrap_or(1);
            }
        }

        if current_start < text.len() {
            push_trimmed_sentence(text, current_start, text.len(), &mut sentences);
        }

        sentences
    }

    fn assemble(&self, text: &str, sentences: &[Sentence], is_break: &[bool]) -> Vec<TextChunk> {
        let mut chunks: Vec<TextChunk> = Vec::new();
        let mut first: Option<usize> = None;
        let mut current_len = 0usize;

        let mut flush = |first: &mut Option<usize>, last: usize, chunks: &mut Vec<TextChunk>| {
            if let Some(f) = first.take() {
                let start = sentences[f].start_index;
                let end = sentences[last].end_index;
                chunks.push(TextChunk {
                    text: text[start..end].trim().to_string(),
                    start_index: start,
                    end_index: end,
                    chunk_index: chunks.len(),
                });
            }
        };

        for (idx, sentence) in sentences.iter().enumerate() {
            // Size cap checked before appending, so a chunk only exceeds
            // the max when a single sentence does.
            if let Some(f) = first {
                let prospective = text[sentences[f].start_index..sentence.end_index]
                    .chars()
                    .count();
                if prospective > self.options.max_chunk_size {
                    flush(&mut first, idx - 1, &mut chunks);
                }
            }

            if first.is_none() {
                first = Some(idx);
            }
            current_len = text[sentences[first.unwrap()].start_index..sentence.end_index]
                .chars()
                .count();

            let is_last = idx + 1 == sentences.len();
            let break_next = is_break[idx + 1] && current_len >= self.options.min_chunk_size;

            if is_last || break_next {
                flush(&mut first, idx, &mut chunks);
                current_len = 0;
            }
        }

        chunks
    }
}

fn push_trimmed_sentence(text: &str, start: usize, end: usize, out: &mut Vec<Sentence>) {
    let raw = &text[start..end];
    let trimmed_start = start + (raw.len() - raw.trim_start().len());
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return;
    }
    out.push(Sentence {
        text: trimmed.to_string(),
        start_index: trimmed_start,
        end_index: trimmed_start + trimmed.len(),
    });
}

/// Plain f32 cosine; inputs are not assumed pre-normalized.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Maps keywords to fixed axis vectors so tests control the boundary
    /// oracle exactly.
    struct KeywordProvider {
        axes: HashMap<&'static str, Vec<f32>>,
        fallback: Vec<f32>,
    }

    impl KeywordProvider {
        fn two_topics() -> Self {
            let mut axes = HashMap::new();
            axes.insert("cats", vec![1.0, 0.0]);
            axes.insert("stock", vec![0.0, 1.0]);
            axes.insert("investors", vec![0.0, 1.0]);
            Self {
                axes,
                fallback: vec![1.0, 0.0],
            }
        }

        fn single_topic() -> Self {
            Self {
                axes: HashMap::new(),
                fallback: vec![0.6, 0.8],
            }
        }

        fn alternating() -> Self {
            let mut axes = HashMap::new();
            axes.insert("alpha", vec![1.0, 0.0]);
            axes.insert("omega", vec![0.0, 1.0]);
            Self {
                axes,
                fallback: vec![1.0, 0.0],
            }
        }

        fn vector_for(&self, text: &str) -> Vec<f32> {
            let lower = text.to_lowercase();
            for (keyword, axis) in &self.axes {
                if lower.contains(keyword) {
                    return axis.clone();
                }
            }
            self.fallback.clone()
        }
    }

    #[async_trait]
    impl EmbeddingProvider for KeywordProvider {
        async fn generate(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(self.vector_for(text))
        }

        async fn generate_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|t| self.vector_for(t)).collect())
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    fn chunker(provider: KeywordProvider, options: ChunkingOptions) -> SemanticChunker {
        SemanticChunker::new(Arc::new(provider), options)
    }

    #[tokio::test]
    async fn test_empty_input_yields_no_chunks() {
        let c = chunker(KeywordProvider::single_topic(), ChunkingOptions::default());
        assert!(c.chunk("").await.unwrap().is_empty());
        assert!(c.chunk("   \n  ").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_single_sentence_spans_whole_input() {
        let c = chunker(KeywordProvider::single_topic(), ChunkingOptions::default());
        let input = "  Just one sentence without a terminator here  ";
        let chunks = c.chunk(input).await.unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_index, 0);
        assert_eq!(chunks[0].end_index, input.len());
        assert_eq!(chunks[0].text, input.trim());
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[tokio::test]
    async fn test_two_topic_document_splits_once() {
        let options = ChunkingOptions {
            similarity_threshold: 0.5,
            min_chunk_size: 20,
            max_chunk_size: 500,
            ..ChunkingOptions::default()
        };
        let c = chunker(KeywordProvider::two_topics(), options);
        let input = "Cats purr when content. Cats groom themselves. \
                     The stock market opened higher today. Investors cheered the rate cut.";

        let chunks = c.chunk(input).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.starts_with("Cats"));
        assert!(chunks[0].text.ends_with("themselves."));
        assert!(chunks[1].text.starts_with("The stock"));

        // Offsets cover the input with only whitespace between chunks.
        assert!(chunks[0].end_index <= chunks[1].start_index);
        let gap = &input[chunks[0].end_index..chunks[1].start_index];
        assert!(gap.trim().is_empty());
        assert!(input[..chunks[0].start_index].trim().is_empty());
        assert!(input[chunks[1].end_index..].trim().is_empty());
    }

    #[tokio::test]
    async fn test_max_size_cap_splits_coherent_text() {
        let options = ChunkingOptions {
            similarity_threshold: 0.1,
            min_chunk_size: 100,
            max_chunk_size: 500,
            ..ChunkingOptions::default()
        };
        let c = chunker(KeywordProvider::single_topic(), options);

        let sentence = "This sentence keeps talking about the very same single topic.";
        let input = std::iter::repeat(sentence)
            .take(20)
            .collect::<Vec<_>>()
            .join(" ");
        assert!(input.len() >= 1200);

        let chunks = c.chunk(&input).await.unwrap();
        assert!(chunks.len() >= 3, "expected >= 3 chunks, got {}", chunks.len());
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 500);
        }

        // Spans tile the input: ascending, non-overlapping, whitespace gaps.
        for pair in chunks.windows(2) {
            assert!(pair[0].end_index <= pair[1].start_index);
            assert!(input[pair[0].end_index..pair[1].start_index].trim().is_empty());
        }
        assert!(input[chunks.last().unwrap().end_index..].trim().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_sentence_stays_whole() {
        let options = ChunkingOptions {
            max_chunk_size: 30,
            min_chunk_size: 5,
            ..ChunkingOptions::default()
        };
        let c = chunker(KeywordProvider::single_topic(), options);
        let input = "Short one. This sentence is far longer than the thirty character cap. Tail.";

        let chunks = c.chunk(input).await.unwrap();
        let oversized = chunks
            .iter()
            .find(|c| c.text.contains("far longer"))
            .expect("long sentence present");
        assert!(oversized.text.chars().count() > 30);
        assert!(oversized.text.contains("character cap."));
    }

    #[tokio::test]
    async fn test_min_size_suppresses_breaks() {
        let options = ChunkingOptions {
            similarity_threshold: 0.5,
            min_chunk_size: 10_000,
            max_chunk_size: 100_000,
            ..ChunkingOptions::default()
        };
        // Every adjacent pair is orthogonal, so every position is a
        // candidate break; min size keeps it all together anyway.
        let c = chunker(KeywordProvider::alternating(), options);
        let input = "Alpha first. Omega second. Alpha third. Omega fourth.";

        let chunks = c.chunk(input).await.unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[tokio::test]
    async fn test_deterministic_given_deterministic_provider() {
        let options = ChunkingOptions::default();
        let input = "One thing here. Another thing there. A third follows! And a fourth?";

        let a = chunker(KeywordProvider::single_topic(), options.clone())
            .chunk(input)
            .await
            .unwrap();
        let b = chunker(KeywordProvider::single_topic(), options)
            .chunk(input)
            .await
            .unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_cjk_delimiters() {
        let c = chunker(KeywordProvider::single_topic(), ChunkingOptions {
            min_chunk_size: 1,
            ..ChunkingOptions::default()
        });
        let input = "第一句话。第二句话！第三句话？";
        let chunks = c.chunk(input).await.unwrap();
        assert!(!chunks.is_empty());
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert!(joined.contains("第一句话。"));
    }

    #[test]
    fn test_cosine_on_normalized_vectors_is_dot_product() {
        let a = vec![0.6f32, 0.8];
        let b = vec![0.8f32, 0.6];
        let dot: f32 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
        assert!((cosine_similarity(&a, &b) - dot).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_handles_unnormalized_and_zero() {
        let a = vec![3.0f32, 4.0];
        let b = vec![6.0f32, 8.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }
}
