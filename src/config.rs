use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::application::services::ChunkingOptions;

/// Which embedding backend the engine runs with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum EmbeddingBackend {
    /// Hashed bag-of-tokens; no model files. Deterministic, for tests and
    /// offline development.
    Deterministic,
    /// HTTP inference service.
    Remote { service_url: String },
    /// Local ONNX graph + tokenizer files.
    LocalOnnx {
        model_path: PathBuf,
        tokenizer_path: PathBuf,
        max_tokens: Option<usize>,
    },
}

impl Default for EmbeddingBackend {
    fn default() -> Self {
        EmbeddingBackend::Deterministic
    }
}

/// Per-run configuration for one vault endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Directory holding the index database, the version map, and the
    /// archive files.
    pub data_path: PathBuf,
    pub embedding_dimension: usize,
    pub debounce_delay_ms: u64,
    /// Bounds how long shutdown waits for queued work to drain.
    pub lock_timeout_seconds: u64,
    pub max_retries: u32,
    /// None means every extension the extractors accept.
    pub allowed_extensions: Option<HashSet<String>>,
    /// Path-segment patterns to skip, matched case-insensitively.
    pub exclude_patterns: Vec<String>,
    pub embedding_sync_interval_secs: u64,
    pub embedding_batch_size: usize,
    pub chunking: ChunkingOptions,
    pub embedding: EmbeddingBackend,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("./data"),
            embedding_dimension: 1024,
            debounce_delay_ms: 1000,
            lock_timeout_seconds: 300,
            max_retries: 3,
            allowed_extensions: None,
            exclude_patterns: [".git", ".vs", "node_modules", "bin", "obj"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            embedding_sync_interval_secs: 30,
            embedding_batch_size: 50,
            chunking: ChunkingOptions::default(),
            embedding: EmbeddingBackend::default(),
        }
    }
}

impl VaultConfig {
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn index_path(&self) -> PathBuf {
        self.data_path.join("index.db")
    }

    pub fn versions_path(&self) -> PathBuf {
        self.data_path.join("versions.json")
    }

    pub fn archives_dir(&self) -> PathBuf {
        self.data_path.join("archives")
    }

    /// Whether a relative vault path is eligible for ingestion: no excluded
    /// path segment, and an allowed extension (when the allow-list is set).
    pub fn should_process(&self, relative_path: &str) -> bool {
        for segment in relative_path.split('/') {
            if self
                .exclude_patterns
                .iter()
                .any(|p| p.eq_ignore_ascii_case(segment))
            {
                return false;
            }
        }

        if let Some(allowed) = &self.allowed_extensions {
            let extension = Path::new(relative_path)
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase())
                .unwrap_or_default();
            return allowed.contains(&extension);
        }

        true
    }
}
