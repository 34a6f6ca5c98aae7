use clap::{Parser, Subcommand};
use globset::Glob;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use semvault::application::ports::{ChunkStorage, EmbeddingProvider, TextExtraction, TextExtractor};
use semvault::application::services::{ChunkingOptions, SemanticChunker};
use semvault::domain::entities::{Chunk, SourceMetadata};
use semvault::domain::value_objects::ContentHash;
use semvault::infrastructure::archive::ParquetChunkStorage;
use semvault::infrastructure::embeddings::{
    DeterministicEmbeddingProvider, RemoteEmbeddingConfig, RemoteEmbeddingProvider,
};
use semvault::infrastructure::extractors::CompositeExtractor;

#[derive(Parser)]
#[command(
    name = "semvault",
    version,
    about = "Split documents into semantic chunk archives"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory chunk archives are written to
    #[arg(short, long, global = true, default_value = "./chunks")]
    output: PathBuf,

    /// Overwrite archives that already exist
    #[arg(short, long, global = true)]
    force: bool,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Similarity threshold for semantic boundaries
    #[arg(short = 't', long, global = true)]
    threshold: Option<f32>,

    /// Minimum chunk size in characters
    #[arg(long, global = true)]
    min_chunk: Option<usize>,

    /// Maximum chunk size in characters
    #[arg(long, global = true)]
    max_chunk: Option<usize>,
}

#[derive(Subcommand)]
enum Command {
    /// Chunk individual files
    File { paths: Vec<PathBuf> },
    /// Chunk every supported file in one or more directories
    Dir {
        paths: Vec<PathBuf>,
        /// Recurse into subdirectories
        #[arg(short, long)]
        recursive: bool,
        /// Only process files whose name matches this glob
        #[arg(short, long)]
        pattern: Option<String>,
    },
    /// Download and chunk URLs
    Url { urls: Vec<String> },
}

struct IngestContext {
    extractor: CompositeExtractor,
    chunker: SemanticChunker,
    storage: ParquetChunkStorage,
    output: PathBuf,
    force: bool,
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    };

    let filter = if cli.verbose {
        "semvault=debug"
    } else {
        "semvault=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let mut options = ChunkingOptions::default();
    if let Some(threshold) = cli.threshold {
        options.similarity_threshold = threshold;
    }
    if let Some(min) = cli.min_chunk {
        options.min_chunk_size = min;
    }
    if let Some(max) = cli.max_chunk {
        options.max_chunk_size = max;
    }

    let context = IngestContext {
        extractor: CompositeExtractor::standard(),
        chunker: SemanticChunker::new(embedding_provider_from_env(), options),
        storage: ParquetChunkStorage::new(),
        output: cli.output.clone(),
        force: cli.force,
    };

    let all_ok = match cli.command {
        Command::File { paths } => run_files(&context, &paths).await,
        Command::Dir {
            paths,
            recursive,
            pattern,
        } => run_dirs(&context, &paths, recursive, pattern.as_deref()).await,
        Command::Url { urls } => run_urls(&context, &urls).await,
    };

    if !all_ok {
        std::process::exit(1);
    }
}

/// Boundary oracle for the CLI: a remote inference service when one is
/// configured, otherwise the deterministic hashed-token provider.
fn embedding_provider_from_env() -> Arc<dyn EmbeddingProvider> {
    match std::env::var("EMBEDDINGS_SERVICE_URL") {
        Ok(url) => {
            let config = RemoteEmbeddingConfig::new(url, 1024);
            match RemoteEmbeddingProvider::new(config) {
                Ok(provider) => Arc::new(provider),
                Err(e) => {
                    eprintln!(
                        "warning: embedding service unusable ({}), using local boundaries",
                        e
                    );
                    Arc::new(DeterministicEmbeddingProvider::new(1024))
                }
            }
        }
        Err(_) => Arc::new(DeterministicEmbeddingProvider::new(1024)),
    }
}

async fn run_files(context: &IngestContext, paths: &[PathBuf]) -> bool {
    if paths.is_empty() {
        eprintln!("no input files given");
        return false;
    }
    let mut all_ok = true;
    for path in paths {
        all_ok &= ingest_file(context, path).await;
    }
    all_ok
}

async fn run_dirs(
    context: &IngestContext,
    paths: &[PathBuf],
    recursive: bool,
    pattern: Option<&str>,
) -> bool {
    let matcher = match pattern.map(|p| Glob::new(p).map(|g| g.compile_matcher())) {
        Some(Ok(matcher)) => Some(matcher),
        Some(Err(e)) => {
            eprintln!("invalid glob pattern: {}", e);
            return false;
        }
        None => None,
    };

    let mut all_ok = true;
    for dir in paths {
        let files = match collect_files(dir, recursive) {
            Ok(files) => files,
            Err(e) => {
                eprintln!("failed {} ({})", dir.display(), e);
                all_ok = false;
                continue;
            }
        };

        for file in files {
            let name = file
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            if let Some(matcher) = &matcher {
                if !matcher.is_match(name) {
                    continue;
                }
            }
            let extension = file
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase())
                .unwrap_or_default();
            if !context.extractor.supports(&extension) {
                continue;
            }
            all_ok &= ingest_file(context, &file).await;
        }
    }
    all_ok
}

async fn run_urls(context: &IngestContext, urls: &[String]) -> bool {
    if urls.is_empty() {
        eprintln!("no input urls given");
        return false;
    }
    let mut all_ok = true;
    for raw in urls {
        all_ok &= ingest_url(context, raw).await;
    }
    all_ok
}

async fn ingest_file(context: &IngestContext, path: &Path) -> bool {
    let started = Instant::now();
    let source_id = sanitize_source_id(&path.to_string_lossy());

    let result = async {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| format!("read: {}", e))?;
        let extractions = context
            .extractor
            .extract(path)
            .await
            .map_err(|e| e.to_string())?;

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(source_id.as_str())
            .to_string();
        let metadata = SourceMetadata::new(name)
            .with_file_size(bytes.len() as i64)
            .with_file_hash(ContentHash::of_bytes(&bytes).to_string());

        write_archive(context, &source_id, extractions, metadata).await
    }
    .await;

    report(path.display().to_string(), result, started)
}

async fn ingest_url(context: &IngestContext, raw: &str) -> bool {
    let started = Instant::now();

    let result = async {
        let url = url::Url::parse(raw).map_err(|e| format!("invalid url: {}", e))?;
        let response = reqwest::get(url.clone())
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| format!("download: {}", e))?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .unwrap_or_else(|| "text/html".to_string());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| format!("download body: {}", e))?;

        let extractions = context
            .extractor
            .extract_bytes(&bytes, &content_type)
            .await
            .map_err(|e| e.to_string())?;

        let metadata = SourceMetadata::new(raw)
            .with_content_type(content_type)
            .with_file_size(bytes.len() as i64)
            .with_file_hash(ContentHash::of_bytes(&bytes).to_string());

        write_archive(context, &sanitize_source_id(raw), extractions, metadata).await
    }
    .await;

    report(raw.to_string(), result, started)
}

async fn write_archive(
    context: &IngestContext,
    source_id: &str,
    extractions: Vec<TextExtraction>,
    metadata: SourceMetadata,
) -> Result<(PathBuf, usize), String> {
    let archive_path = context.output.join(format!("{}.chunks.parquet", source_id));
    if archive_path.exists() && !context.force {
        return Err(format!(
            "{} exists (use --force to overwrite)",
            archive_path.display()
        ));
    }

    let mut chunks = Vec::new();
    let mut next_index: i32 = 0;
    for extraction in &extractions {
        let pieces = context
            .chunker
            .chunk(&extraction.text)
            .await
            .map_err(|e| e.to_string())?;
        let paged = extraction.page_number.is_some();
        for piece in pieces {
            let (start, end) = if paged {
                (None, None)
            } else {
                (Some(piece.start_index as i32), Some(piece.end_index as i32))
            };
            chunks.push(Chunk::new(
                source_id,
                piece.text,
                next_index,
                start,
                end,
                extraction.page_number,
                extraction.source_location.clone(),
            ));
            next_index += 1;
        }
    }

    context
        .storage
        .write_chunks(&chunks, &metadata, &archive_path)
        .await
        .map_err(|e| e.to_string())?;

    Ok((archive_path, chunks.len()))
}

fn report(input: String, result: Result<(PathBuf, usize), String>, started: Instant) -> bool {
    let elapsed = started.elapsed();
    match result {
        Ok((archive, chunk_count)) => {
            println!(
                "ok     {} -> {} ({} chunks, {:.2}s)",
                input,
                archive.display(),
                chunk_count,
                elapsed.as_secs_f64()
            );
            true
        }
        Err(message) => {
            eprintln!(
                "failed {} ({}, {:.2}s)",
                input,
                message,
                elapsed.as_secs_f64()
            );
            false
        }
    }
}

fn collect_files(dir: &Path, recursive: bool) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                if recursive {
                    stack.push(path);
                }
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Flatten any path or URL into a safe single-segment archive stem.
fn sanitize_source_id(raw: &str) -> String {
    let trimmed = raw.trim_start_matches("./").trim_start_matches('/');
    trimmed
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
