//! Command implementations for the `kb` binary.
//!
//! Each `run_*` function opens the configured [`KnowledgeBase`], performs one
//! operation, and prints human-readable output to stdout.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::Config;
use crate::extract::SourceType;
use crate::ingest::Upload;
use crate::knowledge::{AskOptions, KnowledgeBase};
use crate::models::ChunkingParams;

/// Create the database and schema.
pub async fn run_init(config: &Config) -> Result<()> {
    let kb = KnowledgeBase::open(config).await?;
    if config.store.backend == "memory" {
        println!("Store backend is \"memory\"; nothing to initialize.");
    } else {
        println!("Database initialized successfully.");
        println!("  path: {}", config.store.path.display());
        println!("  dims: {}", kb.store().dims());
    }
    Ok(())
}

/// Ingest files, walking directories for supported types.
pub async fn run_ingest(
    config: &Config,
    paths: &[PathBuf],
    chunk_size: Option<usize>,
    chunk_overlap: Option<usize>,
) -> Result<()> {
    let files = collect_files(paths)?;
    if files.is_empty() {
        bail!("no supported files found");
    }

    let params = if chunk_size.is_some() || chunk_overlap.is_some() {
        let defaults = config.chunking.params();
        Some(ChunkingParams {
            chunk_size: chunk_size.unwrap_or(defaults.chunk_size),
            chunk_overlap: chunk_overlap.unwrap_or(defaults.chunk_overlap),
        })
    } else {
        None
    };

    let kb = KnowledgeBase::open(config).await?;
    let mut ingested = 0usize;
    let mut chunks = 0usize;
    let mut failed = 0usize;

    println!("ingest");
    for path in &files {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let bytes = std::fs::read(path)?;

        let mut upload = Upload::new(filename, bytes);
        if let Some(p) = params {
            upload = upload.with_params(p);
        }

        match kb.ingest(upload).await {
            Ok(report) => {
                println!(
                    "  {} → {} chunks ({})",
                    report.filename, report.chunk_count, report.document_id
                );
                ingested += 1;
                chunks += report.chunk_count;
            }
            Err(e) => {
                println!("  {} → failed: {}", path.display(), e);
                failed += 1;
            }
        }
    }

    println!("  documents: {}", ingested);
    println!("  chunks written: {}", chunks);
    if failed > 0 {
        bail!("{} of {} files failed to ingest", failed, files.len());
    }
    println!("ok");
    Ok(())
}

/// Expand `paths`: files are taken as given, directories are walked and
/// filtered to supported extensions.
fn collect_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path).sort_by_file_name() {
                let entry = entry?;
                if entry.file_type().is_file() && is_supported(entry.path()) {
                    files.push(entry.into_path());
                }
            }
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            bail!("path not found: {}", path.display());
        }
    }
    Ok(files)
}

fn is_supported(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| SourceType::from_filename(n).is_ok())
        .unwrap_or(false)
}

/// Retrieve and print ranked chunks.
pub async fn run_query(
    config: &Config,
    query: &str,
    top_k: Option<usize>,
    floor: Option<f32>,
    json: bool,
) -> Result<()> {
    let kb = KnowledgeBase::open(config).await?;
    let response = kb.query(query, top_k, floor).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    if response.results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for result in &response.results {
        println!(
            "{}. [{:.4}] {} (chars {}-{})",
            result.rank, result.score, result.filename, result.start, result.end
        );
        println!("    excerpt: \"{}\"", excerpt(&result.text, 160));
        println!("    document: {}", result.document_id);
        println!("    chunk: {}", result.chunk_id);
        println!();
    }
    println!(
        "context: {} chunks, {} / {} chars",
        response.context.entries.len(),
        response.context.size,
        config.retrieval.max_context_size
    );
    Ok(())
}

/// Answer a question from retrieved context.
pub async fn run_ask(config: &Config, question: &str, options: AskOptions) -> Result<()> {
    let kb = KnowledgeBase::open(config).await?;
    let answer = kb.ask(question, &options).await?;

    println!("{}", answer.answer);
    if !answer.sources.is_empty() {
        println!();
        println!("Sources:");
        for s in &answer.sources {
            println!(
                "  [{}] {} (chars {}-{}) score {:.4}",
                s.rank, s.filename, s.start, s.end, s.score
            );
        }
    }
    Ok(())
}

/// List indexed documents.
pub async fn run_documents(config: &Config) -> Result<()> {
    let kb = KnowledgeBase::open(config).await?;
    let docs = kb.list_documents().await?;
    if docs.is_empty() {
        println!("No documents.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<28} {:<9} {:>6}  {}",
        "ID", "FILENAME", "TYPE", "CHUNKS", "UPLOADED"
    );
    for d in &docs {
        println!(
            "{:<36}  {:<28} {:<9} {:>6}  {}",
            d.document_id,
            d.filename,
            d.source_type,
            d.chunk_count,
            format_ts(d.uploaded_at)
        );
    }
    println!();
    println!("{} documents", docs.len());
    Ok(())
}

/// Print one document's stored chunks.
pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let kb = KnowledgeBase::open(config).await?;
    let Some(doc) = kb.get_document(id).await? else {
        bail!("document not found: {}", id);
    };

    println!("--- Document ---");
    println!("id:          {}", doc.summary.document_id);
    println!("filename:    {}", doc.summary.filename);
    println!("type:        {}", doc.summary.source_type);
    println!("uploaded_at: {}", format_ts(doc.summary.uploaded_at));
    println!(
        "chunking:    size {} / overlap {}",
        doc.summary.params.chunk_size, doc.summary.params.chunk_overlap
    );
    println!();
    println!("--- Chunks ({}) ---", doc.chunks.len());
    for chunk in &doc.chunks {
        println!(
            "[chunk {}] chars {}-{} sha256 {}",
            chunk.chunk_index,
            chunk.start,
            chunk.end,
            &chunk.hash[..12.min(chunk.hash.len())]
        );
        println!("{}", chunk.text);
        println!();
    }
    Ok(())
}

pub async fn run_delete(config: &Config, id: &str) -> Result<()> {
    let kb = KnowledgeBase::open(config).await?;
    if !kb.delete_document(id).await? {
        bail!("document not found: {}", id);
    }
    println!("Deleted document {}", id);
    Ok(())
}

pub async fn run_clear(config: &Config) -> Result<()> {
    let kb = KnowledgeBase::open(config).await?;
    kb.clear_all().await?;
    println!("All documents cleared.");
    Ok(())
}

pub async fn run_stats(config: &Config) -> Result<()> {
    let kb = KnowledgeBase::open(config).await?;
    let stats = kb.stats().await?;

    println!("kbase — Store Stats");
    println!("===================");
    println!();
    println!("  Backend:     {}", config.store.backend);
    if config.store.backend != "memory" {
        println!("  Database:    {}", config.store.path.display());
    }
    println!("  Dimensions:  {}", stats.dims);
    println!();
    println!("  Documents:   {}", stats.total_documents);
    println!("  Chunks:      {}", stats.total_chunks);

    if !stats.chunks_by_type.is_empty() {
        println!();
        println!("  By type:");
        for (source_type, count) in &stats.chunks_by_type {
            println!("  {:<12} {:>8}", source_type, count);
        }
    }
    println!();
    Ok(())
}

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    if flat.chars().count() <= max_chars {
        return flat.to_string();
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}…", cut)
}
