//! # kbase CLI (`kb`)
//!
//! Command-line front end for the kbase retrieval pipeline: ingest files,
//! query and ask against them, manage the collection, and run the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! kb --config ./config/kbase.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kb init` | Create the SQLite database and schema |
//! | `kb ingest <paths…>` | Ingest files or directories |
//! | `kb query "<text>"` | Show ranked chunks and the assembled context size |
//! | `kb ask "<question>"` | Answer from retrieved context |
//! | `kb documents` | List indexed documents |
//! | `kb get <id>` | Show a document's chunks |
//! | `kb delete <id>` | Delete a document |
//! | `kb clear` | Delete every document |
//! | `kb stats` | Collection counts |
//! | `kb serve` | Start the HTTP API |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`
//! (`--verbose` raises the default to `debug`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use kbase::{cli, config, knowledge::AskOptions, server};

/// kbase: document ingestion and retrieval-augmented question answering.
#[derive(Parser)]
#[command(
    name = "kb",
    about = "kbase — document ingestion and retrieval-augmented question answering",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kbase.toml")]
    config: PathBuf,

    /// Enable debug logging (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent. Fails if an existing database holds vectors of a
    /// different dimensionality than the configured embedding provider.
    Init,

    /// Ingest files. Directories are walked for .txt, .md, .html and .pdf files.
    ///
    /// Uploading a file with the same name again replaces its earlier chunks.
    Ingest {
        /// Files or directories to ingest.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Override the configured chunk size (characters).
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Override the configured chunk overlap (characters).
        #[arg(long)]
        chunk_overlap: Option<usize>,
    },

    /// Retrieve the chunks most similar to a query.
    Query {
        query: String,

        /// Number of results (clamped to the store maximum).
        #[arg(long)]
        top_k: Option<usize>,

        /// Drop results scoring below this cosine similarity.
        #[arg(long)]
        floor: Option<f32>,

        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Answer a question using retrieved context.
    Ask {
        question: String,

        #[arg(long)]
        top_k: Option<usize>,

        #[arg(long)]
        temperature: Option<f32>,

        #[arg(long)]
        max_tokens: Option<u32>,
    },

    /// List indexed documents.
    Documents,

    /// Show a document's stored chunks.
    Get { id: String },

    /// Delete a document by id.
    Delete { id: String },

    /// Delete every document.
    Clear,

    /// Show collection statistics.
    Stats,

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "kbase=debug,kb=debug" } else { "kbase=info,kb=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    init_tracing(args.verbose);

    let cfg = config::load_config(&args.config)?;

    match args.command {
        Commands::Init => {
            cli::run_init(&cfg).await?;
        }
        Commands::Ingest {
            paths,
            chunk_size,
            chunk_overlap,
        } => {
            cli::run_ingest(&cfg, &paths, chunk_size, chunk_overlap).await?;
        }
        Commands::Query {
            query,
            top_k,
            floor,
            json,
        } => {
            cli::run_query(&cfg, &query, top_k, floor, json).await?;
        }
        Commands::Ask {
            question,
            top_k,
            temperature,
            max_tokens,
        } => {
            let options = AskOptions {
                top_k,
                similarity_floor: None,
                temperature,
                max_tokens,
            };
            cli::run_ask(&cfg, &question, options).await?;
        }
        Commands::Documents => {
            cli::run_documents(&cfg).await?;
        }
        Commands::Get { id } => {
            cli::run_get(&cfg, &id).await?;
        }
        Commands::Delete { id } => {
            cli::run_delete(&cfg, &id).await?;
        }
        Commands::Clear => {
            cli::run_clear(&cfg).await?;
        }
        Commands::Stats => {
            cli::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
