//! # docqa CLI
//!
//! The `docqa` binary starts the web server and offers a few maintenance
//! commands for the index and the object store.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa serve` | Start the HTTP server |
//! | `docqa ask "<question>"` | Index the seed corpus and answer once |
//! | `docqa files list` | List stored object keys |
//! | `docqa files get <key>` | Print a stored file's extracted pages |
//! | `docqa files put <path>` | Upload a local file |
//!
//! ## Examples
//!
//! ```bash
//! docqa serve --config ./config/docqa.toml
//! docqa ask "Where is Winterfell?" --file ./data/got.txt --reader-top-k 3
//! RUST_LOG=docqa=trace docqa files list
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use docqa::config::{self, Config};
use docqa::extract;
use docqa::index::{DocumentStore, Indexer};
use docqa::models::DocumentKind;
use docqa::pipeline::{ExtractiveQaPipeline, QueryParams};
use docqa::reader::create_reader;
use docqa::retriever::Bm25Retriever;
use docqa::server;
use docqa::storage::create_store;
use docqa::upload::{allowed_file, secure_filename};

/// docqa: upload documents, then ask questions about them.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docqa.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docqa",
    about = "docqa: extractive question answering over uploaded documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// When the file does not exist, built-in defaults are used (filesystem
    /// object store under ./bucket, lexical reader, 127.0.0.1:8000).
    #[arg(long, global = true, default_value = "./config/docqa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    Serve,

    /// Answer a single question from the command line.
    ///
    /// Indexes `index.seed_dirs` plus any `--file` arguments, then runs the
    /// retrieve-then-read pipeline once.
    Ask {
        /// The question to answer.
        question: String,

        /// Additional files to index before answering.
        #[arg(long = "file")]
        files: Vec<PathBuf>,

        /// Number of passages handed to the reader.
        #[arg(long)]
        retriever_top_k: Option<usize>,

        /// Number of answers to print.
        #[arg(long)]
        reader_top_k: Option<usize>,
    },

    /// Inspect or populate the object store.
    Files {
        #[command(subcommand)]
        action: FilesAction,
    },
}

#[derive(Subcommand)]
enum FilesAction {
    /// List stored object keys.
    List,
    /// Print the extracted pages of a stored file.
    Get {
        /// Object key.
        key: String,
    },
    /// Upload a local file under its sanitized name.
    Put {
        /// Path to a `.txt`, `.pdf`, or `.zip` file.
        path: PathBuf,
    },
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_or_default(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        tracing::info!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::minimal())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve => init_tracing("info,docqa=debug,tower_http=debug"),
        _ => init_tracing("warn"),
    }

    let cfg = load_or_default(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ask {
            question,
            files,
            retriever_top_k,
            reader_top_k,
        } => {
            ask(&cfg, &question, &files, retriever_top_k, reader_top_k).await?;
        }
        Commands::Files { action } => match action {
            FilesAction::List => {
                let store = create_store(&cfg.storage)?;
                for key in store.list().await? {
                    println!("{}", key);
                }
            }
            FilesAction::Get { key } => {
                let store = create_store(&cfg.storage)?;
                let bytes = store.get(&key).await?;
                let pages = extract::extract_pages(&key, DocumentKind::for_key(&key), &bytes)?;
                for (i, page) in pages.iter().enumerate() {
                    if pages.len() > 1 {
                        println!("--- page {} ---", i + 1);
                    }
                    println!("{}", page);
                }
            }
            FilesAction::Put { path } => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                if !allowed_file(&name) {
                    anyhow::bail!("File not allowed: {}", path.display());
                }
                let key = secure_filename(&name);
                if !allowed_file(&key) {
                    anyhow::bail!("Invalid file name: '{}'", name);
                }
                let store = create_store(&cfg.storage)?;
                store
                    .put(&path, &key)
                    .await
                    .with_context(|| format!("S3 upload failed for file '{}'", key))?;
                println!("Uploaded {} as {}", path.display(), key);
            }
        },
    }

    Ok(())
}

async fn ask(
    cfg: &Config,
    question: &str,
    files: &[PathBuf],
    retriever_top_k: Option<usize>,
    reader_top_k: Option<usize>,
) -> anyhow::Result<()> {
    let documents = Arc::new(DocumentStore::new());
    let indexer = Indexer::new(documents.clone(), cfg.index.passage_tokens);
    for dir in &cfg.index.seed_dirs {
        indexer.ingest_dir(dir)?;
    }
    if !files.is_empty() {
        indexer.ingest(files)?;
    }
    if documents.is_empty() {
        eprintln!("Warning: nothing indexed; set index.seed_dirs or pass --file.");
    }

    let reader = create_reader(&cfg.reader, documents.clone())?;
    let pipeline = ExtractiveQaPipeline::new(
        Bm25Retriever::from_config(documents, &cfg.retrieval),
        reader,
    );

    let mut params = QueryParams::from(&cfg.retrieval);
    if let Some(k) = retriever_top_k {
        params.retriever_top_k = k;
    }
    if let Some(k) = reader_top_k {
        params.reader_top_k = k;
    }

    let prediction = pipeline.run(question, params).await?;
    if prediction.answers.is_empty() {
        println!("No answer found.");
        return Ok(());
    }
    for (i, answer) in prediction.answers.iter().enumerate() {
        println!("{}. {} (score: {:.3})", i + 1, answer.answer, answer.score);
        println!("   source: {}", answer.document);
        println!("   context: {}", answer.context.replace('\n', " "));
    }
    Ok(())
}
