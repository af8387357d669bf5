//! # ragbase CLI (`rag`)
//!
//! The `rag` binary manages local knowledge bases: creating them, ingesting
//! documents, keeping them in sync with their source files, and answering
//! retrieval queries.
//!
//! ## Usage
//!
//! ```bash
//! rag --config ./config/ragbase.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rag init` | Create the catalog database and run schema migrations |
//! | `rag create <kb>` | Create a knowledge base |
//! | `rag ingest <kb> <paths>...` | Ingest files or directories |
//! | `rag update <kb>` | Re-check tracked documents against their sources |
//! | `rag query <kb> "<question>"` | Retrieve ranked chunks and assembled context |
//! | `rag list` | List knowledge bases |
//! | `rag info <kb>` | Show one knowledge base in detail |
//! | `rag delete <kb>` | Delete a knowledge base and its index |
//! | `rag delete-doc <kb> <id>` | Delete a single document |
//! | `rag reembed <kb>` | Rebuild the vector index with the current provider |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use ragbase::config;
use ragbase::db;
use ragbase::embedding;
use ragbase::manager::KnowledgeBaseManager;
use ragbase::migrate;
use ragbase::models::{IngestOutcome, IngestReport, KnowledgeBaseInfo};

/// ragbase: a local retrieval-augmented knowledge base.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ragbase.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "rag",
    about = "ragbase: ingest documents into local knowledge bases and query them",
    version,
    long_about = "ragbase ingests PDF, TXT, Markdown, and DOCX documents into named \
    knowledge bases: text is chunked with overlap, embedded through a configurable \
    provider with a content-addressed cache, and indexed for cosine-similarity \
    retrieval. Queries return ranked chunks plus a bounded context block."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragbase.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the catalog database.
    ///
    /// Creates the storage root, the SQLite catalog, and all required
    /// tables. Idempotent, so running it multiple times is safe.
    Init,

    /// Create a new knowledge base.
    ///
    /// Records the configured embedding model and dimensionality; these are
    /// fixed for the life of the knowledge base (until `reembed`).
    Create {
        /// Knowledge base name.
        name: String,

        /// Human-readable description.
        #[arg(short, long, default_value = "")]
        description: String,
    },

    /// Ingest files or directories into a knowledge base.
    ///
    /// Directories are walked recursively and filtered to supported
    /// extensions (pdf, txt, md, docx). Files whose content is already in
    /// the knowledge base are skipped. One bad file never aborts the batch;
    /// the per-document report is printed at the end.
    Ingest {
        /// Knowledge base name.
        name: String,

        /// Files and/or directories to ingest.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Re-check tracked documents against their source files.
    ///
    /// Unchanged files are skipped, changed files replace their old
    /// document, and missing sources follow the configured stale policy
    /// (`keep` or `flag`). With paths given, only documents at or under
    /// those paths are checked.
    Update {
        /// Knowledge base name.
        name: String,

        /// Restrict the re-scan to these files or directories.
        paths: Vec<PathBuf>,
    },

    /// Query a knowledge base.
    ///
    /// Embeds the question, ranks chunks by cosine similarity, filters by
    /// the similarity threshold, and prints the hits plus an assembled
    /// context block that fits the context budget.
    Query {
        /// Knowledge base name.
        name: String,

        /// The question text.
        text: String,

        /// Maximum number of chunks to retrieve (default from config).
        #[arg(long)]
        top_k: Option<usize>,

        /// Context budget in characters (default from config).
        #[arg(long)]
        max_context: Option<usize>,
    },

    /// List all knowledge bases.
    List,

    /// Show one knowledge base in detail.
    Info {
        /// Knowledge base name.
        name: String,
    },

    /// Delete a knowledge base, its documents, and its index file.
    Delete {
        /// Knowledge base name.
        name: String,
    },

    /// Delete a single document and its chunks.
    #[command(name = "delete-doc")]
    DeleteDoc {
        /// Knowledge base name.
        name: String,

        /// Document id (hex content hash, as shown by ingest).
        document_id: String,
    },

    /// Rebuild the vector index with the currently configured provider.
    ///
    /// Re-embeds every chunk under a new index generation and swaps the
    /// index file atomically. Useful after switching embedding models.
    Reembed {
        /// Knowledge base name.
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    if let Commands::Init = cli.command {
        let pool = db::connect(&cfg).await?;
        migrate::run_migrations(&pool).await?;
        pool.close().await;
        println!("Catalog initialized at {}", cfg.storage.catalog_path().display());
        return Ok(());
    }

    let provider = embedding::create_provider(&cfg.embedding)?;
    let manager = KnowledgeBaseManager::open(cfg, provider).await?;

    match cli.command {
        Commands::Init => unreachable!(),
        Commands::Create { name, description } => {
            let info = manager.create(&name, &description).await?;
            println!("create {}", info.name);
            println!("  model: {} ({} dims)", info.embedding_model, info.dims);
            println!("ok");
        }
        Commands::Ingest { name, paths } => {
            let report = manager.ingest(&name, &paths).await?;
            print_report("ingest", &name, &report);
        }
        Commands::Update { name, paths } => {
            let report = manager.update(&name, &paths).await?;
            print_report("update", &name, &report);
        }
        Commands::Query {
            name,
            text,
            top_k,
            max_context,
        } => {
            let result = manager.query(&name, &text, top_k, max_context).await?;
            if result.hits.is_empty() {
                println!("no results above the similarity threshold");
                return Ok(());
            }
            for (rank, hit) in result.hits.iter().enumerate() {
                println!(
                    "{}. [{:.3}] {} (chunk {})",
                    rank + 1,
                    hit.score,
                    hit.source_path,
                    hit.chunk.chunk_index
                );
                println!("   {}", snippet(&hit.chunk.text, 160));
            }
            println!();
            println!("--- context ({} chars) ---", result.context.chars().count());
            println!("{}", result.context);
        }
        Commands::List => {
            let infos = manager.list().await?;
            if infos.is_empty() {
                println!("no knowledge bases");
                return Ok(());
            }
            for info in infos {
                println!(
                    "{}  {} docs, {} chunks  [{}]",
                    info.name, info.document_count, info.chunk_count, info.embedding_model
                );
            }
        }
        Commands::Info { name } => {
            let info = manager.info(&name).await?;
            print_info(&info);
            let docs = manager.documents(&name).await?;
            if !docs.is_empty() {
                println!("  documents:");
                for doc in docs {
                    println!(
                        "    {}  {} ({} chunks, {}){}",
                        short_id(&doc.id),
                        doc.source_path,
                        doc.chunk_count,
                        doc.format,
                        if doc.stale { "  [stale]" } else { "" }
                    );
                }
            }
        }
        Commands::Delete { name } => {
            manager.delete(&name).await?;
            println!("deleted knowledge base '{}'", name);
        }
        Commands::DeleteDoc { name, document_id } => {
            manager.delete_document(&name, &document_id).await?;
            println!("deleted document {} from '{}'", document_id, name);
        }
        Commands::Reembed { name } => {
            let info = manager.reembed(&name).await?;
            println!("reembed {}", info.name);
            println!("  model: {} ({} dims)", info.embedding_model, info.dims);
            println!("  generation: {}", info.index_generation);
            println!("  chunks: {}", info.chunk_count);
            println!("ok");
        }
    }

    Ok(())
}

fn print_report(verb: &str, name: &str, report: &IngestReport) {
    println!("{} {}", verb, name);
    println!("  ingested: {} documents", report.ingested());
    println!("  skipped (unchanged/duplicate): {}", report.skipped());
    if report.missing() > 0 {
        println!("  missing sources: {}", report.missing());
    }
    println!("  failed: {}", report.failed());
    for outcome in &report.outcomes {
        match outcome {
            IngestOutcome::Ingested {
                path,
                document_id,
                chunks,
            } => {
                println!("  + {} ({} chunks, id {})", path.display(), chunks, short_id(document_id));
            }
            IngestOutcome::SkippedDuplicate { path, .. } => {
                println!("  = {}", path.display());
            }
            IngestOutcome::SourceMissing { path, flagged, .. } => {
                let note = if *flagged {
                    "source missing, marked stale"
                } else {
                    "source missing, kept"
                };
                println!("  ? {} ({})", path.display(), note);
            }
            IngestOutcome::Failed { path, kind, reason } => {
                println!("  ! {}: {}: {}", path.display(), kind, reason);
            }
        }
    }
    println!("ok");
}

fn print_info(info: &KnowledgeBaseInfo) {
    println!("{}", info.name);
    if !info.description.is_empty() {
        println!("  description: {}", info.description);
    }
    println!("  model: {} ({} dims)", info.embedding_model, info.dims);
    println!("  generation: {}", info.index_generation);
    println!("  documents: {}", info.document_count);
    println!("  chunks: {}", info.chunk_count);
    println!("  created: {}", info.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  updated: {}", info.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
}

/// First line of a chunk, truncated on a char boundary.
fn snippet(text: &str, max_chars: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() <= max_chars {
        line.to_string()
    } else {
        let cut: String = line.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

fn short_id(id: &str) -> &str {
    &id[..id.len().min(12)]
}
