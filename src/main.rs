//! # Filedex CLI (`filedex`)
//!
//! Commands for initializing the stores, indexing directory trees,
//! searching, summarizing, managing ignore rules, and running the HTTP
//! server.
//!
//! ## Usage
//!
//! ```bash
//! filedex --config ./filedex.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `filedex init` | Create the SQLite database and an empty vector snapshot |
//! | `filedex index [ROOT]...` | Index one or more roots incrementally |
//! | `filedex search "<query>"` | Semantic search over indexed files |
//! | `filedex summarize <path>` | Recursively summarize a document |
//! | `filedex ignore add/remove/list` | Manage ignore rules |
//! | `filedex serve` | Start the JSON HTTP server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinSet;

use filedex::config::{self, Config};
use filedex::embedding::{Embedder, OllamaEmbedder};
use filedex::ignore::PathFilter;
use filedex::indexer::{Durability, IndexReport, Indexer};
use filedex::llm::{Generator, OllamaGenerator};
use filedex::server::{run_server, AppState};
use filedex::store::MetadataStore;
use filedex::vector::VectorIndex;
use filedex::{db, search, summarize};

/// Filedex — incremental semantic indexing of local filesystem trees.
#[derive(Parser)]
#[command(
    name = "filedex",
    about = "Incremental semantic index over local filesystem trees",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./filedex.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema and an empty vector snapshot.
    ///
    /// Idempotent — running it again against existing stores is safe.
    Init,

    /// Index one or more root directories.
    ///
    /// Roots given on the command line override `[indexing].roots` from
    /// the config. Each root gets its own worker; unchanged files are
    /// skipped by content hash.
    Index {
        /// Roots to index; defaults to the configured roots.
        roots: Vec<PathBuf>,

        /// Clear both stores and re-index from scratch.
        #[arg(long)]
        overwrite: bool,

        /// How often to snapshot the vector index during the walk.
        #[arg(long, value_enum)]
        durability: Option<Durability>,
    },

    /// Search indexed files by meaning.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results.
        #[arg(long, default_value_t = 5)]
        top_k: usize,

        /// Restrict results to files under this directory.
        #[arg(long)]
        prefix: Option<PathBuf>,

        /// Score each hit with the LLM (0-100 confidence plus rationale).
        #[arg(long)]
        rank: bool,
    },

    /// Recursively summarize a document down to a token bound.
    Summarize {
        /// Path to a PDF, DOCX, or text file.
        path: PathBuf,

        /// Maximum summary length in tokens.
        #[arg(long)]
        max_tokens: Option<usize>,
    },

    /// Manage ignore rules.
    Ignore {
        #[command(subcommand)]
        action: IgnoreAction,
    },

    /// Start the JSON HTTP server.
    Serve,
}

#[derive(Subcommand)]
enum IgnoreAction {
    /// Ignore a file or directory (directories apply recursively).
    Add { path: PathBuf },
    /// Stop ignoring a path.
    Remove { path: PathBuf },
    /// List all ignore rules.
    List {
        /// Only show file rules under this directory.
        #[arg(long)]
        under: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "filedex=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let (_store, index) = open_stores(&cfg).await?;
            index.read().await.save(&cfg.storage.index_path)?;
            println!("Stores initialized successfully.");
        }

        Commands::Index {
            roots,
            overwrite,
            durability,
        } => {
            let (store, index) = open_stores(&cfg).await?;
            let embedder: Arc<dyn Embedder> = Arc::new(OllamaEmbedder::new(&cfg.embedding)?);
            let indexer = Arc::new(Indexer::new(
                store,
                index,
                embedder,
                cfg.storage.index_path.clone(),
            ));

            let durability = durability.unwrap_or(cfg.indexing.durability);
            let roots = if roots.is_empty() {
                cfg.indexing.roots.clone()
            } else {
                roots
            };
            if roots.is_empty() {
                anyhow::bail!("no roots given and none configured under [indexing]");
            }

            // Clear once before any worker starts; a clear inside one
            // walk would race the others' commits.
            if overwrite {
                indexer.clear_all().await?;
            }

            let mut workers = JoinSet::new();
            for root in roots {
                let indexer = indexer.clone();
                workers.spawn(async move { indexer.index_tree(&root, false, durability).await });
            }

            let mut total = IndexReport::default();
            while let Some(joined) = workers.join_next().await {
                let report = joined??;
                total.indexed += report.indexed;
                total.updated += report.updated;
                total.unchanged += report.unchanged;
                total.skipped += report.skipped;
                total.failed += report.failed;
            }
            println!(
                "Indexed {} new, {} updated, {} unchanged, {} skipped, {} failed.",
                total.indexed, total.updated, total.unchanged, total.skipped, total.failed
            );
        }

        Commands::Search {
            query,
            top_k,
            prefix,
            rank,
        } => {
            let (store, index) = open_stores(&cfg).await?;
            let embedder = OllamaEmbedder::new(&cfg.embedding)?;

            if rank {
                let generator = OllamaGenerator::new(&cfg.llm)?;
                let ranked = search::search_and_rank(
                    &store,
                    &index,
                    &embedder,
                    &generator,
                    &query,
                    top_k,
                    prefix.as_deref(),
                )
                .await?;
                if ranked.is_empty() {
                    println!("No results.");
                }
                for r in ranked {
                    println!("[{:>3}] {}", r.confidence, r.hit.path);
                    if !r.context.is_empty() {
                        println!("      {}", r.context);
                    }
                }
            } else {
                let hits =
                    search::run_search(&store, &index, &embedder, &query, top_k, prefix.as_deref())
                        .await?;
                if hits.is_empty() {
                    println!("No results.");
                }
                for hit in hits {
                    println!("{:>10.4}  {}", hit.distance, hit.path);
                }
            }
        }

        Commands::Summarize { path, max_tokens } => {
            let text = filedex::extract::extract_text(&path)?;
            let mut summarize_cfg = cfg.summarize.clone();
            if let Some(v) = max_tokens {
                summarize_cfg.max_summary_tokens = v;
            }
            let generator = OllamaGenerator::new(&cfg.llm)?;
            let summary =
                summarize::recursive_summarize(&generator, &summarize_cfg, &text).await?;
            println!("{}", summary);
        }

        Commands::Ignore { action } => {
            let (store, _index) = open_stores(&cfg).await?;
            let filter = PathFilter::new(&store);
            match action {
                IgnoreAction::Add { path } => {
                    let canonical = filter.add(&path).await?;
                    println!("Ignoring {}", canonical.display());
                }
                IgnoreAction::Remove { path } => {
                    let removed = filter.remove(&path).await?;
                    if removed == 0 {
                        println!("No rule for that path.");
                    } else {
                        println!("Rule removed.");
                    }
                }
                IgnoreAction::List { under: Some(dir) } => {
                    let dir = std::fs::canonicalize(&dir)?;
                    let paths = store.file_rules_under(&dir.to_string_lossy()).await?;
                    if paths.is_empty() {
                        println!("No file rules under {}.", dir.display());
                    }
                    for path in paths {
                        println!("{}", path);
                    }
                }
                IgnoreAction::List { under: None } => {
                    let rules = store.list_rules().await?;
                    if rules.is_empty() {
                        println!("No ignore rules.");
                    }
                    for rule in rules {
                        println!("{:<9} {}", rule.kind.as_str(), rule.path);
                    }
                }
            }
        }

        Commands::Serve => {
            let (store, index) = open_stores(&cfg).await?;
            let embedder: Arc<dyn Embedder> = Arc::new(OllamaEmbedder::new(&cfg.embedding)?);
            let generator: Arc<dyn Generator> = Arc::new(OllamaGenerator::new(&cfg.llm)?);
            let indexer = Arc::new(Indexer::new(
                store,
                index,
                embedder.clone(),
                cfg.storage.index_path.clone(),
            ));
            let state = AppState::new(Arc::new(cfg), indexer, embedder, generator);
            run_server(state).await?;
        }
    }

    Ok(())
}

/// Open the record store and the vector index together. A missing
/// snapshot file yields a fresh empty index; `init` then writes it out.
async fn open_stores(cfg: &Config) -> anyhow::Result<(MetadataStore, Arc<RwLock<VectorIndex>>)> {
    let pool = db::connect(&cfg.storage.db_path).await?;
    let store = MetadataStore::new(pool);
    store.run_migrations().await?;

    let index = if cfg.storage.index_path.exists() {
        VectorIndex::load(&cfg.storage.index_path, cfg.embedding.dims)?
    } else {
        VectorIndex::new(cfg.embedding.dims)
    };

    Ok((store, Arc::new(RwLock::new(index))))
}
