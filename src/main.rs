//! # crawl-sieve CLI (`sieve`)
//!
//! ## Usage
//!
//! ```bash
//! sieve --config ./config/sieve.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sieve init` | Create the SQLite database and run schema migrations |
//! | `sieve run` | Fetch, dedup, classify and store every enabled source |
//! | `sieve sources` | List configured sources and whether they resolve |
//! | `sieve check` | Probe the LLM service, database and dedup store |
//! | `sieve get <id>` | Show one stored item |
//! | `sieve items` | List stored items |
//! | `sieve stats` | Row counts for the item store |
//! | `sieve dedup status <source>` | Show a source's dedup records |
//! | `sieve dedup clear <source> --yes` | Delete a source's dedup records |
//! | `sieve serve` | Start the read-only status server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use crawl_sieve::config::{self, Config};
use crawl_sieve::controller::Controller;
use crawl_sieve::llm::OllamaClient;
use crawl_sieve::repository::{ItemFilter, Repository, SqliteRepository};
use crawl_sieve::traits::ComponentRegistry;
use crawl_sieve::{get, logging, server, sources, stats, tracker};

/// crawl-sieve: fetch items from configured sources, drop the ones already
/// seen, classify the rest with a local LLM and store the results.
#[derive(Parser)]
#[command(name = "sieve", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/sieve.toml")]
    config: PathBuf,

    /// Override `logging.level`.
    #[arg(long, global = true, value_parser = ["trace", "debug", "info", "warn", "error"])]
    log_level: Option<String>,

    /// Do not use the dedup store; dedup against the database only.
    #[arg(long, global = true)]
    no_redis: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Run every enabled source once.
    ///
    /// Exits with status 1 when any item errored or any source failed.
    Run {
        /// Print the run report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List configured sources and the registered components.
    Sources,

    /// Check connectivity to the LLM service, database and dedup store.
    Check,

    /// Show one stored item.
    Get {
        /// Item id.
        id: String,

        #[arg(long)]
        json: bool,
    },

    /// List stored items, newest first.
    Items {
        /// Only processed (`true`) or unprocessed (`false`) items.
        #[arg(long)]
        processed: Option<bool>,

        /// Only items whose verdict passed (`true`) or did not (`false`).
        #[arg(long)]
        passed: Option<bool>,

        #[arg(long, default_value_t = 20)]
        limit: i64,

        #[arg(long, default_value_t = 0)]
        offset: i64,

        #[arg(long)]
        json: bool,
    },

    /// Row counts for the item store.
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Inspect or reset per-source dedup records.
    Dedup {
        #[command(subcommand)]
        action: DedupAction,
    },

    /// Start the read-only status server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum DedupAction {
    /// Show how many ids are recorded and the last one.
    Status {
        /// Source name (the dedup namespace).
        source: String,
    },
    /// Delete every dedup record for a source. Irreversible.
    Clear {
        source: String,

        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let mut cfg = config::load_config(&cli.config)?;
    if let Some(level) = &cli.log_level {
        cfg.logging.level = level.clone();
    }
    if cli.no_redis {
        cfg.dedup.url = None;
    }
    logging::init(&cfg.logging)?;

    match cli.command {
        Commands::Init => {
            let repo = SqliteRepository::connect(&cfg.db).await?;
            repo.close().await;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Run { json } => {
            let errors = run_pipeline(cfg, json).await?;
            if errors > 0 {
                std::process::exit(1);
            }
        }
        Commands::Sources => {
            sources::list_sources(&cfg, &ComponentRegistry::with_builtins())?;
        }
        Commands::Check => {
            if !sources::run_check(&cfg, !cli.no_redis).await? {
                std::process::exit(1);
            }
        }
        Commands::Get { id, json } => {
            if let Err(e) = get::run_get(&cfg, &id, json).await {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Items {
            processed,
            passed,
            limit,
            offset,
            json,
        } => {
            let filter = ItemFilter {
                processed,
                passed,
                limit: Some(limit),
                offset: Some(offset),
            };
            get::run_items(&cfg, &filter, json).await?;
        }
        Commands::Stats { json } => {
            stats::run_stats(&cfg, json).await?;
        }
        Commands::Dedup { action } => {
            run_dedup(&cfg, action).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

/// Run all sources and print the report. Returns the error count.
async fn run_pipeline(cfg: Config, json: bool) -> anyhow::Result<u64> {
    let gateway = Arc::new(OllamaClient::new(&cfg.llm)?);
    let store = tracker::connect_store(cfg.dedup.url.as_deref()).await;
    let controller = Controller::new(cfg, ComponentRegistry::with_builtins(), gateway, store);

    let report = controller.run_all().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report.to_json())?);
    } else {
        report.print_table();
    }
    Ok(report.error_count())
}

async fn run_dedup(cfg: &Config, action: DedupAction) -> anyhow::Result<()> {
    let (source, clear, confirmed) = match action {
        DedupAction::Status { source } => (source, false, false),
        DedupAction::Clear { source, yes } => (source, true, yes),
    };

    if cfg.source(&source).is_none() {
        anyhow::bail!("unknown source '{}'", source);
    }
    let Some(store) = tracker::connect_store(cfg.dedup.url.as_deref()).await else {
        anyhow::bail!("dedup store is not configured or unreachable");
    };
    let tracker = tracker::ProcessedTracker::new(source.clone(), Some(store));

    if clear {
        if !confirmed {
            anyhow::bail!(
                "refusing to clear dedup records for '{}' without --yes",
                source
            );
        }
        if !tracker.clear().await {
            anyhow::bail!("failed to clear dedup records for '{}'", source);
        }
        println!("cleared dedup records for {}", source);
        return Ok(());
    }

    println!("source:            {}", source);
    println!("processed ids:     {}", tracker.processed_count().await);
    println!(
        "last processed id: {}",
        tracker
            .last_processed_id()
            .await
            .unwrap_or_else(|| "-".to_string())
    );
    Ok(())
}
