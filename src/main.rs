use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use scrivener::config::ScrivenerConfig;
use scrivener::steno::records::SessionKind;
use scrivener::{db, fleet, graph, intake, server, steno, store, supervisor};

#[derive(Parser)]
#[command(
    name = "scrivener",
    version,
    about = "Session transcription and long-term memory pipeline for AI CLI sessions"
)]
struct Cli {
    /// Path to the config file (default: ~/.scrivener/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Tail one session file and emit verbatim exchanges
    Steno {
        /// Session file to watch
        #[arg(long)]
        session: PathBuf,
        /// Session format: claude or gemini (default: inferred from extension)
        #[arg(long)]
        source: Option<String>,
        /// Run one pass and exit
        #[arg(long)]
        once: bool,
    },
    /// Maintain one stenographer per active session
    Supervise {
        /// Run one cycle and exit
        #[arg(long)]
        once: bool,
    },
    /// Enrich captured exchanges (keywords, sentiment, summary)
    Intake {
        /// Run one pass and exit
        #[arg(long)]
        once: bool,
    },
    /// Persist enriched records into the memory store
    Persist {
        /// Run one pass and exit
        #[arg(long)]
        once: bool,
    },
    /// Backfill embeddings on rows missing them
    Fleet {
        /// Run one pass and exit
        #[arg(long)]
        once: bool,
    },
    /// Rebuild the graph view from the memory store
    Graph {
        /// Run one rebuild and exit
        #[arg(long)]
        once: bool,
        /// Skip the similarity-edge pass
        #[arg(long)]
        skip_similarity: bool,
    },
    /// Serve the HTTP query surface
    Serve,
    /// Print namespace statistics
    Stats,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load config before anything else; a bad config is exit code 2.
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            return ExitCode::from(2);
        }
    };

    // Log to stderr so stdout stays clean for command output.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "fatal");
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<ScrivenerConfig> {
    match &cli.config {
        Some(path) => {
            anyhow::ensure!(path.exists(), "config file not found: {}", path.display());
            ScrivenerConfig::load_from(path)
        }
        None => ScrivenerConfig::load(),
    }
}

async fn run(cli: Cli, config: ScrivenerConfig) -> Result<()> {
    match cli.command {
        Command::Steno {
            session,
            source,
            once,
        } => {
            let kind = source
                .map(|s| {
                    s.parse::<SessionKind>()
                        .map_err(|e| anyhow::anyhow!(e))
                })
                .transpose()?;
            steno::run(&config, session, kind, once).await
        }
        Command::Supervise { once } => supervisor::run(&config, once).await,
        Command::Intake { once } => intake::run_intake(&config, once).await,
        Command::Persist { once } => intake::run_persist(&config, once).await,
        Command::Fleet { once } => fleet::run_fleet(&config, once).await,
        Command::Graph {
            once,
            skip_similarity,
        } => graph::run_graph(&config, once, skip_similarity).await,
        Command::Serve => server::serve(config).await,
        Command::Stats => stats(&config),
    }
}

/// Print per-namespace counts to stdout.
fn stats(config: &ScrivenerConfig) -> Result<()> {
    let conn = db::open_database(config.resolved_db_path(), config.store.embedding_dim)?;
    let stats = store::search::namespaces(&conn)?;
    let total = store::search::count(&conn)?;

    if stats.is_empty() {
        println!("No memories stored yet.");
        return Ok(());
    }

    println!("{:<24} {:>10}  {:<25} {:<25}", "NAMESPACE", "COUNT", "FIRST", "LAST");
    for ns in &stats {
        println!(
            "{:<24} {:>10}  {:<25} {:<25}",
            ns.namespace, ns.count, ns.first_entry, ns.last_entry
        );
    }
    println!("\n{total} memories across {} namespaces", stats.len());
    Ok(())
}
