//! Grove CLI - Command-line interface for Grove
//!
//! Indexes a workspace with bounded memory, keeps it current while
//! watching, and answers search and context queries against it.

use clap::{Parser, Subcommand};
use colored::Colorize;
use grove_watcher::StrategyPreset;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod settings;

#[derive(Parser)]
#[command(name = "grove")]
#[command(author = "Grove Contributors")]
#[command(version)]
#[command(about = "Bounded workspace indexing and change tracking", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize Grove in a workspace
    Init {
        /// Path to initialize (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Scan the workspace and report what was indexed
    Scan {
        /// Path to scan (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Search indexed files by name, path or language
    Search {
        /// Search query
        query: String,

        /// Maximum results to return
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Workspace to search (defaults to current directory)
        #[arg(short, long, default_value = ".")]
        path: PathBuf,
    },

    /// Build a token-bounded context document
    Context {
        /// What the context is for
        query: String,

        /// Files currently being worked on
        #[arg(short, long = "file")]
        files: Vec<PathBuf>,

        /// Token budget (0 = unlimited)
        #[arg(short, long, default_value = "4000")]
        max_tokens: usize,

        /// Workspace (defaults to current directory)
        #[arg(short, long, default_value = ".")]
        path: PathBuf,
    },

    /// Show index and watch status
    Status {
        /// Path to check (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Watch the workspace and print changes until Ctrl+C
    Watch {
        /// Path to watch (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Override the configured strategy
        #[arg(short, long)]
        strategy: Option<StrategyPreset>,
    },

    /// Check index health and memory use
    Doctor {
        /// Path to check (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let result = match cli.command {
        Commands::Init { path } => commands::init(&path),
        Commands::Scan { path } => commands::scan(&path).await,
        Commands::Search { query, limit, path } => commands::search(&path, &query, limit).await,
        Commands::Context {
            query,
            files,
            max_tokens,
            path,
        } => commands::context(&path, &query, &files, max_tokens).await,
        Commands::Status { path, json } => commands::status(&path, json).await,
        Commands::Watch { path, strategy } => commands::watch(&path, strategy).await,
        Commands::Doctor { path } => commands::doctor(&path).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}
