//! Learngraph command-line entry point
//!
//! Opens the knowledge graph of a project root, runs one subcommand and
//! shuts the graph down, committing any pending changes.

mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use learngraph_core::KnowledgeGraph;

#[derive(Parser, Debug)]
#[command(name = "learngraph")]
#[command(about = "Inspect and maintain a project's learngraph knowledge store")]
#[command(version)]
struct Args {
    /// Project root holding the data directory (defaults to the current directory)
    #[arg(long, short, global = true)]
    root: Option<PathBuf>,

    /// JSON file with graph configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "learngraph=info,learngraph_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let root = match args.root {
        Some(root) => root,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let config = commands::load_config(args.config.as_deref())?;

    tracing::debug!("Opening knowledge graph under {:?}", root);
    let graph = KnowledgeGraph::open(&root, config)
        .with_context(|| format!("Failed to open knowledge graph under {}", root.display()))?;

    let mut stdout = std::io::stdout().lock();
    let outcome = commands::execute(&graph, args.command, &mut stdout);

    // Shut down even when the command failed so pending work is kept
    let shutdown = graph.shutdown().context("Failed to shut down knowledge graph");
    outcome?;
    shutdown?;
    Ok(())
}
