//! Subcommand implementations
//!
//! Every command prints pretty JSON to the given writer.

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use serde::Serialize;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use learngraph_core::{GraphConfig, KnowledgeGraph, LearnEvent, NodeType, QueryOptions};

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Learn from an event (a JSON file, or `-` for stdin)
    Learn { input: String },

    /// Print a node by ID
    Get { id: String },

    /// Ranked query over stored nodes
    Query {
        /// Case-insensitive text to look for in summaries and details
        #[arg(long)]
        text: Option<String>,

        /// Only nodes attached to this file
        #[arg(long)]
        file: Option<String>,

        /// Restrict to a node type (repeatable)
        #[arg(long = "type")]
        types: Vec<NodeType>,

        #[arg(long)]
        min_weight: Option<f32>,

        /// Only nodes created at or after this unix timestamp
        #[arg(long)]
        since: Option<i64>,

        #[arg(long)]
        limit: Option<usize>,

        /// Hops of related edges to include
        #[arg(long, default_value_t = 0)]
        depth: usize,
    },

    /// Commit pending changes
    Commit {
        #[arg(short, long)]
        message: String,
    },

    /// Move head to an earlier delta
    Rollback { hash: String },

    /// Show deltas reachable from head, newest first
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Print graph counters
    Stats,

    /// Export the whole graph as JSON
    Export {
        /// Write to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Replace the graph with an exported snapshot
    Import { file: PathBuf },

    /// Remove weak nodes that have not been used for a while
    Prune {
        /// Weight below which nodes are candidates (defaults to config)
        #[arg(long)]
        threshold: Option<f32>,

        /// Days without use before a node is a candidate (defaults to config)
        #[arg(long)]
        days: Option<i64>,
    },
}

/// Read graph configuration from a JSON file, or use defaults
pub fn load_config(path: Option<&Path>) -> Result<GraphConfig> {
    let Some(path) = path else {
        return Ok(GraphConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid config {}", path.display()))
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(input).with_context(|| format!("Failed to read {}", input))
}

fn print_json<T: Serialize>(out: &mut dyn Write, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

pub fn execute(graph: &KnowledgeGraph, command: Command, out: &mut dyn Write) -> Result<()> {
    match command {
        Command::Learn { input } => {
            let event: LearnEvent =
                serde_json::from_str(&read_input(&input)?).context("Malformed event")?;
            let ids = graph.learn_all(&event)?;
            tracing::info!("Learned {} node(s) from '{}' event", ids.len(), event.kind);
            print_json(out, &ids)
        }
        Command::Get { id } => match graph.get_node(&id) {
            Some(node) => print_json(out, &node),
            None => bail!("Node {} not found", id),
        },
        Command::Query {
            text,
            file,
            types,
            min_weight,
            since,
            limit,
            depth,
        } => {
            let options = QueryOptions {
                text,
                file,
                types,
                min_weight,
                since,
                limit,
                depth,
            };
            print_json(out, &graph.query(&options))
        }
        Command::Commit { message } => {
            let hash = graph.commit(&message)?;
            if hash.is_none() {
                tracing::info!("Nothing to commit");
            }
            print_json(out, &hash)
        }
        Command::Rollback { hash } => {
            if !graph.rollback(&hash)? {
                bail!("Unknown delta {}", hash);
            }
            print_json(out, &graph.stats())
        }
        Command::History { limit } => print_json(out, &graph.get_history(limit)),
        Command::Stats => print_json(out, &graph.stats()),
        Command::Export { out: path } => {
            let Some(snapshot) = graph.export() else {
                bail!("Knowledge graph is not initialized");
            };
            match path {
                Some(path) => {
                    let json = serde_json::to_string_pretty(&snapshot)?;
                    std::fs::write(&path, json)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    tracing::info!("Exported {} nodes to {}", snapshot.nodes.len(), path.display());
                    print_json(out, &graph.stats())
                }
                None => print_json(out, &snapshot),
            }
        }
        Command::Import { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let data: serde_json::Value = serde_json::from_str(&raw).context("Malformed snapshot")?;
            let Some(stats) = graph.import(data)? else {
                bail!("Knowledge graph is not initialized");
            };
            print_json(out, &stats)
        }
        Command::Prune { threshold, days } => {
            let config = graph.config();
            let threshold = threshold.unwrap_or(config.prune_threshold);
            let days = days.unwrap_or(config.prune_unused_days);
            let removed = graph.prune(threshold, days)?;
            print_json(out, &serde_json::json!({ "removed": removed }))
        }
    }
}
