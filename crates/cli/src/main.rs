//! Switchyard CLI — the main entry point.
//!
//! Commands:
//! - `init`    — Write a default config and create the data directory
//! - `ask`     — Answer one query, or chat interactively
//! - `models`  — List registered models
//! - `gpu`     — Show device memory and which models fit
//! - `usage`   — Summarize recorded generation metrics
//! - `doctor`  — Diagnose configuration and hardware

use clap::{Parser, Subcommand};
use switchyard_core::model::QueryType;

mod commands;

#[derive(Parser)]
#[command(
    name = "switchyard",
    about = "Switchyard — GPU-aware model switching for a local assistant",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init,

    /// Ask a question (interactive when no query is given)
    Ask {
        /// The query; omit to start an interactive session
        query: Option<String>,

        /// Override the estimated difficulty (1-100)
        #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=100))]
        difficulty: Option<u8>,

        /// Override the query type (minimal, chat, explanation, code, reasoning, analysis)
        #[arg(short = 't', long = "type")]
        query_type: Option<String>,

        /// Serve with this model only
        #[arg(short, long)]
        model: Option<String>,

        /// Print the full outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// List registered models
    Models,

    /// Show GPU memory and which models currently fit
    Gpu,

    /// Summarize recorded generation metrics
    Usage {
        /// Show this many most recent generations
        #[arg(short, long, default_value_t = 10)]
        recent: usize,
    },

    /// Diagnose configuration and hardware
    Doctor,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => commands::init::run().await?,
        Commands::Ask {
            query,
            difficulty,
            query_type,
            model,
            json,
        } => {
            let options = commands::ask::AskOptions {
                difficulty,
                query_type: query_type.map(|t| t.parse::<QueryType>()).transpose()?,
                model,
                json,
            };
            commands::ask::run(query, options).await?
        }
        Commands::Models => commands::models::run().await?,
        Commands::Gpu => commands::gpu::run().await?,
        Commands::Usage { recent } => commands::usage::run(recent).await?,
        Commands::Doctor => commands::doctor::run().await?,
    }

    Ok(())
}
