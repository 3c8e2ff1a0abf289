//! Crank CLI — the main entry point.
//!
//! Commands:
//! - `onboard` — Initialize config
//! - `run`     — Run the agent on a single prompt
//! - `chat`    — Interactive chat session
//! - `models`  — List models available from the configured provider

use clap::{Parser, Subcommand};

mod commands;
mod runtime;

#[derive(Parser)]
#[command(
    name = "crank",
    about = "Crank — agentic tool-use runtime",
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
    /// Initialize configuration
    Onboard,

    /// Run the agent on a single prompt
    Run {
        /// The instruction for the agent
        prompt: String,

        /// Skip all approval prompts (every tool is allowed)
        #[arg(long)]
        yolo: bool,
    },

    /// Interactive chat session
    Chat {
        /// Skip all approval prompts (every tool is allowed)
        #[arg(long)]
        yolo: bool,
    },

    /// List models available from the configured provider
    Models,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Run { prompt, yolo } => commands::run::run(&prompt, yolo).await?,
        Commands::Chat { yolo } => commands::chat::run(yolo).await?,
        Commands::Models => commands::models::run().await?,
    }

    Ok(())
}
