//! HookClaw CLI — the main entry point.
//!
//! Commands:
//! - `onboard` — Write the default config and create the workspace
//! - `agent`   — Interactive chat or single-message mode
//! - `config`  — Print the resolved configuration

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "hookclaw",
    about = "HookClaw — a hook-policed AI agent for the terminal",
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
    /// Write the default configuration and create the workspace
    Onboard,

    /// Chat with the AI agent
    Agent {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Session key (`channel:chat_id`)
        #[arg(short, long, default_value = "cli:direct")]
        session: String,
    },

    /// Print the resolved configuration (API key redacted)
    Config,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Agent { message, session } => commands::agent::run(message, session).await?,
        Commands::Config => commands::config_cmd::show().await?,
    }

    Ok(())
}
