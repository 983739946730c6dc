//! Tides CLI, the main entry point.
//!
//! Commands:
//! - `onboard`       Write the default config
//! - `gateway`       Start the HTTP gateway
//! - `chat`          Talk to the concierge from the terminal
//! - `seed-package`  Log a delivery at the front desk

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "tides",
    about = "Tides: voice concierge for residential buildings",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration
    Onboard,

    /// Start the HTTP gateway server
    Gateway {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Chat with the concierge
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Conversation to continue (history is loaded and recorded)
        #[arg(short, long)]
        session: Option<String>,

        /// The resident's unit
        #[arg(short, long)]
        unit: Option<String>,

        /// Reply language (en, es)
        #[arg(short, long)]
        language: Option<String>,
    },

    /// Log a pending package for a unit
    SeedPackage {
        #[arg(long)]
        unit: String,

        #[arg(long)]
        courier: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Gateway { port } => commands::gateway::run(port).await?,
        Commands::Chat {
            message,
            session,
            unit,
            language,
        } => {
            commands::chat::run(commands::chat::ChatArgs {
                message,
                session,
                unit,
                language,
                verbose: cli.verbose,
            })
            .await?
        }
        Commands::SeedPackage { unit, courier } => commands::seed::run(&unit, &courier).await?,
    }

    Ok(())
}
