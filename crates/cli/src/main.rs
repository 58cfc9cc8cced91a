//! Planwright CLI — the main entry point.
//!
//! Commands:
//! - `onboard` — Write a default config file
//! - `run`     — Plan and execute one request, streaming its events
//! - `tools`   — List the tools the planner can use
//! - `doctor`  — Check config, backend reachability and tools

use clap::{Parser, Subcommand};
use planwright_config::{AppConfig, LoggingConfig};

mod commands;

#[derive(Parser)]
#[command(
    name = "planwright",
    about = "Planwright — plan-execute agent with confirmation gates",
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
    /// Write a default configuration file
    Onboard,

    /// Plan and execute a request
    Run {
        /// The request
        message: String,

        /// Approve every confirmation without asking
        #[arg(long, conflicts_with = "auto_reject")]
        auto_approve: bool,

        /// Reject every confirmation without asking
        #[arg(long)]
        auto_reject: bool,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// List available tools
    Tools {
        /// Also connect configured MCP servers and list their tools
        #[arg(long)]
        discover: bool,
    },

    /// Diagnose configuration and backend health
    Doctor,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Config errors are reported by the command itself
    let logging = AppConfig::load().map(|c| c.logging).unwrap_or_default();
    init_tracing(&logging, cli.verbose);

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Run {
            message,
            auto_approve,
            auto_reject,
            json,
        } => {
            let mode = if auto_approve {
                commands::run::ConfirmMode::Approve
            } else if auto_reject {
                commands::run::ConfirmMode::Reject
            } else {
                commands::run::ConfirmMode::Ask
            };
            commands::run::run(message, mode, json).await?
        }
        Commands::Tools { discover } => commands::tools::run(discover).await?,
        Commands::Doctor => commands::doctor::run().await?,
    }

    Ok(())
}

/// Logs go to stderr so that `run --json` output stays parseable.
fn init_tracing(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
