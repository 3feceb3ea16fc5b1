//! CLI commands implementation.

mod inspect;
mod replay;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use ptmanager::transport::Role;

#[derive(Parser)]
#[command(name = "ptctl")]
#[command(about = "Pluggable transport managed proxy tool")]
#[command(version)]
pub struct Cli {
    /// Config file (TOML, YAML, or JSON)
    #[arg(short, long, global = true, env = "PTMANAGER_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Feed helper output through a managed proxy and print the result
    Replay {
        /// Proxy role (server or client)
        #[arg(short, long)]
        role: Role,
        /// Transports requested from the helper (repeatable)
        #[arg(short, long = "transport", required = true)]
        transports: Vec<String>,
        /// Durable state file (in-memory state if omitted)
        #[arg(long)]
        state: Option<PathBuf>,
        /// Label attached to PT_LOG and PT_STATUS events
        #[arg(short, long, default_value = "replay")]
        label: String,
        /// Print the final proxy snapshot as JSON
        #[arg(long)]
        json: bool,
        /// Helper output to read (stdin if omitted)
        input: Option<PathBuf>,
    },

    /// Print the server transport options string for a set of transports
    Options {
        /// Transports to filter for (repeatable)
        #[arg(short, long = "transport", required = true)]
        transports: Vec<String>,
    },

    /// Print the upstream proxy URI handed to client helpers
    ProxyUri,

    /// Print the environment a helper would be launched with
    Env {
        /// Proxy role (server or client)
        #[arg(short, long)]
        role: Role,
        /// Transports requested from the helper (repeatable)
        #[arg(short, long = "transport", required = true)]
        transports: Vec<String>,
        /// Durable state file (configured default if omitted)
        #[arg(long)]
        state: Option<PathBuf>,
    },
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = super::helpers::load_config(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Replay {
            role,
            transports,
            state,
            label,
            json,
            input,
        } => {
            replay::cmd_replay(
                &config,
                role,
                &transports,
                state.as_deref(),
                &label,
                input.as_deref(),
                json,
            )
            .await
        }
        Commands::Options { transports } => inspect::cmd_options(&config, &transports),
        Commands::ProxyUri => inspect::cmd_proxy_uri(&config),
        Commands::Env {
            role,
            transports,
            state,
        } => inspect::cmd_env(&config, role, &transports, state.as_deref()).await,
    }
}
