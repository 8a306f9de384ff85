//! Signkit Demo CLI
//!
//! Command-line interface for exercising the Signkit engine without a real
//! relay: both parties run in this process over the loopback relay.

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod ui;

#[derive(Parser)]
#[command(name = "signkit-demo")]
#[command(about = "Signkit Demo CLI - Pair, settle and use a session between two local peers", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a dApp and a wallet through the full session lifecycle
    Demo {
        /// JSON engine configuration for the dApp side
        #[arg(short, long)]
        config: Option<String>,

        /// Override the session request timeout (milliseconds)
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Have the wallet reject the proposal instead of approving it
        #[arg(long)]
        reject: bool,
    },

    /// Parse a pairing URI and show its parts
    ParseUri {
        /// URI of the form wc:<topic>@2?relay-protocol=...&symKey=...
        uri: String,
    },

    /// Print the effective engine configuration
    Config {
        /// JSON file to load; defaults are shown when omitted
        #[arg(short, long)]
        path: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("signkit_demo_cli=debug,signkit_engine=debug,signkit_lib=debug")
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("signkit_demo_cli=info,signkit_engine=warn,signkit_lib=warn")
            .init();
    }

    match cli.command {
        Commands::Demo {
            config,
            timeout_ms,
            reject,
        } => {
            commands::demo::run(config.as_deref(), timeout_ms, reject, cli.verbose).await?;
        }
        Commands::ParseUri { uri } => {
            commands::uri::run(&uri, cli.verbose)?;
        }
        Commands::Config { path } => {
            commands::config::run(path.as_deref())?;
        }
    }

    Ok(())
}
