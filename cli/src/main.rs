//! wsbus CLI: run a demo server or client from the terminal.
//!
//! # Commands
//! ```
//! wsbus serve   [--bind 127.0.0.1:45626] [--path /ws] [--poll-secs 10]
//! wsbus connect [--url ws://127.0.0.1:45626/ws]
//! wsbus version
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod catalog;
mod cmd_connect;
mod cmd_serve;
mod config;
mod logging;

use config::AppConfig;

#[derive(Parser)]
#[command(
    name = "wsbus",
    about = "Typed push and request/response messaging over one WebSocket",
    version
)]
struct Cli {
    /// JSON config file (bus, client, server and log sections, all optional)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Global log level, overriding the config file
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit JSON structured logs
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the demo server
    Serve {
        /// Socket address to bind
        #[arg(long)]
        bind: Option<String>,
        /// Route serving the WebSocket upgrade
        #[arg(long)]
        path: Option<String>,
        /// Seconds between status pushes and user-agent broadcasts
        #[arg(long, default_value_t = 10)]
        poll_secs: u64,
    },

    /// Run the demo client
    Connect {
        /// Server endpoint
        #[arg(long)]
        url: Option<String>,
    },

    /// Print version
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.log.level = level;
    }
    if cli.json_logs {
        config.log.json = true;
    }
    logging::init_tracing(&config.log);

    match cli.command {
        Commands::Serve { bind, path, poll_secs } => {
            let mut server = config.server;
            if let Some(bind) = bind {
                server.bind = bind;
            }
            if let Some(path) = path {
                server.path = path;
            }
            cmd_serve::run(config.bus, server, Duration::from_secs(poll_secs.max(1))).await
        }

        Commands::Connect { url } => {
            let mut client = config.client;
            if let Some(url) = url {
                client.url = url;
            }
            cmd_connect::run(config.bus, client).await
        }

        Commands::Version => {
            println!("wsbus {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
