//! scrape-agent
//!
//! Connects to a controller over WebSocket and serves fetch commands until
//! the connection ends. There is no reconnection: exit status 1 tells the
//! supervisor the session errored.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use scrape_agent::config::{Config, FetchConfig};
use scrape_agent::fetch::HttpFetcher;
use scrape_agent::session::SessionState;

#[derive(Parser, Debug)]
#[command(name = "scrape-agent")]
#[command(about = "Remotely-controlled fetch agent")]
struct Args {
    /// Controller endpoint (ws:// or wss://)
    #[arg(long)]
    endpoint: Option<String>,

    /// Agent context sent in the init handshake
    #[arg(long)]
    context: Option<String>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Frame separator character
    #[arg(long)]
    separator: Option<char>,

    /// Per-fetch timeout in seconds
    #[arg(long)]
    fetch_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };

        if let Some(endpoint) = self.endpoint {
            config.endpoint = Some(endpoint);
        }
        if let Some(context) = self.context {
            config.context = context;
        }
        if let Some(separator) = self.separator {
            config.separator = separator;
        }
        if let Some(seconds) = self.fetch_timeout {
            config.fetch.timeout_seconds = Some(seconds);
        }
        config.fetch = config.fetch.or(FetchConfig::from_env());

        Ok(config)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging (stderr, RUST_LOG overrides --log-level)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(SessionState::Closed) => {
            info!("Exiting cleanly");
            ExitCode::SUCCESS
        }
        Ok(state) => {
            error!(%state, "Session did not close cleanly");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<SessionState> {
    let config = args.into_config().context("Failed to load configuration")?;
    info!(
        endpoint = ?config.endpoint,
        context = %config.context,
        "Loaded configuration"
    );

    let fetcher = HttpFetcher::new(&config.fetch).context("Failed to build HTTP client")?;
    scrape_agent::agent::serve(&config, fetcher).await
}
