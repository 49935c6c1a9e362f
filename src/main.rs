//! CLI entry point for the GBFS exporter.
//!
//! `serve` polls every configured provider on an interval and exposes the
//! vehicle counts on `/metrics`; `count` runs a single round; `list-feeds`
//! shows what a provider's discovery document advertises.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use gbfs_exporter::{
    config::ProviderSource,
    exporter,
    fetch::{BasicClient, fetch_json},
    gbfs::Discovery,
    ingest::Ingestor,
    logging, output,
    server::{self, AppState},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "gbfs_exporter")]
#[command(about = "Publishes GBFS bike availability as Prometheus metrics", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ProviderArgs {
    /// JSON file listing providers; defaults to provider{N}_region/_url env vars
    #[arg(long, env = "GBFS_PROVIDERS_FILE")]
    providers_file: Option<PathBuf>,

    /// Per-request timeout for upstream feeds, in seconds
    #[arg(long, env = "GBFS_HTTP_TIMEOUT_SECS", default_value_t = 30)]
    http_timeout_secs: u64,
}

impl ProviderArgs {
    fn ingestor(&self) -> Result<Ingestor<BasicClient>> {
        let client = BasicClient::with_timeout(Duration::from_secs(self.http_timeout_secs))?;
        let source = ProviderSource::from_option(self.providers_file.clone());
        Ok(Ingestor::new(client, source))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Poll providers periodically and serve /metrics
    Serve {
        /// Address to bind the HTTP server to
        #[arg(short, long, env = "GBFS_LISTEN", default_value = "0.0.0.0:8080")]
        listen: String,

        /// Seconds to wait between ingestion rounds
        #[arg(short, long, env = "GBFS_INTERVAL_SECS", default_value_t = 300)]
        interval_secs: u64,

        /// Optional CSV file to append every provider sample to
        #[arg(long)]
        record: Option<PathBuf>,

        #[command(flatten)]
        providers: ProviderArgs,
    },
    /// Run a single ingestion round and print the counts
    Count {
        /// Optional CSV file to append results to
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        providers: ProviderArgs,
    },
    /// List the sub-feeds advertised by a GBFS discovery document
    ListFeeds {
        /// URL of the provider's gbfs.json
        #[arg(value_name = "URL")]
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    let _log_guard = logging::init()?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            listen,
            interval_secs,
            record,
            providers,
        } => {
            let mut ingestor = providers.ingestor()?;
            if let Some(path) = record {
                ingestor = ingestor.with_record(path);
            }
            let ingestor = Arc::new(ingestor);
            let metrics = exporter::install()?;

            tokio::spawn(
                ingestor
                    .clone()
                    .run_forever(Duration::from_secs(interval_secs)),
            );

            let listener = TcpListener::bind(&listen).await?;
            let state = AppState { ingestor, metrics };
            server::serve(listener, state, shutdown_signal()).await?;
        }
        Commands::Count {
            output: csv_path,
            providers,
        } => {
            let report = providers.ingestor()?.collect().await?;
            output::log_report(&report);

            if let Some(path) = csv_path {
                output::append_report(&path, &report)?;
            }
        }
        Commands::ListFeeds { url } => {
            let client = BasicClient::new()?;
            let discovery: Discovery = fetch_json(&client, &url).await?;

            for feed in discovery.feeds() {
                info!(name = %feed.name, url = %feed.url, "Feed");
            }

            match discovery.vehicle_status_url(&url) {
                Ok(status_url) => info!(
                    version = discovery.version.as_deref().unwrap_or("unknown"),
                    feeds = discovery.feeds().len(),
                    status_url,
                    "Discovery summary"
                ),
                Err(e) => warn!(error = %e, "Provider has no vehicle status feed"),
            }
        }
    }

    Ok(())
}

/// Resolves on Ctrl-C.
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("Failed to listen for Ctrl-C, shutting down");
    }
    info!("Shutdown signal received");
}
