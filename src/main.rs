//! Griq Tunnel Client
//!
//! A CLI tool for exposing a local HTTP service to the public internet.
//!
//! The client holds a persistent WebSocket connection to a Griq relay,
//! registers the local port (and optionally a custom subdomain), and serves
//! the HTTP requests the relay forwards over that connection.

#![deny(clippy::correctness)]
#![warn(clippy::suspicious)]
#![warn(clippy::style)]
#![warn(clippy::complexity)]
#![warn(clippy::perf)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use url::Url;

mod client;
mod config;
mod error;
mod protocol;

use client::TunnelClient;
use config::Config;

#[derive(Parser, Debug)]
#[command(name = "griq")]
#[command(author, version, about = "Expose local services through a Griq tunnel")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Expose a local HTTP server
    Http(HttpArgs),
}

#[derive(Parser, Debug)]
struct HttpArgs {
    /// Local port to expose
    port: u16,

    /// Custom subdomain
    #[arg(short, long)]
    subdomain: Option<String>,

    /// Tunnel relay URL
    #[arg(short, long, env = "GRIQ_URL")]
    url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Http(args) => run_http(args).await,
    }
}

async fn run_http(args: HttpArgs) -> Result<()> {
    let config = Config::load();
    let relay_url = config::resolve_relay_url(args.url, &config);

    Url::parse(&relay_url).with_context(|| format!("Invalid relay URL: {}", relay_url))?;
    info!("Using server URL: {}", relay_url);

    // Ctrl-C unwinds the client from whatever state it is in.
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            signal_token.cancel();
        }
    });

    let mut tunnel = TunnelClient::new(args.port, args.subdomain, relay_url);
    tunnel
        .run(shutdown)
        .await
        .context("Tunnel client failed")?;

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
