use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use ws_conn::{FileConfig, JsonHandler, WsConnConfig, load_config, ws_router};

#[derive(Parser)]
#[command(name = "wsconn")]
#[command(about = "Serve supervised JSON WebSocket connections")]
struct Args {
    /// Config file (defaults to ./wsconn.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port for the web server (0 = auto-select)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    let default_directive = if args.debug {
        "wsconn=debug,ws_conn=debug,conc=debug,info"
    } else {
        "wsconn=info,ws_conn=info,conc=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let fc: FileConfig = load_config(args.config.as_deref())
        .extract()
        .context("Failed to load configuration")?;
    let host = args.host.unwrap_or(fc.server.host);
    let port = args.port.unwrap_or(fc.server.port);
    let config = WsConnConfig::from_file(&fc.connection);
    info!(
        ping_secs = config.ping_period.as_secs(),
        pong_secs = config.pong_period.as_secs(),
        "Connection settings"
    );

    let app = ws_router(&fc.server.path, JsonHandler, config);

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("Invalid bind address {host}:{port}"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    let actual_addr = listener.local_addr()?;
    info!("Listening on ws://{}{}", actual_addr, fc.server.path);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
