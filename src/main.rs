//! CLI entry point for tabserve.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Query engine and HTTP API for interactive exploration of tabular data
#[derive(Debug, Parser)]
#[command(name = "tabserve", version, about)]
struct Cli {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:8000")]
    listen: SocketAddr,

    /// Directory where uploaded files are stored
    #[arg(short, long, default_value = "data")]
    data_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tabserve=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();
    let state = tabserve::server::AppState::new(&cli.data_dir)?;
    tabserve::server::serve(state, cli.listen).await
}
