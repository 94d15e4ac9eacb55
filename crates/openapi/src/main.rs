use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use openapi::{Bridge, ConfigError, RouteConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tether-openapi")]
#[command(about = "Serve a REST API as MCP tools over stdio", long_about = None)]
#[command(version)]
struct Cli {
    /// Route table
    #[arg(short, long, default_value = "routes.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_logging();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr; stdout carries the protocol.
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[derive(Debug, thiserror::Error)]
enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Mcp(#[from] mcp::Error),
}

async fn run() -> Result<(), Error> {
    let cli = Cli::parse();
    let config = RouteConfig::load(&cli.config)?;
    info!(
        config = %cli.config.display(),
        base_url = %config.base_url,
        tools = config.tools.len(),
        "starting"
    );
    let bridge = Bridge::new(config)?;
    mcp::serve_stdio(&bridge).await?;
    Ok(())
}
