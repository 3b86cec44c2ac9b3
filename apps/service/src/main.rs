use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use uppe_monitor::config::Config;
use uppe_monitor::orchestrator::Orchestrator;
use uppe_monitor::pool;

#[derive(Debug, Parser)]
#[command(version, about = "Self-hosted availability monitoring engine")]
struct Cli {
    /// Config file, created with defaults when missing
    #[arg(short, long, env = "UPPE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_config(cli.config.as_ref())?;

    logger::init_tracing(&config.logging.level);

    info!("Opening database at {}", config.database.path);
    let pool = pool::open_local(&config.database.path, config.database.pool_size).await?;

    Orchestrator::start(config, pool).await
}
