//! dfsctl - DFScore client shell
//!
//! Line-oriented: one command per line, `quit` exits. Elects the master
//! name node by quorum over the storage nodes before taking input.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dfscore::client::shell;
use dfscore::config::DfsConfig;
use dfscore::error::Result;

#[derive(Parser)]
#[command(name = "dfsctl")]
#[command(about = "DFScore client shell", long_about = None)]
struct Cli {
    /// Path to the JSON configuration file shared across the cluster.
    #[arg(short, long, default_value = "dfscore.json")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let config = DfsConfig::from_file(&cli.config).map_err(|err| {
        tracing::error!(error = %err, path = ?cli.config, "failed to load configuration");
        err
    })?;

    shell::run(config).await
}

fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into());
    tracing_subscriber::registry().with(env_filter).with(tracing_subscriber::fmt::layer()).init();
}
