//! storage_node - DFScore chunk storage process
//!
//! Serves the chunk HTTP surface and sends a heartbeat to the current
//! master name node every 2 seconds, failing over across the
//! priority-ordered name node list after 5 consecutive misses.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dfscore::config::DfsConfig;
use dfscore::error::{Error, Result};
use dfscore::storagenode::{heartbeat, router, ChunkStore, MasterAddress, StorageNodeService};

#[derive(Parser)]
#[command(name = "storage_node")]
#[command(about = "Run a DFScore storage node", long_about = None)]
struct Cli {
    /// Path to the JSON configuration file shared across the cluster.
    #[arg(short, long, default_value = "dfscore.json")]
    config: PathBuf,

    /// This storage node's short name, as it appears in `datanodes_setting`.
    #[arg(long)]
    id: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
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

    let own_setting = config
        .datanodes_setting
        .get(&cli.id)
        .ok_or_else(|| Error::Config(format!("no datanodes_setting entry for '{}'", cli.id)))?
        .clone();

    let name_node_candidates: Vec<String> = config
        .namenodes_by_priority()
        .into_iter()
        .map(|(_, setting)| format!("{}:{}", setting.host, setting.port_heartbeat))
        .collect();
    let master = Arc::new(MasterAddress::new(name_node_candidates));

    let chunks = ChunkStore::open(&own_setting.storage).await?;
    let service = Arc::new(StorageNodeService::new(cli.id.clone(), chunks, master.clone()));

    tokio::spawn(heartbeat::run(cli.id.clone(), master));

    let app = router(service);
    let addr = format!("{}:{}", own_setting.host, own_setting.port);
    tracing::info!(%addr, id = %cli.id, "storage node listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into());
    tracing_subscriber::registry().with(env_filter).with(tracing_subscriber::fmt::layer()).init();
}
