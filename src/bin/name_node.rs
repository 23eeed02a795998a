//! name_node - DFScore metadata coordination process
//!
//! Serves the client/follower RPC surface, tracks storage node liveness
//! over the heartbeat WebSocket, and runs disaster recovery for any
//! storage node that stops heartbeating.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dfscore::config::DfsConfig;
use dfscore::error::{Error, Result};
use dfscore::id::SnowflakeGenerator;
use dfscore::nameservice::{router, ClusterState, MasterService};
use dfscore::store::DocumentStore;

#[derive(Parser)]
#[command(name = "name_node")]
#[command(about = "Run a DFScore name node", long_about = None)]
struct Cli {
    /// Path to the JSON configuration file shared across the cluster.
    #[arg(short, long, default_value = "dfscore.json")]
    config: PathBuf,

    /// This name node's short name, as it appears in `namenodes_setting`.
    #[arg(long)]
    id: String,

    /// Directory the local document store keeps its database file under.
    #[arg(long, default_value = "./namenode-data")]
    data_dir: PathBuf,

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
        .namenodes_setting
        .get(&cli.id)
        .ok_or_else(|| Error::Config(format!("no namenodes_setting entry for '{}'", cli.id)))?
        .clone();

    if config.replica_set > config.datanodes.len() {
        tracing::error!(
            replica_set = config.replica_set,
            datanodes = config.datanodes.len(),
            "replica_set exceeds the configured storage node count, halting"
        );
        return Err(Error::Config("replica_set > len(datanodes)".into()));
    }

    let store = Arc::new(DocumentStore::open(&cli.data_dir)?);
    store.bootstrap().await?;

    let cluster = Arc::new(ClusterState::new());
    let node_id = SnowflakeGenerator::parse_node_id(&cli.id);

    let followers: Vec<String> = config
        .namenodes_setting
        .iter()
        .filter(|(name, _)| **name != cli.id)
        .map(|(_, setting)| format!("http://{}:{}", setting.host, setting.port))
        .collect();

    let service = Arc::new(MasterService::new(
        store,
        cluster,
        config.replica_set,
        config.max_chunk_size,
        followers,
        node_id,
    ));

    let app = router(service);
    let addr = format!("{}:{}", own_setting.host, own_setting.port);
    tracing::info!(%addr, id = %cli.id, "name node listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into());
    tracing_subscriber::registry().with(env_filter).with(tracing_subscriber::fmt::layer()).init();
}
