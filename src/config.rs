//! Configuration types for DFScore
//!
//! The configuration file is JSON (not TOML): spec.md's external
//! interfaces mandate a JSON schema, shared verbatim between name nodes,
//! storage nodes and the client shell.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::Result;

/// Top-level configuration, loaded once at process start by every
/// binary (name node, storage node, client shell).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DfsConfig {
    /// Maximum size in bytes of a single chunk.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,

    /// Maximum number of worker threads used by the client for
    /// concurrent chunk read/write jobs. 0 means "use detected CPU count".
    #[serde(default)]
    pub max_thread_concurrency: usize,

    /// Number of storage nodes (one primary + N-1 secondaries) that
    /// must hold each chunk.
    #[serde(default = "default_replica_set")]
    pub replica_set: usize,

    /// Ordered list of storage node identifiers known to the cluster.
    #[serde(default)]
    pub datanodes: Vec<String>,

    /// Per storage node network/storage settings, keyed by SN identifier.
    #[serde(default)]
    pub datanodes_setting: HashMap<String, DataNodeSetting>,

    /// Per name node network/priority settings, keyed by NN identifier.
    #[serde(default)]
    pub namenodes_setting: HashMap<String, NameNodeSetting>,
}

/// Per-storage-node settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataNodeSetting {
    /// Host the storage node's HTTP surface binds/connects on.
    pub host: String,
    /// Port for the chunk HTTP surface (client<->SN, SN<->SN).
    pub port: u16,
    /// Port for the full-duplex heartbeat WebSocket connection to the master.
    #[serde(default = "default_gencom_port")]
    pub port_gencom: u16,
    /// On-disk directory the storage node stores chunks under.
    #[serde(default = "default_storage_dir")]
    pub storage: String,
}

/// Per-name-node settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameNodeSetting {
    /// Host the name node's RPC surface binds/connects on.
    pub host: String,
    /// Port for the structured RPC surface (client<->NN, NN->follower).
    pub port: u16,
    /// Port the heartbeat WebSocket listener binds on (master role only).
    #[serde(default = "default_heartbeat_port")]
    pub port_heartbeat: u16,
    /// Host/port for this name node's metadata document store, if remote
    /// (most deployments keep the store local to the process; these
    /// fields exist for parity with datanodes_setting's shape).
    #[serde(default)]
    pub host_metadata: Option<String>,
    #[serde(default)]
    pub port_metadata: Option<u16>,
    /// Failover priority: lower value wins when a storage node must pick
    /// the next name node to contact after its current master goes dark.
    #[serde(default)]
    pub priority: u32,
}

fn default_max_chunk_size() -> u64 {
    64 * 1024 * 1024 // 64 MiB
}

fn default_replica_set() -> usize {
    3
}

fn default_gencom_port() -> u16 {
    9600
}

fn default_heartbeat_port() -> u16 {
    9700
}

fn default_storage_dir() -> String {
    "./data".to_string()
}

impl DfsConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DfsConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a JSON file (used by admin tooling / tests).
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Resolve `max_thread_concurrency`, falling back to the detected
    /// CPU count when the configuration leaves it at 0.
    pub fn resolved_thread_concurrency(&self) -> usize {
        if self.max_thread_concurrency > 0 {
            return self.max_thread_concurrency;
        }
        let mut sys = sysinfo::System::new();
        sys.refresh_cpu();
        let n = sys.cpus().len();
        if n > 0 {
            n
        } else {
            4
        }
    }

    /// Look up a storage node's setting, erroring with the same
    /// `StorageNodeNotFound` kind used elsewhere for an unknown SN id.
    pub fn datanode(&self, sn_id: &str) -> Result<&DataNodeSetting> {
        self.datanodes_setting
            .get(sn_id)
            .ok_or_else(|| crate::error::Error::StorageNodeNotFound(sn_id.to_string()))
    }

    /// Name nodes ordered by ascending failover priority (lowest first).
    pub fn namenodes_by_priority(&self) -> Vec<(&String, &NameNodeSetting)> {
        let mut v: Vec<_> = self.namenodes_setting.iter().collect();
        v.sort_by_key(|(_, s)| s.priority);
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_json() {
        let json = r#"{
            "max_chunk_size": 1024,
            "replica_set": 2,
            "datanodes": ["A", "B"],
            "datanodes_setting": {
                "A": {"host": "127.0.0.1", "port": 9000}
            },
            "namenodes_setting": {
                "nn1": {"host": "127.0.0.1", "port": 9100, "priority": 0}
            }
        }"#;
        let cfg: DfsConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.max_chunk_size, 1024);
        assert_eq!(cfg.replica_set, 2);
        assert_eq!(cfg.datanodes_setting["A"].port_gencom, default_gencom_port());
    }

    #[test]
    fn namenodes_sorted_by_priority() {
        let mut cfg_json = serde_json::json!({
            "datanodes": [],
            "namenodes_setting": {
                "b": {"host": "h", "port": 1, "priority": 2},
                "a": {"host": "h", "port": 1, "priority": 1}
            }
        });
        let cfg: DfsConfig = serde_json::from_value(cfg_json.take()).unwrap();
        let ordered = cfg.namenodes_by_priority();
        assert_eq!(ordered[0].0, "a");
        assert_eq!(ordered[1].0, "b");
    }
}
