//! Crate-level integration tests.
//!
//! Each test spins up real `MasterService`/`StorageNodeService` instances
//! (document store and chunk store on tempdirs, storage nodes served over
//! real `127.0.0.1` HTTP listeners) and drives them through one literal
//! end-to-end scenario.

use std::collections::HashMap;
use std::sync::Arc;

use dfscore::client::{election, workers};
use dfscore::config::{DataNodeSetting, DfsConfig};
use dfscore::error::Error;
use dfscore::model::{decode_sn_key, Mode, User};
use dfscore::nameservice::{ClusterState, MasterService};
use dfscore::storagenode::{router as sn_router, ChunkStore, MasterAddress, StorageNodeService};
use dfscore::store::DocumentStore;

/// Starts a storage node's HTTP surface on an ephemeral localhost port
/// and returns its `"127.0.0.1:PORT"` address.
async fn spawn_storage_node(id: &str) -> (String, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let chunks = ChunkStore::open(dir.path()).await.unwrap();
    let master = Arc::new(MasterAddress::new(vec![]));
    let service = Arc::new(StorageNodeService::new(id.to_string(), chunks, master));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, sn_router(service)).await.unwrap();
    });
    (addr.to_string(), dir)
}

/// Opens a fresh name node (tempdir-backed document store, bootstrapped)
/// with an empty cluster the caller can heartbeat storage nodes into
/// before building the `MasterService`.
async fn fresh_store() -> (Arc<DocumentStore>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(DocumentStore::open(dir.path()).unwrap());
    store.bootstrap().await.unwrap();
    (store, dir)
}

fn root_user() -> User {
    User::new("root", "root")
}

#[tokio::test]
async fn write_read_roundtrip_across_three_storage_nodes() {
    let (sn_a, _a) = spawn_storage_node("A").await;
    let (sn_b, _b) = spawn_storage_node("B").await;
    let (sn_c, _c) = spawn_storage_node("C").await;

    let (store, _nn_dir) = fresh_store().await;
    let cluster = Arc::new(ClusterState::new());
    for sn in [&sn_a, &sn_b, &sn_c] {
        cluster.record_heartbeat(sn).await;
    }
    let master = MasterService::new(store, cluster, 2, 4, vec![], 1);

    let user = root_user();
    let payload = b"HELLOWORLD".to_vec();
    let (file, placements) = master.put_file(&user, "/hello.txt", payload.len() as u64).await.unwrap();
    assert_eq!(file.chunk_count(), 3); // ceil(10/4) = 3

    let http = reqwest::Client::new();
    let chunk_names = file.ordered_chunk_names();
    let write_jobs: Vec<workers::WriteJob> = chunk_names
        .iter()
        .zip(placements.iter())
        .enumerate()
        .map(|(seq, (chunk_name, placement))| {
            let start = seq * 4;
            let end = (start + 4).min(payload.len());
            workers::WriteJob {
                primary: placement.primary.clone(),
                chunk_name: chunk_name.clone(),
                payload: payload[start..end].to_vec(),
                secondaries: placement.secondaries.clone(),
            }
        })
        .collect();
    workers::run_writes(http.clone(), write_jobs, 4).await;

    let read_jobs: Vec<workers::ReadJob> = chunk_names
        .iter()
        .enumerate()
        .map(|(seq, chunk_name)| {
            let primary = decode_sn_key(&file.chunks_bkp[chunk_name]);
            let mut nodes = vec![primary];
            nodes.extend(file.replicas[chunk_name].clone());
            workers::ReadJob { nodes, chunk_name: chunk_name.clone(), sequence: seq }
        })
        .collect();
    let assembled = workers::run_reads(http, read_jobs, 4).await.unwrap();
    assert_eq!(assembled, payload);
}

#[tokio::test]
async fn head_and_tail_respect_chunk_boundaries() {
    let (sn_a, _a) = spawn_storage_node("A").await;
    let (sn_b, _b) = spawn_storage_node("B").await;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(DocumentStore::open(dir.path()).unwrap());
    store.bootstrap().await.unwrap();
    let cluster = Arc::new(ClusterState::new());
    cluster.record_heartbeat(&sn_a).await;
    cluster.record_heartbeat(&sn_b).await;
    let master = MasterService::new(store, cluster, 1, 4, vec![], 1);

    let user = root_user();
    let payload = b"abcdefghij".to_vec(); // 10 bytes, chunk_size 4 -> 3 chunks: 4/4/2
    let (file, placements) = master.put_file(&user, "/lines.txt", payload.len() as u64).await.unwrap();
    let chunk_names = file.ordered_chunk_names();

    let http = reqwest::Client::new();
    let write_jobs: Vec<workers::WriteJob> = chunk_names
        .iter()
        .zip(placements.iter())
        .enumerate()
        .map(|(seq, (chunk_name, placement))| {
            let start = seq * 4;
            let end = (start + 4).min(payload.len());
            workers::WriteJob {
                primary: placement.primary.clone(),
                chunk_name: chunk_name.clone(),
                payload: payload[start..end].to_vec(),
                secondaries: placement.secondaries.clone(),
            }
        })
        .collect();
    workers::run_writes(http.clone(), write_jobs, 2).await;

    // "head -n 4" only needs the first chunk.
    let first_job = workers::ReadJob {
        nodes: vec![decode_sn_key(&file.chunks_bkp[&chunk_names[0]])],
        chunk_name: chunk_names[0].clone(),
        sequence: 0,
    };
    let head = workers::run_reads(http.clone(), vec![first_job], 1).await.unwrap();
    assert_eq!(&head[..4], b"abcd");

    // "tail -n 2" only needs the last (short) chunk.
    let last_job = workers::ReadJob {
        nodes: vec![decode_sn_key(&file.chunks_bkp[&chunk_names[2]])],
        chunk_name: chunk_names[2].clone(),
        sequence: 0,
    };
    let tail = workers::run_reads(http, vec![last_job], 1).await.unwrap();
    assert_eq!(tail, b"ij");
}

#[tokio::test]
async fn dead_storage_node_triggers_reassignment_then_recovery_clears() {
    use dfscore::nameservice::recovery::{flush_trash, recover_dead_node};

    let dir = tempfile::tempdir().unwrap();
    let store = DocumentStore::open(dir.path()).unwrap();
    store.bootstrap().await.unwrap();
    let cluster = Arc::new(ClusterState::new());

    cluster.record_heartbeat("A").await;
    cluster.record_heartbeat("B").await;
    cluster.record_heartbeat("C").await;

    let master = MasterService::new(Arc::new(store), cluster.clone(), 2, 4, vec![], 1);
    let user = root_user();
    let (file, _placements) = master.put_file(&user, "/replicated.bin", 4).await.unwrap();
    assert_eq!(file.chunk_count(), 1);

    // Re-derive a store handle pointing at the same sqlite file to run recovery
    // against exactly what put_file committed (MasterService owns the first Arc).
    let store2 = DocumentStore::open(dir.path()).unwrap();
    let chunk = file.ordered_chunk_names().remove(0);
    let dead = decode_sn_key(&file.chunks_bkp[&chunk]);

    let http = reqwest::Client::new();
    recover_dead_node(&store2, &cluster, &dead, 2, &http, &[]).await.unwrap();
    let rebalanced = store2.get_file(&file.id).await.unwrap().unwrap();
    assert!(!rebalanced.involved_storage_nodes().contains(&dead));

    // Flushing the dead node's trash converges its displaced-chunk list to empty.
    flush_trash(&store2, &dead, &http, &[]).await.unwrap();
    assert!(store2.trash_for(&dead).await.unwrap().is_empty());
}

#[tokio::test]
async fn permission_denied_without_required_mode_bits() {
    let (store, _dir) = fresh_store().await;
    let cluster = Arc::new(ClusterState::new());
    cluster.record_heartbeat("A").await;
    let master = MasterService::new(store, cluster, 1, 64, vec![], 1);

    let root = root_user();
    master.useradd(&root, "alice", "secret").await.unwrap();
    master.groupadd(&root, "outsiders").await.unwrap();
    master.mkdir(&root, "/private", false).await.unwrap();
    master.chmod(&root, "/private", Mode::new(7, 0, 0)).await.unwrap();

    let alice = User::new("alice", "alice");
    let err = master.mkdir(&alice, "/private/nested", false).await.unwrap_err();
    assert!(matches!(err, Error::AccessDenied(_)));

    // root is never blocked by mode bits.
    master.mkdir(&root, "/private/nested", false).await.unwrap();

    // admin verbs require root outright, regardless of path permissions.
    let err = master.useradd(&alice, "mallory", "pw").await.unwrap_err();
    assert!(matches!(err, Error::RootNecessary));
}

#[tokio::test]
async fn quorum_master_discovery_resolves_by_majority_with_first_occurrence_tiebreak() {
    async fn fake_master_endpoint(reply: Option<&str>) -> String {
        let reply = reply.map(|s| s.to_string());
        let app = axum::Router::new().route(
            "/master",
            axum::routing::get(move || {
                let reply = reply.clone();
                async move { axum::Json(serde_json::json!({ "master": reply })) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    let n1 = fake_master_endpoint(Some("http://10.0.0.1:9000")).await;
    let n2 = fake_master_endpoint(Some("http://10.0.0.2:9000")).await;
    let n3 = fake_master_endpoint(Some("http://10.0.0.1:9000")).await;

    let mut datanodes_setting = HashMap::new();
    for (idx, addr) in [n1, n2, n3].iter().enumerate() {
        let (host, port) = addr.split_once(':').unwrap();
        datanodes_setting.insert(
            format!("sn{idx}"),
            DataNodeSetting {
                host: host.to_string(),
                port: port.parse().unwrap(),
                port_gencom: 0,
                storage: "./unused".to_string(),
            },
        );
    }
    let config = DfsConfig {
        max_chunk_size: 64,
        max_thread_concurrency: 1,
        replica_set: 1,
        datanodes: vec![],
        datanodes_setting,
        namenodes_setting: HashMap::new(),
    };

    let http = reqwest::Client::new();
    let winner = election::elect_master(&config, &http).await.unwrap();
    assert_eq!(winner, "http://10.0.0.1:9000");
}

#[tokio::test]
async fn election_with_no_reachable_storage_nodes_reports_no_master() {
    let config = DfsConfig {
        max_chunk_size: 64,
        max_thread_concurrency: 1,
        replica_set: 1,
        datanodes: vec![],
        datanodes_setting: {
            let mut m = HashMap::new();
            m.insert(
                "sn0".to_string(),
                DataNodeSetting {
                    host: "127.0.0.1".to_string(),
                    port: 1, // nothing listens on port 1
                    port_gencom: 0,
                    storage: "./unused".to_string(),
                },
            );
            m
        },
        namenodes_setting: HashMap::new(),
    };
    let http = reqwest::Client::new();
    let err = election::elect_master(&config, &http).await.unwrap_err();
    assert!(matches!(err, Error::NoMaster));
}
