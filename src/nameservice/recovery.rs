//! Disaster recovery
//!
//! One background task per storage node the master has ever heard from,
//! ticking its countdown at the cadence `ClusterState` prescribes. A
//! countdown reaching zero runs [`recover_dead_node`] once; a recovered
//! node whose countdown is positive again runs [`flush_trash`] once per
//! tick until its trash list is empty. Every rewrite this module makes to
//! the document store is fanned out to the other name nodes exactly as
//! `MasterService`'s own RPC handlers do, and every chunk move/delete it
//! decides on is also pushed to the storage nodes that have to carry it
//! out.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;

use crate::error::Result;
use crate::model::{decode_sn_key, encode_sn_key, File, TrashEntry};
use crate::nameservice::cluster::{ClusterState, Tick};
use crate::nameservice::master::{fanout_batch, file_upsert_record};
use crate::protocol::{MutationBatch, MutationOp, MutationRecord};
use crate::storagenode::server::{RecoveryDeleteForm, RecoveryPutForm};
use crate::store::DocumentStore;

/// Spawns the per-SN countdown task. Runs until the process exits;
/// there is one of these per storage node the master has heard a
/// heartbeat from, started the first time that SN is seen.
pub fn spawn_watch(
    store: Arc<DocumentStore>,
    cluster: Arc<ClusterState>,
    sn_id: String,
    replica_set: usize,
    http: reqwest::Client,
    followers: Vec<String>,
) {
    tokio::spawn(async move {
        loop {
            let interval = cluster.next_tick_interval(&sn_id).await;
            tokio::time::sleep(interval).await;
            match cluster.tick(&sn_id).await {
                Tick::StillLive => {}
                Tick::AlreadyDead => {}
                Tick::JustDied => {
                    tracing::warn!(sn = %sn_id, "storage node declared dead, running recovery");
                    if let Err(err) = recover_dead_node(&store, &cluster, &sn_id, replica_set, &http, &followers).await {
                        tracing::error!(sn = %sn_id, error = %err, "recovery failed");
                    }
                }
                Tick::ReadyToFlush => {
                    if let Err(err) = flush_trash(&store, &sn_id, &http, &followers).await {
                        tracing::error!(sn = %sn_id, error = %err, "trash flush failed");
                    } else {
                        cluster.clear_recovered(&sn_id).await;
                    }
                }
            }
        }
    });
}

/// Every chunk for which `dead_sn` was primary gets its first secondary
/// promoted to primary; every chunk for which it was a secondary gets a
/// replacement secondary drawn at random from the remaining live nodes.
/// Each rewritten file record (and the trash entries it creates) is
/// fanned out to the other name nodes, and each newly assigned secondary
/// is pushed its chunk by the node that already holds it. If fewer than
/// `replica_set` storage nodes are currently live, the cluster can't
/// possibly re-establish full replication, so this logs and backs off
/// without touching anything.
pub async fn recover_dead_node(
    store: &DocumentStore,
    cluster: &ClusterState,
    dead_sn: &str,
    replica_set: usize,
    http: &reqwest::Client,
    followers: &[String],
) -> Result<()> {
    let live_excluding_dead: Vec<String> = cluster
        .live_nodes()
        .await
        .into_iter()
        .filter(|n| n != dead_sn)
        .collect();

    if live_excluding_dead.len() < replica_set {
        tracing::error!(
            sn = %dead_sn,
            live = live_excluding_dead.len(),
            replica_set,
            "too few storage nodes live to safely recover, backing off"
        );
        tokio::time::sleep(Duration::from_secs(10)).await;
        return Ok(());
    }

    let dead_key = encode_sn_key(dead_sn);
    let mut batch = MutationBatch::new();
    // new_primary (already holds the chunk) -> "chunk:new_secondary" pairs to push.
    let mut pushes: HashMap<String, Vec<String>> = HashMap::new();
    let mut touched_files = Vec::new();

    for file_id in store.list_file_ids().await? {
        let Some(mut file) = store.get_file(&file_id).await? else { continue };
        let mut changed = false;
        let mut new_trash = Vec::new();

        if let Some(primary_chunks) = file.chunks.remove(&dead_key) {
            for chunk in primary_chunks {
                let secondaries = file.replicas.get(&chunk).cloned().unwrap_or_default();
                let (new_primary, mut remaining) = match secondaries.split_first() {
                    Some((first, rest)) => (first.clone(), rest.to_vec()),
                    None => continue,
                };
                if remaining.is_empty() {
                    if let Some(pick) = pick_replacement(&live_excluding_dead, &new_primary, &[]) {
                        pushes.entry(new_primary.clone()).or_default().push(format!("{chunk}:{pick}"));
                        remaining.push(pick);
                    }
                }
                reassign_chunk(&mut file, &chunk, &new_primary, &remaining);
                new_trash.push(chunk);
                changed = true;
            }
        }

        if let Some(secondary_chunks) = file.replicas_bkp.remove(&dead_key) {
            for chunk in secondary_chunks {
                let primary = file.chunks_bkp.get(&chunk).map(|k| decode_sn_key(k));
                let Some(primary) = primary else { continue };
                let mut secondaries: Vec<String> =
                    file.replicas.get(&chunk).cloned().unwrap_or_default().into_iter().filter(|s| s != dead_sn).collect();
                if let Some(pick) = pick_replacement(&live_excluding_dead, &primary, &secondaries) {
                    pushes.entry(primary.clone()).or_default().push(format!("{chunk}:{pick}"));
                    secondaries.push(pick);
                }
                reassign_chunk(&mut file, &chunk, &primary, &secondaries);
                new_trash.push(chunk);
                changed = true;
            }
        }

        if changed {
            store.put_file(&file).await?;
            batch.push(file_upsert_record(&file));
            for chunk in new_trash {
                let entry = TrashEntry { storage_node: dead_sn.to_string(), chunk_name: chunk };
                store.add_trash(&entry).await?;
                batch.push(trash_insert_record(&entry));
            }
            touched_files.push(file.id.clone());
        }
    }

    fanout_batch(http, followers, batch).await;

    for (new_primary, moves) in pushes {
        let url = format!("http://{new_primary}/recovery");
        let form = RecoveryPutForm { moves: moves.join(",") };
        if let Err(err) = http.put(&url).form(&form).send().await {
            tracing::warn!(new_primary = %new_primary, error = %err, "recovery push to new primary failed");
        }
    }

    tracing::info!(sn = %dead_sn, files_rebalanced = touched_files.len(), "recovery complete");
    Ok(())
}

/// Remove every trace of `chunk` from `file`'s four maps, then re-place
/// it under `new_primary`/`new_secondaries`.
fn reassign_chunk(file: &mut File, chunk: &str, new_primary: &str, new_secondaries: &[String]) {
    for list in file.chunks.values_mut() {
        list.retain(|c| c != chunk);
    }
    file.chunks.retain(|_, list| !list.is_empty());
    for list in file.replicas_bkp.values_mut() {
        list.retain(|c| c != chunk);
    }
    file.replicas_bkp.retain(|_, list| !list.is_empty());
    file.chunks_bkp.remove(chunk);
    file.replicas.remove(chunk);
    file.place_chunk(chunk.to_string(), new_primary, new_secondaries);
}

fn pick_replacement(live: &[String], primary: &str, existing_secondaries: &[String]) -> Option<String> {
    let excluded: HashSet<&str> = std::iter::once(primary).chain(existing_secondaries.iter().map(|s| s.as_str())).collect();
    let candidates: Vec<&String> = live.iter().filter(|n| !excluded.contains(n.as_str())).collect();
    candidates.choose(&mut rand::thread_rng()).map(|s| s.to_string())
}

fn trash_insert_record(entry: &TrashEntry) -> MutationRecord {
    let payload = serde_json::to_value(entry).expect("TrashEntry always serializes");
    MutationRecord {
        op: MutationOp::Insert,
        collection: "trash".into(),
        selector: format!("{}/{}", entry.storage_node, entry.chunk_name),
        payload,
    }
}

fn trash_delete_record(entry: &TrashEntry) -> MutationRecord {
    let payload = serde_json::to_value(entry).expect("TrashEntry always serializes");
    MutationRecord {
        op: MutationOp::Delete,
        collection: "trash".into(),
        selector: format!("{}/{}", entry.storage_node, entry.chunk_name),
        payload,
    }
}

/// Deletes every chunk in `sn_id`'s trash list (displaced when it was
/// marked dead) and clears the list, converging trash to empty. Before
/// touching the local store, instructs `sn_id` itself (now back online,
/// still holding the stale copies) to delete those chunk files.
pub async fn flush_trash(store: &DocumentStore, sn_id: &str, http: &reqwest::Client, followers: &[String]) -> Result<()> {
    let chunks = store.trash_for(sn_id).await?;
    if chunks.is_empty() {
        return Ok(());
    }

    let url = format!("http://{sn_id}/recovery");
    let form = RecoveryDeleteForm { chunks: chunks.join(",") };
    if let Err(err) = http.delete(&url).form(&form).send().await {
        tracing::warn!(sn = %sn_id, error = %err, "recovery delete on returning node failed");
    }

    let mut batch = MutationBatch::new();
    for chunk in chunks {
        let entry = TrashEntry { storage_node: sn_id.to_string(), chunk_name: chunk };
        store.remove_trash(&entry).await?;
        batch.push(trash_delete_record(&entry));
    }
    fanout_batch(http, followers, batch).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::chunk_name;

    async fn store_with_file(primary: &str, secondary: &str) -> (DocumentStore, File) {
        let store = DocumentStore::open_in_memory().unwrap();
        store.bootstrap().await.unwrap();
        let mut file = File::new("1", "a.bin", "0", "root", "root");
        file.place_chunk(chunk_name("1", 0), primary, &[secondary.to_string()]);
        store.put_file(&file).await.unwrap();
        (store, file)
    }

    #[tokio::test]
    async fn dead_primary_promotes_its_secondary() {
        let (store, _file) = store_with_file("A", "B").await;
        let cluster = ClusterState::new();
        cluster.record_heartbeat("B").await;
        cluster.record_heartbeat("C").await;
        let http = reqwest::Client::new();
        recover_dead_node(&store, &cluster, "A", 2, &http, &[]).await.unwrap();
        let updated = store.get_file("1").await.unwrap().unwrap();
        assert_eq!(updated.chunks_bkp["1_0"], encode_sn_key("B"));
    }

    #[tokio::test]
    async fn dead_secondary_is_replaced_from_live_nodes() {
        let (store, _file) = store_with_file("A", "B").await;
        let cluster = ClusterState::new();
        cluster.record_heartbeat("A").await;
        cluster.record_heartbeat("C").await;
        let http = reqwest::Client::new();
        recover_dead_node(&store, &cluster, "B", 2, &http, &[]).await.unwrap();
        let updated = store.get_file("1").await.unwrap().unwrap();
        assert_eq!(updated.chunks_bkp["1_0"], encode_sn_key("A"));
        assert_eq!(updated.replicas["1_0"], vec!["C".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_holds_off_when_too_few_nodes_are_live() {
        let (store, file) = store_with_file("A", "B").await;
        let cluster = ClusterState::new();
        cluster.record_heartbeat("B").await;
        let http = reqwest::Client::new();
        recover_dead_node(&store, &cluster, "A", 2, &http, &[]).await.unwrap();
        let untouched = store.get_file(&file.id).await.unwrap().unwrap();
        assert_eq!(untouched.chunks_bkp["1_0"], encode_sn_key("A"));
    }

    #[tokio::test]
    async fn trash_flush_empties_the_list() {
        let store = DocumentStore::open_in_memory().unwrap();
        store.bootstrap().await.unwrap();
        store.add_trash(&TrashEntry { storage_node: "B".into(), chunk_name: "1_0".into() }).await.unwrap();
        let http = reqwest::Client::new();
        flush_trash(&store, "B", &http, &[]).await.unwrap();
        assert!(store.trash_for("B").await.unwrap().is_empty());
    }
}
