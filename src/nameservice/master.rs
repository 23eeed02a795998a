//! Name node master protocol
//!
//! Every public method here is one RPC verb: resolve the path, check
//! permissions, mutate the local store, build a mutation batch, fan the
//! batch out to followers (best effort, sequential, unretried), then
//! return the result. Local apply always precedes fanout; the client
//! only sees a result after the local apply has committed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::SnowflakeGenerator;
use crate::model::{chunk_name, Directory, File, FsNode, Group, Mode, User};
use crate::nameservice::cluster::ClusterState;
use crate::nameservice::path::{self, Resolved};
use crate::nameservice::recovery;
use crate::permissions::{self, Operation};
use crate::placement::{Placement, PlacementPolicy};
use crate::protocol::{encode_parent, MutationBatch, MutationOp, MutationRecord, RpcFault};
use crate::store::DocumentStore;

/// Fan a batch out to every follower, sequentially, best effort and
/// unretried. Shared by `MasterService::fanout` and by `recovery`,
/// which must fan out its own rewrites under the same guarantee.
pub(crate) async fn fanout_batch(http: &reqwest::Client, followers: &[String], batch: MutationBatch) {
    if batch.is_empty() {
        return;
    }
    for base in followers {
        let url = format!("{base}/rpc/apply_s");
        match http.post(&url).json(&batch).send().await {
            Ok(resp) if resp.status().is_success() => {
                tracing::debug!(follower = %base, "mutation batch applied");
            }
            Ok(resp) => {
                tracing::warn!(follower = %base, status = %resp.status(), "follower rejected mutation batch");
            }
            Err(err) => {
                tracing::warn!(follower = %base, error = %err, "follower unreachable, skipping");
            }
        }
    }
}

pub struct MasterService {
    store: Arc<DocumentStore>,
    placement: PlacementPolicy,
    ids: SnowflakeGenerator,
    cluster: Arc<ClusterState>,
    replica_set: usize,
    chunk_size: u64,
    http: reqwest::Client,
    /// Base RPC URLs of the other name nodes, contacted in configuration order.
    followers: Vec<String>,
    batches_fanned_out: AtomicU64,
}

impl MasterService {
    pub fn new(
        store: Arc<DocumentStore>,
        cluster: Arc<ClusterState>,
        replica_set: usize,
        chunk_size: u64,
        followers: Vec<String>,
        node_id: u16,
    ) -> Self {
        Self {
            store,
            placement: PlacementPolicy::new(replica_set),
            ids: SnowflakeGenerator::new(node_id),
            cluster,
            replica_set,
            chunk_size: chunk_size.max(1),
            http: reqwest::Client::new(),
            followers,
            batches_fanned_out: AtomicU64::new(0),
        }
    }

    pub fn cluster(&self) -> &ClusterState {
        &self.cluster
    }

    pub async fn authenticate(&self, username: &str, password: Option<&str>) -> Result<User> {
        let user = self
            .store
            .get_user(username)
            .await?
            .ok_or_else(|| Error::UserNotFound(username.to_string()))?;
        if let Some(pass) = password {
            if pass != user.password {
                return Err(Error::AccessDenied(username.to_string()));
            }
        }
        Ok(user)
    }

    async fn fanout(&self, batch: MutationBatch) {
        if batch.is_empty() {
            return;
        }
        self.batches_fanned_out.fetch_add(1, Ordering::Relaxed);
        fanout_batch(&self.http, &self.followers, batch).await;
    }

    // ---- directory operations ----

    pub async fn mkdir(&self, user: &User, path: &str, make_parents: bool) -> Result<()> {
        if path::split_path(path)?.is_empty() {
            return Err(Error::AlreadyExists);
        }
        let segments = path::split_path(path)?;
        let mut batch = MutationBatch::new();
        let mut current_id = "0".to_string();
        let mut current = self.root().await?;
        for (depth, seg) in segments.iter().enumerate() {
            if let Some(id) = current.child_dirs.get(seg).cloned() {
                current = self.get_dir(&id).await?;
                current_id = id;
                continue;
            }
            if current.child_files.contains_key(seg) {
                return Err(Error::NotDirectory(seg.clone()));
            }
            if !make_parents && depth != segments.len() - 1 {
                return Err(Error::NotParent(seg.clone()));
            }
            permissions::check_dir(Operation::Mkdir, &[], &current, user)?;
            let new_id = self.ids.generate().to_string();
            let new_dir = Directory::new(&new_id, seg, &current_id, &user.name, &user.main_group);
            current.add_dir(seg, &new_id);
            batch.push(dir_upsert_record(&current));
            batch.push(dir_upsert_record(&new_dir));
            self.store.put_directory(&current).await?;
            self.store.put_directory(&new_dir).await?;
            current_id = new_id;
            current = new_dir;
        }
        self.fanout(batch).await;
        Ok(())
    }

    pub async fn ls(&self, user: &User, path: &str) -> Result<Vec<(String, bool)>> {
        if path::split_path(path)?.is_empty() {
            let root = self.root().await?;
            permissions::check_dir_resource(Operation::List, &[], &root, &root, user)?;
            return Ok(self.list_children(&root));
        }
        let resolved = path::resolve(&self.store, path).await?;
        match &resolved.existing {
            Some(FsNode::Dir(d)) => {
                permissions::check_dir_resource(Operation::List, &resolved.ancestors, &resolved.parent, d, user)?;
                Ok(self.list_children(d))
            }
            Some(FsNode::File(f)) => {
                permissions::check_file(Operation::Read, &resolved.ancestors, &resolved.parent, f, user)?;
                Ok(vec![(f.name.clone(), false)])
            }
            None => Err(Error::NotFound(path.to_string())),
        }
    }

    fn list_children(&self, dir: &Directory) -> Vec<(String, bool)> {
        let mut entries: Vec<(String, bool)> = dir.child_dirs.keys().map(|n| (n.clone(), true)).collect();
        entries.extend(dir.child_files.keys().map(|n| (n.clone(), false)));
        entries.sort();
        entries
    }

    pub async fn rm(&self, user: &User, path: &str) -> Result<()> {
        if path::split_path(path)?.is_empty() {
            return Err(Error::RootDirectory);
        }
        let resolved = path::resolve(&self.store, path).await?;
        let node = resolved.existing.clone().ok_or_else(|| Error::NotFound(path.to_string()))?;
        match node {
            FsNode::File(f) => {
                permissions::check_file(Operation::RemoveFile, &resolved.ancestors, &resolved.parent, &f, user)?;
                self.remove_file_entry(resolved, f).await
            }
            FsNode::Dir(d) => {
                permissions::check_dir_resource(
                    Operation::RemoveDir,
                    &resolved.ancestors,
                    &resolved.parent,
                    &d,
                    user,
                )?;
                if !d.child_dirs.is_empty() || !d.child_files.is_empty() {
                    return Err(Error::NotEmpty);
                }
                self.remove_dir_entry(resolved, d).await
            }
        }
    }

    /// Recursive removal: every descendant is permission-checked
    /// independently; the whole operation fails with
    /// `AccessDeniedAtLeastOne` if any descendant denies.
    pub async fn rmr(&self, user: &User, path: &str) -> Result<()> {
        if path::split_path(path)?.is_empty() {
            return Err(Error::RootDirectory);
        }
        let resolved = path::resolve(&self.store, path).await?;
        let node = resolved.existing.clone().ok_or_else(|| Error::NotFound(path.to_string()))?;
        match node {
            FsNode::File(f) => {
                permissions::check_file(Operation::RemoveFile, &resolved.ancestors, &resolved.parent, &f, user)?;
                return self.remove_file_entry(resolved, f).await;
            }
            FsNode::Dir(d) => {
                permissions::check_dir_resource(
                    Operation::RemoveDir,
                    &resolved.ancestors,
                    &resolved.parent,
                    &d,
                    user,
                )?;
                self.check_descendants_removable(&d, user).await?;
                self.remove_subtree(&d).await?;
                self.remove_dir_entry(resolved, d).await
            }
        }
    }

    async fn check_descendants_removable(&self, dir: &Directory, user: &User) -> Result<()> {
        for (name, id) in &dir.child_files {
            let f = self.get_file(id).await?;
            if permissions::check_file(Operation::RemoveFile, &[], dir, &f, user).is_err() {
                return Err(Error::AccessDeniedAtLeastOne(name.clone()));
            }
        }
        for (name, id) in &dir.child_dirs {
            let child = self.get_dir(id).await?;
            if permissions::check_dir_resource(Operation::RemoveDir, &[], dir, &child, user).is_err() {
                return Err(Error::AccessDeniedAtLeastOne(name.clone()));
            }
            Box::pin(self.check_descendants_removable(&child, user)).await?;
        }
        Ok(())
    }

    async fn remove_subtree(&self, dir: &Directory) -> Result<()> {
        let mut batch = MutationBatch::new();
        for id in dir.child_files.values() {
            batch.push(MutationRecord {
                op: MutationOp::Delete,
                collection: "files".into(),
                selector: id.clone(),
                payload: serde_json::Value::Null,
            });
            self.store.delete_file(id).await?;
        }
        for id in dir.child_dirs.values().cloned().collect::<Vec<_>>() {
            let child = self.get_dir(&id).await?;
            Box::pin(self.remove_subtree(&child)).await?;
            batch.push(MutationRecord {
                op: MutationOp::Delete,
                collection: "directories".into(),
                selector: id.clone(),
                payload: serde_json::Value::Null,
            });
            self.store.delete_directory(&id).await?;
        }
        self.fanout(batch).await;
        Ok(())
    }

    async fn remove_file_entry(&self, resolved: Resolved, file: File) -> Result<()> {
        let mut parent = resolved.parent;
        parent.remove_file(&resolved.name);
        let mut batch = MutationBatch::new();
        batch.push(dir_upsert_record(&parent));
        batch.push(MutationRecord {
            op: MutationOp::Delete,
            collection: "files".into(),
            selector: file.id.clone(),
            payload: serde_json::Value::Null,
        });
        self.store.put_directory(&parent).await?;
        self.store.delete_file(&file.id).await?;
        self.fanout(batch).await;
        Ok(())
    }

    async fn remove_dir_entry(&self, resolved: Resolved, dir: Directory) -> Result<()> {
        let mut parent = resolved.parent;
        parent.remove_dir(&resolved.name);
        let mut batch = MutationBatch::new();
        batch.push(dir_upsert_record(&parent));
        batch.push(MutationRecord {
            op: MutationOp::Delete,
            collection: "directories".into(),
            selector: dir.id.clone(),
            payload: serde_json::Value::Null,
        });
        self.store.put_directory(&parent).await?;
        self.store.delete_directory(&dir.id).await?;
        self.fanout(batch).await;
        Ok(())
    }

    pub async fn mv(&self, user: &User, src: &str, dst: &str) -> Result<()> {
        let src_resolved = path::resolve(&self.store, src).await?;
        let node = src_resolved.existing.clone().ok_or_else(|| Error::NotFound(src.to_string()))?;
        let dst_resolved = path::resolve(&self.store, dst).await?;
        if dst_resolved.existing.is_some() {
            return Err(Error::AlreadyExists);
        }
        match &node {
            FsNode::File(f) => {
                permissions::check_file(Operation::MoveSource, &src_resolved.ancestors, &src_resolved.parent, f, user)?;
            }
            FsNode::Dir(d) => {
                permissions::check_dir_resource(
                    Operation::MoveSource,
                    &src_resolved.ancestors,
                    &src_resolved.parent,
                    d,
                    user,
                )?;
                if path::is_ancestor_of(&self.store, &d.id, &dst_resolved.parent.id).await? {
                    return Err(Error::ItselfSubdir);
                }
            }
        }
        permissions::check_dir(Operation::MoveDest, &dst_resolved.ancestors, &dst_resolved.parent, user)?;

        let mut batch = MutationBatch::new();
        let mut old_parent = src_resolved.parent;
        let mut new_parent = dst_resolved.parent;
        match node {
            FsNode::File(mut f) => {
                old_parent.remove_file(&src_resolved.name);
                f.name = dst_resolved.name.clone();
                f.parent = new_parent.id.clone();
                new_parent.add_file(&dst_resolved.name, &f.id);
                batch.push(file_upsert_record(&f));
                self.store.put_file(&f).await?;
            }
            FsNode::Dir(mut d) => {
                old_parent.remove_dir(&src_resolved.name);
                d.name = dst_resolved.name.clone();
                d.parent = Some(new_parent.id.clone());
                new_parent.add_dir(&dst_resolved.name, &d.id);
                batch.push(dir_upsert_record(&d));
                self.store.put_directory(&d).await?;
            }
        }
        batch.push(dir_upsert_record(&old_parent));
        batch.push(dir_upsert_record(&new_parent));
        self.store.put_directory(&old_parent).await?;
        self.store.put_directory(&new_parent).await?;
        self.fanout(batch).await;
        Ok(())
    }

    /// `cp SRC DST`: registers a new file node whose chunks live on the
    /// same SNs as the source, under mirrored chunk names. Returns the
    /// union of SN identifiers involved, so the client can instruct each
    /// one to duplicate the bytes locally.
    pub async fn cp(&self, user: &User, src: &str, dst: &str) -> Result<Vec<String>> {
        let (src_resolved, src_node) = path::resolve_existing(&self.store, src).await?;
        let src_file = match src_node {
            FsNode::File(f) => f,
            FsNode::Dir(_) => return Err(Error::NotFound(src.to_string())),
        };
        permissions::check_file(Operation::Read, &src_resolved.ancestors, &src_resolved.parent, &src_file, user)?;

        let dst_resolved = path::resolve(&self.store, dst).await?;
        if dst_resolved.existing.is_some() {
            return Err(Error::AlreadyExists);
        }
        permissions::check_dir(Operation::CopyDest, &dst_resolved.ancestors, &dst_resolved.parent, user)?;

        let new_id = self.ids.generate().to_string();
        let mut new_file = File::new(&new_id, &dst_resolved.name, &dst_resolved.parent.id, &user.name, &user.main_group);
        new_file.size = src_file.size;
        for old_chunk in src_file.ordered_chunk_names() {
            let (_, seq) = crate::model::split_chunk_name(&old_chunk).unwrap_or(("", 0));
            let new_chunk = chunk_name(&new_id, seq);
            let primary = crate::model::decode_sn_key(&src_file.chunks_bkp[&old_chunk]);
            let secondaries = src_file.replicas.get(&old_chunk).cloned().unwrap_or_default();
            new_file.place_chunk(new_chunk, &primary, &secondaries);
        }

        let mut parent = dst_resolved.parent;
        parent.add_file(&dst_resolved.name, &new_id);
        let mut batch = MutationBatch::new();
        batch.push(file_upsert_record(&new_file));
        batch.push(dir_upsert_record(&parent));
        self.store.put_file(&new_file).await?;
        self.store.put_directory(&parent).await?;
        self.fanout(batch).await;

        Ok(new_file.involved_storage_nodes())
    }

    pub async fn touch(&self, user: &User, path: &str) -> Result<File> {
        let resolved = path::resolve(&self.store, path).await?;
        if resolved.existing.is_some() {
            return Err(Error::AlreadyExists);
        }
        permissions::check_dir(Operation::Touch, &resolved.ancestors, &resolved.parent, user)?;
        let new_id = self.ids.generate().to_string();
        let file = File::new(&new_id, &resolved.name, &resolved.parent.id, &user.name, &user.main_group);
        let mut parent = resolved.parent;
        parent.add_file(&resolved.name, &new_id);
        let mut batch = MutationBatch::new();
        batch.push(file_upsert_record(&file));
        batch.push(dir_upsert_record(&parent));
        self.store.put_file(&file).await?;
        self.store.put_directory(&parent).await?;
        self.fanout(batch).await;
        Ok(file)
    }

    /// Allocates a new file node sized for `size` bytes and places every
    /// chunk across the currently live SNs before any byte is written.
    pub async fn put_file(&self, user: &User, path: &str, size: u64) -> Result<(File, Vec<Placement>)> {
        let resolved = path::resolve(&self.store, path).await?;
        if resolved.existing.is_some() {
            return Err(Error::AlreadyExists);
        }
        permissions::check_dir(Operation::PutFile, &resolved.ancestors, &resolved.parent, user)?;

        let live = self.cluster.live_nodes().await;
        let chunk_count = (size + self.chunk_size - 1) / self.chunk_size;
        let chunk_count = chunk_count.max(1);
        let placements = self.placement.place_file(&live, chunk_count)?;

        let new_id = self.ids.generate().to_string();
        let mut file = File::new(&new_id, &resolved.name, &resolved.parent.id, &user.name, &user.main_group);
        file.size = size;
        for (seq, placement) in placements.iter().enumerate() {
            file.place_chunk(chunk_name(&new_id, seq as u64), &placement.primary, &placement.secondaries);
        }

        let mut parent = resolved.parent;
        parent.add_file(&resolved.name, &new_id);
        let mut batch = MutationBatch::new();
        batch.push(file_upsert_record(&file));
        batch.push(dir_upsert_record(&parent));
        self.store.put_file(&file).await?;
        self.store.put_directory(&parent).await?;
        self.fanout(batch).await;
        Ok((file, placements))
    }

    pub async fn get_chunks(&self, user: &User, path: &str) -> Result<File> {
        let (resolved, node) = path::resolve_existing(&self.store, path).await?;
        match node {
            FsNode::File(f) => {
                permissions::check_file(Operation::Read, &resolved.ancestors, &resolved.parent, &f, user)?;
                Ok(f)
            }
            FsNode::Dir(_) => Err(Error::NotFound(path.to_string())),
        }
    }

    pub async fn count(&self, user: &User, path: &str) -> Result<u64> {
        let (resolved, node) = path::resolve_existing(&self.store, path).await?;
        let dir = match node {
            FsNode::Dir(d) => d,
            FsNode::File(_) => return Err(Error::NotDirectory(path.to_string())),
        };
        permissions::check_dir_resource(Operation::Count, &resolved.ancestors, &resolved.parent, &dir, user)?;
        Ok((dir.child_dirs.len() + dir.child_files.len()) as u64)
    }

    pub async fn countr(&self, user: &User, path: &str) -> Result<u64> {
        let (resolved, node) = path::resolve_existing(&self.store, path).await?;
        let dir = match node {
            FsNode::Dir(d) => d,
            FsNode::File(_) => return Err(Error::NotDirectory(path.to_string())),
        };
        permissions::check_dir_resource(Operation::Count, &resolved.ancestors, &resolved.parent, &dir, user)?;
        Box::pin(self.count_recursive(&dir)).await
    }

    async fn count_recursive(&self, dir: &Directory) -> Result<u64> {
        let mut total = (dir.child_dirs.len() + dir.child_files.len()) as u64;
        for id in dir.child_dirs.values() {
            let child = self.get_dir(id).await?;
            total += Box::pin(self.count_recursive(&child)).await?;
        }
        Ok(total)
    }

    pub async fn du(&self, user: &User, path: &str) -> Result<u64> {
        let (resolved, node) = path::resolve_existing(&self.store, path).await?;
        match node {
            FsNode::File(f) => {
                permissions::check_file(Operation::Du, &resolved.ancestors, &resolved.parent, &f, user)?;
                Ok(f.size)
            }
            FsNode::Dir(d) => {
                permissions::check_dir_resource(Operation::Du, &resolved.ancestors, &resolved.parent, &d, user)?;
                Box::pin(self.du_recursive(&d)).await
            }
        }
    }

    async fn du_recursive(&self, dir: &Directory) -> Result<u64> {
        let mut total = 0u64;
        for id in dir.child_files.values() {
            total += self.get_file(id).await?.size;
        }
        for id in dir.child_dirs.values() {
            let child = self.get_dir(id).await?;
            total += Box::pin(self.du_recursive(&child)).await?;
        }
        Ok(total)
    }

    pub async fn chmod(&self, user: &User, path: &str, mode: Mode) -> Result<()> {
        let (resolved, node) = path::resolve_existing(&self.store, path).await?;
        permissions::check_dir(Operation::Chmod, &resolved.ancestors, &resolved.parent, user)?;
        match node {
            FsNode::File(mut f) => {
                permissions::check_owner_or_root(&f.owner_user, user)?;
                f.mode = mode;
                self.store.put_file(&f).await?;
                self.apply_and_fanout(file_upsert_record(&f)).await
            }
            FsNode::Dir(mut d) => {
                permissions::check_owner_or_root(&d.owner_user, user)?;
                d.mode = mode;
                self.store.put_directory(&d).await?;
                self.apply_and_fanout(dir_upsert_record(&d)).await
            }
        }
    }

    pub async fn chown(&self, user: &User, path: &str, new_owner: &str) -> Result<()> {
        self.store
            .get_user(new_owner)
            .await?
            .ok_or_else(|| Error::UserNotFound(new_owner.to_string()))?;
        let (resolved, node) = path::resolve_existing(&self.store, path).await?;
        permissions::check_dir(Operation::Chown, &resolved.ancestors, &resolved.parent, user)?;
        match node {
            FsNode::File(mut f) => {
                permissions::check_owner_or_root(&f.owner_user, user)?;
                f.owner_user = new_owner.to_string();
                self.store.put_file(&f).await?;
                self.apply_and_fanout(file_upsert_record(&f)).await
            }
            FsNode::Dir(mut d) => {
                permissions::check_owner_or_root(&d.owner_user, user)?;
                d.owner_user = new_owner.to_string();
                self.store.put_directory(&d).await?;
                self.apply_and_fanout(dir_upsert_record(&d)).await
            }
        }
    }

    pub async fn chgrp(&self, user: &User, path: &str, new_group: &str) -> Result<()> {
        self.store
            .get_group(new_group)
            .await?
            .ok_or_else(|| Error::GroupNotFound(new_group.to_string()))?;
        let (resolved, node) = path::resolve_existing(&self.store, path).await?;
        permissions::check_dir(Operation::Chown, &resolved.ancestors, &resolved.parent, user)?;
        match node {
            FsNode::File(mut f) => {
                permissions::check_owner_or_root(&f.owner_user, user)?;
                f.owner_group = new_group.to_string();
                self.store.put_file(&f).await?;
                self.apply_and_fanout(file_upsert_record(&f)).await
            }
            FsNode::Dir(mut d) => {
                permissions::check_owner_or_root(&d.owner_user, user)?;
                d.owner_group = new_group.to_string();
                self.store.put_directory(&d).await?;
                self.apply_and_fanout(dir_upsert_record(&d)).await
            }
        }
    }

    async fn apply_and_fanout(&self, record: MutationRecord) -> Result<()> {
        let mut batch = MutationBatch::new();
        batch.push(record);
        self.fanout(batch).await;
        Ok(())
    }

    // ---- users & groups ----

    pub async fn useradd(&self, user: &User, name: &str, password: &str) -> Result<()> {
        permissions::require_root(user)?;
        if self.store.get_user(name).await?.is_some() {
            return Err(Error::UserAlreadyExists);
        }
        if self.store.get_group(name).await?.is_some() {
            return Err(Error::GroupAlreadyExists);
        }
        let new_user = User::with_password(name, name, password);
        let new_group = Group::new(name);
        let mut batch = MutationBatch::new();
        batch.push(user_upsert_record(&new_user));
        batch.push(group_upsert_record(&new_group));
        self.store.put_user(&new_user).await?;
        self.store.put_group(&new_group).await?;
        self.fanout(batch).await;
        Ok(())
    }

    pub async fn userdel(&self, user: &User, target: &str) -> Result<()> {
        permissions::require_root(user)?;
        self.store.get_user(target).await?.ok_or_else(|| Error::UserNotFound(target.to_string()))?;
        let mut batch = MutationBatch::new();
        batch.push(MutationRecord {
            op: MutationOp::Delete,
            collection: "users".into(),
            selector: target.to_string(),
            payload: serde_json::Value::Null,
        });
        self.store.delete_user(target).await?;
        self.fanout(batch).await;
        Ok(())
    }

    pub async fn groupadd(&self, user: &User, group: &str) -> Result<()> {
        permissions::require_root(user)?;
        if self.store.get_group(group).await?.is_some() {
            return Err(Error::GroupAlreadyExists);
        }
        let g = Group::new(group);
        self.store.put_group(&g).await?;
        self.apply_and_fanout(group_upsert_record(&g)).await
    }

    pub async fn groupdel(&self, user: &User, group: &str) -> Result<()> {
        permissions::require_root(user)?;
        self.store.get_group(group).await?.ok_or_else(|| Error::GroupNotFound(group.to_string()))?;
        for u in self.store.list_users().await? {
            if u.main_group == group {
                return Err(Error::MainUserGroup(group.to_string()));
            }
        }
        let mut batch = MutationBatch::new();
        batch.push(MutationRecord {
            op: MutationOp::Delete,
            collection: "groups".into(),
            selector: group.to_string(),
            payload: serde_json::Value::Null,
        });
        self.store.delete_group(group).await?;
        self.fanout(batch).await;
        Ok(())
    }

    pub async fn passwd(&self, user: &User, target: &str, new_password: &str) -> Result<()> {
        if user.name != target {
            permissions::require_root(user)?;
        }
        let mut target_user = self
            .store
            .get_user(target)
            .await?
            .ok_or_else(|| Error::UserNotFound(target.to_string()))?;
        target_user.password = new_password.to_string();
        self.store.put_user(&target_user).await?;
        self.apply_and_fanout(user_upsert_record(&target_user)).await
    }

    pub async fn usermod(&self, user: &User, target: &str, groups: &[String], add: bool) -> Result<()> {
        permissions::require_root(user)?;
        let mut target_user = self
            .store
            .get_user(target)
            .await?
            .ok_or_else(|| Error::UserNotFound(target.to_string()))?;
        for g in groups {
            self.store.get_group(g).await?.ok_or_else(|| Error::GroupNotFound(g.clone()))?;
            if add {
                if !target_user.groups.contains(g) {
                    target_user.groups.push(g.clone());
                }
            } else {
                target_user.groups.retain(|existing| existing != g);
            }
        }
        self.store.put_user(&target_user).await?;
        self.apply_and_fanout(user_upsert_record(&target_user)).await
    }

    pub async fn mkfs(&self, user: &User) -> Result<()> {
        permissions::require_root(user)?;
        for u in self.store.list_users().await? {
            self.store.delete_user(&u.name).await?;
        }
        for g in self.store.list_groups().await? {
            self.store.delete_group(&g.name).await?;
        }
        self.store.delete_directory("0").await?;
        self.store.bootstrap().await?;
        tracing::warn!("mkfs: metadata store reinitialized by {}", user.name);
        Ok(())
    }

    pub async fn status(&self, user: &User) -> Result<ClusterStatusReport> {
        permissions::require_root(user)?;
        Ok(ClusterStatusReport {
            is_master: self.cluster.is_master().await,
            live_storage_nodes: self.cluster.live_nodes().await,
            batches_fanned_out: self.batches_fanned_out.load(Ordering::Relaxed),
        })
    }

    // ---- small helpers ----

    async fn root(&self) -> Result<Directory> {
        self.get_dir("0").await
    }

    async fn get_dir(&self, id: &str) -> Result<Directory> {
        self.store.get_directory(id).await?.ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn get_file(&self, id: &str) -> Result<File> {
        self.store.get_file(id).await?.ok_or_else(|| Error::NotFound(id.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterStatusReport {
    pub is_master: bool,
    pub live_storage_nodes: Vec<String>,
    pub batches_fanned_out: u64,
}

fn dir_upsert_record(dir: &Directory) -> MutationRecord {
    let mut payload = serde_json::to_value(dir).expect("Directory always serializes");
    if let serde_json::Value::Object(ref mut map) = payload {
        map.insert("parent".into(), serde_json::Value::String(encode_parent(dir.parent.as_deref())));
    }
    MutationRecord { op: MutationOp::Update, collection: "directories".into(), selector: dir.id.clone(), payload }
}

pub(crate) fn file_upsert_record(file: &File) -> MutationRecord {
    let payload = serde_json::to_value(file).expect("File always serializes");
    MutationRecord { op: MutationOp::Update, collection: "files".into(), selector: file.id.clone(), payload }
}

fn user_upsert_record(user: &User) -> MutationRecord {
    let payload = serde_json::to_value(user).expect("User always serializes");
    MutationRecord { op: MutationOp::Update, collection: "users".into(), selector: user.name.clone(), payload }
}

fn group_upsert_record(group: &Group) -> MutationRecord {
    let payload = serde_json::to_value(group).expect("Group always serializes");
    MutationRecord { op: MutationOp::Update, collection: "groups".into(), selector: group.name.clone(), payload }
}

// ---- HTTP RPC surface ----

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MkdirRequest {
    #[serde(flatten)]
    pub who: Credentials,
    pub path: String,
    #[serde(default)]
    pub make_parents: bool,
}

#[derive(Debug, Deserialize)]
pub struct PathRequest {
    #[serde(flatten)]
    pub who: Credentials,
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct MvRequest {
    #[serde(flatten)]
    pub who: Credentials,
    pub src: String,
    pub dst: String,
}

#[derive(Debug, Deserialize)]
pub struct PutFileRequest {
    #[serde(flatten)]
    pub who: Credentials,
    pub path: String,
    pub size: u64,
}

#[derive(Debug, Deserialize)]
pub struct ChmodRequest {
    #[serde(flatten)]
    pub who: Credentials,
    pub path: String,
    pub mode: String,
}

#[derive(Debug, Deserialize)]
pub struct ChownRequest {
    #[serde(flatten)]
    pub who: Credentials,
    pub path: String,
    pub new_owner: String,
}

#[derive(Debug, Deserialize)]
pub struct ChgrpRequest {
    #[serde(flatten)]
    pub who: Credentials,
    pub path: String,
    pub new_group: String,
}

#[derive(Debug, Deserialize)]
pub struct NameRequest {
    #[serde(flatten)]
    pub who: Credentials,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswdRequest {
    #[serde(flatten)]
    pub who: Credentials,
    pub target: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct UsermodRequest {
    #[serde(flatten)]
    pub who: Credentials,
    pub target: String,
    pub groups: Vec<String>,
    pub add: bool,
}

struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_command_failure() { StatusCode::UNPROCESSABLE_ENTITY } else { StatusCode::INTERNAL_SERVER_ERROR };
        (status, Json(RpcFault::from(&self.0))).into_response()
    }
}

async fn auth(service: &MasterService, who: &Credentials) -> Result<User> {
    service.authenticate(&who.user, who.password.as_deref()).await
}

async fn h_mkdir(State(service): State<Arc<MasterService>>, Json(req): Json<MkdirRequest>) -> std::result::Result<Json<()>, ApiError> {
    let user = auth(&service, &req.who).await?;
    service.mkdir(&user, &req.path, req.make_parents).await?;
    Ok(Json(()))
}

async fn h_touch(State(service): State<Arc<MasterService>>, Json(req): Json<PathRequest>) -> std::result::Result<Json<File>, ApiError> {
    let user = auth(&service, &req.who).await?;
    Ok(Json(service.touch(&user, &req.path).await?))
}

async fn h_ls(State(service): State<Arc<MasterService>>, Json(req): Json<PathRequest>) -> std::result::Result<Json<Vec<(String, bool)>>, ApiError> {
    let user = auth(&service, &req.who).await?;
    Ok(Json(service.ls(&user, &req.path).await?))
}

async fn h_rm(State(service): State<Arc<MasterService>>, Json(req): Json<PathRequest>) -> std::result::Result<Json<()>, ApiError> {
    let user = auth(&service, &req.who).await?;
    service.rm(&user, &req.path).await?;
    Ok(Json(()))
}

async fn h_rmr(State(service): State<Arc<MasterService>>, Json(req): Json<PathRequest>) -> std::result::Result<Json<()>, ApiError> {
    let user = auth(&service, &req.who).await?;
    service.rmr(&user, &req.path).await?;
    Ok(Json(()))
}

async fn h_mv(State(service): State<Arc<MasterService>>, Json(req): Json<MvRequest>) -> std::result::Result<Json<()>, ApiError> {
    let user = auth(&service, &req.who).await?;
    service.mv(&user, &req.src, &req.dst).await?;
    Ok(Json(()))
}

async fn h_cp(State(service): State<Arc<MasterService>>, Json(req): Json<MvRequest>) -> std::result::Result<Json<Vec<String>>, ApiError> {
    let user = auth(&service, &req.who).await?;
    Ok(Json(service.cp(&user, &req.src, &req.dst).await?))
}

async fn h_put_file(State(service): State<Arc<MasterService>>, Json(req): Json<PutFileRequest>) -> std::result::Result<Json<(File, Vec<PlacementDto>)>, ApiError> {
    let user = auth(&service, &req.who).await?;
    let (file, placements) = service.put_file(&user, &req.path, req.size).await?;
    Ok(Json((file, placements.into_iter().map(PlacementDto::from).collect())))
}

#[derive(Debug, Serialize)]
pub struct PlacementDto {
    pub primary: String,
    pub secondaries: Vec<String>,
}

impl From<Placement> for PlacementDto {
    fn from(p: Placement) -> Self {
        Self { primary: p.primary, secondaries: p.secondaries }
    }
}

async fn h_get_chunks(State(service): State<Arc<MasterService>>, Json(req): Json<PathRequest>) -> std::result::Result<Json<File>, ApiError> {
    let user = auth(&service, &req.who).await?;
    Ok(Json(service.get_chunks(&user, &req.path).await?))
}

async fn h_count(State(service): State<Arc<MasterService>>, Json(req): Json<PathRequest>) -> std::result::Result<Json<u64>, ApiError> {
    let user = auth(&service, &req.who).await?;
    Ok(Json(service.count(&user, &req.path).await?))
}

async fn h_countr(State(service): State<Arc<MasterService>>, Json(req): Json<PathRequest>) -> std::result::Result<Json<u64>, ApiError> {
    let user = auth(&service, &req.who).await?;
    Ok(Json(service.countr(&user, &req.path).await?))
}

async fn h_du(State(service): State<Arc<MasterService>>, Json(req): Json<PathRequest>) -> std::result::Result<Json<u64>, ApiError> {
    let user = auth(&service, &req.who).await?;
    Ok(Json(service.du(&user, &req.path).await?))
}

async fn h_chmod(State(service): State<Arc<MasterService>>, Json(req): Json<ChmodRequest>) -> std::result::Result<Json<()>, ApiError> {
    let user = auth(&service, &req.who).await?;
    let mode = Mode::parse(&req.mode)?;
    service.chmod(&user, &req.path, mode).await?;
    Ok(Json(()))
}

async fn h_chown(State(service): State<Arc<MasterService>>, Json(req): Json<ChownRequest>) -> std::result::Result<Json<()>, ApiError> {
    let user = auth(&service, &req.who).await?;
    service.chown(&user, &req.path, &req.new_owner).await?;
    Ok(Json(()))
}

async fn h_chgrp(State(service): State<Arc<MasterService>>, Json(req): Json<ChgrpRequest>) -> std::result::Result<Json<()>, ApiError> {
    let user = auth(&service, &req.who).await?;
    service.chgrp(&user, &req.path, &req.new_group).await?;
    Ok(Json(()))
}

async fn h_useradd(State(service): State<Arc<MasterService>>, Json(req): Json<PasswdRequest>) -> std::result::Result<Json<()>, ApiError> {
    let user = auth(&service, &req.who).await?;
    service.useradd(&user, &req.target, &req.new_password).await?;
    Ok(Json(()))
}

async fn h_userdel(State(service): State<Arc<MasterService>>, Json(req): Json<NameRequest>) -> std::result::Result<Json<()>, ApiError> {
    let user = auth(&service, &req.who).await?;
    service.userdel(&user, &req.name).await?;
    Ok(Json(()))
}

async fn h_groupadd(State(service): State<Arc<MasterService>>, Json(req): Json<NameRequest>) -> std::result::Result<Json<()>, ApiError> {
    let user = auth(&service, &req.who).await?;
    service.groupadd(&user, &req.name).await?;
    Ok(Json(()))
}

async fn h_groupdel(State(service): State<Arc<MasterService>>, Json(req): Json<NameRequest>) -> std::result::Result<Json<()>, ApiError> {
    let user = auth(&service, &req.who).await?;
    service.groupdel(&user, &req.name).await?;
    Ok(Json(()))
}

async fn h_passwd(State(service): State<Arc<MasterService>>, Json(req): Json<PasswdRequest>) -> std::result::Result<Json<()>, ApiError> {
    let user = auth(&service, &req.who).await?;
    service.passwd(&user, &req.target, &req.new_password).await?;
    Ok(Json(()))
}

async fn h_usermod(State(service): State<Arc<MasterService>>, Json(req): Json<UsermodRequest>) -> std::result::Result<Json<()>, ApiError> {
    let user = auth(&service, &req.who).await?;
    service.usermod(&user, &req.target, &req.groups, req.add).await?;
    Ok(Json(()))
}

async fn h_mkfs(State(service): State<Arc<MasterService>>, Json(who): Json<Credentials>) -> std::result::Result<Json<()>, ApiError> {
    let user = auth(&service, &who).await?;
    service.mkfs(&user).await?;
    Ok(Json(()))
}

async fn h_status(State(service): State<Arc<MasterService>>, Json(who): Json<Credentials>) -> std::result::Result<Json<ClusterStatusReport>, ApiError> {
    let user = auth(&service, &who).await?;
    Ok(Json(service.status(&user).await?))
}

/// Every name node, master or follower, answers `apply_s`: only the
/// current master calls it on its peers, but applying a batch is always
/// safe regardless of which role the receiving process is in.
async fn h_apply_s(State(service): State<Arc<MasterService>>, Json(batch): Json<MutationBatch>) -> std::result::Result<Json<()>, ApiError> {
    crate::nameservice::follower::apply_batch(&service.store, &batch).await?;
    Ok(Json(()))
}

async fn h_heartbeat(State(service): State<Arc<MasterService>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_heartbeat_socket(service, socket))
}

/// One text frame per heartbeat; the frame's entire text is the SN's
/// identifier. Every heartbeat is acknowledged with a reply frame before
/// the next `recv` so the sender knows the master actually saw it.
async fn handle_heartbeat_socket(service: Arc<MasterService>, mut socket: WebSocket) {
    while let Some(Ok(msg)) = socket.recv().await {
        let Message::Text(sn_id) = msg else { continue };
        let is_new = !service.cluster.known_nodes().await.contains(&sn_id);
        let recovered = !is_new && !service.cluster.is_live(&sn_id).await;
        service.cluster.record_heartbeat(&sn_id).await;
        if recovered {
            service.cluster.mark_recovered(&sn_id).await;
        }
        if is_new {
            recovery::spawn_watch(
                service.store.clone(),
                service.cluster.clone(),
                sn_id.clone(),
                service.replica_set,
                service.http.clone(),
                service.followers.clone(),
            );
        }
        if socket.send(Message::Text("ack".into())).await.is_err() {
            break;
        }
    }
}

pub fn router(service: Arc<MasterService>) -> Router {
    Router::new()
        .route("/rpc/mkdir", post(h_mkdir))
        .route("/rpc/touch", post(h_touch))
        .route("/rpc/ls", post(h_ls))
        .route("/rpc/rm", post(h_rm))
        .route("/rpc/rmr", post(h_rmr))
        .route("/rpc/mv", post(h_mv))
        .route("/rpc/cp", post(h_cp))
        .route("/rpc/put_file", post(h_put_file))
        .route("/rpc/get_chunks", post(h_get_chunks))
        .route("/rpc/count", post(h_count))
        .route("/rpc/countr", post(h_countr))
        .route("/rpc/du", post(h_du))
        .route("/rpc/chmod", post(h_chmod))
        .route("/rpc/chown", post(h_chown))
        .route("/rpc/chgrp", post(h_chgrp))
        .route("/rpc/useradd", post(h_useradd))
        .route("/rpc/userdel", post(h_userdel))
        .route("/rpc/groupadd", post(h_groupadd))
        .route("/rpc/groupdel", post(h_groupdel))
        .route("/rpc/passwd", post(h_passwd))
        .route("/rpc/usermod", post(h_usermod))
        .route("/rpc/mkfs", post(h_mkfs))
        .route("/rpc/status", post(h_status))
        .route("/rpc/apply_s", post(h_apply_s))
        .route("/heartbeat", get(h_heartbeat))
        .route("/health", get(|| async { StatusCode::OK }))
        .with_state(service)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn service() -> (MasterService, User) {
        let store = Arc::new(DocumentStore::open_in_memory().unwrap());
        store.bootstrap().await.unwrap();
        let cluster = Arc::new(ClusterState::new());
        cluster.record_heartbeat("A").await;
        cluster.record_heartbeat("B").await;
        cluster.record_heartbeat("C").await;
        let svc = MasterService::new(store.clone(), cluster, 2, 4, vec![], 0);
        let root = store.get_user("root").await.unwrap().unwrap();
        (svc, root)
    }

    #[tokio::test]
    async fn mkdir_then_ls_shows_it() {
        let (svc, root) = service().await;
        svc.mkdir(&root, "/alice", false).await.unwrap();
        let entries = svc.ls(&root, "/").await.unwrap();
        assert!(entries.iter().any(|(n, is_dir)| n == "alice" && *is_dir));
    }

    #[tokio::test]
    async fn mkdir_without_parents_fails_not_parent() {
        let (svc, root) = service().await;
        assert!(matches!(svc.mkdir(&root, "/a/b/c", false).await, Err(Error::NotParent(_))));
        svc.mkdir(&root, "/a/b/c", true).await.unwrap();
        assert!(svc.ls(&root, "/a/b").await.unwrap().iter().any(|(n, _)| n == "c"));
    }

    #[tokio::test]
    async fn mkdir_on_root_fails_already_exists() {
        let (svc, root) = service().await;
        assert!(matches!(svc.mkdir(&root, "/", false).await, Err(Error::AlreadyExists)));
    }

    #[tokio::test]
    async fn rm_on_root_fails_root_directory() {
        let (svc, root) = service().await;
        assert!(matches!(svc.rm(&root, "/").await, Err(Error::RootDirectory)));
    }

    #[tokio::test]
    async fn put_file_places_chunks_across_live_nodes() {
        let (svc, root) = service().await;
        let (file, placements) = svc.put_file(&root, "/f.txt", 10).await.unwrap();
        assert_eq!(placements.len(), 3); // ceil(10/4) = 3 chunks
        assert_eq!(file.chunk_count(), 3);
        for p in &placements {
            assert_eq!(p.secondaries.len(), 1); // replica_set=2 => 1 secondary
        }
    }

    #[tokio::test]
    async fn mv_into_own_subdirectory_fails_itself_subdir() {
        let (svc, root) = service().await;
        svc.mkdir(&root, "/x", false).await.unwrap();
        svc.mkdir(&root, "/x/sub", false).await.unwrap();
        assert!(matches!(svc.mv(&root, "/x", "/x/sub/x").await, Err(Error::ItselfSubdir)));
    }

    #[tokio::test]
    async fn permission_denied_without_ownership_or_bits() {
        let (svc, root) = service().await;
        svc.useradd(&root, "alice", "pw").await.unwrap();
        svc.useradd(&root, "bob", "pw").await.unwrap();
        let alice = svc.authenticate("alice", Some("pw")).await.unwrap();
        let bob = svc.authenticate("bob", Some("pw")).await.unwrap();
        svc.mkdir(&alice, "/alice", false).await.unwrap();
        svc.chmod(&alice, "/alice", Mode::parse("700").unwrap()).await.unwrap();
        assert!(matches!(svc.ls(&bob, "/alice").await, Err(Error::AccessDenied(_))));
    }

    #[tokio::test]
    async fn cp_mirrors_chunk_placement_on_same_nodes() {
        let (svc, root) = service().await;
        let (src, _) = svc.put_file(&root, "/a.bin", 8).await.unwrap();
        let involved = svc.cp(&root, "/a.bin", "/b.bin").await.unwrap();
        let dst = svc.get_chunks(&root, "/b.bin").await.unwrap();
        assert_eq!(src.involved_storage_nodes().len(), involved.len());
        assert_eq!(dst.chunk_count(), src.chunk_count());
    }

    #[tokio::test]
    async fn groupdel_fails_while_main_group_of_user() {
        let (svc, root) = service().await;
        assert!(matches!(svc.groupdel(&root, "root").await, Err(Error::MainUserGroup(_))));
    }
}
