//! Follower-side mutation batch application
//!
//! The master has already permission-checked and committed locally; a
//! follower just replays the same upserts/deletes against its own store,
//! in order, with no checks of its own. Re-applying the same batch twice
//! is harmless: every record is a full-document replace or a delete by
//! key, both idempotent.

use crate::error::Result;
use crate::model::{Directory, File, Group, TrashEntry, User};
use crate::protocol::{decode_parent, MutationBatch, MutationOp, MutationRecord};
use crate::store::DocumentStore;

pub async fn apply_batch(store: &DocumentStore, batch: &MutationBatch) -> Result<()> {
    for record in &batch.records {
        apply_record(store, record).await?;
    }
    Ok(())
}

async fn apply_record(store: &DocumentStore, record: &MutationRecord) -> Result<()> {
    match record.collection.as_str() {
        "directories" => apply_directory(store, record).await,
        "files" => apply_file(store, record).await,
        "users" => apply_user(store, record).await,
        "groups" => apply_group(store, record).await,
        "trash" => apply_trash(store, record).await,
        other => {
            tracing::warn!(collection = other, "follower received mutation for unknown collection, skipping");
            Ok(())
        }
    }
}

async fn apply_directory(store: &DocumentStore, record: &MutationRecord) -> Result<()> {
    match record.op {
        MutationOp::Delete => store.delete_directory(&record.selector).await,
        MutationOp::Insert | MutationOp::Update => {
            let mut dir: Directory = serde_json::from_value(record.payload.clone())?;
            if let Some(parent_field) = record.payload.get("parent").and_then(|v| v.as_str()) {
                dir.parent = decode_parent(parent_field);
            }
            store.put_directory(&dir).await
        }
    }
}

async fn apply_file(store: &DocumentStore, record: &MutationRecord) -> Result<()> {
    match record.op {
        MutationOp::Delete => store.delete_file(&record.selector).await,
        MutationOp::Insert | MutationOp::Update => {
            let file: File = serde_json::from_value(record.payload.clone())?;
            store.put_file(&file).await
        }
    }
}

async fn apply_user(store: &DocumentStore, record: &MutationRecord) -> Result<()> {
    match record.op {
        MutationOp::Delete => store.delete_user(&record.selector).await,
        MutationOp::Insert | MutationOp::Update => {
            let user: User = serde_json::from_value(record.payload.clone())?;
            store.put_user(&user).await
        }
    }
}

async fn apply_group(store: &DocumentStore, record: &MutationRecord) -> Result<()> {
    match record.op {
        MutationOp::Delete => store.delete_group(&record.selector).await,
        MutationOp::Insert | MutationOp::Update => {
            let group: Group = serde_json::from_value(record.payload.clone())?;
            store.put_group(&group).await
        }
    }
}

/// Unlike the other collections, a trash record's `payload` is present
/// on both insert and delete: the key is the `(storage_node, chunk_name)`
/// pair, which `selector` alone can't carry unambiguously.
async fn apply_trash(store: &DocumentStore, record: &MutationRecord) -> Result<()> {
    let entry: TrashEntry = serde_json::from_value(record.payload.clone())?;
    match record.op {
        MutationOp::Delete => store.remove_trash(&entry).await,
        MutationOp::Insert | MutationOp::Update => store.add_trash(&entry).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode_parent;

    #[tokio::test]
    async fn applies_directory_upsert_and_delete() {
        let store = DocumentStore::open_in_memory().unwrap();
        store.bootstrap().await.unwrap();
        let dir = Directory::new("7", "etc", "0", "root", "root");
        let mut payload = serde_json::to_value(&dir).unwrap();
        payload["parent"] = serde_json::Value::String(encode_parent(dir.parent.as_deref()));
        let mut batch = MutationBatch::new();
        batch.push(MutationRecord { op: MutationOp::Update, collection: "directories".into(), selector: "7".into(), payload });
        apply_batch(&store, &batch).await.unwrap();
        assert!(store.get_directory("7").await.unwrap().is_some());

        let mut delete_batch = MutationBatch::new();
        delete_batch.push(MutationRecord {
            op: MutationOp::Delete,
            collection: "directories".into(),
            selector: "7".into(),
            payload: serde_json::Value::Null,
        });
        apply_batch(&store, &delete_batch).await.unwrap();
        assert!(store.get_directory("7").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_collection_is_skipped_not_fatal() {
        let store = DocumentStore::open_in_memory().unwrap();
        store.bootstrap().await.unwrap();
        let mut batch = MutationBatch::new();
        batch.push(MutationRecord {
            op: MutationOp::Update,
            collection: "bogus".into(),
            selector: "x".into(),
            payload: serde_json::Value::Null,
        });
        assert!(apply_batch(&store, &batch).await.is_ok());
    }

    #[tokio::test]
    async fn applies_trash_insert_and_delete() {
        let store = DocumentStore::open_in_memory().unwrap();
        store.bootstrap().await.unwrap();
        let entry = crate::model::TrashEntry::new("B", "1_0");
        let mut batch = MutationBatch::new();
        batch.push(MutationRecord {
            op: MutationOp::Insert,
            collection: "trash".into(),
            selector: "B/1_0".into(),
            payload: serde_json::to_value(&entry).unwrap(),
        });
        apply_batch(&store, &batch).await.unwrap();
        assert_eq!(store.trash_for("B").await.unwrap(), vec!["1_0".to_string()]);

        let mut delete_batch = MutationBatch::new();
        delete_batch.push(MutationRecord {
            op: MutationOp::Delete,
            collection: "trash".into(),
            selector: "B/1_0".into(),
            payload: serde_json::to_value(&entry).unwrap(),
        });
        apply_batch(&store, &delete_batch).await.unwrap();
        assert!(store.trash_for("B").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reapplying_same_batch_is_idempotent() {
        let store = DocumentStore::open_in_memory().unwrap();
        store.bootstrap().await.unwrap();
        let user = User::with_password("alice", "alice", "pw");
        let payload = serde_json::to_value(&user).unwrap();
        let mut batch = MutationBatch::new();
        batch.push(MutationRecord { op: MutationOp::Update, collection: "users".into(), selector: "alice".into(), payload });
        apply_batch(&store, &batch).await.unwrap();
        apply_batch(&store, &batch).await.unwrap();
        assert_eq!(store.get_user("alice").await.unwrap().unwrap().password, "pw");
    }
}
