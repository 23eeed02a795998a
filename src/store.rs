//! Document store
//!
//! An embedded, rusqlite-backed key/document store for name node
//! metadata. Each logical collection (`directories`, `files`, `users`,
//! `groups`, `trash`) is a table keyed by its natural identifier with a
//! single JSON-blob column; every mutation is a single-row upsert or
//! delete, which is all spec.md's data model ever needs atomically.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::model::{Directory, File, Group, Mode, TrashEntry, User};

pub struct DocumentStore {
    conn: RwLock<Connection>,
}

impl DocumentStore {
    /// Open (creating if necessary) the document store under `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let conn = Connection::open(data_dir.join("metadata.db"))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS directories (id TEXT PRIMARY KEY, data TEXT NOT NULL);
             CREATE TABLE IF NOT EXISTS files (id TEXT PRIMARY KEY, data TEXT NOT NULL);
             CREATE TABLE IF NOT EXISTS users (name TEXT PRIMARY KEY, data TEXT NOT NULL);
             CREATE TABLE IF NOT EXISTS groups (name TEXT PRIMARY KEY, data TEXT NOT NULL);
             CREATE TABLE IF NOT EXISTS trash (
                 storage_node TEXT NOT NULL,
                 chunk_name TEXT NOT NULL,
                 PRIMARY KEY (storage_node, chunk_name)
             );",
        )?;
        Ok(Self {
            conn: RwLock::new(conn),
        })
    }

    /// Open an in-memory store, used by tests.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE directories (id TEXT PRIMARY KEY, data TEXT NOT NULL);
             CREATE TABLE files (id TEXT PRIMARY KEY, data TEXT NOT NULL);
             CREATE TABLE users (name TEXT PRIMARY KEY, data TEXT NOT NULL);
             CREATE TABLE groups (name TEXT PRIMARY KEY, data TEXT NOT NULL);
             CREATE TABLE trash (
                 storage_node TEXT NOT NULL,
                 chunk_name TEXT NOT NULL,
                 PRIMARY KEY (storage_node, chunk_name)
             );",
        )?;
        Ok(Self {
            conn: RwLock::new(conn),
        })
    }

    /// First-run seeding: creates the root directory plus the `root`
    /// user/group if the store is otherwise empty. Idempotent.
    pub async fn bootstrap(&self) -> Result<()> {
        if self.get_directory("0").await?.is_some() {
            return Ok(());
        }
        tracing::info!("bootstrapping empty document store with root directory/user/group");
        self.put_group(&Group::new("root")).await?;
        self.put_user(&User::new("root", "root")).await?;
        let mut root = Directory::root("root", "root");
        root.mode = Mode::new(7, 5, 5);
        self.put_directory(&root).await?;
        Ok(())
    }

    // ---- directories ----

    pub async fn get_directory(&self, id: &str) -> Result<Option<Directory>> {
        let conn = self.conn.read().await;
        let data: Option<String> = conn
            .query_row("SELECT data FROM directories WHERE id = ?1", params![id], |r| r.get(0))
            .optional()?;
        Ok(match data {
            Some(s) => Some(serde_json::from_str(&s)?),
            None => None,
        })
    }

    pub async fn put_directory(&self, dir: &Directory) -> Result<()> {
        let data = serde_json::to_string(dir)?;
        let conn = self.conn.read().await;
        conn.execute(
            "INSERT INTO directories (id, data) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
            params![dir.id, data],
        )?;
        Ok(())
    }

    pub async fn delete_directory(&self, id: &str) -> Result<()> {
        let conn = self.conn.read().await;
        conn.execute("DELETE FROM directories WHERE id = ?1", params![id])?;
        Ok(())
    }

    // ---- files ----

    pub async fn get_file(&self, id: &str) -> Result<Option<File>> {
        let conn = self.conn.read().await;
        let data: Option<String> = conn
            .query_row("SELECT data FROM files WHERE id = ?1", params![id], |r| r.get(0))
            .optional()?;
        Ok(match data {
            Some(s) => Some(serde_json::from_str(&s)?),
            None => None,
        })
    }

    pub async fn put_file(&self, file: &File) -> Result<()> {
        let data = serde_json::to_string(file)?;
        let conn = self.conn.read().await;
        conn.execute(
            "INSERT INTO files (id, data) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
            params![file.id, data],
        )?;
        Ok(())
    }

    pub async fn delete_file(&self, id: &str) -> Result<()> {
        let conn = self.conn.read().await;
        conn.execute("DELETE FROM files WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Every file id currently in the store, used by recovery to scan
    /// for chunks placed on a node that just died.
    pub async fn list_file_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn.read().await;
        let mut stmt = conn.prepare("SELECT id FROM files")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ---- users ----

    pub async fn get_user(&self, name: &str) -> Result<Option<User>> {
        let conn = self.conn.read().await;
        let data: Option<String> = conn
            .query_row("SELECT data FROM users WHERE name = ?1", params![name], |r| r.get(0))
            .optional()?;
        Ok(match data {
            Some(s) => Some(serde_json::from_str(&s)?),
            None => None,
        })
    }

    pub async fn put_user(&self, user: &User) -> Result<()> {
        let data = serde_json::to_string(user)?;
        let conn = self.conn.read().await;
        conn.execute(
            "INSERT INTO users (name, data) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET data = excluded.data",
            params![user.name, data],
        )?;
        Ok(())
    }

    pub async fn delete_user(&self, name: &str) -> Result<()> {
        let conn = self.conn.read().await;
        conn.execute("DELETE FROM users WHERE name = ?1", params![name])?;
        Ok(())
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.conn.read().await;
        let mut stmt = conn.prepare("SELECT data FROM users")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    // ---- groups ----

    pub async fn get_group(&self, name: &str) -> Result<Option<Group>> {
        let conn = self.conn.read().await;
        let data: Option<String> = conn
            .query_row("SELECT data FROM groups WHERE name = ?1", params![name], |r| r.get(0))
            .optional()?;
        Ok(match data {
            Some(s) => Some(serde_json::from_str(&s)?),
            None => None,
        })
    }

    pub async fn put_group(&self, group: &Group) -> Result<()> {
        let data = serde_json::to_string(group)?;
        let conn = self.conn.read().await;
        conn.execute(
            "INSERT INTO groups (name, data) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET data = excluded.data",
            params![group.name, data],
        )?;
        Ok(())
    }

    pub async fn delete_group(&self, name: &str) -> Result<()> {
        let conn = self.conn.read().await;
        conn.execute("DELETE FROM groups WHERE name = ?1", params![name])?;
        Ok(())
    }

    pub async fn list_groups(&self) -> Result<Vec<Group>> {
        let conn = self.conn.read().await;
        let mut stmt = conn.prepare("SELECT data FROM groups")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    // ---- trash ----

    pub async fn add_trash(&self, entry: &TrashEntry) -> Result<()> {
        let conn = self.conn.read().await;
        conn.execute(
            "INSERT OR IGNORE INTO trash (storage_node, chunk_name) VALUES (?1, ?2)",
            params![entry.storage_node, entry.chunk_name],
        )?;
        Ok(())
    }

    /// Idempotent: removing an entry that is no longer present is a no-op,
    /// matching spec.md's requirement that repeated trash flushes converge.
    pub async fn remove_trash(&self, entry: &TrashEntry) -> Result<()> {
        let conn = self.conn.read().await;
        conn.execute(
            "DELETE FROM trash WHERE storage_node = ?1 AND chunk_name = ?2",
            params![entry.storage_node, entry.chunk_name],
        )?;
        Ok(())
    }

    pub async fn trash_for(&self, storage_node: &str) -> Result<Vec<String>> {
        let conn = self.conn.read().await;
        let mut stmt =
            conn.prepare("SELECT chunk_name FROM trash WHERE storage_node = ?1")?;
        let rows = stmt.query_map(params![storage_node], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn all_trash(&self) -> Result<Vec<TrashEntry>> {
        let conn = self.conn.read().await;
        let mut stmt = conn.prepare("SELECT storage_node, chunk_name FROM trash")?;
        let rows = stmt.query_map([], |r| Ok(TrashEntry::new(r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Look up a node at `id`, trying directories then files: used by
    /// operations that are allowed on either a file or a directory.
    pub async fn get_node(&self, id: &str) -> Result<Option<crate::model::FsNode>> {
        if let Some(d) = self.get_directory(id).await? {
            return Ok(Some(crate::model::FsNode::Dir(d)));
        }
        if let Some(f) = self.get_file(id).await? {
            return Ok(Some(crate::model::FsNode::File(f)));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstrap_is_idempotent() {
        let store = DocumentStore::open_in_memory().unwrap();
        store.bootstrap().await.unwrap();
        let root_before = store.get_directory("0").await.unwrap().unwrap();
        store.bootstrap().await.unwrap();
        let root_after = store.get_directory("0").await.unwrap().unwrap();
        assert_eq!(root_before.id, root_after.id);
    }

    #[tokio::test]
    async fn put_get_file_roundtrip() {
        let store = DocumentStore::open_in_memory().unwrap();
        let file = File::new("1", "a.txt", "0", "root", "root");
        store.put_file(&file).await.unwrap();
        let back = store.get_file("1").await.unwrap().unwrap();
        assert_eq!(back.name, "a.txt");
    }

    #[tokio::test]
    async fn trash_flush_is_idempotent() {
        let store = DocumentStore::open_in_memory().unwrap();
        let entry = TrashEntry::new("sn1", "5_0");
        store.add_trash(&entry).await.unwrap();
        store.remove_trash(&entry).await.unwrap();
        store.remove_trash(&entry).await.unwrap();
        assert!(store.trash_for("sn1").await.unwrap().is_empty());
    }
}
