//! On-disk chunk storage
//!
//! Each chunk is one file under the storage node's data directory, named
//! exactly as its chunk name (`<fileID>_<sequence>`). No directory
//! nesting, no index: the filesystem's own namespace is the index.

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::error::{Error, Result};

pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn path_for(&self, chunk: &str) -> PathBuf {
        self.root.join(chunk)
    }

    pub async fn write(&self, chunk: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(chunk);
        fs::write(&path, bytes).await?;
        Ok(())
    }

    pub async fn read(&self, chunk: &str) -> Result<Vec<u8>> {
        let path = self.path_for(chunk);
        fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(chunk.to_string()),
            _ => Error::Io(e),
        })
    }

    pub async fn delete(&self, chunk: &str) -> Result<()> {
        let path = self.path_for(chunk);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    pub async fn exists(&self, chunk: &str) -> bool {
        fs::metadata(self.path_for(chunk)).await.is_ok()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_read_delete_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::open(dir.path()).await.unwrap();
        store.write("1_0", b"hello").await.unwrap();
        assert_eq!(store.read("1_0").await.unwrap(), b"hello");
        assert!(store.exists("1_0").await);
        store.delete("1_0").await.unwrap();
        assert!(!store.exists("1_0").await);
    }

    #[tokio::test]
    async fn read_missing_chunk_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::open(dir.path()).await.unwrap();
        assert!(matches!(store.read("9_9").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_missing_chunk_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::open(dir.path()).await.unwrap();
        assert!(store.delete("9_9").await.is_ok());
    }
}
