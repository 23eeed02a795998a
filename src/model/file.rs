//! File node and chunk naming

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::Mode;

/// A chunk name, always of the form `<fileID>_<sequence>` with
/// sequence numbers contiguous starting at 0.
pub type ChunkName = String;

pub fn chunk_name(file_id: &str, sequence: u64) -> ChunkName {
    format!("{}_{}", file_id, sequence)
}

/// Split a chunk name back into its file id and sequence number.
pub fn split_chunk_name(name: &str) -> Option<(&str, u64)> {
    let idx = name.rfind('_')?;
    let (file_id, seq) = (&name[..idx], &name[idx + 1..]);
    seq.parse().ok().map(|s| (file_id, s))
}

/// A file node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File {
    pub id: String,
    pub name: String,
    pub parent: String,
    pub size: u64,
    pub created: chrono::DateTime<chrono::Utc>,
    pub updated: chrono::DateTime<chrono::Utc>,
    pub owner_user: String,
    pub owner_group: String,
    pub mode: Mode,

    /// Primary-SN-identifier (key, [`super::encode_sn_key`]-encoded) ->
    /// ordered list of chunk names for which that SN is primary.
    pub chunks: HashMap<String, Vec<ChunkName>>,
    /// Inverse of `chunks`: chunk name -> its primary SN identifier.
    pub chunks_bkp: HashMap<ChunkName, String>,
    /// Chunk name -> ordered list of secondary SN identifiers.
    pub replicas: HashMap<ChunkName, Vec<String>>,
    /// Secondary-SN-identifier (key-encoded) -> list of chunk names for
    /// which that SN is a secondary.
    pub replicas_bkp: HashMap<String, Vec<ChunkName>>,
}

impl File {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        parent: impl Into<String>,
        owner_user: impl Into<String>,
        owner_group: impl Into<String>,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            parent: parent.into(),
            size: 0,
            created: now,
            updated: now,
            owner_user: owner_user.into(),
            owner_group: owner_group.into(),
            mode: Mode::default(),
            chunks: HashMap::new(),
            chunks_bkp: HashMap::new(),
            replicas: HashMap::new(),
            replicas_bkp: HashMap::new(),
        }
    }

    /// Number of chunks currently registered on the file.
    pub fn chunk_count(&self) -> usize {
        self.chunks_bkp.len()
    }

    /// Ordered list of this file's chunk names, by sequence.
    pub fn ordered_chunk_names(&self) -> Vec<ChunkName> {
        let mut names: Vec<ChunkName> = self.chunks_bkp.keys().cloned().collect();
        names.sort_by_key(|n| split_chunk_name(n).map(|(_, seq)| seq).unwrap_or(0));
        names
    }

    /// Register `chunk` with `primary` as its primary SN and `secondaries`
    /// as its ordered secondaries, maintaining all four maps.
    pub fn place_chunk(&mut self, chunk: ChunkName, primary: &str, secondaries: &[String]) {
        let primary_key = super::encode_sn_key(primary);
        self.chunks
            .entry(primary_key.clone())
            .or_default()
            .push(chunk.clone());
        self.chunks_bkp.insert(chunk.clone(), primary_key);

        self.replicas.insert(chunk.clone(), secondaries.to_vec());
        for secondary in secondaries {
            let sec_key = super::encode_sn_key(secondary);
            self.replicas_bkp.entry(sec_key).or_default().push(chunk.clone());
        }
    }

    /// Every distinct SN identifier (primary or secondary) the file's
    /// chunks are placed on, decoded back to its original form.
    pub fn involved_storage_nodes(&self) -> Vec<String> {
        let mut set = std::collections::HashSet::new();
        for key in self.chunks.keys() {
            set.insert(super::decode_sn_key(key));
        }
        for key in self.replicas_bkp.keys() {
            set.insert(super::decode_sn_key(key));
        }
        set.into_iter().collect()
    }
}

/// Either a directory or a file, as returned by path-navigation lookups.
#[derive(Debug, Clone)]
pub enum FsNode {
    Dir(super::Directory),
    File(File),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_name_roundtrip() {
        let name = chunk_name("42", 3);
        assert_eq!(name, "42_3");
        assert_eq!(split_chunk_name(&name), Some(("42", 3)));
    }

    #[test]
    fn place_chunk_maintains_all_maps() {
        let mut f = File::new("1", "a.txt", "0", "root", "root");
        f.place_chunk(
            chunk_name("1", 0),
            "10.0.0.1:9000",
            &["10.0.0.2:9000".to_string()],
        );
        assert_eq!(f.chunks["10[dot]0[dot]0[dot]1[colon]9000"], vec!["1_0"]);
        assert_eq!(f.chunks_bkp["1_0"], "10[dot]0[dot]0[dot]1[colon]9000");
        assert_eq!(f.replicas["1_0"], vec!["10.0.0.2:9000".to_string()]);
        assert_eq!(f.replicas_bkp["10[dot]0[dot]0[dot]2[colon]9000"], vec!["1_0"]);

        let involved = f.involved_storage_nodes();
        assert!(involved.contains(&"10.0.0.1:9000".to_string()));
        assert!(involved.contains(&"10.0.0.2:9000".to_string()));
    }

    #[test]
    fn ordered_chunk_names_sorts_by_sequence() {
        let mut f = File::new("1", "a.txt", "0", "root", "root");
        f.place_chunk(chunk_name("1", 2), "A", &[]);
        f.place_chunk(chunk_name("1", 0), "A", &[]);
        f.place_chunk(chunk_name("1", 1), "A", &[]);
        assert_eq!(f.ordered_chunk_names(), vec!["1_0", "1_1", "1_2"]);
    }
}
