//! Trash entries
//!
//! A trash entry records that a storage node was displaced from a chunk
//! during failure recovery and still needs to delete it once it rejoins.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrashEntry {
    pub storage_node: String,
    pub chunk_name: String,
}

impl TrashEntry {
    pub fn new(storage_node: impl Into<String>, chunk_name: impl Into<String>) -> Self {
        Self {
            storage_node: storage_node.into(),
            chunk_name: chunk_name.into(),
        }
    }
}
