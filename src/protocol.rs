//! Wire protocol types shared across links
//!
//! - client <-> master name node, and master name node -> follower name
//!   node (suffixed `_s`): structured RPC over HTTP, JSON bodies.
//! - client <-> storage node, and storage node <-> storage node: HTTP
//!   with a form-encoded body (chunk payloads are Latin-1/ISO-8859-1
//!   encoded so that arbitrary bytes survive form encoding).
//! - storage node -> master name node: full-duplex WebSocket, one text
//!   frame per heartbeat (the frame's entire text is the SN's identifier;
//!   there is no further structure to it, so no type lives here for it).

use serde::{Deserialize, Serialize};

/// The kind of change a mutation record applies to one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationOp {
    Insert,
    Update,
    Delete,
}

/// A single record in a mutation batch: replace or remove the document
/// identified by `selector` within `collection`. The master emits every
/// identifier as a string, even fields that are natively optional, using
/// [`NULL_PARENT_SENTINEL`] where a parent would otherwise be absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationRecord {
    pub op: MutationOp,
    pub collection: String,
    pub selector: String,
    pub payload: serde_json::Value,
}

/// A batch of mutation records applied atomically, in order, by a
/// follower. Re-applying the same batch twice is a no-op the second
/// time: each record replaces the same field(s) of the same document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MutationBatch {
    pub records: Vec<MutationRecord>,
}

impl MutationBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: MutationRecord) {
        self.records.push(record);
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn encode(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(s: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

/// Sentinel written in place of a null parent identifier: distinguishable
/// from the empty string, which is itself a legal (if unusual) document key.
pub const NULL_PARENT_SENTINEL: &str = "\u{0}NULL\u{0}";

pub fn encode_parent(parent: Option<&str>) -> String {
    match parent {
        Some(p) => p.to_string(),
        None => NULL_PARENT_SENTINEL.to_string(),
    }
}

pub fn decode_parent(s: &str) -> Option<String> {
    if s == NULL_PARENT_SENTINEL {
        None
    } else {
        Some(s.to_string())
    }
}

/// Body of a failed structured-RPC call: `kind` mirrors [`crate::error::Error::kind`]
/// so a client can pattern-match on it the way the original implementation
/// matched on a raised exception's class name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcFault {
    pub kind: String,
    pub message: String,
}

impl From<&crate::error::Error> for RpcFault {
    fn from(err: &crate::error::Error) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_parent_roundtrips_and_differs_from_empty_string() {
        assert_eq!(decode_parent(&encode_parent(None)), None);
        assert_eq!(decode_parent(&encode_parent(Some(""))), Some("".to_string()));
        assert_ne!(encode_parent(None), encode_parent(Some("")));
    }

    #[test]
    fn mutation_batch_encode_decode_roundtrip() {
        let mut batch = MutationBatch::new();
        batch.push(MutationRecord {
            op: MutationOp::Insert,
            collection: "files".to_string(),
            selector: "42".to_string(),
            payload: serde_json::json!({"name": "a.txt"}),
        });
        let encoded = batch.encode().unwrap();
        let decoded = MutationBatch::decode(&encoded).unwrap();
        assert_eq!(decoded.records.len(), 1);
        assert_eq!(decoded.records[0].selector, "42");
    }
}
