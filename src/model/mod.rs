//! Data Model
//!
//! Directory/file nodes, users/groups, and trash entries, plus the key
//! encoding rule shared by every document that uses an SN identifier as
//! a map key.

mod dir;
mod file;
mod trash;
mod user;

pub use dir::Directory;
pub use file::{chunk_name, split_chunk_name, ChunkName, File, FsNode};
pub use trash::TrashEntry;
pub use user::{Group, User};

use serde::{Deserialize, Serialize};

/// Owner/group/others permission triple, each 0-7 (an octal digit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mode {
    pub owner: u8,
    pub group: u8,
    pub others: u8,
}

impl Mode {
    pub fn new(owner: u8, group: u8, others: u8) -> Self {
        Self { owner, group, others }
    }

    /// Parse a three-digit octal string like `"754"`.
    pub fn parse(s: &str) -> crate::error::Result<Self> {
        let digits: Vec<u8> = s.bytes().map(|b| b.wrapping_sub(b'0')).collect();
        if digits.len() != 3 || digits.iter().any(|&d| d > 7) {
            return Err(crate::error::Error::InvalidMod(s.to_string()));
        }
        Ok(Self::new(digits[0], digits[1], digits[2]))
    }

    pub fn as_str(&self) -> String {
        format!("{}{}{}", self.owner, self.group, self.others)
    }

    /// Bit position within a single octal digit: 4=read, 2=write, 1=execute.
    pub fn has(bit: u8, required: u8) -> bool {
        bit & required == required
    }
}

impl Default for Mode {
    fn default() -> Self {
        Self::new(7, 5, 5)
    }
}

/// Encode an SN identifier for use as a document map key: stored keys
/// cannot contain `.` or `:`, so both are substituted with bracketed
/// tokens. Values (not keys) keep their original form.
pub fn encode_sn_key(sn_id: &str) -> String {
    sn_id.replace('.', "[dot]").replace(':', "[colon]")
}

/// Inverse of [`encode_sn_key`].
pub fn decode_sn_key(key: &str) -> String {
    key.replace("[dot]", ".").replace("[colon]", ":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parse_roundtrip() {
        let m = Mode::parse("754").unwrap();
        assert_eq!(m, Mode::new(7, 5, 4));
        assert_eq!(m.as_str(), "754");
    }

    #[test]
    fn mode_parse_rejects_bad_digits() {
        assert!(Mode::parse("78a").is_err());
        assert!(Mode::parse("89").is_err());
        assert!(Mode::parse("12345").is_err());
    }

    #[test]
    fn sn_key_encoding_roundtrips() {
        let id = "192.168.1.5:9000";
        let encoded = encode_sn_key(id);
        assert_eq!(encoded, "192[dot]168[dot]1[dot]5[colon]9000");
        assert_eq!(decode_sn_key(&encoded), id);
    }
}
