//! Content identity: the 20-byte info hash naming a transfer.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Length of an info hash and of every piece hash (SHA-1).
pub const HASH_LEN: usize = 20;

/// Expected digest of a single piece.
pub type PieceHash = [u8; HASH_LEN];

/// Info hash of a transfer. Keys snapshots in the durable store.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct InfoHash(#[serde(with = "bytes_20")] [u8; HASH_LEN]);

mod bytes_20 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    pub fn serialize<S: Serializer>(v: &[u8; 20], serializer: S) -> Result<S::Ok, S::Error> {
        v.as_slice().serialize(serializer)
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 20], D::Error> {
        let buf: Vec<u8> = Deserialize::deserialize(d)?;
        buf.try_into()
            .map_err(|_| serde::de::Error::custom("expected 20 bytes"))
    }
}

impl InfoHash {
    pub fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        InfoHash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Lowercase hex form, used for store file names.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Parse a 40-character hex string. Returns None on any other input.
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != HASH_LEN * 2 || !s.is_ascii() {
            return None;
        }
        let mut out = [0u8; HASH_LEN];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(InfoHash(out))
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<[u8; HASH_LEN]> for InfoHash {
    fn from(bytes: [u8; HASH_LEN]) -> Self {
        InfoHash(bytes)
    }
}
