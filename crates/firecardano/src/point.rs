//! Chain positions: points and tips.

use std::fmt;

/// A position on the chain: `(slot, block hash)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChainPoint {
    pub slot: u64,
    pub hash: Vec<u8>,
}

impl ChainPoint {
    pub fn new(slot: u64, hash: impl Into<Vec<u8>>) -> Self {
        Self {
            slot,
            hash: hash.into(),
        }
    }

    /// Build a point from a hex-encoded hash (no `0x` prefix expected, but tolerated).
    pub fn from_hex(slot: u64, hash: &str) -> Result<Self, hex::FromHexError> {
        let hash = hex::decode(hash.strip_prefix("0x").unwrap_or(hash))?;
        Ok(Self { slot, hash })
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(&self.hash)
    }
}

impl fmt::Display for ChainPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.slot, self.hash_hex())
    }
}

/// The remote source's current tip: its point and block height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tip {
    pub point: ChainPoint,
    pub block_number: u64,
}

impl fmt::Display for Tip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (block {})", self.point, self.block_number)
    }
}
