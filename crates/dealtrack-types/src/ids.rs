//! Identifiers used throughout dealtrack.
//!
//! Chain-side identifiers (`Address`, `MessageId`, `BlockId`, `PieceCid`) are
//! raw 32-byte values. Chain-assigned counters (`DealId`, `SectorNumber`) are
//! plain integers. Only locally generated handles (`WatchId`) use UUIDv7.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Block height. Signed so that "before genesis" sentinels stay representable.
pub type ChainEpoch = i64;

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// An on-chain account.
///
/// Key-backed accounts use the raw ed25519 public key. Built-in actors use
/// [`Address::actor`], which places the actor number in the last 8 bytes of an
/// otherwise zeroed key (no valid ed25519 key has that shape).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Address(pub [u8; 32]);

impl Address {
    #[must_use]
    pub fn from_pubkey(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Address of a built-in actor with the given number.
    #[must_use]
    pub const fn actor(id: u64) -> Self {
        let be = id.to_be_bytes();
        let mut bytes = [0u8; 32];
        let mut i = 0;
        while i < 8 {
            bytes[24 + i] = be[i];
            i += 1;
        }
        Self(bytes)
    }

    /// Returns the actor number if this is a built-in actor address.
    #[must_use]
    pub fn actor_id(&self) -> Option<u64> {
        if self.0[..24].iter().all(|b| *b == 0) {
            let mut be = [0u8; 8];
            be.copy_from_slice(&self.0[24..]);
            Some(u64::from_be_bytes(be))
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.actor_id() {
            Some(id) => write!(f, "f0{id}"),
            None => write!(f, "f:{}", hex::encode(&self.0[..8])),
        }
    }
}

// ---------------------------------------------------------------------------
// MessageId / BlockId / PieceCid
// ---------------------------------------------------------------------------

/// Content hash of a [`Message`](crate::Message). The transaction reference
/// handed around between client and provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct MessageId(pub [u8; 32]);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg:{}", hex::encode(&self.0[..8]))
    }
}

/// Identifier of a block on some branch of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct BlockId(pub [u8; 32]);

impl BlockId {
    /// Parent id used by the first block of a chain.
    pub const GENESIS_PARENT: Self = Self([0u8; 32]);
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blk:{}", hex::encode(&self.0[..8]))
    }
}

/// Commitment to the piece of data a deal stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct PieceCid(pub [u8; 32]);

impl fmt::Display for PieceCid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "piece:{}", hex::encode(&self.0[..8]))
    }
}

// ---------------------------------------------------------------------------
// DealId / SectorNumber
// ---------------------------------------------------------------------------

/// Chain-assigned deal identifier. Only exists once a publish message has
/// executed successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct DealId(pub u64);

impl fmt::Display for DealId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deal:{}", self.0)
    }
}

/// Provider-local sector number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct SectorNumber(pub u64);

impl fmt::Display for SectorNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sector:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// WatchId
// ---------------------------------------------------------------------------

/// Handle for one registered confirmation watch. UUIDv7 so log lines sort by
/// registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct WatchId(pub Uuid);

impl WatchId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for WatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watch:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_address_roundtrip() {
        let addr = Address::actor(5);
        assert_eq!(addr.actor_id(), Some(5));
        assert_eq!(format!("{addr}"), "f05");
    }

    #[test]
    fn key_address_is_not_actor() {
        let addr = Address([7u8; 32]);
        assert_eq!(addr.actor_id(), None);
        assert!(format!("{addr}").starts_with("f:0707"));
    }

    #[test]
    fn watch_ids_are_v7_and_unique() {
        let a = WatchId::new();
        let b = WatchId::new();
        assert_ne!(a, b);
        assert_eq!(a.0.get_version_num(), 7);
    }

    #[test]
    fn deal_id_display() {
        assert_eq!(format!("{}", DealId(42)), "deal:42");
        assert_eq!(format!("{}", SectorNumber(7)), "sector:7");
    }
}
