//! Blocks and head-change events as seen by a client-side observer.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{BlockId, ChainEpoch, Message};

/// A block on some branch of the chain, with the messages it includes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub parent: BlockId,
    pub height: ChainEpoch,
    pub timestamp: DateTime<Utc>,
    pub messages: Vec<Message>,
}

impl Block {
    /// Build a block, deriving its id from its contents.
    #[must_use]
    pub fn new(parent: BlockId, height: ChainEpoch, messages: Vec<Message>) -> Self {
        let timestamp = Utc::now();
        let id = Self::compute_id(parent, height, timestamp, &messages);
        Self {
            id,
            parent,
            height,
            timestamp,
            messages,
        }
    }

    /// First block of a chain.
    #[must_use]
    pub fn genesis() -> Self {
        Self::new(BlockId::GENESIS_PARENT, 0, Vec::new())
    }

    /// A block extending `self` by one height.
    #[must_use]
    pub fn child(&self, messages: Vec<Message>) -> Self {
        Self::new(self.id, self.height + 1, messages)
    }

    #[must_use]
    pub fn block_ref(&self) -> BlockRef {
        BlockRef {
            id: self.id,
            height: self.height,
        }
    }

    fn compute_id(
        parent: BlockId,
        height: ChainEpoch,
        timestamp: DateTime<Utc>,
        messages: &[Message],
    ) -> BlockId {
        let mut hasher = Sha256::new();
        hasher.update(b"dealtrack:block:v1:");
        hasher.update(parent.0);
        hasher.update(height.to_le_bytes());
        hasher.update(timestamp.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
        hasher.update((messages.len() as u64).to_le_bytes());
        for msg in messages {
            hasher.update(msg.id().0);
        }
        let mut id = [0u8; 32];
        id.copy_from_slice(&hasher.finalize());
        BlockId(id)
    }
}

/// Lightweight pointer to a block: enough to anchor watch state and to
/// query state "as of" that block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRef {
    pub id: BlockId,
    pub height: ChainEpoch,
}

/// One event on the canonical-branch feed.
///
/// Apply events arrive in strictly increasing height order. When the branch
/// switches, the abandoned blocks are reverted (highest first) before the
/// replacement blocks are applied.
#[derive(Debug, Clone)]
pub enum HeadChange {
    Apply(Arc<Block>),
    Revert(Arc<Block>),
}

impl HeadChange {
    #[must_use]
    pub fn block(&self) -> &Block {
        match self {
            Self::Apply(block) | Self::Revert(block) => block,
        }
    }
}
