//! Miner actor call parameters relevant to deal activation.
//!
//! A provider activates deals in two steps: a pre-commit naming the sector
//! and the deals it will hold, then a prove-commit for that sector.

use serde::{Deserialize, Serialize};

use crate::{ChainEpoch, DealId, SectorNumber};

/// Params of `PreCommitSector`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorPreCommitInfo {
    pub sector_number: SectorNumber,
    pub seal_rand_epoch: ChainEpoch,
    pub deal_ids: Vec<DealId>,
    pub expiration: ChainEpoch,
}

impl SectorPreCommitInfo {
    #[must_use]
    pub fn contains_deal(&self, deal_id: DealId) -> bool {
        self.deal_ids.contains(&deal_id)
    }
}

/// Params of `ProveCommitSector`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProveCommitSectorParams {
    pub sector_number: SectorNumber,
    pub proof: Vec<u8>,
}
