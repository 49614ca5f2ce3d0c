//! Message matchers for two-phase watches.
//!
//! A two-phase watch looks for a first message that yields a correlation key,
//! then for a second message carrying the same key. Matchers are pure: they
//! look at one message at a time and never touch chain state.
//!
//! ```text
//! match_first(msg)       -> Some(key) | None
//! match_second(msg, key) -> bool
//! ```

use std::fmt;

use dealtrack_types::{
    Address, DealId, Message, ProveCommitSectorParams, Result, ResultExt, SectorNumber,
    SectorPreCommitInfo, methods,
};

/// A temporal pattern of two causally linked messages.
pub trait TwoPhaseMatcher: Send + Sync {
    /// Correlates the second message with the first.
    type Key: Clone + PartialEq + fmt::Debug + Send + Sync;

    /// Returns the correlation key if `msg` starts the pattern.
    ///
    /// # Errors
    /// Returns an error if `msg` looks relevant but can't be decoded.
    fn match_first(&self, msg: &Message) -> Result<Option<Self::Key>>;

    /// Whether `msg` completes the pattern started under `key`.
    ///
    /// # Errors
    /// Returns an error if `msg` looks relevant but can't be decoded.
    fn match_second(&self, msg: &Message, key: &Self::Key) -> Result<bool>;
}

/// Matches a provider pre-committing a sector that holds a deal, then
/// prove-committing that same sector.
#[derive(Debug, Clone)]
pub struct SectorCommitMatcher {
    provider: Address,
    deal_id: DealId,
}

impl SectorCommitMatcher {
    #[must_use]
    pub fn new(provider: Address, deal_id: DealId) -> Self {
        Self { provider, deal_id }
    }

    #[must_use]
    pub fn provider(&self) -> Address {
        self.provider
    }

    #[must_use]
    pub fn deal_id(&self) -> DealId {
        self.deal_id
    }
}

impl TwoPhaseMatcher for SectorCommitMatcher {
    type Key = SectorNumber;

    fn match_first(&self, msg: &Message) -> Result<Option<SectorNumber>> {
        if msg.to != self.provider || msg.method != methods::miner::PRE_COMMIT_SECTOR {
            return Ok(None);
        }
        let info: SectorPreCommitInfo = msg
            .decode_params()
            .with_context(|| format!("decoding pre-commit {}", msg.id()))?;
        Ok(info
            .contains_deal(self.deal_id)
            .then_some(info.sector_number))
    }

    fn match_second(&self, msg: &Message, key: &SectorNumber) -> Result<bool> {
        if msg.to != self.provider || msg.method != methods::miner::PROVE_COMMIT_SECTOR {
            return Ok(false);
        }
        let params: ProveCommitSectorParams = msg
            .decode_params()
            .with_context(|| format!("decoding prove-commit {}", msg.id()))?;
        Ok(params.sector_number == *key)
    }
}
