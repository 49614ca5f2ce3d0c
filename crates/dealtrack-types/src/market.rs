//! Storage market types: proposals, publication batches, escrow balances,
//! on-chain deal state and storage asks.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Address, ChainEpoch, DealId, PieceCid, Signature, constants};

/// Token amounts (escrow, prices, collateral).
pub type TokenAmount = Decimal;

/// Address of the storage market actor that holds escrow and deals.
pub const STORAGE_MARKET_ACTOR: Address = Address::actor(constants::STORAGE_MARKET_ACTOR_ID);

// ---------------------------------------------------------------------------
// Proposals
// ---------------------------------------------------------------------------

/// The terms of a storage deal, authored by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealProposal {
    pub piece_cid: PieceCid,
    /// Padded piece size in bytes.
    pub piece_size: u64,
    pub client: Address,
    pub provider: Address,
    pub start_epoch: ChainEpoch,
    pub end_epoch: ChainEpoch,
    pub storage_price_per_epoch: TokenAmount,
    pub provider_collateral: TokenAmount,
    pub client_collateral: TokenAmount,
}

impl DealProposal {
    /// Canonical encoding, used both for signing and for content equality.
    ///
    /// Format: `"dealtrack:proposal:v1:" || piece_cid || piece_size || client || provider || start || end || price || "|" || pcoll || "|" || ccoll`
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(b"dealtrack:proposal:v1:");
        out.extend_from_slice(&self.piece_cid.0);
        out.extend_from_slice(&self.piece_size.to_le_bytes());
        out.extend_from_slice(self.client.as_bytes());
        out.extend_from_slice(self.provider.as_bytes());
        out.extend_from_slice(&self.start_epoch.to_le_bytes());
        out.extend_from_slice(&self.end_epoch.to_le_bytes());
        out.extend_from_slice(self.storage_price_per_epoch.normalize().to_string().as_bytes());
        out.push(b'|');
        out.extend_from_slice(self.provider_collateral.normalize().to_string().as_bytes());
        out.push(b'|');
        out.extend_from_slice(self.client_collateral.normalize().to_string().as_bytes());
        out
    }

    /// Number of epochs the deal runs for.
    #[must_use]
    pub fn duration(&self) -> ChainEpoch {
        self.end_epoch - self.start_epoch
    }

    /// Total storage fee over the whole deal.
    #[must_use]
    pub fn total_storage_fee(&self) -> TokenAmount {
        self.storage_price_per_epoch * Decimal::from(self.duration())
    }

    /// What the client must have available in escrow for this deal.
    #[must_use]
    pub fn client_balance_requirement(&self) -> TokenAmount {
        self.client_collateral + self.total_storage_fee()
    }
}

/// A proposal together with the client's signature over its canonical
/// encoding. This is what gets published on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDealProposal {
    pub proposal: DealProposal,
    pub client_signature: Signature,
}

impl ClientDealProposal {
    /// Canonical encoding of the signed proposal.
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = self.proposal.canonical_bytes();
        out.extend_from_slice(b"|sig:");
        out.extend_from_slice(&(self.client_signature.0.len() as u64).to_le_bytes());
        out.extend_from_slice(&self.client_signature.0);
        out
    }

    /// Content equality by canonical encoding.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.canonical_bytes() == other.canonical_bytes()
    }
}

/// Params of the market's batched publish method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishStorageDealsParams {
    pub deals: Vec<ClientDealProposal>,
}

/// Return value of the batched publish method: one id per published deal,
/// in batch order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishStorageDealsReturn {
    pub ids: Vec<DealId>,
}

// ---------------------------------------------------------------------------
// Escrow
// ---------------------------------------------------------------------------

/// An account's balance in the storage market actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketBalance {
    /// Total deposited.
    pub escrow: TokenAmount,
    /// Portion backing active deals.
    pub locked: TokenAmount,
}

impl MarketBalance {
    #[must_use]
    pub fn new(escrow: TokenAmount, locked: TokenAmount) -> Self {
        Self { escrow, locked }
    }

    /// Escrow not locked by any deal.
    #[must_use]
    pub fn available(&self) -> TokenAmount {
        self.escrow - self.locked
    }
}

impl Default for MarketBalance {
    fn default() -> Self {
        Self::new(Decimal::ZERO, Decimal::ZERO)
    }
}

// ---------------------------------------------------------------------------
// On-chain deals
// ---------------------------------------------------------------------------

/// Mutable part of a published deal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DealState {
    /// Epoch the sector holding the deal was proven. `None` until activation.
    pub sector_start_epoch: Option<ChainEpoch>,
    pub last_updated_epoch: Option<ChainEpoch>,
    pub slash_epoch: Option<ChainEpoch>,
}

impl DealState {
    /// Whether the provider has proven the deal's data into a sector.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.sector_start_epoch.is_some()
    }
}

/// A deal as stored in market state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnChainDeal {
    pub proposal: DealProposal,
    pub state: DealState,
}

// ---------------------------------------------------------------------------
// Asks
// ---------------------------------------------------------------------------

/// A provider's advertised storage price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageAsk {
    pub price: TokenAmount,
    pub min_piece_size: u64,
    pub miner: Address,
    pub timestamp: ChainEpoch,
    pub expiry: ChainEpoch,
    pub seq_no: u64,
}

impl StorageAsk {
    /// Canonical encoding covered by the ask signature.
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        out.extend_from_slice(b"dealtrack:ask:v1:");
        out.extend_from_slice(self.price.normalize().to_string().as_bytes());
        out.push(b'|');
        out.extend_from_slice(&self.min_piece_size.to_le_bytes());
        out.extend_from_slice(self.miner.as_bytes());
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&self.expiry.to_le_bytes());
        out.extend_from_slice(&self.seq_no.to_le_bytes());
        out
    }
}

/// An ask signed by the miner's worker key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedStorageAsk {
    pub ask: StorageAsk,
    pub signature: Signature,
}

/// Test helpers.
#[cfg(any(test, feature = "test-helpers"))]
impl DealProposal {
    /// A proposal for 100 epochs at the given per-epoch price.
    pub fn dummy(client: Address, provider: Address, price_per_epoch: TokenAmount) -> Self {
        Self {
            piece_cid: PieceCid([0xab; 32]),
            piece_size: 2048,
            client,
            provider,
            start_epoch: 100,
            end_epoch: 200,
            storage_price_per_epoch: price_per_epoch,
            provider_collateral: Decimal::ZERO,
            client_collateral: Decimal::ZERO,
        }
    }

    /// Same terms, different piece.
    #[must_use]
    pub fn with_piece(mut self, seed: u8) -> Self {
        self.piece_cid = PieceCid([seed; 32]);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> Address {
        Address([1u8; 32])
    }

    fn provider() -> Address {
        Address([2u8; 32])
    }

    #[test]
    fn market_actor_is_builtin() {
        assert_eq!(STORAGE_MARKET_ACTOR.actor_id(), Some(5));
    }

    #[test]
    fn canonical_bytes_ignore_decimal_scale() {
        let a = DealProposal::dummy(client(), provider(), Decimal::new(5, 0));
        let b = DealProposal::dummy(client(), provider(), Decimal::new(500, 2));
        assert_eq!(a.canonical_bytes(), b.canonical_bytes());
    }

    #[test]
    fn canonical_bytes_differ_on_terms() {
        let a = DealProposal::dummy(client(), provider(), Decimal::new(5, 0));
        let b = a.clone().with_piece(1);
        assert_ne!(a.canonical_bytes(), b.canonical_bytes());
    }

    #[test]
    fn signed_proposal_equality_covers_signature() {
        let proposal = DealProposal::dummy(client(), provider(), Decimal::ONE);
        let a = ClientDealProposal {
            proposal: proposal.clone(),
            client_signature: Signature(vec![1; 64]),
        };
        let b = ClientDealProposal {
            proposal,
            client_signature: Signature(vec![2; 64]),
        };
        assert!(a.same_content(&a.clone()));
        assert!(!a.same_content(&b));
    }

    #[test]
    fn balance_requirement() {
        let mut p = DealProposal::dummy(client(), provider(), Decimal::new(2, 0));
        p.client_collateral = Decimal::new(10, 0);
        assert_eq!(p.duration(), 100);
        assert_eq!(p.total_storage_fee(), Decimal::new(200, 0));
        assert_eq!(p.client_balance_requirement(), Decimal::new(210, 0));
    }

    #[test]
    fn market_balance_available() {
        let bal = MarketBalance::new(Decimal::new(100, 0), Decimal::new(20, 0));
        assert_eq!(bal.available(), Decimal::new(80, 0));
    }

    #[test]
    fn deal_state_activation() {
        let mut state = DealState::default();
        assert!(!state.is_active());
        state.sector_start_epoch = Some(1012);
        assert!(state.is_active());
    }

    #[test]
    fn activation_at_epoch_zero_counts() {
        let state = DealState {
            sector_start_epoch: Some(0),
            ..DealState::default()
        };
        assert!(state.is_active());
    }
}
