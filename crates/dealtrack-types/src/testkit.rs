//! In-memory chain for tests.
//!
//! [`MockChain`] implements every capability trait in [`crate::chain`] over a
//! single mutex-guarded state. Pushed messages can be executed automatically
//! or left pending until the test includes them with [`MockChain::include`].

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::Notify;

use crate::{
    Address, Block, BlockId, BlockRef, ChainHeadReader, ClientDealProposal, DealId, DealState,
    DealtrackError, MarketBalance, MarketStateReader, Message, MessageId, MessageLookup,
    MessagePool, MessageReceipt, MessageWaiter, MethodNum, MinerStateReader, OnChainDeal,
    ProveCommitSectorParams, PublishStorageDealsParams, Result, STORAGE_MARKET_ACTOR,
    SectorNumber, SectorPreCommitInfo, methods,
};

// ---------------------------------------------------------------------------
// Message builders
// ---------------------------------------------------------------------------

fn call<T: Serialize>(from: Address, to: Address, method: MethodNum, params: &T) -> Message {
    Message {
        from,
        to,
        nonce: 0,
        value: Decimal::ZERO,
        gas_price: Decimal::ZERO,
        gas_limit: 1_000_000,
        method,
        params: serde_json::to_vec(params).unwrap_or_default(),
    }
}

/// A provider's batched publish of `deals`, sent from `worker`.
#[must_use]
pub fn publish_message(worker: Address, deals: Vec<ClientDealProposal>) -> Message {
    call(
        worker,
        STORAGE_MARKET_ACTOR,
        methods::market::PUBLISH_STORAGE_DEALS,
        &PublishStorageDealsParams { deals },
    )
}

/// A pre-commit of `sector` on `miner` holding `deal_ids`.
#[must_use]
pub fn pre_commit_message(
    worker: Address,
    miner: Address,
    sector: u64,
    deal_ids: &[DealId],
) -> Message {
    call(
        worker,
        miner,
        methods::miner::PRE_COMMIT_SECTOR,
        &SectorPreCommitInfo {
            sector_number: SectorNumber(sector),
            seal_rand_epoch: 0,
            deal_ids: deal_ids.to_vec(),
            expiration: 1_000_000,
        },
    )
}

/// A prove-commit of `sector` on `miner`.
#[must_use]
pub fn prove_commit_message(worker: Address, miner: Address, sector: u64) -> Message {
    call(
        worker,
        miner,
        methods::miner::PROVE_COMMIT_SECTOR,
        &ProveCommitSectorParams {
            sector_number: SectorNumber(sector),
            proof: vec![0u8; 32],
        },
    )
}

// ---------------------------------------------------------------------------
// MockChain
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockState {
    head: Option<Block>,
    messages: HashMap<MessageId, Message>,
    receipts: HashMap<MessageId, (BlockRef, MessageReceipt)>,
    balances: HashMap<Address, MarketBalance>,
    deals: HashMap<DealId, OnChainDeal>,
    workers: HashMap<Address, Address>,
    nonces: HashMap<Address, u64>,
    pushed: Vec<Message>,
    auto_receipt: Option<MessageReceipt>,
    balance_queries: usize,
    deal_queries: usize,
    fail_deal_queries: bool,
    query_delay: Option<Duration>,
}

/// In-memory implementation of all chain capabilities.
pub struct MockChain {
    state: Mutex<MockState>,
    included: Notify,
}

impl MockChain {
    /// Empty chain at genesis. Pushed messages stay pending.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                head: Some(Block::genesis()),
                ..MockState::default()
            }),
            included: Notify::new(),
        }
    }

    /// Chain that executes every pushed message immediately with success.
    #[must_use]
    pub fn auto_executing() -> Self {
        let chain = Self::new();
        chain.set_auto_receipt(Some(MessageReceipt::success(Vec::new())));
        chain
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_auto_receipt(&self, receipt: Option<MessageReceipt>) {
        self.state().auto_receipt = receipt;
    }

    pub fn set_head(&self, block: Block) {
        self.state().head = Some(block);
    }

    pub fn set_balance(&self, account: Address, balance: MarketBalance) {
        self.state().balances.insert(account, balance);
    }

    pub fn set_worker(&self, miner: Address, worker: Address) {
        self.state().workers.insert(miner, worker);
    }

    pub fn set_deal(&self, deal_id: DealId, deal: OnChainDeal) {
        self.state().deals.insert(deal_id, deal);
    }

    pub fn set_deal_state(&self, deal_id: DealId, state: DealState) {
        if let Some(deal) = self.state().deals.get_mut(&deal_id) {
            deal.state = state;
        }
    }

    /// Make every deal lookup fail with a chain error.
    pub fn fail_deal_queries(&self, fail: bool) {
        self.state().fail_deal_queries = fail;
    }

    /// Delay every state query, to widen race windows.
    pub fn set_query_delay(&self, delay: Option<Duration>) {
        self.state().query_delay = delay;
    }

    /// Make a message known to the chain without executing it.
    pub fn insert_message(&self, message: Message) -> MessageId {
        let id = message.id();
        self.state().messages.insert(id, message);
        id
    }

    /// Execute a known message at the current head.
    pub fn include(&self, id: MessageId, receipt: MessageReceipt) {
        {
            let mut state = self.state();
            let at = state.head.as_ref().map_or(
                BlockRef {
                    id: BlockId::GENESIS_PARENT,
                    height: 0,
                },
                Block::block_ref,
            );
            state.receipts.insert(id, (at, receipt));
        }
        self.included.notify_waiters();
    }

    /// Every message pushed through [`MessagePool`], in push order.
    #[must_use]
    pub fn pushed_messages(&self) -> Vec<Message> {
        self.state().pushed.clone()
    }

    #[must_use]
    pub fn balance_queries(&self) -> usize {
        self.state().balance_queries
    }

    #[must_use]
    pub fn deal_queries(&self) -> usize {
        self.state().deal_queries
    }

    async fn delay(&self) {
        let delay = self.state().query_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainHeadReader for MockChain {
    async fn chain_head(&self) -> Result<Block> {
        self.state()
            .head
            .clone()
            .ok_or_else(|| DealtrackError::Internal("mock chain has no head".into()))
    }
}

#[async_trait]
impl MessageLookup for MockChain {
    async fn get_message(&self, id: &MessageId) -> Result<Message> {
        self.state()
            .messages
            .get(id)
            .cloned()
            .ok_or(DealtrackError::MessageNotFound(*id))
    }
}

#[async_trait]
impl MessageWaiter for MockChain {
    async fn wait_for_message(&self, id: &MessageId) -> Result<(BlockRef, MessageReceipt)> {
        loop {
            let notified = self.included.notified();
            let found = self.state().receipts.get(id).cloned();
            if let Some(found) = found {
                return Ok(found);
            }
            notified.await;
        }
    }
}

#[async_trait]
impl MessagePool for MockChain {
    async fn push_message(&self, mut message: Message) -> Result<MessageId> {
        let (id, auto) = {
            let mut state = self.state();
            let nonce = state.nonces.entry(message.from).or_insert(0);
            message.nonce = *nonce;
            *nonce += 1;
            let id = message.id();
            state.messages.insert(id, message.clone());
            state.pushed.push(message);
            (id, state.auto_receipt.clone())
        };
        if let Some(receipt) = auto {
            self.include(id, receipt);
        }
        Ok(id)
    }
}

#[async_trait]
impl MarketStateReader for MockChain {
    async fn market_balance(
        &self,
        account: &Address,
        _at: Option<&BlockId>,
    ) -> Result<MarketBalance> {
        self.delay().await;
        let mut state = self.state();
        state.balance_queries += 1;
        Ok(state.balances.get(account).copied().unwrap_or_default())
    }

    async fn get_deal(&self, deal_id: DealId, _at: Option<&BlockId>) -> Result<OnChainDeal> {
        self.delay().await;
        let mut state = self.state();
        state.deal_queries += 1;
        if state.fail_deal_queries {
            return Err(DealtrackError::Chain {
                operation: "get_deal".into(),
                reason: "state tree unavailable".into(),
            });
        }
        state
            .deals
            .get(&deal_id)
            .cloned()
            .ok_or(DealtrackError::DealNotFound(deal_id))
    }

    async fn market_deals(&self, _at: Option<&BlockId>) -> Result<Vec<(DealId, OnChainDeal)>> {
        let mut deals: Vec<_> = self
            .state()
            .deals
            .iter()
            .map(|(id, deal)| (*id, deal.clone()))
            .collect();
        deals.sort_by_key(|(id, _)| *id);
        Ok(deals)
    }
}

#[async_trait]
impl MinerStateReader for MockChain {
    async fn miner_worker(&self, miner: &Address, _at: Option<&BlockId>) -> Result<Address> {
        self.state()
            .workers
            .get(miner)
            .copied()
            .ok_or(DealtrackError::ActorNotFound(*miner))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn transfer(from: Address) -> Message {
        Message {
            from,
            to: STORAGE_MARKET_ACTOR,
            nonce: 0,
            value: Decimal::ONE,
            gas_price: Decimal::ZERO,
            gas_limit: 1,
            method: methods::market::ADD_BALANCE,
            params: Vec::new(),
        }
    }

    #[tokio::test]
    async fn push_assigns_increasing_nonces() {
        let chain = MockChain::new();
        let from = Address([1u8; 32]);
        let a = chain.push_message(transfer(from)).await.unwrap();
        let b = chain.push_message(transfer(from)).await.unwrap();
        assert_ne!(a, b);
        let pushed = chain.pushed_messages();
        assert_eq!(pushed[0].nonce, 0);
        assert_eq!(pushed[1].nonce, 1);
    }

    #[tokio::test]
    async fn wait_resolves_after_include() {
        let chain = Arc::new(MockChain::new());
        let id = chain.insert_message(transfer(Address([1u8; 32])));

        let waiter = {
            let chain = Arc::clone(&chain);
            tokio::spawn(async move { chain.wait_for_message(&id).await })
        };
        tokio::task::yield_now().await;
        chain.include(id, MessageReceipt::success(Vec::new()));

        let (_, receipt) = waiter.await.unwrap().unwrap();
        assert!(receipt.exit_code.is_success());
    }

    #[tokio::test]
    async fn unknown_message_not_found() {
        let chain = MockChain::new();
        let err = chain.get_message(&MessageId([4u8; 32])).await.unwrap_err();
        assert!(matches!(err, DealtrackError::MessageNotFound(_)));
    }
}
