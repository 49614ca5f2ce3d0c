//! Narrow capability traits over the chain node.
//!
//! Each component receives only the capabilities it uses. A full node client
//! implements all of them; tests use `testkit::MockChain`.
//!
//! State queries take an optional block id: `None` means "as of the current
//! head".

use async_trait::async_trait;

use crate::{
    Address, Block, BlockId, BlockRef, DealId, MarketBalance, Message, MessageId, MessageReceipt,
    OnChainDeal, Result,
};

/// Read the current head of the canonical branch.
#[async_trait]
pub trait ChainHeadReader: Send + Sync {
    async fn chain_head(&self) -> Result<Block>;
}

/// Look up a message by id.
#[async_trait]
pub trait MessageLookup: Send + Sync {
    /// # Errors
    /// Returns `MessageNotFound` if the chain has never seen the message.
    async fn get_message(&self, id: &MessageId) -> Result<Message>;
}

/// Wait for a message to be included and executed.
#[async_trait]
pub trait MessageWaiter: Send + Sync {
    /// Suspends until the message is included on the canonical branch and
    /// executed, then returns the including block and the receipt. Has no
    /// timeout of its own.
    async fn wait_for_message(&self, id: &MessageId) -> Result<(BlockRef, MessageReceipt)>;
}

/// Submit messages for inclusion.
#[async_trait]
pub trait MessagePool: Send + Sync {
    /// Assign a nonce, sign and broadcast. Acceptance into the pool is the
    /// only guarantee.
    async fn push_message(&self, message: Message) -> Result<MessageId>;
}

/// Read storage market actor state.
#[async_trait]
pub trait MarketStateReader: Send + Sync {
    async fn market_balance(&self, account: &Address, at: Option<&BlockId>)
    -> Result<MarketBalance>;

    /// # Errors
    /// Returns `DealNotFound` if no deal with this id exists as of `at`.
    async fn get_deal(&self, deal_id: DealId, at: Option<&BlockId>) -> Result<OnChainDeal>;

    async fn market_deals(&self, at: Option<&BlockId>) -> Result<Vec<(DealId, OnChainDeal)>>;
}

/// Read storage miner actor state.
#[async_trait]
pub trait MinerStateReader: Send + Sync {
    /// The key authorized to send messages on behalf of `miner`.
    ///
    /// # Errors
    /// Returns `ActorNotFound` if `miner` is not a miner actor.
    async fn miner_worker(&self, miner: &Address, at: Option<&BlockId>) -> Result<Address>;
}
