//! Deal settlement coordinator.
//!
//! Thin composition of the escrow ledger, the publication resolver and the
//! confirmation watcher behind the operations a client-side deal flow needs,
//! plus the smaller chain helpers the flow uses along the way (proposal
//! signing, ask validation, deal listing).
//!
//! ## Deal Flow
//!
//! ```text
//! ensure_funds() → [provider publishes] → validate_published_deal()
//!     → watch_for_commitment() → Committed | NotActivated | Error (→ Reverted)
//! ```
//!
//! The coordinator holds only references to its collaborators and propagates
//! the first failure unchanged.

use std::{fmt, sync::Arc};

use dealtrack_escrow::EscrowLedger;
use dealtrack_types::{
    Address, BlockId, BlockRef, ChainHeadReader, ClientDealProposal, DealId, DealProposal,
    DealtrackError, MarketBalance, MarketStateReader, MessageId, MessageLookup, MessagePool,
    MessageWaiter, MinerStateReader, OnChainDeal, Result, ResultExt, SettlementConfig, Signature,
    SignedStorageAsk, Signer, TokenAmount, WatchId, verify_signature,
};
use dealtrack_watch::{
    ChainFeed, ConfirmationWatcher, DealActivationCheck, SectorCommitMatcher, WatchHandle,
    WatchOutcome, WatchParams,
};
use tracing::{info, warn};

use crate::resolver::PublicationResolver;

/// Everything a full node client offers. Implemented automatically for any
/// type implementing all capability traits.
pub trait FullNode:
    ChainHeadReader + MessageLookup + MessageWaiter + MessagePool + MarketStateReader + MinerStateReader
{
}

impl<T> FullNode for T where
    T: ChainHeadReader
        + MessageLookup
        + MessageWaiter
        + MessagePool
        + MarketStateReader
        + MinerStateReader
{
}

// ---------------------------------------------------------------------------
// Commitment events
// ---------------------------------------------------------------------------

/// What a commitment watch reports about a deal.
#[derive(Debug)]
pub enum CommitmentEvent {
    /// The deal's data is proven into a sector.
    Committed { deal_id: DealId, at: BlockRef },
    /// The provider didn't pre-commit the deal within the wait budget.
    NotActivated { deal_id: DealId, at: BlockRef },
    /// The watch failed.
    Error(DealtrackError),
    /// The commitment reported earlier was reverted. Informational.
    Reverted { deal_id: DealId, at: BlockRef },
}

impl CommitmentEvent {
    fn from_outcome(deal_id: DealId, outcome: WatchOutcome) -> Self {
        match outcome {
            WatchOutcome::Satisfied { at } => Self::Committed { deal_id, at },
            WatchOutcome::TimedOut { at } => Self::NotActivated { deal_id, at },
            WatchOutcome::Failed(err) => Self::Error(err.context(format!("watching {deal_id}"))),
            WatchOutcome::Reverted { at } => Self::Reverted { deal_id, at },
        }
    }

    /// Whether this is the single terminal event of a watch.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Reverted { .. })
    }
}

impl fmt::Display for CommitmentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Committed { deal_id, at } => write!(f, "{deal_id} committed at {}", at.height),
            Self::NotActivated { deal_id, at } => {
                write!(f, "{deal_id} not activated by {}", at.height)
            }
            Self::Error(err) => write!(f, "{err}"),
            Self::Reverted { deal_id, at } => {
                write!(f, "{deal_id} commitment at {} reverted", at.height)
            }
        }
    }
}

/// Stream of [`CommitmentEvent`]s for one deal. Dropping it cancels the watch.
pub struct CommitmentWatch {
    deal_id: DealId,
    handle: WatchHandle,
}

impl CommitmentWatch {
    #[must_use]
    pub fn deal_id(&self) -> DealId {
        self.deal_id
    }

    #[must_use]
    pub fn id(&self) -> WatchId {
        self.handle.id()
    }

    /// Next event, or `None` once the watch has stopped.
    pub async fn next(&mut self) -> Option<CommitmentEvent> {
        let outcome = self.handle.next().await?;
        Some(CommitmentEvent::from_outcome(self.deal_id, outcome))
    }

    /// Stop watching without a terminal event.
    pub fn cancel(&mut self) {
        self.handle.cancel();
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Client-side deal settlement: funds, publication, commitment.
pub struct DealSettlementCoordinator {
    ledger: EscrowLedger,
    resolver: PublicationResolver,
    watcher: ConfirmationWatcher,
    head: Arc<dyn ChainHeadReader>,
    market: Arc<dyn MarketStateReader>,
    miners: Arc<dyn MinerStateReader>,
    signer: Arc<dyn Signer>,
    params: WatchParams,
}

impl DealSettlementCoordinator {
    /// Wire the components over `node`. Head changes are announced through
    /// [`Self::feed`], buffered up to `config.feed_capacity` per watch.
    ///
    /// # Errors
    /// Returns `Configuration` if `config` fails validation.
    pub fn new<N>(node: Arc<N>, signer: Arc<dyn Signer>, config: &SettlementConfig) -> Result<Self>
    where
        N: FullNode + 'static,
    {
        config.validate()?;
        let feed = ChainFeed::new(config.feed_capacity);
        Ok(Self {
            ledger: EscrowLedger::new(node.clone(), node.clone(), node.clone(), config),
            resolver: PublicationResolver::new(node.clone(), node.clone(), node.clone()),
            watcher: ConfirmationWatcher::new(feed, node.clone()),
            head: node.clone(),
            market: node.clone(),
            miners: node,
            signer,
            params: WatchParams::from_config(config),
        })
    }

    #[must_use]
    pub fn ledger(&self) -> &EscrowLedger {
        &self.ledger
    }

    /// Feed the node's head changes are published to.
    #[must_use]
    pub fn feed(&self) -> &ChainFeed {
        self.watcher.feed()
    }

    // -----------------------------------------------------------------------
    // Funds
    // -----------------------------------------------------------------------

    /// Reserve `amount` of `client`'s escrow for a deal, topping up from
    /// `wallet` if needed. See [`EscrowLedger::ensure_available`].
    ///
    /// # Errors
    /// Propagates ledger errors.
    pub async fn ensure_funds(
        &self,
        client: Address,
        wallet: Address,
        amount: TokenAmount,
    ) -> Result<Option<MessageId>> {
        self.ledger.ensure_available(client, wallet, amount).await
    }

    /// # Errors
    /// Propagates ledger errors.
    pub async fn add_funds(&self, account: Address, amount: TokenAmount) -> Result<MessageId> {
        self.ledger.add_funds(account, amount).await
    }

    /// # Errors
    /// Propagates chain query errors.
    pub async fn get_balance(
        &self,
        account: &Address,
        at: Option<&BlockId>,
    ) -> Result<MarketBalance> {
        self.ledger.get_balance(account, at).await
    }

    // -----------------------------------------------------------------------
    // Publication
    // -----------------------------------------------------------------------

    /// Find the id the chain assigned to `deal` in the publish message
    /// `publish`. See [`PublicationResolver::resolve`].
    ///
    /// # Errors
    /// Propagates resolver errors.
    pub async fn validate_published_deal(
        &self,
        publish: &MessageId,
        deal: &ClientDealProposal,
    ) -> Result<DealId> {
        self.resolver.resolve(publish, deal).await
    }

    // -----------------------------------------------------------------------
    // Commitment
    // -----------------------------------------------------------------------

    /// Watch for `provider` committing `deal_id` into a sector, with the
    /// configured depth, budget and revert window.
    #[must_use]
    pub fn watch_for_commitment(&self, provider: Address, deal_id: DealId) -> CommitmentWatch {
        self.watch_for_commitment_with(provider, deal_id, self.params)
    }

    /// Like [`Self::watch_for_commitment`] with explicit parameters.
    #[must_use]
    pub fn watch_for_commitment_with(
        &self,
        provider: Address,
        deal_id: DealId,
        params: WatchParams,
    ) -> CommitmentWatch {
        info!(
            provider = %provider,
            deal = %deal_id,
            depth = params.confirmation_depth,
            "watching for sector commitment"
        );
        let check = Arc::new(DealActivationCheck::new(Arc::clone(&self.market), deal_id));
        let handle = self
            .watcher
            .watch(SectorCommitMatcher::new(provider, deal_id), check, params);
        CommitmentWatch { deal_id, handle }
    }

    /// Callback form of [`Self::watch_for_commitment`]: `callback` runs once
    /// with the terminal event. A later revert is only logged.
    pub fn on_deal_sector_committed<F>(&self, provider: Address, deal_id: DealId, callback: F)
    where
        F: FnOnce(CommitmentEvent) + Send + 'static,
    {
        let mut watch = self.watch_for_commitment(provider, deal_id);
        tokio::spawn(async move {
            let mut callback = Some(callback);
            while let Some(event) = watch.next().await {
                if event.is_terminal() {
                    if let Some(callback) = callback.take() {
                        callback(event);
                    }
                } else {
                    warn!(deal = %deal_id, event = %event, "deal activation reverted");
                }
            }
        });
    }

    // -----------------------------------------------------------------------
    // Signatures
    // -----------------------------------------------------------------------

    /// Sign `proposal` as `signer`.
    ///
    /// # Errors
    /// Returns `UnknownAccount` if the wallet holds no key for `signer`.
    pub async fn sign_proposal(
        &self,
        signer: &Address,
        proposal: DealProposal,
    ) -> Result<ClientDealProposal> {
        let client_signature = self
            .signer
            .sign(signer, &proposal.canonical_bytes())
            .await
            .context("signing deal proposal")?;
        Ok(ClientDealProposal {
            proposal,
            client_signature,
        })
    }

    /// Default wallet address.
    ///
    /// # Errors
    /// Returns an error if the wallet has no default address.
    pub async fn default_wallet(&self) -> Result<Address> {
        self.signer.default_address().await
    }

    #[must_use]
    pub fn verify_signature(&self, signature: &Signature, account: &Address, data: &[u8]) -> bool {
        verify_signature(signature, account, data)
    }

    /// Whether `ask` is signed by its miner's worker key.
    ///
    /// # Errors
    /// Returns `ActorNotFound` if the ask names an unknown miner.
    pub async fn validate_ask_signature(&self, ask: &SignedStorageAsk) -> Result<bool> {
        let worker = self
            .miners
            .miner_worker(&ask.ask.miner, None)
            .await
            .with_context(|| format!("getting worker of {}", ask.ask.miner))?;
        let valid = verify_signature(&ask.signature, &worker, &ask.ask.canonical_bytes());
        if !valid {
            warn!(miner = %ask.ask.miner, "storage ask signature invalid");
        }
        Ok(valid)
    }

    // -----------------------------------------------------------------------
    // Chain queries
    // -----------------------------------------------------------------------

    /// Deals on chain whose client is `client`, ordered by deal id.
    ///
    /// # Errors
    /// Propagates chain query errors.
    pub async fn list_client_deals(
        &self,
        client: &Address,
        at: Option<&BlockId>,
    ) -> Result<Vec<(DealId, OnChainDeal)>> {
        let mut deals: Vec<_> = self
            .market
            .market_deals(at)
            .await
            .context("listing market deals")?
            .into_iter()
            .filter(|(_, deal)| deal.proposal.client == *client)
            .collect();
        deals.sort_by_key(|(id, _)| *id);
        Ok(deals)
    }

    /// Current head of the canonical branch.
    ///
    /// # Errors
    /// Propagates chain query errors.
    pub async fn chain_head(&self) -> Result<BlockRef> {
        let head = self.head.chain_head().await.context("reading chain head")?;
        Ok(head.block_ref())
    }
}
