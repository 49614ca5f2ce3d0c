//! Async driver for confirmation watches.
//!
//! [`ChainFeed`] fans head changes out to every registered watch over a
//! broadcast channel. [`ConfirmationWatcher::watch`] subscribes to the feed,
//! then spawns one task per watch that runs the already-satisfied check,
//! feeds head changes into a [`WatchMachine`] and carries out its effects.
//! Slow state queries in one watch never hold up the feed or other watches.
//!
//! A watch that falls more than the feed capacity behind can't know what it
//! missed and fails with `FeedLagged`.

use std::{collections::VecDeque, sync::Arc};

use async_trait::async_trait;
use dealtrack_types::{
    Block, BlockId, BlockRef, ChainHeadReader, DealId, DealtrackError, HeadChange,
    MarketStateReader, Result, ResultExt, WatchId,
};
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc, oneshot,
};
use tracing::{debug, error, info, warn};

use crate::{
    machine::{Effect, WatchMachine, WatchOutcome, WatchParams},
    matcher::TwoPhaseMatcher,
};

// ---------------------------------------------------------------------------
// State checks
// ---------------------------------------------------------------------------

/// Decides from chain state whether the watched condition already holds.
#[async_trait]
pub trait StateCheck: Send + Sync {
    /// Evaluate as of block `at` (`None` = current head).
    async fn is_satisfied(&self, at: Option<&BlockId>) -> Result<bool>;
}

/// Satisfied once the deal's sector start epoch is set.
pub struct DealActivationCheck {
    market: Arc<dyn MarketStateReader>,
    deal_id: DealId,
}

impl DealActivationCheck {
    #[must_use]
    pub fn new(market: Arc<dyn MarketStateReader>, deal_id: DealId) -> Self {
        Self { market, deal_id }
    }
}

#[async_trait]
impl StateCheck for DealActivationCheck {
    async fn is_satisfied(&self, at: Option<&BlockId>) -> Result<bool> {
        let deal = self
            .market
            .get_deal(self.deal_id, at)
            .await
            .with_context(|| format!("looking up {}", self.deal_id))?;
        Ok(deal.state.is_active())
    }
}

// ---------------------------------------------------------------------------
// Feed
// ---------------------------------------------------------------------------

/// Ordered stream of canonical-branch head changes, shared by all watches.
#[derive(Clone)]
pub struct ChainFeed {
    tx: broadcast::Sender<HeadChange>,
}

impl ChainFeed {
    /// # Panics
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Announce a block joining the canonical branch. Returns the number of
    /// watches it was delivered to.
    pub fn apply(&self, block: impl Into<Arc<Block>>) -> usize {
        self.publish(HeadChange::Apply(block.into()))
    }

    /// Announce a block leaving the canonical branch.
    pub fn revert(&self, block: impl Into<Arc<Block>>) -> usize {
        self.publish(HeadChange::Revert(block.into()))
    }

    pub fn publish(&self, change: HeadChange) -> usize {
        // No subscribers is not an error.
        self.tx.send(change).unwrap_or(0)
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HeadChange> {
        self.tx.subscribe()
    }

    /// Number of live watches.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

// ---------------------------------------------------------------------------
// Watcher
// ---------------------------------------------------------------------------

/// Registers watches against a shared feed.
pub struct ConfirmationWatcher {
    feed: ChainFeed,
    head: Arc<dyn ChainHeadReader>,
}

impl ConfirmationWatcher {
    #[must_use]
    pub fn new(feed: ChainFeed, head: Arc<dyn ChainHeadReader>) -> Self {
        Self { feed, head }
    }

    #[must_use]
    pub fn feed(&self) -> &ChainFeed {
        &self.feed
    }

    /// Start watching for `matcher`'s pattern, with `check` deciding whether
    /// the condition already holds and confirming it at depth.
    ///
    /// The feed subscription is taken before this returns, so head changes
    /// published afterwards are never missed.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    pub fn watch<M>(&self, matcher: M, check: Arc<dyn StateCheck>, params: WatchParams) -> WatchHandle
    where
        M: TwoPhaseMatcher + 'static,
        M::Key: 'static,
    {
        let id = WatchId::new();
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let task = WatchTask {
            id,
            machine: WatchMachine::new(matcher, params),
            check,
            head: Arc::clone(&self.head),
            feed: self.feed.subscribe(),
            outcomes: outcome_tx,
        };
        debug!(
            watch = %id,
            depth = params.confirmation_depth,
            max_wait = params.max_wait_epochs,
            "watch registered"
        );
        tokio::spawn(task.run(cancel_rx));

        WatchHandle {
            id,
            outcomes: outcome_rx,
            cancel: Some(cancel_tx),
        }
    }
}

/// Owner's side of one watch. Dropping it cancels the watch.
pub struct WatchHandle {
    id: WatchId,
    outcomes: mpsc::UnboundedReceiver<WatchOutcome>,
    cancel: Option<oneshot::Sender<()>>,
}

impl WatchHandle {
    #[must_use]
    pub fn id(&self) -> WatchId {
        self.id
    }

    /// Next outcome, or `None` once the watch has stopped.
    pub async fn next(&mut self) -> Option<WatchOutcome> {
        self.outcomes.recv().await
    }

    /// Stop the watch. No further outcomes are delivered.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            // The task may already be gone.
            let _ = cancel.send(());
        }
        // Closing stops new sends; outcomes already queued are discarded.
        self.outcomes.close();
        while self.outcomes.try_recv().is_ok() {}
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

struct WatchTask<M: TwoPhaseMatcher> {
    id: WatchId,
    machine: WatchMachine<M>,
    check: Arc<dyn StateCheck>,
    head: Arc<dyn ChainHeadReader>,
    feed: broadcast::Receiver<HeadChange>,
    outcomes: mpsc::UnboundedSender<WatchOutcome>,
}

impl<M: TwoPhaseMatcher> WatchTask<M> {
    async fn run(mut self, mut cancel: oneshot::Receiver<()>) {
        let effects = match self.initial_check().await {
            Ok((head, satisfied)) => self.machine.start(head, satisfied),
            Err(err) => self.machine.fail(err),
        };
        self.handle(effects).await;

        while !self.machine.is_finished() {
            let change = tokio::select! {
                biased;
                _ = &mut cancel => {
                    self.machine.cancel();
                    debug!(watch = %self.id, "watch cancelled");
                    break;
                }
                change = self.feed.recv() => change,
            };

            let before = self.machine.phase();
            let effects = match change {
                Ok(HeadChange::Apply(block)) => self.machine.apply(&block),
                Ok(HeadChange::Revert(block)) => self.machine.revert(&block),
                Err(RecvError::Lagged(skipped)) => {
                    self.machine.fail(DealtrackError::FeedLagged { skipped })
                }
                Err(RecvError::Closed) => self.machine.fail(DealtrackError::FeedClosed),
            };
            let after = self.machine.phase();
            if before != after {
                debug!(watch = %self.id, from = %before, to = %after, "watch phase changed");
            }

            self.handle(effects).await;
        }
        debug!(watch = %self.id, phase = %self.machine.phase(), "watch finished");
    }

    async fn initial_check(&self) -> Result<(BlockRef, bool)> {
        let head = self
            .head
            .chain_head()
            .await
            .context("reading chain head")?;
        let satisfied = self.check.is_satisfied(Some(&head.id)).await?;
        Ok((head.block_ref(), satisfied))
    }

    async fn handle(&mut self, effects: Vec<Effect>) {
        let mut queue = VecDeque::from(effects);
        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::Verify { tip } => {
                    debug!(watch = %self.id, tip = tip.height, "verifying confirmation");
                    let result = self.check.is_satisfied(Some(&tip.id)).await;
                    queue.extend(self.machine.verified(result));
                }
                Effect::Fire(outcome) => self.fire(outcome),
            }
        }
    }

    fn fire(&mut self, outcome: WatchOutcome) {
        match &outcome {
            WatchOutcome::Satisfied { at } => {
                info!(watch = %self.id, height = at.height, "watch satisfied");
            }
            WatchOutcome::TimedOut { at } => {
                info!(watch = %self.id, height = at.height, "watch timed out");
            }
            WatchOutcome::Failed(err) => {
                error!(watch = %self.id, error = %err, "watch failed");
            }
            WatchOutcome::Reverted { at } => {
                warn!(watch = %self.id, height = at.height, "confirmed match reverted");
            }
        }
        if self.outcomes.send(outcome).is_err() {
            // Owner is gone; nobody left to tell.
            self.machine.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use dealtrack_types::{
        Address, DealProposal, DealState, OnChainDeal,
        testkit::{MockChain, pre_commit_message, prove_commit_message},
    };
    use rust_decimal::Decimal;

    use super::*;
    use crate::matcher::SectorCommitMatcher;

    const DEAL: DealId = DealId(42);

    fn provider() -> Address {
        Address::actor(1000)
    }

    fn worker() -> Address {
        Address([0xee; 32])
    }

    fn params(depth: u64, max_wait: u64) -> WatchParams {
        WatchParams {
            confirmation_depth: depth,
            max_wait_epochs: max_wait,
            revert_window_epochs: 20,
        }
    }

    fn active() -> DealState {
        DealState {
            sector_start_epoch: Some(1010),
            ..DealState::default()
        }
    }

    struct Fixture {
        chain: Arc<MockChain>,
        watcher: ConfirmationWatcher,
        tip: Block,
    }

    impl Fixture {
        fn new(head_height: i64, capacity: usize) -> Self {
            let chain = Arc::new(MockChain::new());
            let head = Block::new(BlockId([9u8; 32]), head_height, Vec::new());
            chain.set_head(head.clone());
            chain.set_deal(
                DEAL,
                OnChainDeal {
                    proposal: DealProposal::dummy(Address([1u8; 32]), provider(), Decimal::ONE),
                    state: DealState::default(),
                },
            );
            let watcher = ConfirmationWatcher::new(ChainFeed::new(capacity), chain.clone());
            Self {
                chain,
                watcher,
                tip: head,
            }
        }

        fn watch(&self, params: WatchParams) -> WatchHandle {
            let check = Arc::new(DealActivationCheck::new(self.chain.clone(), DEAL));
            self.watcher
                .watch(SectorCommitMatcher::new(provider(), DEAL), check, params)
        }

        /// Wait until the watch task has run its initial check.
        async fn registered(&self) {
            tokio::time::timeout(Duration::from_secs(5), async {
                while self.chain.deal_queries() == 0 {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            })
            .await
            .unwrap();
        }

        fn extend(&mut self, messages: Vec<dealtrack_types::Message>) -> Block {
            let block = self.tip.child(messages);
            self.watcher.feed().apply(block.clone());
            self.tip = block.clone();
            block
        }

        fn extend_to(&mut self, height: i64) {
            while self.tip.height < height {
                self.extend(Vec::new());
            }
        }
    }

    async fn next(handle: &mut WatchHandle) -> Option<WatchOutcome> {
        tokio::time::timeout(Duration::from_secs(5), handle.next())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn already_active_deal_fires_without_feed() {
        let fx = Fixture::new(990, 16);
        fx.chain.set_deal_state(DEAL, active());

        let mut handle = fx.watch(params(5, 2500));
        let outcome = next(&mut handle).await.unwrap();
        assert!(matches!(outcome, WatchOutcome::Satisfied { at } if at.height == 990));
        assert!(next(&mut handle).await.is_none());
    }

    #[tokio::test]
    async fn commitment_confirmed_at_depth() {
        let mut fx = Fixture::new(990, 64);
        let mut handle = fx.watch(params(5, 2500));
        fx.registered().await;

        fx.extend_to(999);
        fx.extend(vec![pre_commit_message(worker(), provider(), 7, &[DEAL])]);
        fx.extend_to(1009);
        fx.extend(vec![prove_commit_message(worker(), provider(), 7)]);
        fx.chain.set_deal_state(DEAL, active());
        fx.extend_to(1015);

        let outcome = next(&mut handle).await.unwrap();
        assert!(matches!(outcome, WatchOutcome::Satisfied { at } if at.height == 1015));
    }

    #[tokio::test]
    async fn revert_after_confirmation_is_reported() {
        let mut fx = Fixture::new(990, 64);
        let mut handle = fx.watch(params(2, 2500));
        fx.registered().await;

        fx.extend(vec![pre_commit_message(worker(), provider(), 7, &[DEAL])]);
        let matched = fx.extend(vec![prove_commit_message(worker(), provider(), 7)]);
        fx.chain.set_deal_state(DEAL, active());
        fx.extend_to(matched.height + 2);

        let outcome = next(&mut handle).await.unwrap();
        assert!(matches!(outcome, WatchOutcome::Satisfied { .. }));

        fx.watcher.feed().revert(fx.tip.clone());
        fx.watcher.feed().revert(matched.clone());
        let outcome = next(&mut handle).await.unwrap();
        assert!(matches!(outcome, WatchOutcome::Reverted { at } if at.height == matched.height));
        assert!(next(&mut handle).await.is_none());
    }

    #[tokio::test]
    async fn no_pre_commit_times_out() {
        let mut fx = Fixture::new(0, 64);
        let mut handle = fx.watch(params(5, 10));
        fx.registered().await;

        fx.extend_to(10);
        let outcome = next(&mut handle).await.unwrap();
        assert!(matches!(outcome, WatchOutcome::TimedOut { at } if at.height == 10));
        assert!(next(&mut handle).await.is_none());
    }

    #[tokio::test]
    async fn verification_failure_is_fatal() {
        let mut fx = Fixture::new(990, 64);
        let mut handle = fx.watch(params(1, 2500));
        fx.registered().await;

        fx.extend(vec![pre_commit_message(worker(), provider(), 7, &[DEAL])]);
        fx.extend(vec![prove_commit_message(worker(), provider(), 7)]);
        fx.chain.fail_deal_queries(true);
        fx.extend(Vec::new());

        let outcome = next(&mut handle).await.unwrap();
        let WatchOutcome::Failed(err) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(matches!(err.root(), DealtrackError::Chain { .. }));
    }

    #[tokio::test]
    async fn lagging_watch_fails() {
        let mut fx = Fixture::new(0, 2);
        let mut handle = fx.watch(params(5, 2500));
        // Current-thread runtime: the watch task has not run yet.
        fx.extend_to(10);

        let outcome = next(&mut handle).await.unwrap();
        assert!(matches!(
            outcome,
            WatchOutcome::Failed(DealtrackError::FeedLagged { .. })
        ));
    }

    #[tokio::test]
    async fn closed_feed_fails_watch() {
        let fx = Fixture::new(0, 16);
        let mut handle = fx.watch(params(5, 2500));
        fx.registered().await;
        drop(fx);

        let outcome = next(&mut handle).await.unwrap();
        assert!(matches!(outcome, WatchOutcome::Failed(DealtrackError::FeedClosed)));
    }

    #[tokio::test]
    async fn cancelled_watch_fires_nothing() {
        let mut fx = Fixture::new(990, 64);
        let mut handle = fx.watch(params(0, 2500));
        fx.registered().await;

        handle.cancel();
        fx.extend(vec![pre_commit_message(worker(), provider(), 7, &[DEAL])]);
        fx.extend(vec![prove_commit_message(worker(), provider(), 7)]);
        fx.chain.set_deal_state(DEAL, active());
        fx.extend(Vec::new());

        assert!(next(&mut handle).await.is_none());
    }

    #[tokio::test]
    async fn cancel_discards_queued_outcome() {
        let fx = Fixture::new(990, 16);
        fx.chain.set_deal_state(DEAL, active());

        let mut handle = fx.watch(params(5, 2500));
        fx.registered().await;
        // Let the task deliver its outcome into the queue.
        tokio::time::sleep(Duration::from_millis(20)).await;

        handle.cancel();
        assert!(next(&mut handle).await.is_none());
    }

    #[tokio::test]
    async fn finished_watch_unsubscribes() {
        let mut fx = Fixture::new(0, 64);
        let mut handle = fx.watch(params(5, 3));
        fx.registered().await;
        assert_eq!(fx.watcher.feed().subscriber_count(), 1);

        fx.extend_to(3);
        assert!(next(&mut handle).await.is_some());
        assert!(next(&mut handle).await.is_none());
        assert_eq!(fx.watcher.feed().subscriber_count(), 0);
    }
}
