//! Pure two-phase confirmation state machine.
//!
//! The machine never performs I/O. The driver feeds it head changes and the
//! results of state checks; it answers with [`Effect`]s for the driver to
//! carry out.
//!
//! ```text
//! INIT       → CLOSED            already satisfied (fires Satisfied)
//! INIT       → WATCHING          otherwise
//! WATCHING   → CANDIDATE         first-phase match, key recorded
//! CANDIDATE  → CANDIDATE         later first-phase match replaces key
//! CANDIDATE  → CONFIRMING        second-phase match at height H
//! CONFIRMING → CONFIRMED         tip ≥ H + depth and state verified (fires Satisfied)
//! CANDIDATE  → WATCHING          anchor reverted
//! CONFIRMING → WATCHING          block at or below H reverted
//! CONFIRMED  → CLOSED            block at or below H reverted (fires Reverted)
//! CONFIRMED  → CLOSED            revert window elapsed
//! WATCHING, CANDIDATE → TIMED_OUT    deadline reached (fires TimedOut)
//! any        → FAILED            match or verification error (fires Failed)
//! ```
//!
//! Every path fires at most one terminal outcome (`Satisfied`, `TimedOut` or
//! `Failed`). `Reverted` may follow `Satisfied` while the revert window is
//! open; the watch is never re-armed.

use std::fmt;

use dealtrack_types::{Block, BlockRef, ChainEpoch, DealtrackError, Result, SettlementConfig};

use crate::matcher::TwoPhaseMatcher;

/// What a watch reports to its owner.
#[derive(Debug)]
pub enum WatchOutcome {
    /// The condition holds: either at registration, or confirmed at `at`.
    Satisfied { at: BlockRef },
    /// The first phase was not completed before the max-wait budget ran out.
    TimedOut { at: BlockRef },
    /// The watch could not continue.
    Failed(DealtrackError),
    /// A block holding the confirmed match was reverted. Informational.
    Reverted { at: BlockRef },
}

impl WatchOutcome {
    /// Whether this is the single terminal outcome of a watch.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Reverted { .. })
    }
}

/// Work the driver must do on behalf of the machine.
#[derive(Debug)]
pub enum Effect {
    /// Re-derive state as of `tip` and report back through
    /// [`WatchMachine::verified`].
    Verify { tip: BlockRef },
    /// Deliver an outcome to the watch owner.
    Fire(WatchOutcome),
}

/// Coarse state, for logging and inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchPhase {
    Init,
    Watching,
    Candidate,
    Confirming,
    Confirmed,
    TimedOut,
    Failed,
    Cancelled,
    Closed,
}

impl fmt::Display for WatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Init => "INIT",
            Self::Watching => "WATCHING",
            Self::Candidate => "CANDIDATE",
            Self::Confirming => "CONFIRMING",
            Self::Confirmed => "CONFIRMED",
            Self::TimedOut => "TIMED_OUT",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

/// Depth, budget and revert window of one watch, in epochs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchParams {
    pub confirmation_depth: u64,
    pub max_wait_epochs: u64,
    pub revert_window_epochs: u64,
}

impl WatchParams {
    #[must_use]
    pub fn from_config(config: &SettlementConfig) -> Self {
        Self {
            confirmation_depth: config.confirmation_depth,
            max_wait_epochs: config.max_wait_epochs,
            revert_window_epochs: config.revert_window_epochs,
        }
    }
}

fn epochs(n: u64) -> ChainEpoch {
    ChainEpoch::try_from(n).unwrap_or(ChainEpoch::MAX)
}

#[derive(Debug)]
enum State<K> {
    Init,
    Watching,
    Candidate {
        key: K,
        anchor: BlockRef,
    },
    Confirming {
        key: K,
        matched: BlockRef,
        /// Tip being verified, once depth has been reached.
        verifying: Option<BlockRef>,
    },
    Confirmed {
        matched: BlockRef,
        /// Height at which revert tracking stops.
        until: ChainEpoch,
    },
    TimedOut,
    Failed,
    Cancelled,
    Closed,
}

/// Two-phase, reorg-tolerant confirmation state machine.
pub struct WatchMachine<M: TwoPhaseMatcher> {
    matcher: M,
    params: WatchParams,
    state: State<M::Key>,
    /// Height at which an unmatched watch times out.
    deadline: ChainEpoch,
    /// Applies at or below this height were already covered by the initial
    /// check. Lowered by reverts.
    floor: ChainEpoch,
}

impl<M: TwoPhaseMatcher> WatchMachine<M> {
    #[must_use]
    pub fn new(matcher: M, params: WatchParams) -> Self {
        Self {
            matcher,
            params,
            state: State::Init,
            deadline: ChainEpoch::MAX,
            floor: ChainEpoch::MIN,
        }
    }

    #[must_use]
    pub fn phase(&self) -> WatchPhase {
        match self.state {
            State::Init => WatchPhase::Init,
            State::Watching => WatchPhase::Watching,
            State::Candidate { .. } => WatchPhase::Candidate,
            State::Confirming { .. } => WatchPhase::Confirming,
            State::Confirmed { .. } => WatchPhase::Confirmed,
            State::TimedOut => WatchPhase::TimedOut,
            State::Failed => WatchPhase::Failed,
            State::Cancelled => WatchPhase::Cancelled,
            State::Closed => WatchPhase::Closed,
        }
    }

    /// Correlation key learned from the first phase, if any.
    #[must_use]
    pub fn key(&self) -> Option<&M::Key> {
        match &self.state {
            State::Candidate { key, .. } | State::Confirming { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Whether the watch no longer needs feed events.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(
            self.state,
            State::TimedOut | State::Failed | State::Cancelled | State::Closed
        )
    }

    #[must_use]
    pub fn matcher(&self) -> &M {
        &self.matcher
    }

    /// Leave INIT given the result of the already-satisfied check at `head`.
    pub fn start(&mut self, head: BlockRef, satisfied: bool) -> Vec<Effect> {
        if !matches!(self.state, State::Init) {
            return Vec::new();
        }
        if satisfied {
            self.state = State::Closed;
            return vec![Effect::Fire(WatchOutcome::Satisfied { at: head })];
        }
        self.state = State::Watching;
        self.floor = head.height;
        self.deadline = head
            .height
            .saturating_add(epochs(self.params.max_wait_epochs));
        Vec::new()
    }

    /// A block joined the canonical branch.
    pub fn apply(&mut self, block: &Block) -> Vec<Effect> {
        if block.height <= self.floor {
            return Vec::new();
        }
        let tip = block.block_ref();

        match self.state {
            State::Watching | State::Candidate { .. } => {
                if let Err(err) = self.scan(block) {
                    return self.fail(err);
                }
            }
            State::Confirmed { until, .. } => {
                if tip.height >= until {
                    self.state = State::Closed;
                }
                return Vec::new();
            }
            _ => {}
        }

        match self.state {
            State::Confirming {
                matched,
                verifying: None,
                ..
            } => {
                let target = matched
                    .height
                    .saturating_add(epochs(self.params.confirmation_depth));
                if tip.height < target {
                    return Vec::new();
                }
                if let State::Confirming { verifying, .. } = &mut self.state {
                    *verifying = Some(tip);
                }
                vec![Effect::Verify { tip }]
            }
            State::Watching | State::Candidate { .. } if tip.height >= self.deadline => {
                self.state = State::TimedOut;
                vec![Effect::Fire(WatchOutcome::TimedOut { at: tip })]
            }
            _ => Vec::new(),
        }
    }

    /// A block left the canonical branch.
    pub fn revert(&mut self, block: &Block) -> Vec<Effect> {
        let height = block.height;
        self.floor = self.floor.min(height.saturating_sub(1));

        match self.state {
            State::Candidate { anchor, .. } if height <= anchor.height => {
                self.state = State::Watching;
                Vec::new()
            }
            State::Confirming { matched, .. } if height <= matched.height => {
                self.state = State::Watching;
                Vec::new()
            }
            State::Confirmed { matched, .. } if height <= matched.height => {
                self.state = State::Closed;
                vec![Effect::Fire(WatchOutcome::Reverted { at: matched })]
            }
            _ => Vec::new(),
        }
    }

    /// Result of the state check requested by [`Effect::Verify`].
    pub fn verified(&mut self, result: Result<bool>) -> Vec<Effect> {
        let State::Confirming {
            matched,
            verifying: Some(tip),
            ..
        } = self.state
        else {
            return Vec::new();
        };

        match result {
            Ok(true) => {
                self.state = if self.params.revert_window_epochs == 0 {
                    State::Closed
                } else {
                    State::Confirmed {
                        matched,
                        until: tip
                            .height
                            .saturating_add(epochs(self.params.revert_window_epochs)),
                    }
                };
                vec![Effect::Fire(WatchOutcome::Satisfied { at: tip })]
            }
            Ok(false) => self.fail(DealtrackError::ContradictoryState {
                reason: format!(
                    "match confirmed at height {} but state at {} does not reflect it",
                    matched.height, tip.height
                ),
            }),
            Err(err) => self.fail(err),
        }
    }

    /// Stop with an error. After a confirmed outcome the watch just closes,
    /// so no second terminal outcome is fired.
    pub fn fail(&mut self, err: DealtrackError) -> Vec<Effect> {
        match self.state {
            State::Confirmed { .. } => {
                self.state = State::Closed;
                Vec::new()
            }
            _ if self.is_finished() => Vec::new(),
            _ => {
                self.state = State::Failed;
                vec![Effect::Fire(WatchOutcome::Failed(err))]
            }
        }
    }

    /// Stop without firing anything.
    pub fn cancel(&mut self) {
        if !self.is_finished() {
            self.state = State::Cancelled;
        }
    }

    fn scan(&mut self, block: &Block) -> Result<()> {
        let at = block.block_ref();
        for msg in &block.messages {
            if let State::Candidate { key, .. } = &self.state {
                let key = key.clone();
                if self.matcher.match_second(msg, &key)? {
                    self.state = State::Confirming {
                        key,
                        matched: at,
                        verifying: None,
                    };
                    return Ok(());
                }
            }
            if let Some(key) = self.matcher.match_first(msg)? {
                self.state = State::Candidate { key, anchor: at };
            }
        }
        Ok(())
    }
}
