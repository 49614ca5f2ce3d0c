//! # dealtrack-watch
//!
//! **Confirmation watcher**: detects that a provider has committed a deal's
//! data into a sector, despite chain reorganizations and finality delay.
//!
//! - **Pure core**: [`WatchMachine`] is a typed state machine with no I/O;
//!   the driver feeds it head changes and check results
//! - **Generic matching**: any [`TwoPhaseMatcher`] works; [`SectorCommitMatcher`]
//!   correlates a pre-commit and a prove-commit by sector number
//! - **Exactly once**: one terminal outcome per watch, optionally followed by
//!   an informational `Reverted`
//! - **Isolation**: one task and one feed receiver per watch
//!
//! ```text
//! ChainFeed.apply/revert → broadcast → WatchTask → WatchMachine → Effect
//!                                          └─ Verify → StateCheck (chain) ─┘
//! ```

pub mod machine;
pub mod matcher;
pub mod watcher;

pub use machine::{Effect, WatchMachine, WatchOutcome, WatchParams, WatchPhase};
pub use matcher::{SectorCommitMatcher, TwoPhaseMatcher};
pub use watcher::{ChainFeed, ConfirmationWatcher, DealActivationCheck, StateCheck, WatchHandle};
