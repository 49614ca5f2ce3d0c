//! # dealtrack-types
//!
//! Shared types, chain capabilities, errors and configuration for
//! **dealtrack**, the client-side storage deal settlement tracker.
//!
//! This crate is the leaf dependency of the workspace. It defines:
//!
//! - **Identifiers**: [`Address`], [`MessageId`], [`BlockId`], [`PieceCid`], [`DealId`], [`SectorNumber`], [`WatchId`]
//! - **Chain model**: [`Block`], [`BlockRef`], [`HeadChange`], [`Message`], [`MessageReceipt`], [`ExitCode`], [`MethodNum`]
//! - **Market model**: [`DealProposal`], [`ClientDealProposal`], [`PublishStorageDealsParams`], [`MarketBalance`], [`OnChainDeal`], [`SignedStorageAsk`]
//! - **Miner calls**: [`SectorPreCommitInfo`], [`ProveCommitSectorParams`]
//! - **Capabilities**: [`ChainHeadReader`], [`MessageLookup`], [`MessageWaiter`], [`MessagePool`], [`MarketStateReader`], [`MinerStateReader`], [`Signer`]
//! - **Configuration**: [`SettlementConfig`]
//! - **Errors**: [`DealtrackError`] with `DT_ERR_` prefix codes
//!
//! With the `test-helpers` feature, `testkit::MockChain` provides an
//! in-memory chain implementing every capability.

pub mod block;
pub mod chain;
pub mod config;
pub mod constants;
pub mod error;
pub mod ids;
pub mod market;
pub mod message;
pub mod miner;
pub mod wallet;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testkit;

pub use block::*;
pub use chain::*;
pub use config::*;
pub use error::*;
pub use ids::*;
pub use market::*;
pub use message::*;
pub use miner::*;
pub use wallet::*;

// Constants are accessed via `dealtrack_types::constants::FOO`
// (not re-exported to avoid name collisions).
