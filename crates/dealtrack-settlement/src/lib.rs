//! # dealtrack-settlement
//!
//! **Deal settlement coordinator**: the client-side view of a storage deal's
//! life on chain, from funding to sector commitment.
//!
//! ## Architecture
//!
//! [`DealSettlementCoordinator`] composes three independent components:
//! 1. Escrow ledger (`dealtrack-escrow`): reserves market funds, topping up
//!    with at most one message per shortfall
//! 2. Publication resolver ([`PublicationResolver`]): maps a proposal to the
//!    deal id assigned by a batched publish message
//! 3. Confirmation watcher (`dealtrack-watch`): reports commitment at depth,
//!    tolerating reorgs
//!
//! ```text
//! ensure_funds ─┐
//!               ├─ FullNode (chain capabilities) ─ Signer (wallet)
//! validate_published_deal
//!               └─ ChainFeed ─ watch_for_commitment → CommitmentEvent
//! ```

pub mod coordinator;
pub mod resolver;
pub mod telemetry;

pub use coordinator::{CommitmentEvent, CommitmentWatch, DealSettlementCoordinator, FullNode};
pub use resolver::PublicationResolver;
pub use telemetry::init_tracing;
