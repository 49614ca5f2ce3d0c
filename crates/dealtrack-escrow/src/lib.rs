//! # dealtrack-escrow
//!
//! **Escrow ledger**: keeps a cached view of each account's unlocked market
//! escrow and tops it up on chain only when a reservation can't be covered.
//!
//! ## Architecture
//!
//! 1. **LedgerCache**: bounded LRU map from account to its slot; a slot is
//!    both the cached balance and the account's critical section
//! 2. **EscrowLedger**: the read-decide-write step under the slot lock, then
//!    top-up submission and inclusion wait outside it
//!
//! ## Reservation Flow
//!
//! ```text
//! ensure_available(account, payer, amount)
//!     → slot(account).lock() → [cold: market_balance()] → available -= amount
//!     → deficit > 0 ? push AddBalance(deficit) → wait_for_message() : return
//! ```

pub mod cache;
pub mod ledger;

pub use cache::LedgerCache;
pub use ledger::EscrowLedger;
