//! System-wide constants for dealtrack.

/// Actor number of the storage market actor.
pub const STORAGE_MARKET_ACTOR_ID: u64 = 5;

/// Epochs after which a block is considered final.
pub const FINALITY_EPOCHS: i64 = 500;

/// How far back seal randomness may be drawn. A provider that has not
/// pre-committed a deal within this window can no longer activate it.
pub const SEAL_RANDOMNESS_LOOKBACK_LIMIT: i64 = FINALITY_EPOCHS + 2000;

/// Default confirmation depth for deal activation.
pub const DEFAULT_CONFIRMATION_DEPTH: u64 = 3;

/// Default max-wait budget for a commitment watch, in epochs.
pub const DEFAULT_MAX_WAIT_EPOCHS: u64 = SEAL_RANDOMNESS_LOOKBACK_LIMIT as u64;

/// Default window after confirmation during which reverts are still reported.
pub const DEFAULT_REVERT_WINDOW_EPOCHS: u64 = FINALITY_EPOCHS as u64;

/// Default number of accounts kept in the escrow ledger cache.
pub const DEFAULT_LEDGER_CACHE_CAPACITY: usize = 10_000;

/// Gas limit for escrow top-up messages.
pub const DEFAULT_TOP_UP_GAS_LIMIT: u64 = 1_000_000;

/// Head changes buffered per feed subscriber before it is considered lagged.
pub const DEFAULT_FEED_CAPACITY: usize = 1024;
