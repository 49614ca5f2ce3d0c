//! Configuration for the settlement tracking engine.

use serde::{Deserialize, Serialize};

use crate::{DealtrackError, Result, constants};

/// Tunables shared by the ledger, the block feed and the commitment watcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// Blocks required on top of a prove-commit before activation is acted on.
    pub confirmation_depth: u64,
    /// Epochs a commitment watch waits for the provider before giving up.
    pub max_wait_epochs: u64,
    /// Epochs after confirmation during which a revert is still reported.
    pub revert_window_epochs: u64,
    /// Maximum number of accounts cached by the escrow ledger.
    pub ledger_cache_capacity: usize,
    /// Gas limit attached to escrow top-up messages.
    pub top_up_gas_limit: u64,
    /// Head changes buffered per watch.
    pub feed_capacity: usize,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            confirmation_depth: constants::DEFAULT_CONFIRMATION_DEPTH,
            max_wait_epochs: constants::DEFAULT_MAX_WAIT_EPOCHS,
            revert_window_epochs: constants::DEFAULT_REVERT_WINDOW_EPOCHS,
            ledger_cache_capacity: constants::DEFAULT_LEDGER_CACHE_CAPACITY,
            top_up_gas_limit: constants::DEFAULT_TOP_UP_GAS_LIMIT,
            feed_capacity: constants::DEFAULT_FEED_CAPACITY,
        }
    }
}

impl SettlementConfig {
    /// Parse from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    /// Returns `Configuration` on malformed JSON or invalid values.
    pub fn from_json(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)
            .map_err(|e| DealtrackError::Configuration(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// # Errors
    /// Returns `Configuration` if a capacity or budget is zero.
    pub fn validate(&self) -> Result<()> {
        if self.ledger_cache_capacity == 0 {
            return Err(DealtrackError::Configuration(
                "ledger_cache_capacity must be > 0".into(),
            ));
        }
        if self.feed_capacity == 0 {
            return Err(DealtrackError::Configuration(
                "feed_capacity must be > 0".into(),
            ));
        }
        if self.max_wait_epochs == 0 {
            return Err(DealtrackError::Configuration(
                "max_wait_epochs must be > 0".into(),
            ));
        }
        Ok(())
    }
}
