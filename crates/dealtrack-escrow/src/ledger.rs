//! Escrow ledger: decides whether a deal needs an on-chain escrow top-up.
//!
//! The ledger caches, per account, the escrow balance still available for new
//! deals. A reservation subtracts from the cached value; only the shortfall
//! (if any) is sent to the market actor. The decision step runs under the
//! account's own lock, so concurrent reservations for one account never both
//! see the same balance, while reservations for different accounts never
//! contend.
//!
//! Submitting and waiting for the top-up happen outside the account lock.

use std::sync::{Arc, Mutex, PoisonError};

use dealtrack_types::{
    Address, BlockId, DealtrackError, MarketBalance, MarketStateReader, Message, MessageId,
    MessagePool, MessageWaiter, Result, ResultExt, STORAGE_MARKET_ACTOR, SettlementConfig,
    TokenAmount, encode_params, methods,
};
use rust_decimal::Decimal;

use crate::cache::{AccountSlot, LedgerCache};

/// Per-account escrow reservations with on-demand top-ups.
pub struct EscrowLedger {
    market: Arc<dyn MarketStateReader>,
    mpool: Arc<dyn MessagePool>,
    waiter: Arc<dyn MessageWaiter>,
    cache: Mutex<LedgerCache>,
    top_up_gas_limit: u64,
}

impl EscrowLedger {
    /// # Panics
    /// Panics if `config.ledger_cache_capacity` is zero. Validated configs
    /// never are.
    #[must_use]
    pub fn new(
        market: Arc<dyn MarketStateReader>,
        mpool: Arc<dyn MessagePool>,
        waiter: Arc<dyn MessageWaiter>,
        config: &SettlementConfig,
    ) -> Self {
        Self {
            market,
            mpool,
            waiter,
            cache: Mutex::new(LedgerCache::new(config.ledger_cache_capacity)),
            top_up_gas_limit: config.top_up_gas_limit,
        }
    }

    /// Make sure `account` has `amount` of unlocked escrow, topping it up from
    /// `payer` if the cached balance falls short.
    ///
    /// Returns the id of the top-up message, or `None` if the cached balance
    /// covered the amount (in which case the chain is not contacted, unless
    /// the account had no cache entry yet).
    ///
    /// Suspends until the top-up is executed. There is no timeout; callers
    /// wrap this in `tokio::time::timeout` if they need one.
    ///
    /// # Errors
    /// - `InvalidAmount` if `amount` is negative
    /// - `ExecutionFailed` if the top-up executes with a non-zero exit code
    /// - any error from the chain while querying, submitting or waiting
    pub async fn ensure_available(
        &self,
        account: Address,
        payer: Address,
        amount: TokenAmount,
    ) -> Result<Option<MessageId>> {
        if amount < Decimal::ZERO {
            return Err(DealtrackError::InvalidAmount {
                reason: format!("cannot reserve negative amount {amount}"),
            });
        }

        let deficit = {
            let slot = self.slot(account);
            let mut entry = slot.lock().await;
            let available = match *entry {
                Some(available) => available,
                None => self
                    .market
                    .market_balance(&account, None)
                    .await
                    .with_context(|| format!("querying escrow of {account}"))?
                    .available(),
            };

            let remaining = available - amount;
            if remaining < Decimal::ZERO {
                *entry = Some(Decimal::ZERO);
                -remaining
            } else {
                *entry = Some(remaining);
                Decimal::ZERO
            }
        };

        if deficit.is_zero() {
            tracing::debug!(
                account = %account,
                amount = %amount,
                "escrow reservation covered by cached balance"
            );
            return Ok(None);
        }

        tracing::info!(
            account = %account,
            payer = %payer,
            deficit = %deficit,
            "submitting escrow top-up"
        );

        let top_up = Message {
            from: payer,
            to: STORAGE_MARKET_ACTOR,
            nonce: 0,
            value: deficit,
            gas_price: Decimal::ZERO,
            gas_limit: self.top_up_gas_limit,
            method: methods::market::ADD_BALANCE,
            params: encode_params(&account)?,
        };
        let id = self.submit_and_wait(top_up, "market AddBalance").await?;
        Ok(Some(id))
    }

    /// Deposit `amount` into `account`'s escrow, paid by the account itself.
    ///
    /// A cached balance for the account is raised by `amount` once the
    /// deposit has executed.
    ///
    /// # Errors
    /// - `InvalidAmount` if `amount` is not positive
    /// - `ExecutionFailed` if the deposit executes with a non-zero exit code
    pub async fn add_funds(&self, account: Address, amount: TokenAmount) -> Result<MessageId> {
        if amount <= Decimal::ZERO {
            return Err(DealtrackError::InvalidAmount {
                reason: format!("deposit must be positive, got {amount}"),
            });
        }

        let deposit = Message {
            from: account,
            to: STORAGE_MARKET_ACTOR,
            nonce: 0,
            value: amount,
            gas_price: Decimal::ZERO,
            gas_limit: self.top_up_gas_limit,
            method: methods::market::ADD_BALANCE,
            params: encode_params(&account)?,
        };
        let id = self.submit_and_wait(deposit, "market AddBalance").await?;

        let slot = self.peek(&account);
        if let Some(slot) = slot {
            let mut entry = slot.lock().await;
            if let Some(available) = entry.as_mut() {
                *available += amount;
            }
        }

        tracing::info!(account = %account, amount = %amount, message = %id, "escrow deposit executed");
        Ok(id)
    }

    /// Current on-chain escrow and locked amounts for `account`.
    ///
    /// # Errors
    /// Propagates chain query errors.
    pub async fn get_balance(
        &self,
        account: &Address,
        at: Option<&BlockId>,
    ) -> Result<MarketBalance> {
        self.market
            .market_balance(account, at)
            .await
            .with_context(|| format!("querying escrow of {account}"))
    }

    /// Cached available balance, if the account has been seen.
    pub async fn cached_available(&self, account: &Address) -> Option<TokenAmount> {
        let slot = self.peek(account)?;
        let entry = slot.lock().await;
        *entry
    }

    /// Number of accounts currently cached.
    #[must_use]
    pub fn cached_accounts(&self) -> usize {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn slot(&self, account: Address) -> AccountSlot {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .slot(account)
    }

    fn peek(&self, account: &Address) -> Option<AccountSlot> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .peek(account)
    }

    async fn submit_and_wait(&self, message: Message, operation: &str) -> Result<MessageId> {
        let id = self
            .mpool
            .push_message(message)
            .await
            .with_context(|| format!("submitting {operation}"))?;

        let (_, receipt) = self
            .waiter
            .wait_for_message(&id)
            .await
            .with_context(|| format!("waiting for {operation} {id}"))?;

        if !receipt.exit_code.is_success() {
            tracing::warn!(message = %id, exit_code = %receipt.exit_code, "{operation} failed");
            return Err(DealtrackError::ExecutionFailed {
                operation: operation.to_string(),
                message: id,
                exit_code: receipt.exit_code,
            });
        }
        Ok(id)
    }
}
