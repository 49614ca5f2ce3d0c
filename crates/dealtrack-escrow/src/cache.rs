//! Bounded per-account cache backing the escrow ledger.
//!
//! Each account owns a slot: an async mutex around its cached available
//! balance. The slot is both the cache entry and the account's critical
//! section, so holding the slot's lock serializes reservations for that
//! account only.
//!
//! The cache keeps at most `max_size` slots with LRU eviction. A slot that is
//! currently handed out (someone holds a clone of its `Arc`) is never evicted,
//! so an in-flight decision can't lose its entry. When every slot is in use
//! the cache grows past `max_size` until some are released.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use dealtrack_types::{Address, TokenAmount};
use tokio::sync::Mutex;

/// Cached available balance of one account. `None` until first queried.
pub type AccountSlot = Arc<Mutex<Option<TokenAmount>>>;

struct Entry {
    slot: AccountSlot,
    /// Recency stamp; key of this account in `order`.
    stamp: u64,
}

/// LRU-bounded map from account to its slot.
pub struct LedgerCache {
    entries: HashMap<Address, Entry>,
    /// Accounts by last use (lowest stamp = least recently used).
    order: BTreeMap<u64, Address>,
    next_stamp: u64,
    max_size: usize,
}

impl LedgerCache {
    /// Create a cache holding at most `max_size` idle slots.
    ///
    /// # Panics
    /// Panics if `max_size` is zero.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        assert!(max_size > 0, "LedgerCache max_size must be > 0");
        Self {
            entries: HashMap::with_capacity(max_size),
            order: BTreeMap::new(),
            next_stamp: 0,
            max_size,
        }
    }

    /// Get the slot for `account`, creating an empty one if absent. Marks the
    /// account as most recently used.
    pub fn slot(&mut self, account: Address) -> AccountSlot {
        let stamp = self.next_stamp;
        self.next_stamp += 1;

        if let Some(entry) = self.entries.get_mut(&account) {
            self.order.remove(&entry.stamp);
            entry.stamp = stamp;
            self.order.insert(stamp, account);
            return Arc::clone(&entry.slot);
        }

        self.evict_idle();

        let slot: AccountSlot = Arc::new(Mutex::new(None));
        self.entries.insert(
            account,
            Entry {
                slot: Arc::clone(&slot),
                stamp,
            },
        );
        self.order.insert(stamp, account);
        slot
    }

    /// Get the slot for `account` without creating it or updating recency.
    #[must_use]
    pub fn peek(&self, account: &Address) -> Option<AccountSlot> {
        self.entries.get(account).map(|entry| Arc::clone(&entry.slot))
    }

    #[must_use]
    pub fn contains(&self, account: &Address) -> bool {
        self.entries.contains_key(account)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evict least recently used idle slots until there is room for one more.
    fn evict_idle(&mut self) {
        while self.entries.len() >= self.max_size {
            let idle = self.order.iter().find_map(|(stamp, account)| {
                self.entries
                    .get(account)
                    .is_some_and(|entry| Arc::strong_count(&entry.slot) == 1)
                    .then_some((*stamp, *account))
            });
            let Some((stamp, account)) = idle else {
                // Everything is in use.
                break;
            };
            self.order.remove(&stamp);
            self.entries.remove(&account);
            tracing::trace!(account = %account, "evicted ledger entry");
        }
    }
}
