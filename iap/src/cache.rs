//! Persisted record of the purchase transactions that were already logged.
//!
//! Store APIs happily re-deliver the same transaction after a relaunch or a
//! restore, so every event the logger emits is first recorded here under its
//! `(transaction id, event name, product id)` identity.
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};

use sdk_common::store::DataStore;
use sdk_common::time::TimeSource;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::names::EventName;

pub const LOGGED_TRANSACTIONS_KEY: &str = "iap:logged_transactions";
pub const RESTORED_PURCHASES_KEY: &str = "iap:restored_purchases";
pub const NEW_CANDIDATES_DATE_KEY: &str = "iap:new_candidates_date";
pub const OLDEST_TRIMMABLE_TRANSACTION_KEY: &str = "iap:oldest_trimmable_transaction";

/// Trimmable records older than this are evicted.
pub const TRIM_AFTER: Duration = Duration::days(30);

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CachedTransaction {
    pub transaction_id: String,
    pub product_id: String,
    pub event_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub cached_date: OffsetDateTime,
}

impl CachedTransaction {
    pub fn is_trimmable(&self) -> bool {
        EventName::is_trimmable_name(&self.event_name)
    }
}

// The cached date is bookkeeping, not identity.
impl PartialEq for CachedTransaction {
    fn eq(&self, other: &Self) -> bool {
        self.transaction_id == other.transaction_id
            && self.event_name == other.event_name
            && self.product_id == other.product_id
    }
}

impl Eq for CachedTransaction {}

impl Hash for CachedTransaction {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.transaction_id.hash(state);
        self.event_name.hash(state);
        self.product_id.hash(state);
    }
}

#[derive(Default)]
struct CacheState {
    transactions: HashSet<CachedTransaction>,
    oldest_trimmable: Option<CachedTransaction>,
}

pub struct TransactionCache {
    store: Arc<dyn DataStore>,
    clock: Arc<dyn TimeSource>,
    state: Mutex<CacheState>,
}

impl TransactionCache {
    pub fn new(store: Arc<dyn DataStore>, clock: Arc<dyn TimeSource>) -> TransactionCache {
        let state = CacheState {
            transactions: load_transactions(store.as_ref()).into_iter().collect(),
            oldest_trimmable: load_json(store.as_ref(), OLDEST_TRIMMABLE_TRANSACTION_KEY),
        };

        TransactionCache {
            store,
            clock,
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn contains(&self, transaction_id: &str, event_name: EventName, product_id: &str) -> bool {
        let key = CachedTransaction {
            transaction_id: transaction_id.to_owned(),
            product_id: product_id.to_owned(),
            event_name: event_name.as_str().to_owned(),
            cached_date: OffsetDateTime::UNIX_EPOCH,
        };
        self.state().transactions.contains(&key)
    }

    /// Whether the transaction was logged under any event name.
    pub fn contains_transaction(&self, transaction_id: &str, product_id: &str) -> bool {
        self.state()
            .transactions
            .iter()
            .any(|t| t.transaction_id == transaction_id && t.product_id == product_id)
    }

    pub fn add(&self, transaction_id: &str, event_name: EventName, product_id: &str) {
        let transaction = CachedTransaction {
            transaction_id: transaction_id.to_owned(),
            product_id: product_id.to_owned(),
            event_name: event_name.as_str().to_owned(),
            cached_date: self.clock.now(),
        };

        let mut state = self.state();
        if transaction.is_trimmable() && state.oldest_trimmable.is_none() {
            state.oldest_trimmable = Some(transaction.clone());
        }
        state.transactions.insert(transaction);
        self.persist(&state);
    }

    pub fn remove(&self, transaction_id: &str, event_name: EventName, product_id: &str) {
        let mut state = self.state();
        state.transactions.retain(|t| {
            !(t.transaction_id == transaction_id
                && t.event_name == event_name.as_str()
                && t.product_id == product_id)
        });

        let pointer_removed = state
            .oldest_trimmable
            .as_ref()
            .is_some_and(|oldest| !state.transactions.contains(oldest));
        if pointer_removed {
            state.oldest_trimmable = oldest_trimmable(&state.transactions);
        }
        self.persist(&state);
    }

    /// Evict trimmable records older than [`TRIM_AFTER`], or every trimmable
    /// record when the host reports memory pressure. Returns how many records
    /// were evicted.
    pub fn trim_if_needed(&self, force_by_memory_pressure: bool) -> usize {
        let cutoff = self.clock.now() - TRIM_AFTER;
        let mut state = self.state();

        let due = state
            .oldest_trimmable
            .as_ref()
            .is_some_and(|oldest| oldest.cached_date < cutoff);
        if !due && !force_by_memory_pressure {
            return 0;
        }

        let before = state.transactions.len();
        state.transactions.retain(|t| {
            !t.is_trimmable() || (!force_by_memory_pressure && t.cached_date >= cutoff)
        });
        state.oldest_trimmable = oldest_trimmable(&state.transactions);
        self.persist(&state);

        let evicted = before - state.transactions.len();
        metrics::counter!("iap_cache_trimmed_total").increment(evicted as u64);
        tracing::debug!(evicted, force_by_memory_pressure, "trimmed transaction cache");
        evicted
    }

    pub fn has_restored_purchases(&self) -> bool {
        self.store.get_bool(RESTORED_PURCHASES_KEY)
    }

    pub fn set_has_restored_purchases(&self, restored: bool) {
        if let Err(e) = self.store.set_bool(RESTORED_PURCHASES_KEY, restored) {
            tracing::warn!("failed to persist restored purchases flag: {}", e);
        }
    }

    /// Newest transaction date already handed to the logger. Transactions
    /// older than this do not need to be rescanned after a relaunch.
    pub fn new_candidates_date(&self) -> Option<OffsetDateTime> {
        let raw = self.store.get(NEW_CANDIDATES_DATE_KEY)?;
        let raw = String::from_utf8(raw).ok()?;
        OffsetDateTime::parse(&raw, &time::format_description::well_known::Rfc3339).ok()
    }

    /// The watermark, started at the current time when unset so that the
    /// history from before install is never read as new purchases.
    pub fn ensure_new_candidates_date(&self) -> OffsetDateTime {
        if let Some(date) = self.new_candidates_date() {
            return date;
        }
        let now = self.clock.now();
        self.set_new_candidates_date(now);
        now
    }

    pub fn set_new_candidates_date(&self, date: OffsetDateTime) {
        let formatted = match date.format(&time::format_description::well_known::Rfc3339) {
            Ok(formatted) => formatted,
            Err(e) => {
                tracing::warn!("failed to format new candidates date: {}", e);
                return;
            }
        };
        if let Err(e) = self.store.set(NEW_CANDIDATES_DATE_KEY, formatted.into_bytes()) {
            tracing::warn!("failed to persist new candidates date: {}", e);
        }
    }

    /// Snapshot of the in-memory records.
    pub fn transactions(&self) -> Vec<CachedTransaction> {
        self.state().transactions.iter().cloned().collect()
    }

    /// Records as last written to the store.
    pub fn persisted_transactions(&self) -> Vec<CachedTransaction> {
        load_transactions(self.store.as_ref())
    }

    pub fn oldest_trimmable(&self) -> Option<CachedTransaction> {
        self.state().oldest_trimmable.clone()
    }

    pub fn clear(&self) {
        let mut state = self.state();
        *state = CacheState::default();
        self.persist(&state);
        for key in [RESTORED_PURCHASES_KEY, NEW_CANDIDATES_DATE_KEY] {
            if let Err(e) = self.store.remove(key) {
                tracing::warn!(key, "failed to clear cache key: {}", e);
            }
        }
    }

    fn persist(&self, state: &CacheState) {
        let transactions: Vec<&CachedTransaction> = state.transactions.iter().collect();
        match serde_json::to_vec(&transactions) {
            Ok(data) => {
                if let Err(e) = self.store.set(LOGGED_TRANSACTIONS_KEY, data) {
                    tracing::warn!("failed to persist logged transactions: {}", e);
                }
            }
            Err(e) => tracing::error!("failed to serialize logged transactions: {}", e),
        }

        let result = match &state.oldest_trimmable {
            Some(oldest) => match serde_json::to_vec(oldest) {
                Ok(data) => self.store.set(OLDEST_TRIMMABLE_TRANSACTION_KEY, data),
                Err(e) => {
                    tracing::error!("failed to serialize oldest transaction: {}", e);
                    return;
                }
            },
            None => self.store.remove(OLDEST_TRIMMABLE_TRANSACTION_KEY),
        };
        if let Err(e) = result {
            tracing::warn!("failed to persist oldest transaction: {}", e);
        }
    }
}

fn oldest_trimmable(transactions: &HashSet<CachedTransaction>) -> Option<CachedTransaction> {
    transactions
        .iter()
        .filter(|t| t.is_trimmable())
        .min_by_key(|t| t.cached_date)
        .cloned()
}

fn load_transactions(store: &dyn DataStore) -> Vec<CachedTransaction> {
    load_json(store, LOGGED_TRANSACTIONS_KEY).unwrap_or_default()
}

fn load_json<T: for<'de> Deserialize<'de>>(store: &dyn DataStore, key: &str) -> Option<T> {
    let data = store.get(key)?;
    match serde_json::from_slice(&data) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(key, "discarding unreadable cache entry: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk_common::store::MemoryStore;
    use sdk_common::time::FixedTime;
    use time::macros::datetime;

    fn setup() -> (Arc<MemoryStore>, Arc<FixedTime>, TransactionCache) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedTime::new(datetime!(2024-10-20 19:02:50 UTC)));
        let cache = TransactionCache::new(store.clone(), clock.clone());
        (store, clock, cache)
    }

    #[test]
    fn test_initial_state() {
        let (store, _, cache) = setup();

        assert!(!cache.has_restored_purchases());
        assert!(!store.get_bool(RESTORED_PURCHASES_KEY));
        assert!(cache.transactions().is_empty());
        assert!(cache.persisted_transactions().is_empty());
        assert_eq!(cache.new_candidates_date(), None);
    }

    #[test]
    fn test_add_transaction() {
        let (_, _, cache) = setup();

        cache.add("1", EventName::Purchased, "product1");
        cache.add("1", EventName::Purchased, "product1");
        cache.add("1", EventName::PurchaseRestored, "product1");
        cache.add("2", EventName::Purchased, "product1");

        assert!(cache.contains("1", EventName::Purchased, "product1"));
        assert!(cache.contains("1", EventName::PurchaseRestored, "product1"));
        assert!(cache.contains("2", EventName::Purchased, "product1"));
        assert!(!cache.contains("2", EventName::Purchased, "product2"));

        let mut persisted = cache.persisted_transactions();
        let mut in_memory = cache.transactions();
        persisted.sort_by(|a, b| (&a.transaction_id, &a.event_name).cmp(&(&b.transaction_id, &b.event_name)));
        in_memory.sort_by(|a, b| (&a.transaction_id, &a.event_name).cmp(&(&b.transaction_id, &b.event_name)));
        assert_eq!(persisted, in_memory);
        assert_eq!(persisted.len(), 3);
    }

    #[test]
    fn test_remove_transaction() {
        let (_, _, cache) = setup();

        cache.add("1", EventName::Purchased, "product1");
        cache.add("1", EventName::PurchaseRestored, "product1");
        cache.add("2", EventName::Purchased, "product1");
        assert_eq!(cache.persisted_transactions().len(), 3);

        cache.remove("1", EventName::Purchased, "product1");
        assert!(!cache.contains("1", EventName::Purchased, "product1"));
        assert!(cache.contains("1", EventName::PurchaseRestored, "product1"));
        assert_eq!(cache.persisted_transactions().len(), 2);

        cache.remove("1", EventName::PurchaseRestored, "product1");
        cache.remove("2", EventName::Purchased, "product1");
        assert!(cache.persisted_transactions().is_empty());
        assert_eq!(cache.oldest_trimmable(), None);
    }

    #[test]
    fn test_contains_transaction_ignores_event_name() {
        let (_, _, cache) = setup();

        cache.add("1", EventName::Purchased, "product1");
        assert!(!cache.contains("1", EventName::PurchaseRestored, "product1"));
        assert!(cache.contains_transaction("1", "product1"));
        assert!(!cache.contains_transaction("1", "product2"));

        cache.remove("1", EventName::Purchased, "product1");
        assert!(!cache.contains_transaction("1", "product1"));
    }

    #[test]
    fn test_reload_from_store() {
        let (store, clock, cache) = setup();
        cache.add("1", EventName::Subscribe, "sub1");
        cache.add("2", EventName::Purchased, "product1");

        let reloaded = TransactionCache::new(store, clock);
        assert!(reloaded.contains("1", EventName::Subscribe, "sub1"));
        assert!(reloaded.contains("2", EventName::Purchased, "product1"));
        assert_eq!(
            reloaded.oldest_trimmable().map(|t| t.transaction_id),
            Some("2".to_owned())
        );
    }

    #[test]
    fn test_oldest_trimmable_pointer_is_first_trimmable_record() {
        let (_, clock, cache) = setup();

        cache.add("1", EventName::StartTrial, "sub1");
        assert_eq!(cache.oldest_trimmable(), None);

        cache.add("2", EventName::Purchased, "product1");
        clock.advance(Duration::days(1));
        cache.add("3", EventName::Purchased, "product1");

        assert_eq!(
            cache.oldest_trimmable().map(|t| t.transaction_id),
            Some("2".to_owned())
        );

        cache.remove("2", EventName::Purchased, "product1");
        assert_eq!(
            cache.oldest_trimmable().map(|t| t.transaction_id),
            Some("3".to_owned())
        );
    }

    #[test]
    fn test_trim_retains_non_trimmable_records() {
        let (_, clock, cache) = setup();

        cache.add("1", EventName::Subscribe, "sub1");
        cache.add("2", EventName::SubscribeRestore, "sub1");
        cache.add("3", EventName::StartTrial, "sub2");
        cache.add("4", EventName::Purchased, "product1");
        cache.add("5", EventName::PurchaseRestored, "product1");

        clock.advance(Duration::days(31));
        cache.add("6", EventName::Purchased, "product2");

        assert_eq!(cache.trim_if_needed(false), 2);
        assert!(cache.contains("1", EventName::Subscribe, "sub1"));
        assert!(cache.contains("2", EventName::SubscribeRestore, "sub1"));
        assert!(cache.contains("3", EventName::StartTrial, "sub2"));
        assert!(!cache.contains("4", EventName::Purchased, "product1"));
        assert!(!cache.contains("5", EventName::PurchaseRestored, "product1"));
        assert!(cache.contains("6", EventName::Purchased, "product2"));
        assert_eq!(
            cache.oldest_trimmable().map(|t| t.transaction_id),
            Some("6".to_owned())
        );
        assert_eq!(cache.persisted_transactions().len(), 4);
    }

    #[test]
    fn test_trim_is_noop_before_retention_window() {
        let (_, clock, cache) = setup();

        cache.add("1", EventName::Purchased, "product1");
        clock.advance(Duration::days(30));

        assert_eq!(cache.trim_if_needed(false), 0);
        assert!(cache.contains("1", EventName::Purchased, "product1"));
    }

    #[test]
    fn test_memory_pressure_evicts_all_trimmable_records() {
        let (_, _, cache) = setup();

        cache.add("1", EventName::Subscribe, "sub1");
        cache.add("2", EventName::Purchased, "product1");
        cache.add("3", EventName::PurchaseFailed, "product1");

        assert_eq!(cache.trim_if_needed(true), 2);
        assert!(cache.contains("1", EventName::Subscribe, "sub1"));
        assert_eq!(cache.transactions().len(), 1);
        assert_eq!(cache.oldest_trimmable(), None);
    }

    #[test]
    fn test_restored_purchases_flag() {
        let (store, _, cache) = setup();

        cache.set_has_restored_purchases(true);
        assert!(cache.has_restored_purchases());
        assert!(store.get_bool(RESTORED_PURCHASES_KEY));

        cache.set_has_restored_purchases(false);
        assert!(!cache.has_restored_purchases());
    }

    #[test]
    fn test_new_candidates_date() {
        let (store, clock, cache) = setup();

        let now = clock.now();
        cache.set_new_candidates_date(now);
        assert_eq!(cache.new_candidates_date(), Some(now));
        assert!(store.contains_key(NEW_CANDIDATES_DATE_KEY));

        cache.clear();
        assert_eq!(cache.new_candidates_date(), None);
        assert!(cache.transactions().is_empty());
    }

    #[test]
    fn test_new_candidates_date_starts_at_now() {
        let (store, clock, cache) = setup();

        let started = clock.now();
        assert_eq!(cache.ensure_new_candidates_date(), started);
        assert!(store.contains_key(NEW_CANDIDATES_DATE_KEY));

        clock.advance(Duration::hours(1));
        assert_eq!(cache.ensure_new_candidates_date(), started);
        assert_eq!(cache.new_candidates_date(), Some(started));
    }

    #[test]
    fn test_contains_ignores_cached_date() {
        let (_, clock, cache) = setup();

        cache.add("1", EventName::Purchased, "product1");
        clock.advance(Duration::days(2));

        assert!(cache.contains("1", EventName::Purchased, "product1"));
        assert!(!cache.contains("1", EventName::PurchaseRestored, "product1"));
        assert!(!cache.contains("1", EventName::Purchased, "product2"));
    }
}
