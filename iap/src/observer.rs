use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use sdk_common::configuration::ConfigurationProvider;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::cache::TransactionCache;
use crate::logger::{LogOutcome, TransactionLogger};
use crate::storefront::TransactionFeed;
use crate::transaction::{
    LegacyTransaction, ModernTransaction, StoreTransaction, TransactionState,
};

/// Feeds store transactions into the [`TransactionLogger`].
///
/// Legacy transactions are pushed in batches by the host. Modern ones are
/// pulled: the first poll after install replays current entitlements as
/// restores and starts the watermark at the current time. Every poll reads
/// the transactions from the watermark on, so purchases made before install
/// are never logged as new.
pub struct TransactionObserver {
    logger: Arc<TransactionLogger>,
    cache: Arc<TransactionCache>,
    feed: Arc<dyn TransactionFeed>,
    configuration: Arc<dyn ConfigurationProvider>,
    fallback_interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TransactionObserver {
    pub fn new(
        logger: Arc<TransactionLogger>,
        cache: Arc<TransactionCache>,
        feed: Arc<dyn TransactionFeed>,
        configuration: Arc<dyn ConfigurationProvider>,
        fallback_interval: Duration,
    ) -> TransactionObserver {
        TransactionObserver {
            logger,
            cache,
            feed,
            configuration,
            fallback_interval,
            task: Mutex::new(None),
        }
    }

    fn task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        match self.task.lock() {
            Ok(task) => task,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn observation_interval(&self) -> Duration {
        match self.configuration.cached_configuration().iap_observation_time {
            0 => self.fallback_interval,
            nanos => Duration::from_nanos(nanos),
        }
    }

    /// Handles one batch from the legacy store observer.
    #[instrument(skip_all, fields(batch_size = transactions.len()))]
    pub async fn handle_legacy_transactions(
        &self,
        transactions: Vec<LegacyTransaction>,
    ) -> Vec<LogOutcome> {
        let mut outcomes = Vec::with_capacity(transactions.len());
        for transaction in transactions {
            let outcome = self
                .logger
                .log_transaction(&StoreTransaction::Legacy(transaction))
                .await;
            outcomes.push(outcome);
        }
        outcomes
    }

    /// One pass over the modern store API. Returns how many transactions were
    /// handed to the logger.
    #[instrument(skip_all)]
    pub async fn poll_once(&self) -> usize {
        let mut handled = 0;

        if !self.cache.has_restored_purchases() {
            for transaction in self.feed.current_entitlements().await {
                self.logger
                    .log_transaction(&StoreTransaction::Modern {
                        transaction,
                        state: TransactionState::Restored,
                    })
                    .await;
                handled += 1;
            }
            self.cache.set_has_restored_purchases(true);
        }

        let since = self.cache.ensure_new_candidates_date();
        let mut newest = since;
        for transaction in self.feed.transactions_since(since).await {
            if transaction.purchase_date == since && self.already_seen(&transaction) {
                continue;
            }

            let purchase_date = transaction.purchase_date;
            self.logger
                .log_transaction(&StoreTransaction::Modern {
                    transaction,
                    state: TransactionState::Purchased,
                })
                .await;
            newest = newest.max(purchase_date);
            handled += 1;
        }

        if newest != since {
            self.cache.set_new_candidates_date(newest);
        }

        tracing::debug!(handled, "polled store transactions");
        handled
    }

    // Transactions stamped exactly at the watermark are read again on the
    // next poll.
    fn already_seen(&self, transaction: &ModernTransaction) -> bool {
        self.cache
            .contains_transaction(&transaction.original_id, &transaction.product_id)
            || self
                .cache
                .contains_transaction(&transaction.id, &transaction.product_id)
    }

    /// Starts the polling loop. Does nothing when it is already running or
    /// when there is no runtime to run it on.
    pub fn start_observing(self: &Arc<Self>) -> bool {
        let mut task = self.task();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return true;
        }

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::warn!("cannot observe transactions without a runtime: {}", e);
                return false;
            }
        };

        let observer = Arc::clone(self);
        *task = Some(runtime.spawn(async move {
            loop {
                observer.poll_once().await;
                tokio::time::sleep(observer.observation_interval()).await;
            }
        }));
        tracing::info!("started observing store transactions");
        true
    }

    pub fn stop_observing(&self) {
        if let Some(task) = self.task().take() {
            task.abort();
            tracing::info!("stopped observing store transactions");
        }
    }

    pub fn is_observing(&self) -> bool {
        self.task().as_ref().is_some_and(|t| !t.is_finished())
    }
}
