use std::sync::Arc;

use sdk_common::configuration::ConfigurationProvider;
use sdk_common::event_logger::{AppEvent, EventLogger};
use sdk_common::store::DataStore;
use sdk_common::time::TimeSource;
use tracing::instrument;

use crate::cache::TransactionCache;
use crate::config::Config;
use crate::dedupe::{should_dedupe_event, DedupeProcessor};
use crate::logger::TransactionLogger;
use crate::observer::TransactionObserver;
use crate::resolver::EventResolver;
use crate::storefront::{ProductCatalog, ReceiptProvider, TransactionFeed};

/// Everything the purchase pipeline needs from its host.
#[derive(Clone)]
pub struct IapDependencies {
    pub event_logger: Arc<dyn EventLogger>,
    pub configuration: Arc<dyn ConfigurationProvider>,
    pub store: Arc<dyn DataStore>,
    pub products: Arc<dyn ProductCatalog>,
    pub feed: Arc<dyn TransactionFeed>,
    pub receipts: Arc<dyn ReceiptProvider>,
    pub clock: Arc<dyn TimeSource>,
}

/// The purchase pipeline, wired once per process and driven by the host's
/// lifecycle callbacks.
pub struct IapServices {
    pub cache: Arc<TransactionCache>,
    pub dedupe: Arc<DedupeProcessor>,
    pub logger: Arc<TransactionLogger>,
    pub observer: Arc<TransactionObserver>,
    event_logger: Arc<dyn EventLogger>,
}

impl IapServices {
    pub fn new(dependencies: IapDependencies, config: &Config) -> IapServices {
        let IapDependencies {
            event_logger,
            configuration,
            store,
            products,
            feed,
            receipts,
            clock,
        } = dependencies;

        let cache = Arc::new(TransactionCache::new(store.clone(), clock.clone()));
        let dedupe = DedupeProcessor::new(
            event_logger.clone(),
            configuration.clone(),
            store,
            clock.clone(),
            config.fallback_dedup_window.0,
        );
        if config.dedupe_enabled {
            dedupe.enable();
        }

        let resolver = EventResolver::new(configuration.clone(), products, clock.clone());
        let logger = Arc::new(TransactionLogger::new(
            resolver,
            cache.clone(),
            dedupe.clone(),
            event_logger.clone(),
            receipts,
            clock,
        ));
        let observer = Arc::new(TransactionObserver::new(
            logger.clone(),
            cache.clone(),
            feed,
            configuration,
            config.fallback_observation_interval.0,
        ));

        IapServices {
            cache,
            dedupe,
            logger,
            observer,
            event_logger,
        }
    }

    /// Trims the cache, recovers dedupe buffers saved by a previous process
    /// and starts observing the modern store API.
    #[instrument(skip_all)]
    pub fn on_launch(&self) {
        self.cache.trim_if_needed(false);
        self.dedupe.process_saved_events();
        self.observer.start_observing();
    }

    #[instrument(skip_all)]
    pub fn on_background(&self) {
        self.dedupe.save_non_processed_events();
    }

    #[instrument(skip_all)]
    pub fn on_memory_warning(&self) {
        self.cache.trim_if_needed(true);
    }

    /// Stops observing and logs whatever is still waiting for its window.
    #[instrument(skip_all)]
    pub fn shutdown(&self) {
        self.observer.stop_observing();
        self.dedupe.process_buffered_events();
    }

    /// Entry point for events the developer logs by hand.
    pub fn log_manual_event(&self, event: AppEvent) {
        if should_dedupe_event(&event.name) {
            self.dedupe.process_manual_event(event);
        } else {
            self.event_logger.log_event(event);
        }
    }
}
