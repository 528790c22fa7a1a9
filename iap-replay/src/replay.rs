use std::sync::Arc;

use anyhow::{Context, Result};
use iap::logger::LogOutcome;
use iap::services::{IapDependencies, IapServices};
use iap::storefront::{StaticProductCatalog, StaticReceiptProvider, StaticTransactionFeed};
use sdk_common::configuration::StaticConfigurationProvider;
use sdk_common::event_logger::EventLogger;
use sdk_common::store::{DataStore, FileStore};
use sdk_common::time::{FixedTime, SystemTime, TimeSource};
use tracing::instrument;

use crate::config::Config;
use crate::fixture::Fixture;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub legacy_outcomes: Vec<LogOutcome>,
    pub polled_transactions: usize,
    pub manual_events: usize,
}

/// Runs one recorded session through the full pipeline, the way a host app
/// would between launch and shutdown.
#[instrument(skip_all, fields(store_dir = %config.store_dir.display()))]
pub async fn replay(
    config: &Config,
    fixture: Fixture,
    event_logger: Arc<dyn EventLogger>,
) -> Result<ReplaySummary> {
    let store: Arc<dyn DataStore> = Arc::new(
        FileStore::open(&config.store_dir).context("failed to open the replay store")?,
    );
    let configuration = match fixture.configuration {
        Some(configuration) => StaticConfigurationProvider::new(configuration),
        None => StaticConfigurationProvider::load_cached(store.as_ref()),
    };

    let clock: Arc<dyn TimeSource> = match fixture.recorded_at {
        Some(recorded_at) => Arc::new(FixedTime::new(recorded_at)),
        None => Arc::new(SystemTime {}),
    };

    let feed = StaticTransactionFeed::new();
    for transaction in fixture.entitlements {
        feed.push_entitlement(transaction);
    }
    for transaction in fixture.modern_transactions {
        feed.push_transaction(transaction);
    }

    let services = IapServices::new(
        IapDependencies {
            event_logger,
            configuration: Arc::new(configuration),
            store,
            products: Arc::new(StaticProductCatalog::new(fixture.products)),
            feed: Arc::new(feed),
            receipts: Arc::new(StaticReceiptProvider::new(
                fixture.receipt.map(String::into_bytes),
            )),
            clock,
        },
        &config.iap,
    );

    // A single poll instead of the background loop, so the run terminates.
    services.cache.trim_if_needed(false);
    services.dedupe.process_saved_events();
    let polled_transactions = services.observer.poll_once().await;

    let legacy_outcomes = services
        .observer
        .handle_legacy_transactions(fixture.legacy_transactions)
        .await;

    let manual_events = fixture.manual_events.len();
    for event in fixture.manual_events {
        services.log_manual_event(event);
    }

    services.shutdown();

    let summary = ReplaySummary {
        legacy_outcomes,
        polled_transactions,
        manual_events,
    };
    tracing::info!(
        polled = summary.polled_transactions,
        legacy = summary.legacy_outcomes.len(),
        manual = summary.manual_events,
        "replay finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk_common::event_logger::{FlushBehavior, RecordingEventLogger};
    use std::path::PathBuf;

    fn config(store_dir: PathBuf) -> Config {
        Config {
            fixture: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures/purchase.json"),
            store_dir,
            flush_behavior: FlushBehavior::Auto,
            iap: iap::config::Config {
                dedupe_enabled: true,
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_replay_twice_against_the_same_store() {
        let directory = tempfile::tempdir().unwrap();
        let config = config(directory.path().to_path_buf());

        let events = Arc::new(RecordingEventLogger::new(FlushBehavior::Auto));
        let summary = replay(&config, Fixture::load(&config.fixture).unwrap(), events.clone())
            .await
            .unwrap();

        assert_eq!(summary.polled_transactions, 1);
        assert_eq!(
            summary.legacy_outcomes,
            vec![LogOutcome::Logged, LogOutcome::Buffered]
        );
        assert_eq!(
            events.event_names(),
            vec![
                "SubscriptionInitiatedCheckout",
                "fb_mobile_initiated_checkout",
                "StartTrial",
                "fb_mobile_purchase",
                "fb_mobile_purchase",
            ]
        );
        let manual = &events.events()[4];
        assert!(!manual.is_implicit);
        assert_eq!(
            manual
                .operational_parameter("iap_parameters", "fb_iap_actual_dedup_key_used")
                .and_then(|key| key.as_str()),
            Some("fb_content_id")
        );

        let events = Arc::new(RecordingEventLogger::new(FlushBehavior::Auto));
        let summary = replay(&config, Fixture::load(&config.fixture).unwrap(), events.clone())
            .await
            .unwrap();

        assert_eq!(summary.polled_transactions, 0);
        assert_eq!(
            summary.legacy_outcomes,
            vec![LogOutcome::Logged, LogOutcome::Suppressed]
        );
        assert_eq!(
            events.event_names(),
            vec!["fb_mobile_initiated_checkout", "fb_mobile_purchase"]
        );
    }
}
