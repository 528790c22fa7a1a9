use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rust_decimal::prelude::ToPrimitive;
use sdk_common::event_logger::{
    flush_eagerly, AppEvent, EventLogger, OperationalParameters, Parameters, IAP_PARAMETERS,
};
use sdk_common::time::TimeSource;
use serde_json::Value;
use tracing::instrument;

use crate::cache::TransactionCache;
use crate::dedupe::{should_dedupe_event, DedupeProcessor};
use crate::event::{format_transaction_date, IapEvent, StoreApiVersion};
use crate::names::{params, EventName};
use crate::resolver::EventResolver;
use crate::storefront::ReceiptProvider;
use crate::transaction::{StoreTransaction, TransactionState};

/// Free-text parameters are cut to this many characters.
pub const MAX_PARAMETER_VALUE_LENGTH: usize = 100;
pub const SUPPORTED_LIBRARY_VERSIONS: &str = "SK1,SK2";

/// What happened to a transaction handed to the logger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogOutcome {
    /// Nothing could be resolved for the transaction.
    Unresolved,
    /// Already logged for this purchase; only the cache was updated.
    Suppressed,
    Logged,
    /// Handed to the dedupe processor.
    Buffered,
}

pub struct TransactionLogger {
    resolver: EventResolver,
    cache: Arc<TransactionCache>,
    dedupe: Arc<DedupeProcessor>,
    event_logger: Arc<dyn EventLogger>,
    receipts: Arc<dyn ReceiptProvider>,
    clock: Arc<dyn TimeSource>,
}

impl TransactionLogger {
    pub fn new(
        resolver: EventResolver,
        cache: Arc<TransactionCache>,
        dedupe: Arc<DedupeProcessor>,
        event_logger: Arc<dyn EventLogger>,
        receipts: Arc<dyn ReceiptProvider>,
        clock: Arc<dyn TimeSource>,
    ) -> TransactionLogger {
        TransactionLogger {
            resolver,
            cache,
            dedupe,
            event_logger,
            receipts,
            clock,
        }
    }

    #[instrument(skip_all, fields(product_id = transaction.product_id(), state = ?transaction.state()))]
    pub async fn log_transaction(&self, transaction: &StoreTransaction) -> LogOutcome {
        let Some(event) = self.resolver.resolve(transaction).await else {
            return LogOutcome::Unresolved;
        };

        let outcome = match transaction.state() {
            TransactionState::Purchasing => {
                self.log_directly(&event, event.event_name);
                LogOutcome::Logged
            }
            TransactionState::Purchased => self.log_new_transaction(&event),
            TransactionState::Restored => self.log_restored_transaction(&event),
            TransactionState::Failed => self.log_failed_transaction(&event),
            TransactionState::Deferred => LogOutcome::Unresolved,
        };

        let labels = [("outcome", format!("{:?}", outcome).to_lowercase())];
        metrics::counter!("iap_transactions_handled_total", &labels).increment(1);
        outcome
    }

    fn log_new_transaction(&self, event: &IapEvent) -> LogOutcome {
        let original_id = &event.original_transaction_id;
        let product_id = &event.product_id;

        let already_subscribed = event.is_subscription
            && (event.is_expired_at(self.clock.now())
                || self.cache.contains(original_id, event.event_name, product_id)
                || self
                    .cache
                    .contains(original_id, EventName::SubscribeRestore, product_id));
        let already_purchased = event.event_name == EventName::Purchased
            && self.cache.contains_transaction(original_id, product_id);

        if already_subscribed || already_purchased {
            tracing::debug!(
                transaction_id = %event.transaction_id,
                original_transaction_id = %original_id,
                "purchase already logged, caching renewal only"
            );
            self.cache
                .add(&event.transaction_id, event.event_name, product_id);
            return LogOutcome::Suppressed;
        }

        self.cache.add(original_id, event.event_name, product_id);
        self.log_checkout_parity(event);
        self.route(event)
    }

    fn log_restored_transaction(&self, event: &IapEvent) -> LogOutcome {
        let original_id = &event.original_transaction_id;
        if self
            .cache
            .contains(original_id, event.event_name, &event.product_id)
        {
            return LogOutcome::Suppressed;
        }

        self.cache
            .add(original_id, event.event_name, &event.product_id);
        self.route(event)
    }

    fn log_failed_transaction(&self, event: &IapEvent) -> LogOutcome {
        self.log_checkout_parity(event);
        self.log_directly(event, event.event_name);
        LogOutcome::Logged
    }

    /// The legacy store API reports a purchasing state before every purchase
    /// and the modern one does not, so modern purchases log the checkout
    /// event themselves.
    fn log_checkout_parity(&self, event: &IapEvent) {
        if event.store_api == StoreApiVersion::Modern {
            self.log_directly(event, EventName::checkout_initiated(event.is_subscription));
        }
    }

    fn route(&self, event: &IapEvent) -> LogOutcome {
        let app_event = self.app_event(event, event.event_name);
        if self.dedupe.is_enabled() && should_dedupe_event(&app_event.name) {
            self.dedupe.process_implicit_event(app_event);
            return LogOutcome::Buffered;
        }

        self.event_logger.log_event(app_event);
        flush_eagerly(self.event_logger.as_ref());
        LogOutcome::Logged
    }

    fn log_directly(&self, event: &IapEvent, event_name: EventName) {
        self.event_logger.log_event(self.app_event(event, event_name));
        flush_eagerly(self.event_logger.as_ref());
    }

    fn app_event(&self, event: &IapEvent, event_name: EventName) -> AppEvent {
        let mut app_event = AppEvent::implicit(
            event_name.as_str(),
            event.amount.to_f64(),
            parameters(event),
        );
        app_event.operational_parameters = Some(self.operational_parameters(event));
        app_event
    }

    fn operational_parameters(&self, event: &IapEvent) -> OperationalParameters {
        let mut iap_parameters = Parameters::new();
        iap_parameters.insert(
            params::IAP_CLIENT_LIBRARY_VERSION.to_owned(),
            Value::from(event.store_api.as_str()),
        );
        iap_parameters.insert(
            params::IAP_SDK_SUPPORTED_LIBRARY_VERSIONS.to_owned(),
            Value::from(SUPPORTED_LIBRARY_VERSIONS),
        );
        if event.should_append_receipt {
            if let Some(receipt) = self.receipts.receipt() {
                iap_parameters.insert(
                    params::RECEIPT_DATA.to_owned(),
                    Value::from(STANDARD.encode(receipt)),
                );
            }
        }

        OperationalParameters::from([(IAP_PARAMETERS.to_owned(), iap_parameters)])
    }
}

fn truncated(input: &str) -> String {
    input.chars().take(MAX_PARAMETER_VALUE_LENGTH).collect()
}

fn flag(value: bool) -> Value {
    Value::from(if value { "1" } else { "0" })
}

/// The public parameters sent with every implicitly logged purchase event.
pub fn parameters(event: &IapEvent) -> Parameters {
    let mut parameters = Parameters::new();
    let mut insert = |key: &str, value: Value| {
        parameters.insert(key.to_owned(), value);
    };

    insert(params::CONTENT_ID, Value::from(event.product_id.as_str()));
    insert(params::NUM_ITEMS, Value::from(event.quantity));
    insert(
        params::TRANSACTION_DATE,
        Value::from(format_transaction_date(event.transaction_date)),
    );
    insert(params::PRODUCT_TITLE, Value::from(truncated(&event.product_title)));
    insert(params::DESCRIPTION, Value::from(truncated(&event.product_description)));
    insert(
        params::CURRENCY,
        Value::from(event.currency.clone().unwrap_or_default()),
    );
    insert(params::TRANSACTION_ID, Value::from(event.transaction_id.as_str()));
    insert(params::IMPLICITLY_LOGGED_PURCHASE, Value::from("1"));
    insert(params::IN_APP_PURCHASE_TYPE, Value::from(event.product_type()));

    if event.is_subscription {
        let period = event
            .subscription_period
            .map(|p| p.to_string())
            .unwrap_or_default();
        insert(params::SUBSCRIPTION_PERIOD, Value::from(period));
        insert(params::IS_START_TRIAL, flag(event.is_start_trial));

        if event.has_introductory_offer {
            let trial_period = event
                .introductory_offer_subscription_period
                .map(|p| p.to_string())
                .unwrap_or_default();
            insert(params::HAS_FREE_TRIAL, flag(event.has_free_trial));
            insert(params::TRIAL_PERIOD, Value::from(trial_period));
            if let Some(price) = event.introductory_offer_price.and_then(|p| p.to_f64()) {
                insert(params::TRIAL_PRICE, Value::from(price));
            }
        }
    }

    parameters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        legacy_transaction, modern_transaction, product, sample_event, subscription, TestPipeline,
    };
    use crate::transaction::PaymentMode;
    use assert_json_diff::assert_json_eq;
    use sdk_common::event_logger::FlushReason;
    use serde_json::json;
    use time::macros::datetime;
    use time::Duration;

    #[tokio::test]
    async fn test_purchase_is_logged_and_cached() {
        let pipeline = TestPipeline::new(vec![product("com.example.product1", 200)]);
        let transaction = legacy_transaction("1", None, "com.example.product1", TransactionState::Purchased);

        let outcome = pipeline.logger.log_transaction(&transaction).await;

        assert_eq!(outcome, LogOutcome::Logged);
        assert_eq!(pipeline.events.event_names(), vec!["fb_mobile_purchase"]);
        assert_eq!(pipeline.events.flushes(), vec![FlushReason::EagerlyFlushingEvent]);
        assert!(pipeline
            .cache
            .contains("1", EventName::Purchased, "com.example.product1"));
    }

    #[tokio::test]
    async fn test_repeated_purchase_of_same_original_is_suppressed() {
        let pipeline = TestPipeline::new(vec![product("com.example.product1", 200)]);
        pipeline
            .cache
            .add("1", EventName::Purchased, "com.example.product1");
        let transaction = legacy_transaction(
            "2",
            Some("1"),
            "com.example.product1",
            TransactionState::Purchased,
        );

        let outcome = pipeline.logger.log_transaction(&transaction).await;

        assert_eq!(outcome, LogOutcome::Suppressed);
        assert!(pipeline.events.events().is_empty());
        assert!(pipeline
            .cache
            .contains("2", EventName::Purchased, "com.example.product1"));
        assert_eq!(pipeline.cache.transactions().len(), 2);
    }

    #[tokio::test]
    async fn test_purchase_suppressed_when_original_cached_under_any_name() {
        let pipeline = TestPipeline::new(vec![product("com.example.product1", 200)]);
        pipeline
            .cache
            .add("1", EventName::PurchaseRestored, "com.example.product1");
        let transaction = legacy_transaction(
            "2",
            Some("1"),
            "com.example.product1",
            TransactionState::Purchased,
        );

        assert_eq!(
            pipeline.logger.log_transaction(&transaction).await,
            LogOutcome::Suppressed
        );
    }

    #[tokio::test]
    async fn test_subscription_renewal_is_suppressed() {
        let pipeline = TestPipeline::new(vec![subscription("com.example.sub1", None)]);
        pipeline
            .cache
            .add("1", EventName::SubscribeRestore, "com.example.sub1");
        let transaction = modern_transaction("2", "1", "com.example.sub1", TransactionState::Purchased);

        let outcome = pipeline.logger.log_transaction(&transaction).await;

        assert_eq!(outcome, LogOutcome::Suppressed);
        assert!(pipeline.events.events().is_empty());
        assert!(pipeline
            .cache
            .contains("2", EventName::Subscribe, "com.example.sub1"));
    }

    #[tokio::test]
    async fn test_expired_subscription_is_suppressed() {
        let pipeline = TestPipeline::new(vec![subscription("com.example.sub1", None)]);
        let StoreTransaction::Modern { mut transaction, state } =
            modern_transaction("1", "1", "com.example.sub1", TransactionState::Purchased)
        else {
            unreachable!()
        };
        transaction.expiration_date = Some(pipeline.clock.now() - Duration::days(1));

        let outcome = pipeline
            .logger
            .log_transaction(&StoreTransaction::Modern { transaction, state })
            .await;

        assert_eq!(outcome, LogOutcome::Suppressed);
        assert!(pipeline.events.events().is_empty());
    }

    #[tokio::test]
    async fn test_modern_subscription_logs_checkout_parity() {
        let pipeline = TestPipeline::new(vec![subscription(
            "com.example.sub1",
            Some(PaymentMode::FreeTrial),
        )]);
        let transaction = modern_transaction("1", "1", "com.example.sub1", TransactionState::Purchased);

        let outcome = pipeline.logger.log_transaction(&transaction).await;

        assert_eq!(outcome, LogOutcome::Logged);
        assert_eq!(
            pipeline.events.event_names(),
            vec!["SubscriptionInitiatedCheckout", "StartTrial"]
        );

        let start_trial = &pipeline.events.events()[1];
        assert_eq!(start_trial.value_to_sum, Some(0.0));
        assert_json_eq!(
            Value::Object(start_trial.parameters.clone()),
            json!({
                "fb_content_id": "com.example.sub1",
                "fb_num_items": 1,
                "fb_transaction_date": "2024-10-20 19:00:00+0000",
                "fb_content_title": "Subscription com.example.sub1",
                "fb_description": "Yearly plan",
                "fb_currency": "USD",
                "fb_transaction_id": "1",
                "_implicitlyLogged": "1",
                "fb_iap_product_type": "subs",
                "fb_iap_subs_period": "P1Y",
                "fb_iap_is_start_trial": "1",
                "fb_iap_has_free_trial": "1",
                "fb_iap_trial_period": "P6M",
                "fb_iap_trial_price": 0.0,
            })
        );
        assert_eq!(
            start_trial.operational_parameter(IAP_PARAMETERS, params::IAP_CLIENT_LIBRARY_VERSION),
            Some(&json!("SK2"))
        );
        assert_eq!(
            start_trial.operational_parameter(IAP_PARAMETERS, params::RECEIPT_DATA),
            None
        );
    }

    #[tokio::test]
    async fn test_restored_is_logged_once() {
        let pipeline = TestPipeline::new(vec![product("com.example.product1", 200)]);
        let transaction = legacy_transaction(
            "2",
            Some("1"),
            "com.example.product1",
            TransactionState::Restored,
        );

        assert_eq!(
            pipeline.logger.log_transaction(&transaction).await,
            LogOutcome::Logged
        );
        assert_eq!(
            pipeline.logger.log_transaction(&transaction).await,
            LogOutcome::Suppressed
        );
        assert_eq!(pipeline.events.event_names(), vec!["fb_mobile_purchase_restored"]);
        assert!(pipeline
            .cache
            .contains("1", EventName::PurchaseRestored, "com.example.product1"));
    }

    #[tokio::test]
    async fn test_failed_is_never_cached() {
        let pipeline = TestPipeline::new(vec![product("com.example.product1", 200)]);
        let legacy = legacy_transaction("1", None, "com.example.product1", TransactionState::Failed);
        let modern = modern_transaction("2", "2", "com.example.product1", TransactionState::Failed);

        pipeline.logger.log_transaction(&legacy).await;
        pipeline.logger.log_transaction(&legacy).await;
        pipeline.logger.log_transaction(&modern).await;

        assert_eq!(
            pipeline.events.event_names(),
            vec![
                "fb_mobile_purchase_failed",
                "fb_mobile_purchase_failed",
                "fb_mobile_initiated_checkout",
                "fb_mobile_purchase_failed",
            ]
        );
        assert!(pipeline.cache.transactions().is_empty());
    }

    #[tokio::test]
    async fn test_purchasing_logs_checkout_without_caching() {
        let pipeline = TestPipeline::new(vec![product("com.example.product1", 200)]);
        let transaction = legacy_transaction("1", None, "com.example.product1", TransactionState::Purchasing);

        pipeline.logger.log_transaction(&transaction).await;

        assert_eq!(pipeline.events.event_names(), vec!["fb_mobile_initiated_checkout"]);
        assert!(pipeline.cache.transactions().is_empty());
    }

    #[tokio::test]
    async fn test_legacy_purchase_appends_receipt() {
        let pipeline = TestPipeline::new(vec![product("com.example.product1", 200)])
            .with_receipt(b"receipt".to_vec());
        let transaction = legacy_transaction("1", None, "com.example.product1", TransactionState::Purchased);

        pipeline.logger.log_transaction(&transaction).await;

        let event = &pipeline.events.events()[0];
        assert_json_eq!(
            serde_json::to_value(&event.operational_parameters).unwrap(),
            json!({
                "iap_parameters": {
                    "fb_iap_client_library_version": "SK1",
                    "fb_iap_sdk_supported_library_versions": "SK1,SK2",
                    "receipt_data": "cmVjZWlwdA==",
                }
            })
        );
    }

    #[tokio::test]
    async fn test_dedupe_eligible_events_are_buffered() {
        let pipeline = TestPipeline::new(vec![product("com.example.product1", 200)]);
        pipeline.dedupe.enable();

        let purchase = legacy_transaction("1", None, "com.example.product1", TransactionState::Purchased);
        let restore = legacy_transaction("3", Some("2"), "com.example.product1", TransactionState::Restored);

        assert_eq!(
            pipeline.logger.log_transaction(&purchase).await,
            LogOutcome::Buffered
        );
        assert_eq!(
            pipeline.logger.log_transaction(&restore).await,
            LogOutcome::Logged
        );
        assert_eq!(pipeline.dedupe.buffered_event_counts(), (1, 0));
        assert_eq!(pipeline.events.event_names(), vec!["fb_mobile_purchase_restored"]);
    }

    #[test]
    fn test_free_text_parameters_are_truncated() {
        let mut event = sample_event();
        event.product_title = "t".repeat(150);
        event.product_description = "é".repeat(101);
        event.transaction_date = datetime!(2024-10-20 19:02:50 UTC);

        let parameters = parameters(&event);

        assert_eq!(
            parameters[params::PRODUCT_TITLE].as_str().map(|s| s.chars().count()),
            Some(MAX_PARAMETER_VALUE_LENGTH)
        );
        assert_eq!(
            parameters[params::DESCRIPTION].as_str().map(|s| s.chars().count()),
            Some(MAX_PARAMETER_VALUE_LENGTH)
        );
        assert_eq!(parameters[params::IN_APP_PURCHASE_TYPE], json!("inapp"));
        assert!(!parameters.contains_key(params::SUBSCRIPTION_PERIOD));
    }
}
