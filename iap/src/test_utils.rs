use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use sdk_common::configuration::{AppEventsConfiguration, StaticConfigurationProvider};
use sdk_common::event_logger::{FlushBehavior, RecordingEventLogger};
use sdk_common::store::MemoryStore;
use sdk_common::time::FixedTime;
use time::macros::datetime;

use crate::cache::TransactionCache;
use crate::dedupe::DedupeProcessor;
use crate::event::{IapEvent, PeriodUnit, StoreApiVersion, SubscriptionPeriod};
use crate::logger::TransactionLogger;
use crate::names::EventName;
use crate::resolver::EventResolver;
use crate::observer::TransactionObserver;
use crate::storefront::{StaticProductCatalog, StaticReceiptProvider, TransactionFeed};
use crate::transaction::{
    LegacyTransaction, ModernTransaction, PaymentMode, Product, StoreTransaction,
    SubscriptionInfo, SubscriptionOffer, TransactionState,
};

pub fn product(id: &str, price_cents: i64) -> Product {
    Product {
        id: id.to_owned(),
        title: format!("Product {}", id),
        description: "Some description".to_owned(),
        price: Decimal::new(price_cents, 2),
        currency_code: Some("USD".to_owned()),
        subscription: None,
    }
}

/// A yearly subscription, optionally with a six month introductory offer.
pub fn subscription(id: &str, introductory_offer: Option<PaymentMode>) -> Product {
    Product {
        id: id.to_owned(),
        title: format!("Subscription {}", id),
        description: "Yearly plan".to_owned(),
        price: Decimal::new(1999, 2),
        currency_code: Some("USD".to_owned()),
        subscription: Some(SubscriptionInfo {
            period: SubscriptionPeriod::new(PeriodUnit::Year, 1),
            introductory_offer: introductory_offer.map(|payment_mode| SubscriptionOffer {
                id: None,
                payment_mode,
                period: SubscriptionPeriod::new(PeriodUnit::Month, 6),
                price: Decimal::ZERO,
            }),
            discounts: Vec::new(),
        }),
    }
}

pub fn legacy_transaction(
    id: &str,
    original_id: Option<&str>,
    product_id: &str,
    state: TransactionState,
) -> StoreTransaction {
    StoreTransaction::Legacy(LegacyTransaction {
        id: Some(id.to_owned()),
        original_id: original_id.map(str::to_owned),
        product_id: product_id.to_owned(),
        quantity: 1,
        state,
        date: Some(datetime!(2024-10-20 19:00:00 UTC)),
        original_date: None,
        applied_discount_id: None,
    })
}

pub fn modern_transaction(
    id: &str,
    original_id: &str,
    product_id: &str,
    state: TransactionState,
) -> StoreTransaction {
    StoreTransaction::Modern {
        transaction: ModernTransaction {
            id: id.to_owned(),
            original_id: original_id.to_owned(),
            product_id: product_id.to_owned(),
            quantity: 1,
            purchase_date: datetime!(2024-10-20 19:00:00 UTC),
            original_purchase_date: None,
            expiration_date: None,
            currency: Some("USD".to_owned()),
            is_verified: true,
            offer: None,
        },
        state,
    }
}

pub fn sample_event() -> IapEvent {
    IapEvent {
        event_name: EventName::Purchased,
        product_id: "com.example.product1".to_owned(),
        product_title: "Product 1".to_owned(),
        product_description: "Some description".to_owned(),
        amount: Decimal::new(200, 2),
        quantity: 1,
        currency: Some("USD".to_owned()),
        transaction_id: "1".to_owned(),
        original_transaction_id: "1".to_owned(),
        transaction_date: datetime!(2024-10-20 19:00:00 UTC),
        original_transaction_date: None,
        expiration_date: None,
        is_verified: false,
        is_subscription: false,
        subscription_period: None,
        is_start_trial: false,
        has_introductory_offer: false,
        has_free_trial: false,
        introductory_offer_subscription_period: None,
        introductory_offer_price: None,
        should_append_receipt: false,
        store_api: StoreApiVersion::Legacy,
    }
}

/// A fully wired pipeline over in-memory collaborators. Subscription logging
/// is on, the dedup window is ten seconds and dedupe starts disabled.
pub struct TestPipeline {
    pub events: Arc<RecordingEventLogger>,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<FixedTime>,
    pub configuration: Arc<StaticConfigurationProvider>,
    pub cache: Arc<TransactionCache>,
    pub dedupe: Arc<DedupeProcessor>,
    pub logger: Arc<TransactionLogger>,
    products: Vec<Product>,
}

impl TestPipeline {
    pub fn new(products: Vec<Product>) -> TestPipeline {
        TestPipeline::build(products, None)
    }

    pub fn with_receipt(self, receipt: Vec<u8>) -> TestPipeline {
        TestPipeline::build(self.products, Some(receipt))
    }

    fn build(products: Vec<Product>, receipt: Option<Vec<u8>>) -> TestPipeline {
        let events = Arc::new(RecordingEventLogger::new(FlushBehavior::Auto));
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedTime::new(datetime!(2024-10-20 19:02:50 UTC)));
        let configuration = Arc::new(StaticConfigurationProvider::new(AppEventsConfiguration {
            subscription_auto_logging_enabled: true,
            iap_manual_and_auto_log_dedup_window: 10_000,
            ..Default::default()
        }));

        let cache = Arc::new(TransactionCache::new(store.clone(), clock.clone()));
        let dedupe = DedupeProcessor::new(
            events.clone(),
            configuration.clone(),
            store.clone(),
            clock.clone(),
            Duration::from_secs(60),
        );
        let resolver = EventResolver::new(
            configuration.clone(),
            Arc::new(StaticProductCatalog::new(products.clone())),
            clock.clone(),
        );
        let logger = Arc::new(TransactionLogger::new(
            resolver,
            cache.clone(),
            dedupe.clone(),
            events.clone(),
            Arc::new(StaticReceiptProvider::new(receipt)),
            clock.clone(),
        ));

        TestPipeline {
            events,
            store,
            clock,
            configuration,
            cache,
            dedupe,
            logger,
            products,
        }
    }

    /// An observer polling `feed` every hour unless configured otherwise.
    pub fn observer(&self, feed: Arc<dyn TransactionFeed>) -> Arc<TransactionObserver> {
        Arc::new(TransactionObserver::new(
            self.logger.clone(),
            self.cache.clone(),
            feed,
            self.configuration.clone(),
            Duration::from_secs(3600),
        ))
    }
}
