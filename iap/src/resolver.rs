use std::sync::Arc;

use rust_decimal::Decimal;
use sdk_common::configuration::ConfigurationProvider;
use sdk_common::time::TimeSource;
use tracing::instrument;

use crate::event::IapEvent;
use crate::names::EventName;
use crate::storefront::ProductCatalog;
use crate::transaction::{
    LegacyTransaction, ModernTransaction, PaymentMode, Product, StoreTransaction,
    TransactionState,
};

/// Turns store transactions into [`IapEvent`]s. Anything that cannot be
/// described (unknown product, deferred payment, gated subscription) resolves
/// to `None`.
pub struct EventResolver {
    configuration: Arc<dyn ConfigurationProvider>,
    products: Arc<dyn ProductCatalog>,
    clock: Arc<dyn TimeSource>,
}

impl EventResolver {
    pub fn new(
        configuration: Arc<dyn ConfigurationProvider>,
        products: Arc<dyn ProductCatalog>,
        clock: Arc<dyn TimeSource>,
    ) -> EventResolver {
        EventResolver {
            configuration,
            products,
            clock,
        }
    }

    #[instrument(skip_all, fields(product_id = transaction.product_id()))]
    pub async fn resolve(&self, transaction: &StoreTransaction) -> Option<IapEvent> {
        let Some(product) = self.products.product(transaction.product_id()).await else {
            tracing::debug!("product lookup returned nothing, skipping transaction");
            return None;
        };

        if product.is_subscription()
            && !self
                .configuration
                .cached_configuration()
                .subscription_auto_logging_enabled
        {
            return None;
        }

        match transaction {
            StoreTransaction::Legacy(legacy) => self.resolve_legacy(legacy, &product),
            StoreTransaction::Modern { transaction, state } => {
                resolve_modern(transaction, *state, &product)
            }
        }
    }

    fn resolve_legacy(&self, transaction: &LegacyTransaction, product: &Product) -> Option<IapEvent> {
        let is_free_trial = product
            .offer_for_discount(transaction.applied_discount_id.as_deref())
            .is_some_and(|offer| offer.payment_mode == PaymentMode::FreeTrial);
        let event_name = event_name(transaction.state, product.is_subscription(), is_free_trial)?;

        let transaction_id = transaction.id.clone().unwrap_or_default();
        let original_transaction_id = transaction
            .original_id
            .clone()
            .unwrap_or_else(|| transaction_id.clone());

        let mut event = base_event(event_name, product, transaction.quantity);
        event.currency = product.currency_code.clone();
        event.transaction_id = transaction_id;
        event.original_transaction_id = original_transaction_id;
        event.transaction_date = transaction.date.unwrap_or_else(|| self.clock.now());
        event.original_transaction_date = transaction.original_date;
        event.should_append_receipt = matches!(
            transaction.state,
            TransactionState::Purchased | TransactionState::Restored
        );
        Some(event)
    }
}

fn resolve_modern(
    transaction: &ModernTransaction,
    state: TransactionState,
    product: &Product,
) -> Option<IapEvent> {
    let payment_mode = transaction
        .offer
        .as_ref()
        .and_then(|offer| offer.payment_mode)
        .or_else(|| {
            product
                .subscription
                .as_ref()?
                .introductory_offer
                .as_ref()
                .map(|offer| offer.payment_mode)
        });
    let is_free_trial = payment_mode == Some(PaymentMode::FreeTrial);
    let event_name = event_name(state, product.is_subscription(), is_free_trial)?;

    let mut event = base_event(event_name, product, transaction.quantity);
    event.currency = transaction
        .currency
        .clone()
        .or_else(|| product.currency_code.clone());
    event.transaction_id = transaction.id.clone();
    event.original_transaction_id = transaction.original_id.clone();
    event.transaction_date = transaction.purchase_date;
    event.original_transaction_date = transaction.original_purchase_date;
    event.expiration_date = transaction.expiration_date;
    event.is_verified = transaction.is_verified;
    event.store_api = crate::event::StoreApiVersion::Modern;
    Some(event)
}

fn event_name(state: TransactionState, is_subscription: bool, is_free_trial: bool) -> Option<EventName> {
    let name = match (state, is_subscription) {
        (TransactionState::Deferred, _) => return None,
        (TransactionState::Purchasing, false) => EventName::InitiatedCheckout,
        (TransactionState::Purchased, false) => EventName::Purchased,
        (TransactionState::Failed, false) => EventName::PurchaseFailed,
        (TransactionState::Restored, false) => EventName::PurchaseRestored,
        (TransactionState::Purchasing, true) => EventName::SubscribeInitiatedCheckout,
        (TransactionState::Purchased, true) if is_free_trial => EventName::StartTrial,
        (TransactionState::Purchased, true) => EventName::Subscribe,
        (TransactionState::Failed, true) => EventName::SubscribeFailed,
        (TransactionState::Restored, true) => EventName::SubscribeRestore,
    };
    Some(name)
}

/// Product-derived fields shared by both store APIs. Transaction fields are
/// filled in by the caller.
fn base_event(event_name: EventName, product: &Product, quantity: u32) -> IapEvent {
    let is_start_trial = event_name == EventName::StartTrial;
    let amount = if is_start_trial {
        Decimal::ZERO
    } else {
        product.price * Decimal::from(quantity)
    };
    let introductory_offer = product
        .subscription
        .as_ref()
        .and_then(|s| s.introductory_offer.as_ref());

    IapEvent {
        event_name,
        product_id: product.id.clone(),
        product_title: product.title.clone(),
        product_description: product.description.clone(),
        amount,
        quantity,
        currency: None,
        transaction_id: String::new(),
        original_transaction_id: String::new(),
        transaction_date: time::OffsetDateTime::UNIX_EPOCH,
        original_transaction_date: None,
        expiration_date: None,
        is_verified: false,
        is_subscription: product.is_subscription(),
        subscription_period: product.subscription.as_ref().map(|s| s.period),
        is_start_trial,
        has_introductory_offer: introductory_offer.is_some(),
        has_free_trial: introductory_offer
            .is_some_and(|offer| offer.payment_mode == PaymentMode::FreeTrial),
        introductory_offer_subscription_period: introductory_offer.map(|offer| offer.period),
        introductory_offer_price: introductory_offer.map(|offer| offer.price),
        should_append_receipt: false,
        store_api: crate::event::StoreApiVersion::Legacy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{PeriodUnit, StoreApiVersion, SubscriptionPeriod};
    use crate::storefront::StaticProductCatalog;
    use crate::transaction::{
        OfferType, SubscriptionInfo, SubscriptionOffer, TransactionOffer,
    };
    use sdk_common::configuration::{AppEventsConfiguration, StaticConfigurationProvider};
    use sdk_common::time::FixedTime;
    use time::macros::datetime;

    fn product() -> Product {
        Product {
            id: "com.example.product1".to_owned(),
            title: "Product 1".to_owned(),
            description: "Some description".to_owned(),
            price: Decimal::new(200, 2),
            currency_code: Some("USD".to_owned()),
            subscription: None,
        }
    }

    fn subscription(intro_mode: Option<PaymentMode>) -> Product {
        Product {
            id: "com.example.sub1".to_owned(),
            title: "Subscription 1".to_owned(),
            description: "Yearly plan".to_owned(),
            price: Decimal::new(1999, 2),
            currency_code: Some("USD".to_owned()),
            subscription: Some(SubscriptionInfo {
                period: SubscriptionPeriod::new(PeriodUnit::Year, 1),
                introductory_offer: intro_mode.map(|payment_mode| SubscriptionOffer {
                    id: None,
                    payment_mode,
                    period: SubscriptionPeriod::new(PeriodUnit::Month, 6),
                    price: Decimal::ZERO,
                }),
                discounts: vec![SubscriptionOffer {
                    id: Some("promo".to_owned()),
                    payment_mode: PaymentMode::PayUpFront,
                    period: SubscriptionPeriod::new(PeriodUnit::Month, 1),
                    price: Decimal::new(99, 2),
                }],
            }),
        }
    }

    fn resolver(subscriptions_enabled: bool, products: Vec<Product>) -> EventResolver {
        let configuration = AppEventsConfiguration {
            subscription_auto_logging_enabled: subscriptions_enabled,
            ..Default::default()
        };
        EventResolver::new(
            Arc::new(StaticConfigurationProvider::new(configuration)),
            Arc::new(StaticProductCatalog::new(products)),
            Arc::new(FixedTime::new(datetime!(2024-10-20 19:02:50 UTC))),
        )
    }

    fn legacy(product_id: &str, state: TransactionState, quantity: u32) -> StoreTransaction {
        StoreTransaction::Legacy(LegacyTransaction {
            id: Some("1".to_owned()),
            original_id: None,
            product_id: product_id.to_owned(),
            quantity,
            state,
            date: Some(datetime!(2024-10-20 19:00:00 UTC)),
            original_date: None,
            applied_discount_id: None,
        })
    }

    fn modern(product_id: &str, state: TransactionState, offer: Option<TransactionOffer>) -> StoreTransaction {
        StoreTransaction::Modern {
            transaction: ModernTransaction {
                id: "2".to_owned(),
                original_id: "1".to_owned(),
                product_id: product_id.to_owned(),
                quantity: 1,
                purchase_date: datetime!(2024-10-20 19:00:00 UTC),
                original_purchase_date: Some(datetime!(2024-10-01 00:00:00 UTC)),
                expiration_date: None,
                currency: Some("EUR".to_owned()),
                is_verified: true,
                offer,
            },
            state,
        }
    }

    #[tokio::test]
    async fn test_non_subscription_event_names() {
        let resolver = resolver(false, vec![product()]);
        let id = "com.example.product1";

        let cases = [
            (TransactionState::Purchasing, Some(EventName::InitiatedCheckout)),
            (TransactionState::Purchased, Some(EventName::Purchased)),
            (TransactionState::Failed, Some(EventName::PurchaseFailed)),
            (TransactionState::Restored, Some(EventName::PurchaseRestored)),
            (TransactionState::Deferred, None),
        ];
        for (state, expected) in cases {
            let event = resolver.resolve(&legacy(id, state, 1)).await;
            assert_eq!(event.map(|e| e.event_name), expected, "state {:?}", state);
        }
    }

    #[tokio::test]
    async fn test_legacy_purchase_amount_and_currency() {
        let resolver = resolver(false, vec![product()]);

        let event = resolver
            .resolve(&legacy("com.example.product1", TransactionState::Purchased, 3))
            .await
            .unwrap();

        assert_eq!(event.amount, Decimal::new(600, 2));
        assert_eq!(event.quantity, 3);
        assert_eq!(event.currency.as_deref(), Some("USD"));
        assert_eq!(event.original_transaction_id, "1");
        assert!(!event.is_verified);
        assert!(event.should_append_receipt);
        assert_eq!(event.store_api, StoreApiVersion::Legacy);
    }

    #[tokio::test]
    async fn test_unknown_product_resolves_to_nothing() {
        let resolver = resolver(true, vec![]);
        let event = resolver
            .resolve(&legacy("missing", TransactionState::Purchased, 1))
            .await;
        assert_eq!(event, None);
    }

    #[tokio::test]
    async fn test_subscriptions_are_gated() {
        let resolver = resolver(false, vec![subscription(None)]);
        let event = resolver
            .resolve(&legacy("com.example.sub1", TransactionState::Purchased, 1))
            .await;
        assert_eq!(event, None);
    }

    #[tokio::test]
    async fn test_subscription_event_names() {
        let resolver = resolver(true, vec![subscription(Some(PaymentMode::PayAsYouGo))]);
        let id = "com.example.sub1";

        let cases = [
            (TransactionState::Purchasing, Some(EventName::SubscribeInitiatedCheckout)),
            (TransactionState::Purchased, Some(EventName::Subscribe)),
            (TransactionState::Failed, Some(EventName::SubscribeFailed)),
            (TransactionState::Restored, Some(EventName::SubscribeRestore)),
            (TransactionState::Deferred, None),
        ];
        for (state, expected) in cases {
            let event = resolver.resolve(&legacy(id, state, 1)).await;
            assert_eq!(event.map(|e| e.event_name), expected, "state {:?}", state);
        }
    }

    #[tokio::test]
    async fn test_legacy_free_trial_starts_trial() {
        let resolver = resolver(true, vec![subscription(Some(PaymentMode::FreeTrial))]);

        let event = resolver
            .resolve(&legacy("com.example.sub1", TransactionState::Purchased, 1))
            .await
            .unwrap();

        assert_eq!(event.event_name, EventName::StartTrial);
        assert_eq!(event.amount, Decimal::ZERO);
        assert!(event.is_start_trial);
        assert!(event.has_introductory_offer);
        assert!(event.has_free_trial);
        assert_eq!(
            event.introductory_offer_subscription_period.map(|p| p.to_string()),
            Some("P6M".to_owned())
        );
        assert_eq!(
            event.subscription_period.map(|p| p.to_string()),
            Some("P1Y".to_owned())
        );
    }

    #[tokio::test]
    async fn test_legacy_applied_discount_overrides_introductory_offer() {
        let resolver = resolver(true, vec![subscription(Some(PaymentMode::FreeTrial))]);
        let StoreTransaction::Legacy(mut transaction) =
            legacy("com.example.sub1", TransactionState::Purchased, 1)
        else {
            unreachable!()
        };
        transaction.applied_discount_id = Some("promo".to_owned());

        let event = resolver
            .resolve(&StoreTransaction::Legacy(transaction))
            .await
            .unwrap();

        assert_eq!(event.event_name, EventName::Subscribe);
        assert_eq!(event.amount, Decimal::new(1999, 2));
    }

    #[tokio::test]
    async fn test_modern_transaction_offer_wins_over_product() {
        let resolver = resolver(true, vec![subscription(Some(PaymentMode::PayAsYouGo))]);
        let offer = TransactionOffer {
            offer_type: OfferType::Introductory,
            payment_mode: Some(PaymentMode::FreeTrial),
        };

        let event = resolver
            .resolve(&modern("com.example.sub1", TransactionState::Purchased, Some(offer)))
            .await
            .unwrap();

        assert_eq!(event.event_name, EventName::StartTrial);
        assert_eq!(event.currency.as_deref(), Some("EUR"));
        assert_eq!(event.transaction_id, "2");
        assert_eq!(event.original_transaction_id, "1");
        assert!(event.is_verified);
        assert!(!event.should_append_receipt);
        assert_eq!(event.store_api, StoreApiVersion::Modern);
    }

    #[tokio::test]
    async fn test_modern_transaction_falls_back_to_product_offer() {
        let resolver = resolver(true, vec![subscription(Some(PaymentMode::FreeTrial))]);

        let event = resolver
            .resolve(&modern("com.example.sub1", TransactionState::Purchased, None))
            .await
            .unwrap();

        assert_eq!(event.event_name, EventName::StartTrial);
    }
}
