//! Raw store-side values, as delivered by the two store API generations.
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::event::{StoreApiVersion, SubscriptionPeriod};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Purchasing,
    Purchased,
    Failed,
    Restored,
    Deferred,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    FreeTrial,
    PayAsYouGo,
    PayUpFront,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct SubscriptionOffer {
    /// Set for promotional discounts, absent for the introductory offer.
    #[serde(default)]
    pub id: Option<String>,
    pub payment_mode: PaymentMode,
    pub period: SubscriptionPeriod,
    pub price: Decimal,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct SubscriptionInfo {
    pub period: SubscriptionPeriod,
    #[serde(default)]
    pub introductory_offer: Option<SubscriptionOffer>,
    #[serde(default)]
    pub discounts: Vec<SubscriptionOffer>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Product {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub price: Decimal,
    /// Currency of the storefront price locale.
    #[serde(default)]
    pub currency_code: Option<String>,
    #[serde(default)]
    pub subscription: Option<SubscriptionInfo>,
}

impl Product {
    pub fn is_subscription(&self) -> bool {
        self.subscription.is_some()
    }

    /// Offer applied to a legacy payment: the matching promotional discount,
    /// else the introductory offer.
    pub fn offer_for_discount(&self, discount_id: Option<&str>) -> Option<&SubscriptionOffer> {
        let subscription = self.subscription.as_ref()?;
        discount_id
            .and_then(|id| {
                subscription
                    .discounts
                    .iter()
                    .find(|discount| discount.id.as_deref() == Some(id))
            })
            .or(subscription.introductory_offer.as_ref())
    }
}

/// A transaction pushed by the legacy, observer-based store API.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct LegacyTransaction {
    #[serde(default)]
    pub id: Option<String>,
    /// Set when the transaction is a renewal or a restore.
    #[serde(default)]
    pub original_id: Option<String>,
    pub product_id: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    pub state: TransactionState,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub date: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub original_date: Option<OffsetDateTime>,
    #[serde(default)]
    pub applied_discount_id: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferType {
    Introductory,
    Promotional,
    Code,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct TransactionOffer {
    #[serde(rename = "type")]
    pub offer_type: OfferType,
    #[serde(default)]
    pub payment_mode: Option<PaymentMode>,
}

/// A transaction read from the modern, stream-based store API.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ModernTransaction {
    pub id: String,
    pub original_id: String,
    pub product_id: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub purchase_date: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub original_purchase_date: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expiration_date: Option<OffsetDateTime>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub offer: Option<TransactionOffer>,
}

fn default_quantity() -> u32 {
    1
}

#[derive(Clone, Debug, PartialEq)]
pub enum StoreTransaction {
    Legacy(LegacyTransaction),
    /// Modern transactions carry no state of their own; the observer knows
    /// whether it read a new transaction or a current entitlement.
    Modern {
        transaction: ModernTransaction,
        state: TransactionState,
    },
}

impl StoreTransaction {
    pub fn state(&self) -> TransactionState {
        match self {
            StoreTransaction::Legacy(transaction) => transaction.state,
            StoreTransaction::Modern { state, .. } => *state,
        }
    }

    pub fn product_id(&self) -> &str {
        match self {
            StoreTransaction::Legacy(transaction) => &transaction.product_id,
            StoreTransaction::Modern { transaction, .. } => &transaction.product_id,
        }
    }

    pub fn store_api(&self) -> StoreApiVersion {
        match self {
            StoreTransaction::Legacy(_) => StoreApiVersion::Legacy,
            StoreTransaction::Modern { .. } => StoreApiVersion::Modern,
        }
    }
}
