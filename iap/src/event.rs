use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

use crate::names::EventName;

/// `fb_transaction_date` layout, e.g. `2024-10-20 19:02:50+0000`.
const TRANSACTION_DATE_FORMAT: &[FormatItem<'static>] = format_description!(
    "[year]-[month]-[day] [hour]:[minute]:[second][offset_hour sign:mandatory][offset_minute]"
);

pub fn format_transaction_date(date: OffsetDateTime) -> String {
    date.to_offset(UtcOffset::UTC)
        .format(TRANSACTION_DATE_FORMAT)
        .unwrap_or_default()
}

/// Accepts both a numeric offset and a `Z` suffix.
pub fn parse_transaction_date(raw: &str) -> Option<OffsetDateTime> {
    match raw.strip_suffix('Z') {
        Some(stripped) => OffsetDateTime::parse(&format!("{stripped}+0000"), TRANSACTION_DATE_FORMAT),
        None => OffsetDateTime::parse(raw, TRANSACTION_DATE_FORMAT),
    }
    .ok()
}

/// Which store API generation produced a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum StoreApiVersion {
    #[serde(rename = "SK1")]
    Legacy,
    #[serde(rename = "SK2")]
    Modern,
}

impl StoreApiVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreApiVersion::Legacy => "SK1",
            StoreApiVersion::Modern => "SK2",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodUnit {
    Day,
    Week,
    Month,
    Year,
}

impl PeriodUnit {
    fn designator(&self) -> char {
        match self {
            PeriodUnit::Day => 'D',
            PeriodUnit::Week => 'W',
            PeriodUnit::Month => 'M',
            PeriodUnit::Year => 'Y',
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SubscriptionPeriod {
    pub unit: PeriodUnit,
    pub num_units: u32,
}

impl SubscriptionPeriod {
    pub fn new(unit: PeriodUnit, num_units: u32) -> SubscriptionPeriod {
        SubscriptionPeriod { unit, num_units }
    }
}

/// ISO 8601 duration, e.g. `P1Y` or `P6M`.
impl fmt::Display for SubscriptionPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}{}", self.num_units, self.unit.designator())
    }
}

/// A purchase or subscription occurrence, normalized from either store API.
#[derive(Clone, Debug, PartialEq)]
pub struct IapEvent {
    pub event_name: EventName,
    pub product_id: String,
    pub product_title: String,
    pub product_description: String,
    pub amount: Decimal,
    pub quantity: u32,
    pub currency: Option<String>,
    pub transaction_id: String,
    pub original_transaction_id: String,
    pub transaction_date: OffsetDateTime,
    pub original_transaction_date: Option<OffsetDateTime>,
    pub expiration_date: Option<OffsetDateTime>,
    pub is_verified: bool,
    pub is_subscription: bool,
    pub subscription_period: Option<SubscriptionPeriod>,
    pub is_start_trial: bool,
    pub has_introductory_offer: bool,
    pub has_free_trial: bool,
    pub introductory_offer_subscription_period: Option<SubscriptionPeriod>,
    pub introductory_offer_price: Option<Decimal>,
    pub should_append_receipt: bool,
    pub store_api: StoreApiVersion,
}

impl IapEvent {
    /// The `fb_iap_product_type` value.
    pub fn product_type(&self) -> &'static str {
        if self.is_subscription {
            "subs"
        } else {
            "inapp"
        }
    }

    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expiration_date.is_some_and(|expiration| expiration < now)
    }
}
