use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum EventName {
    #[serde(rename = "fb_mobile_initiated_checkout")]
    InitiatedCheckout,
    #[serde(rename = "fb_mobile_purchase")]
    Purchased,
    #[serde(rename = "fb_mobile_purchase_failed")]
    PurchaseFailed,
    #[serde(rename = "fb_mobile_purchase_restored")]
    PurchaseRestored,
    #[serde(rename = "SubscriptionInitiatedCheckout")]
    SubscribeInitiatedCheckout,
    #[serde(rename = "Subscribe")]
    Subscribe,
    #[serde(rename = "StartTrial")]
    StartTrial,
    #[serde(rename = "SubscriptionFailed")]
    SubscribeFailed,
    #[serde(rename = "SubscriptionRestore")]
    SubscribeRestore,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::InitiatedCheckout => "fb_mobile_initiated_checkout",
            EventName::Purchased => "fb_mobile_purchase",
            EventName::PurchaseFailed => "fb_mobile_purchase_failed",
            EventName::PurchaseRestored => "fb_mobile_purchase_restored",
            EventName::SubscribeInitiatedCheckout => "SubscriptionInitiatedCheckout",
            EventName::Subscribe => "Subscribe",
            EventName::StartTrial => "StartTrial",
            EventName::SubscribeFailed => "SubscriptionFailed",
            EventName::SubscribeRestore => "SubscriptionRestore",
        }
    }

    /// Cached records for these events are kept forever, so a renewal or a
    /// reinstall never logs a second subscription start.
    pub fn is_trimmable(&self) -> bool {
        !matches!(
            self,
            EventName::Subscribe | EventName::SubscribeRestore | EventName::StartTrial
        )
    }

    pub fn is_trimmable_name(name: &str) -> bool {
        name != EventName::Subscribe.as_str()
            && name != EventName::SubscribeRestore.as_str()
            && name != EventName::StartTrial.as_str()
    }

    /// Checkout event logged alongside this one for parity between store APIs.
    pub fn checkout_initiated(is_subscription: bool) -> EventName {
        if is_subscription {
            EventName::SubscribeInitiatedCheckout
        } else {
            EventName::InitiatedCheckout
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameter keys understood by the platform.
pub mod params {
    pub const CONTENT_ID: &str = "fb_content_id";
    pub const NUM_ITEMS: &str = "fb_num_items";
    pub const TRANSACTION_DATE: &str = "fb_transaction_date";
    pub const PRODUCT_TITLE: &str = "fb_content_title";
    pub const DESCRIPTION: &str = "fb_description";
    pub const CURRENCY: &str = "fb_currency";
    pub const TRANSACTION_ID: &str = "fb_transaction_id";
    pub const IMPLICITLY_LOGGED_PURCHASE: &str = "_implicitlyLogged";
    pub const IN_APP_PURCHASE_TYPE: &str = "fb_iap_product_type";
    pub const SUBSCRIPTION_PERIOD: &str = "fb_iap_subs_period";
    pub const IS_START_TRIAL: &str = "fb_iap_is_start_trial";
    pub const HAS_FREE_TRIAL: &str = "fb_iap_has_free_trial";
    pub const TRIAL_PERIOD: &str = "fb_iap_trial_period";
    pub const TRIAL_PRICE: &str = "fb_iap_trial_price";
    pub const VALUE_TO_SUM: &str = "_valueToSum";
    pub const LOG_TIME: &str = "_logTime";

    pub const IAP_CLIENT_LIBRARY_VERSION: &str = "fb_iap_client_library_version";
    pub const IAP_SDK_SUPPORTED_LIBRARY_VERSIONS: &str = "fb_iap_sdk_supported_library_versions";
    pub const RECEIPT_DATA: &str = "receipt_data";

    pub const IAP_ACTUAL_DEDUP_RESULT: &str = "fb_iap_actual_dedup_result";
    pub const IAP_ACTUAL_DEDUP_KEY_USED: &str = "fb_iap_actual_dedup_key_used";
    pub const IAP_TEST_DEDUP_RESULT: &str = "fb_iap_test_dedup_result";
    pub const IAP_TEST_DEDUP_KEY_USED: &str = "fb_iap_test_dedup_key_used";
    pub const IAP_NON_DEDUPED_EVENT_TIME: &str = "fb_iap_non_deduped_event_time";
}
