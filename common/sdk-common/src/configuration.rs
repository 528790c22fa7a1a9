use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use crate::store::DataStore;

// TRICKY: this payload is written verbatim from the server's app events
// configuration response. If the server renames a key, parsing falls back to
// the defaults below rather than failing.
pub const APP_EVENTS_CONFIGURATION_CACHE_KEY: &str = "app_events:configuration";

/// One hour, in nanoseconds.
pub const DEFAULT_IAP_OBSERVATION_TIME_NS: u64 = 3_600_000_000_000;
pub const DEFAULT_IAP_DEDUP_WINDOW_MS: u64 = 60_000;

/// Canonical field name to the parameter keys accepted as aliases for it.
pub type DedupConfiguration = BTreeMap<String, Vec<String>>;

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("no configuration has been cached yet")]
    NotFound,
    #[error("failed to parse configuration: {0}")]
    DataParsingError(#[from] serde_json::Error),
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppEventsConfiguration {
    #[serde(default)]
    pub subscription_auto_logging_enabled: bool,
    #[serde(default = "default_observation_time")]
    pub iap_observation_time: u64,
    #[serde(default = "default_dedup_window")]
    pub iap_manual_and_auto_log_dedup_window: u64,
    #[serde(default = "default_prod_dedup_configuration")]
    pub iap_prod_dedup_configuration: DedupConfiguration,
    #[serde(default)]
    pub iap_test_dedup_configuration: DedupConfiguration,
}

fn default_observation_time() -> u64 {
    DEFAULT_IAP_OBSERVATION_TIME_NS
}

fn default_dedup_window() -> u64 {
    DEFAULT_IAP_DEDUP_WINDOW_MS
}

fn default_prod_dedup_configuration() -> DedupConfiguration {
    [
        "fb_content_id",
        "fb_content_title",
        "fb_description",
        "fb_transaction_id",
        "_valueToSum",
        "fb_currency",
    ]
    .into_iter()
    .map(|key| (key.to_owned(), vec![key.to_owned()]))
    .collect()
}

impl Default for AppEventsConfiguration {
    fn default() -> Self {
        AppEventsConfiguration {
            subscription_auto_logging_enabled: false,
            iap_observation_time: default_observation_time(),
            iap_manual_and_auto_log_dedup_window: default_dedup_window(),
            iap_prod_dedup_configuration: default_prod_dedup_configuration(),
            iap_test_dedup_configuration: DedupConfiguration::new(),
        }
    }
}

impl AppEventsConfiguration {
    pub fn from_json(payload: &str) -> Result<AppEventsConfiguration, ConfigurationError> {
        Ok(serde_json::from_str(payload)?)
    }

    /// Returns the last configuration persisted by the host.
    #[instrument(skip_all)]
    pub fn from_store(store: &dyn DataStore) -> Result<AppEventsConfiguration, ConfigurationError> {
        let serialized = store
            .get(APP_EVENTS_CONFIGURATION_CACHE_KEY)
            .ok_or(ConfigurationError::NotFound)?;

        serde_json::from_slice(&serialized).map_err(|e| {
            tracing::error!("failed to parse cached configuration: {}", e);
            ConfigurationError::DataParsingError(e)
        })
    }
}

pub trait ConfigurationProvider: Send + Sync {
    fn cached_configuration(&self) -> Arc<AppEventsConfiguration>;
}

/// Serves whatever configuration it was last given.
pub struct StaticConfigurationProvider {
    current: RwLock<Arc<AppEventsConfiguration>>,
}

impl StaticConfigurationProvider {
    pub fn new(configuration: AppEventsConfiguration) -> StaticConfigurationProvider {
        StaticConfigurationProvider {
            current: RwLock::new(Arc::new(configuration)),
        }
    }

    /// Loads the cached configuration, using defaults when there is none.
    pub fn load_cached(store: &dyn DataStore) -> StaticConfigurationProvider {
        let configuration = match AppEventsConfiguration::from_store(store) {
            Ok(configuration) => configuration,
            Err(ConfigurationError::NotFound) => AppEventsConfiguration::default(),
            Err(e) => {
                tracing::warn!("using default configuration: {}", e);
                AppEventsConfiguration::default()
            }
        };

        StaticConfigurationProvider::new(configuration)
    }

    pub fn update(&self, configuration: AppEventsConfiguration) {
        if let Ok(mut current) = self.current.write() {
            *current = Arc::new(configuration);
        }
    }
}

impl Default for StaticConfigurationProvider {
    fn default() -> Self {
        StaticConfigurationProvider::new(AppEventsConfiguration::default())
    }
}

impl ConfigurationProvider for StaticConfigurationProvider {
    fn cached_configuration(&self) -> Arc<AppEventsConfiguration> {
        match self.current.read() {
            Ok(current) => current.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
