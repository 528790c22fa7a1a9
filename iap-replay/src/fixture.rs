use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use iap::transaction::{LegacyTransaction, ModernTransaction, Product};
use sdk_common::configuration::AppEventsConfiguration;
use sdk_common::event_logger::AppEvent;
use serde::Deserialize;
use time::OffsetDateTime;

/// A recorded store session: what the store knew about and what it delivered.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Fixture {
    /// When the session was recorded. The replay clock is pinned to it so the
    /// recorded transactions are newer than the install watermark.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub recorded_at: Option<OffsetDateTime>,
    /// Overrides the configuration cached in the store.
    #[serde(default)]
    pub configuration: Option<AppEventsConfiguration>,
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub receipt: Option<String>,
    #[serde(default)]
    pub legacy_transactions: Vec<LegacyTransaction>,
    #[serde(default)]
    pub entitlements: Vec<ModernTransaction>,
    #[serde(default)]
    pub modern_transactions: Vec<ModernTransaction>,
    #[serde(default)]
    pub manual_events: Vec<AppEvent>,
}

impl Fixture {
    pub fn load(path: &Path) -> Result<Fixture> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read fixture {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse fixture {}", path.display()))
    }
}
