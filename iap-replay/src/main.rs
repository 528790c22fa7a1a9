//! Replay a recorded store session through the purchase pipeline and print
//! the app events it produces.
use std::sync::Arc;

use anyhow::{Context, Result};
use envconfig::Envconfig;
use sdk_common::event_logger::PrintEventLogger;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use iap_replay::config::Config;
use iap_replay::fixture::Fixture;
use iap_replay::replay::replay;

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();

    let config = Config::init_from_env().context("invalid configuration")?;
    let fixture = Fixture::load(&config.fixture)?;
    info!(
        sdk_version = config.iap.sdk_version.as_str(),
        products = fixture.products.len(),
        "replaying store session"
    );

    let event_logger = Arc::new(PrintEventLogger::new(config.flush_behavior));
    replay(&config, fixture, event_logger).await?;

    Ok(())
}
