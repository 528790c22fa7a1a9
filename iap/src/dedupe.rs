//! Pairs implicitly logged purchase events with the events a developer logs
//! by hand for the same purchase.
//!
//! Both kinds are buffered for one dedup window. When the window closes every
//! implicit event is compared against every manual event, once with the
//! production key configuration and once with the test configuration. Matches
//! are annotated on both sides, then everything in the buffers is logged.
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use sdk_common::configuration::{ConfigurationProvider, DedupConfiguration};
use sdk_common::event_logger::{
    flush_eagerly, AppEvent, EventLogger, OperationalParameters, Parameters, IAP_PARAMETERS,
};
use sdk_common::store::DataStore;
use sdk_common::time::TimeSource;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use crate::event::parse_transaction_date;
use crate::names::{params, EventName};
use crate::timer::ArmedTimer;

pub const MANUAL_EVENTS_KEY: &str = "iap:dedupe:manual_events";
pub const IMPLICIT_EVENTS_KEY: &str = "iap:dedupe:implicit_events";

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DedupableEvent {
    pub event_name: String,
    pub value_to_sum: Option<f64>,
    pub parameters: Option<Parameters>,
    pub is_implicit_event: bool,
    pub access_token: Option<String>,
    #[serde(default)]
    pub has_been_prod_deduped: bool,
    #[serde(default)]
    pub has_been_test_deduped: bool,
    pub operational_parameters: Option<OperationalParameters>,
}

// Operational parameters are evidence attached by the matching pass and do
// not change which event this is.
impl PartialEq for DedupableEvent {
    fn eq(&self, other: &Self) -> bool {
        self.event_name == other.event_name
            && self.value_to_sum == other.value_to_sum
            && self.parameters == other.parameters
            && self.is_implicit_event == other.is_implicit_event
            && self.access_token == other.access_token
            && self.has_been_prod_deduped == other.has_been_prod_deduped
            && self.has_been_test_deduped == other.has_been_test_deduped
    }
}

impl From<AppEvent> for DedupableEvent {
    fn from(event: AppEvent) -> Self {
        DedupableEvent {
            event_name: event.name,
            value_to_sum: event.value_to_sum,
            parameters: Some(event.parameters),
            is_implicit_event: event.is_implicit,
            access_token: event.access_token,
            has_been_prod_deduped: false,
            has_been_test_deduped: false,
            operational_parameters: event.operational_parameters,
        }
    }
}

impl From<DedupableEvent> for AppEvent {
    fn from(event: DedupableEvent) -> Self {
        AppEvent {
            name: event.event_name,
            value_to_sum: event.value_to_sum,
            parameters: event.parameters.unwrap_or_default(),
            is_implicit: event.is_implicit_event,
            access_token: event.access_token,
            operational_parameters: event.operational_parameters,
        }
    }
}

impl DedupableEvent {
    fn parameter(&self, key: &str) -> Option<&Value> {
        self.parameters.as_ref()?.get(key)
    }

    fn iap_operational_parameter(&self, key: &str) -> Option<&Value> {
        self.operational_parameters
            .as_ref()?
            .get(IAP_PARAMETERS)?
            .get(key)
    }

    fn set_iap_operational_parameter(&mut self, key: &str, value: Value) {
        self.operational_parameters
            .get_or_insert_with(OperationalParameters::new)
            .entry(IAP_PARAMETERS.to_owned())
            .or_default()
            .insert(key.to_owned(), value);
    }

    /// When the purchase happened, for implicit events.
    fn transaction_time_ms(&self) -> Option<i64> {
        let raw = self.parameter(params::TRANSACTION_DATE)?.as_str()?;
        let date = parse_transaction_date(raw)?;
        Some(date.unix_timestamp() * 1000)
    }

    /// When the developer logged the event, for manual events.
    fn log_time_ms(&self) -> Option<i64> {
        let seconds = as_number(self.parameter(params::LOG_TIME)?)?;
        Some((seconds * 1000.0).round() as i64)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Pass {
    Prod,
    Test,
}

impl Pass {
    fn is_done(&self, event: &DedupableEvent) -> bool {
        match self {
            Pass::Prod => event.has_been_prod_deduped,
            Pass::Test => event.has_been_test_deduped,
        }
    }

    fn mark(&self, event: &mut DedupableEvent, key: &str) {
        let (result_key, key_used) = match self {
            Pass::Prod => {
                event.has_been_prod_deduped = true;
                (params::IAP_ACTUAL_DEDUP_RESULT, params::IAP_ACTUAL_DEDUP_KEY_USED)
            }
            Pass::Test => {
                event.has_been_test_deduped = true;
                (params::IAP_TEST_DEDUP_RESULT, params::IAP_TEST_DEDUP_KEY_USED)
            }
        };
        event.set_iap_operational_parameter(result_key, Value::from("1"));
        event.set_iap_operational_parameter(key_used, Value::from(key));
    }

    fn label(&self) -> &'static str {
        match self {
            Pass::Prod => "prod",
            Pass::Test => "test",
        }
    }
}

pub fn should_dedupe_event(event_name: &str) -> bool {
    [EventName::Purchased, EventName::Subscribe, EventName::StartTrial]
        .iter()
        .any(|name| name.as_str() == event_name)
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => raw.trim().parse().ok(),
        _ => None,
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn aliases<'a>(configuration: &'a DedupConfiguration, key: &'a str) -> Vec<&'a str> {
    match configuration.get(key) {
        Some(aliases) => aliases.iter().map(String::as_str).collect(),
        None => vec![key],
    }
}

/// Returns the manual-side key that proved `implicit` and `manual` describe
/// the same purchase, or `None` if they do not.
pub fn are_duplicates(
    implicit: &DedupableEvent,
    manual: &DedupableEvent,
    configuration: &DedupConfiguration,
    window_ms: u64,
) -> Option<String> {
    if implicit.event_name != manual.event_name {
        return None;
    }

    let implicit_time = implicit.transaction_time_ms()?;
    let manual_time = manual.log_time_ms()?;
    if manual_time.abs_diff(implicit_time) > window_ms {
        return None;
    }

    let implicit_value = implicit.value_to_sum?;
    let value_matches = manual.value_to_sum == Some(implicit_value)
        || aliases(configuration, params::VALUE_TO_SUM)
            .into_iter()
            .any(|alias| manual.parameter(alias).and_then(as_number) == Some(implicit_value));
    if !value_matches {
        return None;
    }

    let implicit_currency = non_empty_str(implicit.parameter(params::CURRENCY))?;
    let currency_matches = aliases(configuration, params::CURRENCY)
        .into_iter()
        .any(|alias| non_empty_str(manual.parameter(alias)) == Some(implicit_currency));
    if !currency_matches {
        return None;
    }

    for (key, key_aliases) in configuration {
        if key == params::VALUE_TO_SUM || key == params::CURRENCY {
            continue;
        }
        let Some(implicit_value) = non_empty_str(implicit.parameter(key)) else {
            continue;
        };

        for alias in key_aliases {
            let manual_value = non_empty_str(manual.parameter(alias))
                .or_else(|| non_empty_str(manual.iap_operational_parameter(alias)));
            if manual_value == Some(implicit_value) {
                return Some(alias.clone());
            }
        }
    }

    None
}

fn dedupe_pass(
    pass: Pass,
    implicit_events: &mut [DedupableEvent],
    manual_events: &mut [DedupableEvent],
    configuration: &DedupConfiguration,
    window_ms: u64,
) -> usize {
    let mut matched = 0;

    for implicit in implicit_events.iter_mut() {
        if pass.is_done(implicit) {
            continue;
        }

        for manual in manual_events.iter_mut() {
            if pass.is_done(manual) {
                continue;
            }
            let Some(key) = are_duplicates(implicit, manual, configuration, window_ms) else {
                continue;
            };

            pass.mark(implicit, &key);
            pass.mark(manual, &key);
            if manual
                .iap_operational_parameter(params::IAP_NON_DEDUPED_EVENT_TIME)
                .is_none()
            {
                if let Some(time_ms) = implicit.transaction_time_ms() {
                    manual.set_iap_operational_parameter(
                        params::IAP_NON_DEDUPED_EVENT_TIME,
                        Value::from(time_ms / 1000),
                    );
                }
            }
            matched += 1;
            break;
        }
    }

    matched
}

/// Runs the production and test passes over the buffered events. Events that
/// were already matched by a pass are left alone by it.
pub fn dedupe_events(
    implicit_events: &mut [DedupableEvent],
    manual_events: &mut [DedupableEvent],
    prod_configuration: &DedupConfiguration,
    test_configuration: &DedupConfiguration,
    window_ms: u64,
) {
    for (pass, configuration) in [(Pass::Prod, prod_configuration), (Pass::Test, test_configuration)] {
        let matched = dedupe_pass(pass, implicit_events, manual_events, configuration, window_ms);
        if matched > 0 {
            metrics::counter!("iap_dedupe_matches_total", &[("pass", pass.label())])
                .increment(matched as u64);
        }
    }
}

#[derive(Default)]
struct Buffers {
    manual: Vec<DedupableEvent>,
    implicit: Vec<DedupableEvent>,
    timer: Option<ArmedTimer>,
}

impl Buffers {
    fn is_empty(&self) -> bool {
        self.manual.is_empty() && self.implicit.is_empty()
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }

    fn drain(&mut self) -> (Vec<DedupableEvent>, Vec<DedupableEvent>) {
        self.timer = None;
        (mem::take(&mut self.implicit), mem::take(&mut self.manual))
    }
}

pub struct DedupeProcessor {
    this: Weak<DedupeProcessor>,
    enabled: AtomicBool,
    buffers: Mutex<Buffers>,
    event_logger: Arc<dyn EventLogger>,
    configuration: Arc<dyn ConfigurationProvider>,
    store: Arc<dyn DataStore>,
    clock: Arc<dyn TimeSource>,
    fallback_window: Duration,
}

impl DedupeProcessor {
    pub fn new(
        event_logger: Arc<dyn EventLogger>,
        configuration: Arc<dyn ConfigurationProvider>,
        store: Arc<dyn DataStore>,
        clock: Arc<dyn TimeSource>,
        fallback_window: Duration,
    ) -> Arc<DedupeProcessor> {
        Arc::new_cyclic(|this| DedupeProcessor {
            this: this.clone(),
            enabled: AtomicBool::new(false),
            buffers: Mutex::new(Buffers::default()),
            event_logger,
            configuration,
            store,
            clock,
            fallback_window,
        })
    }

    fn buffers(&self) -> MutexGuard<'_, Buffers> {
        match self.buffers.lock() {
            Ok(buffers) => buffers,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    /// Stops buffering new events. Events already buffered or persisted are
    /// kept.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Cancels the timer and discards every buffered event.
    pub fn reset(&self) {
        let mut buffers = self.buffers();
        buffers.cancel_timer();
        buffers.manual.clear();
        buffers.implicit.clear();
    }

    pub fn dedup_window(&self) -> Duration {
        match self
            .configuration
            .cached_configuration()
            .iap_manual_and_auto_log_dedup_window
        {
            0 => self.fallback_window,
            window_ms => Duration::from_millis(window_ms),
        }
    }

    pub fn buffered_event_counts(&self) -> (usize, usize) {
        let buffers = self.buffers();
        (buffers.implicit.len(), buffers.manual.len())
    }

    pub fn is_timer_armed(&self) -> bool {
        self.buffers()
            .timer
            .as_ref()
            .is_some_and(|timer| !timer.has_fired())
    }

    /// Buffers an event logged by the developer. `_logTime` is stamped from
    /// the clock when the caller did not set it.
    pub fn process_manual_event(&self, mut event: AppEvent) {
        if !event.parameters.contains_key(params::LOG_TIME) {
            event.parameters.insert(
                params::LOG_TIME.to_owned(),
                Value::from(self.clock.now().unix_timestamp()),
            );
        }

        if !self.is_enabled() {
            self.event_logger.log_event(event);
            flush_eagerly(self.event_logger.as_ref());
            return;
        }

        let mut event = DedupableEvent::from(event);
        event.is_implicit_event = false;
        self.enqueue(event);
    }

    pub fn process_implicit_event(&self, event: AppEvent) {
        if !self.is_enabled() {
            self.event_logger.log_event(event);
            flush_eagerly(self.event_logger.as_ref());
            return;
        }

        let mut event = DedupableEvent::from(event);
        event.is_implicit_event = true;
        self.enqueue(event);
    }

    fn enqueue(&self, event: DedupableEvent) {
        let mut buffers = self.buffers();
        if event.is_implicit_event {
            buffers.implicit.push(event);
        } else {
            buffers.manual.push(event);
        }
        self.arm_timer_if_needed(&mut buffers);
    }

    fn arm_timer_if_needed(&self, buffers: &mut Buffers) {
        if buffers.timer.as_ref().is_some_and(|timer| !timer.has_fired()) {
            return;
        }

        let this = self.this.clone();
        buffers.timer = ArmedTimer::arm(self.dedup_window(), move || {
            if let Some(processor) = this.upgrade() {
                processor.on_timer_fired();
            }
        });
    }

    fn on_timer_fired(&self) {
        let (implicit, manual) = self.buffers().drain();
        self.dedupe_and_log(implicit, manual);
    }

    /// Runs the matching pass on whatever is buffered right now instead of
    /// waiting for the window to close.
    #[instrument(skip_all)]
    pub fn process_buffered_events(&self) {
        let (implicit, manual) = {
            let mut buffers = self.buffers();
            buffers.cancel_timer();
            buffers.drain()
        };
        self.dedupe_and_log(implicit, manual);
    }

    fn dedupe_and_log(&self, mut implicit: Vec<DedupableEvent>, mut manual: Vec<DedupableEvent>) {
        if implicit.is_empty() && manual.is_empty() {
            return;
        }

        let configuration = self.configuration.cached_configuration();
        let window_ms = u64::try_from(self.dedup_window().as_millis()).unwrap_or(u64::MAX);
        dedupe_events(
            &mut implicit,
            &mut manual,
            &configuration.iap_prod_dedup_configuration,
            &configuration.iap_test_dedup_configuration,
            window_ms,
        );

        tracing::debug!(
            implicit = implicit.len(),
            manual = manual.len(),
            "logging dedupe buffers"
        );
        for event in implicit.into_iter().chain(manual) {
            self.event_logger.log_event(event.into());
        }
        flush_eagerly(self.event_logger.as_ref());
    }

    /// Moves both buffers into the store so they survive the process being
    /// killed in the background. Events saved by an earlier background that
    /// were not recovered yet are kept.
    #[instrument(skip_all)]
    pub fn save_non_processed_events(&self) {
        let (implicit, manual) = {
            let mut buffers = self.buffers();
            buffers.cancel_timer();
            buffers.drain()
        };

        for (key, events) in [(IMPLICIT_EVENTS_KEY, implicit), (MANUAL_EVENTS_KEY, manual)] {
            if events.is_empty() {
                continue;
            }
            let mut saved = self.load_saved(key);
            saved.extend(events);
            let data = match serde_json::to_vec(&saved) {
                Ok(data) => data,
                Err(e) => {
                    tracing::error!(key, "failed to serialize dedupe buffer: {}", e);
                    continue;
                }
            };
            if let Err(e) = self.store.set(key, data) {
                tracing::warn!(key, "failed to persist dedupe buffer: {}", e);
            }
        }
    }

    /// Re-buffers events persisted by [`Self::save_non_processed_events`].
    #[instrument(skip_all)]
    pub fn process_saved_events(&self) {
        let implicit = self.take_saved(IMPLICIT_EVENTS_KEY);
        let manual = self.take_saved(MANUAL_EVENTS_KEY);
        if implicit.is_empty() && manual.is_empty() {
            return;
        }

        tracing::info!(
            implicit = implicit.len(),
            manual = manual.len(),
            "recovered saved dedupe buffers"
        );
        let mut buffers = self.buffers();
        buffers.implicit.extend(implicit);
        buffers.manual.extend(manual);
        if !buffers.is_empty() {
            self.arm_timer_if_needed(&mut buffers);
        }
    }

    fn take_saved(&self, key: &str) -> Vec<DedupableEvent> {
        let saved = self.load_saved(key);
        if let Err(e) = self.store.remove(key) {
            tracing::warn!(key, "failed to clear saved dedupe buffer: {}", e);
        }
        saved
    }

    fn load_saved(&self, key: &str) -> Vec<DedupableEvent> {
        let Some(data) = self.store.get(key) else {
            return Vec::new();
        };

        match serde_json::from_slice(&data) {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(key, "discarding unreadable dedupe buffer: {}", e);
                Vec::new()
            }
        }
    }
}
