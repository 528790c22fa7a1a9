use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Free-form event parameters, as sent to the platform.
pub type Parameters = serde_json::Map<String, Value>;

/// SDK-internal parameters grouped by block name. They travel alongside an
/// event but are not part of its public payload.
pub type OperationalParameters = BTreeMap<String, Parameters>;

/// Block holding in-app-purchase operational parameters.
pub const IAP_PARAMETERS: &str = "iap_parameters";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppEvent {
    pub name: String,
    pub value_to_sum: Option<f64>,
    pub parameters: Parameters,
    pub is_implicit: bool,
    pub access_token: Option<String>,
    pub operational_parameters: Option<OperationalParameters>,
}

impl AppEvent {
    pub fn implicit(name: &str, value_to_sum: Option<f64>, parameters: Parameters) -> AppEvent {
        AppEvent {
            name: name.to_owned(),
            value_to_sum,
            parameters,
            is_implicit: true,
            access_token: None,
            operational_parameters: None,
        }
    }

    pub fn operational_parameter(&self, block: &str, key: &str) -> Option<&Value> {
        self.operational_parameters.as_ref()?.get(block)?.get(key)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushBehavior {
    #[default]
    Auto,
    ExplicitOnly,
    EagerPerEvent,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseFlushBehaviorError(String);

impl FromStr for FlushBehavior {
    type Err = ParseFlushBehaviorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(FlushBehavior::Auto),
            "explicit_only" => Ok(FlushBehavior::ExplicitOnly),
            "eager_per_event" => Ok(FlushBehavior::EagerPerEvent),
            other => Err(ParseFlushBehaviorError(other.to_owned())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushReason {
    Explicit,
    Timer,
    SessionChange,
    PersistedEvents,
    EventThreshold,
    EagerlyFlushingEvent,
}

pub trait EventLogger: Send + Sync {
    fn log_event(&self, event: AppEvent);
    fn flush(&self, reason: FlushReason);
    fn flush_behavior(&self) -> FlushBehavior;
}

/// Flush right away unless the host asked to only ever flush explicitly.
pub fn flush_eagerly(logger: &dyn EventLogger) {
    if logger.flush_behavior() != FlushBehavior::ExplicitOnly {
        logger.flush(FlushReason::EagerlyFlushingEvent);
    }
}

pub struct PrintEventLogger {
    flush_behavior: FlushBehavior,
}

impl PrintEventLogger {
    pub fn new(flush_behavior: FlushBehavior) -> PrintEventLogger {
        PrintEventLogger { flush_behavior }
    }
}

impl EventLogger for PrintEventLogger {
    fn log_event(&self, event: AppEvent) {
        let labels = [("implicit", event.is_implicit.to_string())];
        metrics::counter!("app_events_logged_total", &labels).increment(1);

        match serde_json::to_string(&event) {
            Ok(payload) => tracing::info!(name = %event.name, "event: {}", payload),
            Err(e) => tracing::error!("failed to serialize event: {}", e),
        }
    }

    fn flush(&self, reason: FlushReason) {
        tracing::info!(?reason, "flush requested");
        metrics::counter!("app_events_flushes_total").increment(1);
    }

    fn flush_behavior(&self) -> FlushBehavior {
        self.flush_behavior
    }
}

/// Event logger that keeps everything it is handed, for assertions.
#[derive(Default)]
pub struct RecordingEventLogger {
    flush_behavior: FlushBehavior,
    events: Mutex<Vec<AppEvent>>,
    flushes: Mutex<Vec<FlushReason>>,
}

impl RecordingEventLogger {
    pub fn new(flush_behavior: FlushBehavior) -> RecordingEventLogger {
        RecordingEventLogger {
            flush_behavior,
            ..Default::default()
        }
    }

    pub fn events(&self) -> Vec<AppEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn event_names(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.name).collect()
    }

    pub fn flushes(&self) -> Vec<FlushReason> {
        self.flushes.lock().map(|f| f.clone()).unwrap_or_default()
    }
}

impl EventLogger for RecordingEventLogger {
    fn log_event(&self, event: AppEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    fn flush(&self, reason: FlushReason) {
        if let Ok(mut flushes) = self.flushes.lock() {
            flushes.push(reason);
        }
    }

    fn flush_behavior(&self) -> FlushBehavior {
        self.flush_behavior
    }
}
