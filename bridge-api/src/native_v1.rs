use std::sync::Arc;

use serde_json::{Map, Value};
use url::Url;

use crate::error::BridgeError;
use crate::pasteboard::Pasteboard;
use crate::protocol::{
    validate_bridge_args, BridgeApiProtocol, BridgeParameters, BridgeResponse, PayloadEncoder,
    QueryParameters, ACTION_ID, BRIDGE_ARGS, METHOD_ARGS, METHOD_RESULTS,
};
use crate::url_builder::UrlBuilder;

/// Payloads of at least this many bytes go through the pasteboard.
pub const DEFAULT_DATA_LENGTH_THRESHOLD: usize = 16 * 1024;

const DIALOG_HOST: &str = "dialog";
const APP_NAME: &str = "app_name";
const SDK_VERSION: &str = "sdk_version";
const ERROR: &str = "error";
const VERSION: &str = "version";

/// App to app transport: `<scheme>://dialog/<method>` with JSON query items.
pub struct NativeV1 {
    url_builder: UrlBuilder,
    app_scheme: Option<String>,
    app_name: Option<String>,
    sdk_version: String,
    version: Option<String>,
    pasteboard: Option<Arc<dyn Pasteboard>>,
    data_length_threshold: usize,
}

impl NativeV1 {
    pub fn new(url_builder: UrlBuilder, sdk_version: impl Into<String>) -> NativeV1 {
        NativeV1 {
            url_builder,
            app_scheme: None,
            app_name: None,
            sdk_version: sdk_version.into(),
            version: None,
            pasteboard: None,
            data_length_threshold: DEFAULT_DATA_LENGTH_THRESHOLD,
        }
    }

    /// Scheme of the receiving app. Without one the caller's scheme is used.
    pub fn with_app_scheme(mut self, scheme: impl Into<String>) -> NativeV1 {
        self.app_scheme = Some(scheme.into());
        self
    }

    pub fn with_app_name(mut self, name: impl Into<String>) -> NativeV1 {
        self.app_name = Some(name.into());
        self
    }

    /// Protocol version advertised in a `version` query item.
    pub fn with_version(mut self, version: impl Into<String>) -> NativeV1 {
        self.version = Some(version.into());
        self
    }

    pub fn with_pasteboard(mut self, pasteboard: Arc<dyn Pasteboard>) -> NativeV1 {
        self.pasteboard = Some(pasteboard);
        self
    }

    pub fn with_data_length_threshold(mut self, threshold: usize) -> NativeV1 {
        self.data_length_threshold = threshold;
        self
    }

    fn bridge_args(&self, action_id: &str) -> Value {
        let mut bridge_args = Map::new();
        bridge_args.insert(ACTION_ID.to_owned(), Value::from(action_id));
        if let Some(app_name) = &self.app_name {
            bridge_args.insert(APP_NAME.to_owned(), Value::from(app_name.as_str()));
        }
        bridge_args.insert(SDK_VERSION.to_owned(), Value::from(self.sdk_version.as_str()));
        Value::Object(bridge_args)
    }
}

impl BridgeApiProtocol for NativeV1 {
    fn request_url(
        &self,
        action_id: &str,
        scheme: &str,
        method_name: &str,
        parameters: &BridgeParameters,
    ) -> Result<Url, BridgeError> {
        let mut query = QueryParameters::new();

        if !parameters.is_empty() {
            let mut encoder =
                PayloadEncoder::new(self.pasteboard.as_deref(), self.data_length_threshold);
            let method_args = Value::Object(encoder.encode_map(parameters)).to_string();
            // The receiving apps decode the query once more.
            query.insert(METHOD_ARGS.to_owned(), method_args.replace('&', "%26"));
        }
        query.insert(BRIDGE_ARGS.to_owned(), self.bridge_args(action_id).to_string());
        if let Some(version) = &self.version {
            query.insert(VERSION.to_owned(), version.clone());
        }

        let scheme = self.app_scheme.as_deref().unwrap_or(scheme);
        self.url_builder
            .url(scheme, DIALOG_HOST, &format!("/{}", method_name), &query)
    }

    fn response_parameters(
        &self,
        action_id: &str,
        query: &QueryParameters,
    ) -> Result<BridgeResponse, BridgeError> {
        let bridge_args = validate_bridge_args(action_id, query)?;
        if let Some(error) = bridge_args.get(ERROR).and_then(Value::as_object) {
            return Err(BridgeError::from_server(error));
        }

        let raw = query
            .get(METHOD_RESULTS)
            .map(String::as_str)
            .unwrap_or_default();
        if raw.is_empty() {
            tracing::debug!(action_id, "bridge response carried no results");
            return Ok(BridgeResponse::default());
        }

        match serde_json::from_str(raw) {
            Ok(Value::Object(results)) => Ok(BridgeResponse::completed(results)),
            Ok(_) => Err(BridgeError::invalid_argument(
                METHOD_RESULTS,
                raw,
                "method_results is not an object",
            )),
            Err(e) => Err(BridgeError::invalid_json(
                METHOD_RESULTS,
                raw,
                "invalid method_results",
                e,
            )),
        }
    }
}
