//! The contract shared by every Bridge API transport.
//!
//! A call is a request URL that opens another app (or a web dialog) and a
//! response URL that comes back carrying the same action id. Transports only
//! differ in how they lay out the two.
use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Map, Value};
use url::Url;

use crate::error::BridgeError;
use crate::pasteboard::Pasteboard;

pub const BRIDGE_ARGS: &str = "bridge_args";
pub const METHOD_ARGS: &str = "method_args";
pub const METHOD_RESULTS: &str = "method_results";
pub const ACTION_ID: &str = "action_id";
pub const COMPLETION_GESTURE: &str = "completionGesture";
pub const CANCEL: &str = "cancel";

pub const DATA_TAG: &str = "data";
/// Images are sent as jpeg bytes but keep the png tag the receiving apps know.
pub const IMAGE_TAG: &str = "png";
pub const PASTEBOARD_TYPE: &str = "com.facebook.Facebook.FBAppBridgeType";

const IS_BASE64: &str = "isBase64";
const IS_PASTEBOARD: &str = "isPasteboard";
const TAG: &str = "tag";
const JSON_READY_VALUE: &str = "fbAppBridgeType_jsonReadyValue";

/// A request parameter. Plain JSON covers most dialogs; binary payloads and
/// urls need transport specific encoding.
#[derive(Clone, Debug, PartialEq)]
pub enum BridgeValue {
    Json(Value),
    Data(Vec<u8>),
    /// Encoded image bytes.
    Image(Vec<u8>),
    Url(Url),
    List(Vec<BridgeValue>),
    Map(BridgeParameters),
}

pub type BridgeParameters = BTreeMap<String, BridgeValue>;
pub type QueryParameters = BTreeMap<String, String>;

impl From<Value> for BridgeValue {
    fn from(value: Value) -> Self {
        BridgeValue::Json(value)
    }
}

impl From<&str> for BridgeValue {
    fn from(value: &str) -> Self {
        BridgeValue::Json(Value::from(value))
    }
}

impl From<String> for BridgeValue {
    fn from(value: String) -> Self {
        BridgeValue::Json(Value::from(value))
    }
}

impl From<Url> for BridgeValue {
    fn from(value: Url) -> Self {
        BridgeValue::Url(value)
    }
}

impl BridgeValue {
    /// Flattens the value into a single query item, inlining any payload.
    pub fn to_query_value(&self) -> String {
        match self {
            BridgeValue::Json(Value::String(value)) => value.clone(),
            BridgeValue::Url(url) => url.as_str().to_owned(),
            BridgeValue::Data(data) | BridgeValue::Image(data) => STANDARD.encode(data),
            other => PayloadEncoder::inline().encode(other).to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BridgeResponse {
    /// The decoded `method_results`, if the response carried any.
    pub results: Option<Map<String, Value>>,
    pub cancelled: bool,
}

impl BridgeResponse {
    pub fn completed(results: Map<String, Value>) -> BridgeResponse {
        let cancelled = results
            .get(COMPLETION_GESTURE)
            .and_then(Value::as_str)
            .is_some_and(|gesture| gesture == CANCEL);
        BridgeResponse {
            results: Some(results),
            cancelled,
        }
    }
}

pub trait BridgeApiProtocol: Send + Sync {
    fn request_url(
        &self,
        action_id: &str,
        scheme: &str,
        method_name: &str,
        parameters: &BridgeParameters,
    ) -> Result<Url, BridgeError>;

    fn response_parameters(
        &self,
        action_id: &str,
        query: &QueryParameters,
    ) -> Result<BridgeResponse, BridgeError>;
}

/// Decodes every query item of a response url. Repeated names keep the last
/// value.
pub fn query_parameters(url: &Url) -> QueryParameters {
    url.query_pairs().into_owned().collect()
}

pub(crate) fn bridge_args_json(action_id: &str) -> String {
    json!({ ACTION_ID: action_id }).to_string()
}

/// Parses `bridge_args` and checks it belongs to the call identified by
/// `action_id`.
pub(crate) fn validate_bridge_args(
    action_id: &str,
    query: &QueryParameters,
) -> Result<Map<String, Value>, BridgeError> {
    let raw = query.get(BRIDGE_ARGS).map(String::as_str).unwrap_or_default();
    if raw.is_empty() {
        return Err(BridgeError::invalid_argument(
            BRIDGE_ARGS,
            raw,
            "response has no bridge_args",
        ));
    }

    let bridge_args = match serde_json::from_str(raw) {
        Ok(Value::Object(bridge_args)) => bridge_args,
        Ok(_) => {
            return Err(BridgeError::invalid_argument(
                BRIDGE_ARGS,
                raw,
                "bridge_args is not an object",
            ))
        }
        Err(e) => {
            return Err(BridgeError::invalid_json(
                BRIDGE_ARGS,
                raw,
                "invalid bridge_args",
                e,
            ))
        }
    };

    match bridge_args.get(ACTION_ID).and_then(Value::as_str) {
        Some(response_action_id) if response_action_id == action_id => Ok(bridge_args),
        Some(_) => Err(BridgeError::invalid_argument(
            BRIDGE_ARGS,
            raw,
            "response belongs to another action",
        )),
        None => Err(BridgeError::invalid_argument(
            BRIDGE_ARGS,
            raw,
            "bridge_args has no action_id",
        )),
    }
}

/// Turns parameters into JSON, diverting at most one large payload to the
/// pasteboard.
pub(crate) struct PayloadEncoder<'a> {
    pasteboard: Option<&'a dyn Pasteboard>,
    threshold: usize,
    placed_on_pasteboard: bool,
}

impl<'a> PayloadEncoder<'a> {
    pub(crate) fn new(pasteboard: Option<&'a dyn Pasteboard>, threshold: usize) -> Self {
        PayloadEncoder {
            pasteboard,
            threshold,
            placed_on_pasteboard: false,
        }
    }

    pub(crate) fn inline() -> Self {
        PayloadEncoder::new(None, usize::MAX)
    }

    pub(crate) fn encode_map(&mut self, parameters: &BridgeParameters) -> Map<String, Value> {
        parameters
            .iter()
            .map(|(key, value)| (key.clone(), self.encode(value)))
            .collect()
    }

    pub(crate) fn encode(&mut self, value: &BridgeValue) -> Value {
        match value {
            BridgeValue::Json(value) => value.clone(),
            BridgeValue::Url(url) => Value::from(url.as_str()),
            BridgeValue::Data(data) => self.payload(data, DATA_TAG),
            BridgeValue::Image(data) => self.payload(data, IMAGE_TAG),
            BridgeValue::List(items) => {
                Value::Array(items.iter().map(|item| self.encode(item)).collect())
            }
            BridgeValue::Map(parameters) => Value::Object(self.encode_map(parameters)),
        }
    }

    fn payload(&mut self, data: &[u8], tag: &str) -> Value {
        let pasteboard = self
            .pasteboard
            .filter(|_| !self.placed_on_pasteboard && data.len() >= self.threshold);

        match pasteboard {
            Some(pasteboard) if pasteboard.set_data(data, PASTEBOARD_TYPE) => {
                self.placed_on_pasteboard = true;
                tracing::debug!(bytes = data.len(), "placed bridge payload on the pasteboard");
                json!({
                    IS_PASTEBOARD: true,
                    TAG: tag,
                    JSON_READY_VALUE: pasteboard.name(),
                })
            }
            _ => json!({
                IS_BASE64: true,
                TAG: tag,
                JSON_READY_VALUE: STANDARD.encode(data),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_value_flattening() {
        assert_eq!(BridgeValue::from("plain").to_query_value(), "plain");
        assert_eq!(BridgeValue::Json(json!(12)).to_query_value(), "12");
        assert_eq!(BridgeValue::Data(b"abc".to_vec()).to_query_value(), "YWJj");
        assert_eq!(
            BridgeValue::List(vec![BridgeValue::from("a"), BridgeValue::Json(json!(true))])
                .to_query_value(),
            r#"["a",true]"#
        );
    }

    #[test]
    fn test_cancel_gesture_marks_response_cancelled() {
        let Value::Object(results) = json!({ "completionGesture": "cancel" }) else {
            unreachable!()
        };
        assert!(BridgeResponse::completed(results).cancelled);

        let Value::Object(results) = json!({ "completionGesture": "post" }) else {
            unreachable!()
        };
        assert!(!BridgeResponse::completed(results).cancelled);
    }

    #[test]
    fn test_bridge_args_validation() {
        let query = |raw: &str| QueryParameters::from([(BRIDGE_ARGS.to_owned(), raw.to_owned())]);

        assert!(validate_bridge_args("123", &query(r#"{"action_id":"123"}"#)).is_ok());
        assert!(validate_bridge_args("123", &query(r#"{"action_id":"456"}"#)).is_err());
        assert!(validate_bridge_args("123", &query("{}")).is_err());
        assert!(validate_bridge_args("123", &query("[]")).is_err());
        assert!(validate_bridge_args("123", &QueryParameters::new()).is_err());

        let Err(BridgeError::InvalidArgument { name, source, .. }) =
            validate_bridge_args("123", &query("{not json"))
        else {
            panic!("expected an invalid argument error");
        };
        assert_eq!(name, BRIDGE_ARGS);
        assert!(source.is_some());
    }
}
