use serde_json::{Map, Value};
use url::Url;

use crate::error::BridgeError;
use crate::protocol::{
    bridge_args_json, validate_bridge_args, BridgeApiProtocol, BridgeParameters, BridgeResponse,
    QueryParameters, BRIDGE_ARGS, CANCEL, COMPLETION_GESTURE,
};
use crate::url_builder::UrlBuilder;

pub const CANCELLATION_ERROR_CODE: i64 = 4201;

const ERROR_CODE: &str = "error_code";
const DID_COMPLETE: &str = "didComplete";

/// Mobile web dialog that redirects back into the app when it is done.
pub struct WebV1 {
    url_builder: UrlBuilder,
}

impl WebV1 {
    pub fn new(url_builder: UrlBuilder) -> WebV1 {
        WebV1 { url_builder }
    }
}

impl BridgeApiProtocol for WebV1 {
    fn request_url(
        &self,
        action_id: &str,
        _scheme: &str,
        method_name: &str,
        parameters: &BridgeParameters,
    ) -> Result<Url, BridgeError> {
        let redirect_query =
            QueryParameters::from([(BRIDGE_ARGS.to_owned(), bridge_args_json(action_id))]);
        let redirect_uri = self
            .url_builder
            .app_url("bridge", method_name, &redirect_query)?;

        let mut query: QueryParameters = parameters
            .iter()
            .map(|(key, value)| (key.clone(), value.to_query_value()))
            .collect();
        query.insert("display".to_owned(), "touch".to_owned());
        query.insert("redirect_uri".to_owned(), redirect_uri.to_string());

        self.url_builder
            .facebook_url("m", &format!("/dialog/{}", method_name), &query)
    }

    fn response_parameters(
        &self,
        action_id: &str,
        query: &QueryParameters,
    ) -> Result<BridgeResponse, BridgeError> {
        validate_bridge_args(action_id, query)?;

        let Some(raw) = query.get(ERROR_CODE) else {
            let results = Map::from_iter([(DID_COMPLETE.to_owned(), Value::from(1))]);
            return Ok(BridgeResponse::completed(results));
        };

        match raw.trim().parse::<i64>() {
            Ok(CANCELLATION_ERROR_CODE) => {
                tracing::debug!(action_id, "web dialog was cancelled");
                let results = Map::from_iter([(COMPLETION_GESTURE.to_owned(), Value::from(CANCEL))]);
                Ok(BridgeResponse::completed(results))
            }
            _ => Err(BridgeError::invalid_argument(
                ERROR_CODE,
                raw.as_str(),
                "unknown error code",
            )),
        }
    }
}
