use serde_json::{Map, Value};
use thiserror::Error;

pub const SDK_ERROR_DOMAIN: &str = "com.facebook.sdk.core";
pub const UNKNOWN_ERROR_CODE: i64 = 3;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("invalid {name}: {message}")]
    InvalidArgument {
        name: &'static str,
        value: String,
        message: String,
        source: Option<serde_json::Error>,
    },

    /// The other app answered with an error of its own.
    #[error("bridge call failed with code {code} in {domain}")]
    Server {
        code: i64,
        domain: String,
        user_info: Option<Map<String, Value>>,
    },

    #[error("no dialog is configured for {0}")]
    MissingDialogConfiguration(String),
    #[error("failed to build url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl BridgeError {
    pub(crate) fn invalid_argument(
        name: &'static str,
        value: impl Into<String>,
        message: impl Into<String>,
    ) -> BridgeError {
        BridgeError::InvalidArgument {
            name,
            value: value.into(),
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn invalid_json(
        name: &'static str,
        value: impl Into<String>,
        message: impl Into<String>,
        source: serde_json::Error,
    ) -> BridgeError {
        BridgeError::InvalidArgument {
            name,
            value: value.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    /// Builds the error reported through `bridge_args.error`. Missing fields
    /// fall back to the SDK domain and the unknown error code.
    pub(crate) fn from_server(error: &Map<String, Value>) -> BridgeError {
        BridgeError::Server {
            code: error
                .get("code")
                .and_then(Value::as_i64)
                .unwrap_or(UNKNOWN_ERROR_CODE),
            domain: error
                .get("domain")
                .and_then(Value::as_str)
                .unwrap_or(SDK_ERROR_DOMAIN)
                .to_owned(),
            user_info: error.get("user_info").and_then(Value::as_object).cloned(),
        }
    }
}
