use std::sync::Arc;

use url::Url;

use crate::dialog::{DialogConfiguration, DialogConfigurationProvider};
use crate::error::BridgeError;
use crate::protocol::{
    bridge_args_json, query_parameters, BridgeApiProtocol, BridgeParameters, BridgeResponse,
    QueryParameters, BRIDGE_ARGS,
};
use crate::url_builder::UrlBuilder;

const IOS_BUNDLE_ID: &str = "ios_bundle_id";
const REDIRECT_URL: &str = "redirect_url";

/// Web dialog whose location comes from the server. The query is the one the
/// native transport would send, and responses use the native format.
pub struct WebV2 {
    dialogs: Arc<dyn DialogConfigurationProvider>,
    native: Arc<dyn BridgeApiProtocol>,
    url_builder: UrlBuilder,
}

impl WebV2 {
    pub fn new(
        dialogs: Arc<dyn DialogConfigurationProvider>,
        native: Arc<dyn BridgeApiProtocol>,
        url_builder: UrlBuilder,
    ) -> WebV2 {
        WebV2 {
            dialogs,
            native,
            url_builder,
        }
    }

    pub fn redirect_url(
        &self,
        action_id: Option<&str>,
        method_name: Option<&str>,
    ) -> Result<Url, BridgeError> {
        let mut query = QueryParameters::new();
        if let Some(action_id) = action_id {
            query.insert(BRIDGE_ARGS.to_owned(), bridge_args_json(action_id));
        }
        self.url_builder
            .app_url("bridge", method_name.unwrap_or_default(), &query)
    }

    /// Absolute dialog urls are used as they are. Relative ones are resolved
    /// against the mobile web domain.
    pub fn dialog_url(&self, configuration: &DialogConfiguration) -> Result<Url, BridgeError> {
        match Url::parse(&configuration.url) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => self.url_builder.facebook_url(
                "m",
                &configuration.url,
                &QueryParameters::new(),
            ),
            Err(e) => Err(e.into()),
        }
    }
}

impl BridgeApiProtocol for WebV2 {
    fn request_url(
        &self,
        action_id: &str,
        scheme: &str,
        method_name: &str,
        parameters: &BridgeParameters,
    ) -> Result<Url, BridgeError> {
        let configuration = self
            .dialogs
            .dialog_configuration(method_name)
            .ok_or_else(|| BridgeError::MissingDialogConfiguration(method_name.to_owned()))?;

        let native_url = self
            .native
            .request_url(action_id, scheme, method_name, parameters)?;
        let mut query = query_parameters(&native_url);
        query.insert(
            IOS_BUNDLE_ID.to_owned(),
            self.url_builder.bundle_id().to_owned(),
        );
        query.insert(
            REDIRECT_URL.to_owned(),
            self.redirect_url(Some(action_id), Some(method_name))?
                .to_string(),
        );

        let dialog_url = self.dialog_url(&configuration)?;
        let host = dialog_url.host_str().unwrap_or_default();
        self.url_builder
            .url(dialog_url.scheme(), host, dialog_url.path(), &query)
    }

    fn response_parameters(
        &self,
        action_id: &str,
        query: &QueryParameters,
    ) -> Result<BridgeResponse, BridgeError> {
        self.native.response_parameters(action_id, query)
    }
}
