use url::Url;

use crate::error::BridgeError;
use crate::protocol::QueryParameters;

pub const DEFAULT_DOMAIN: &str = "facebook.com";
pub const DEFAULT_GRAPH_API_VERSION: &str = "v17.0";

/// Builds the urls every transport needs: urls back into this app and urls
/// on the platform's web domain.
#[derive(Clone, Debug)]
pub struct UrlBuilder {
    app_id: String,
    url_scheme_suffix: Option<String>,
    domain: String,
    graph_api_version: String,
    bundle_id: String,
}

impl UrlBuilder {
    pub fn new(app_id: impl Into<String>) -> UrlBuilder {
        UrlBuilder {
            app_id: app_id.into(),
            url_scheme_suffix: None,
            domain: DEFAULT_DOMAIN.to_owned(),
            graph_api_version: DEFAULT_GRAPH_API_VERSION.to_owned(),
            bundle_id: String::new(),
        }
    }

    pub fn with_url_scheme_suffix(mut self, suffix: impl Into<String>) -> UrlBuilder {
        self.url_scheme_suffix = Some(suffix.into());
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> UrlBuilder {
        self.domain = domain.into();
        self
    }

    pub fn with_graph_api_version(mut self, version: impl Into<String>) -> UrlBuilder {
        self.graph_api_version = version.into();
        self
    }

    pub fn with_bundle_id(mut self, bundle_id: impl Into<String>) -> UrlBuilder {
        self.bundle_id = bundle_id.into();
        self
    }

    pub fn bundle_id(&self) -> &str {
        &self.bundle_id
    }

    /// `fb<app id><suffix>`, the scheme other apps use to call back.
    pub fn app_scheme(&self) -> String {
        format!(
            "fb{}{}",
            self.app_id,
            self.url_scheme_suffix.as_deref().unwrap_or_default()
        )
    }

    pub fn url(
        &self,
        scheme: &str,
        host: &str,
        path: &str,
        query: &QueryParameters,
    ) -> Result<Url, BridgeError> {
        let path = match path {
            "" => String::new(),
            path if path.starts_with('/') => path.to_owned(),
            path => format!("/{}", path),
        };

        let mut url = Url::parse(&format!("{}://{}{}", scheme, host, path))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter());
        }
        Ok(url)
    }

    pub fn app_url(
        &self,
        host: &str,
        path: &str,
        query: &QueryParameters,
    ) -> Result<Url, BridgeError> {
        self.url(&self.app_scheme(), host, path, query)
    }

    /// `https://<prefix>.<domain>/<version><path>`. Paths that already start
    /// with a version keep it.
    pub fn facebook_url(
        &self,
        host_prefix: &str,
        path: &str,
        query: &QueryParameters,
    ) -> Result<Url, BridgeError> {
        let host = match host_prefix {
            "" => self.domain.clone(),
            prefix => format!("{}.{}", prefix, self.domain),
        };
        let path = path.trim_start_matches('/');
        let path = if has_version_prefix(path) {
            format!("/{}", path)
        } else {
            format!("/{}/{}", self.graph_api_version, path)
        };

        self.url("https", &host, &path, query)
    }
}

fn has_version_prefix(path: &str) -> bool {
    path.strip_prefix('v')
        .and_then(|rest| rest.chars().next())
        .is_some_and(|c| c.is_ascii_digit())
}
