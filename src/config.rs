//! Connector configuration.
//!
//! Everything the connector needs at its boundary: the OAuth client
//! credentials, the identity and API URLs, and the timing knobs. Values come
//! from `XERO_*` environment variables or are set programmatically.

use std::time::Duration;

use url::Url;

use crate::credential::DEFAULT_REFRESH_SKEW;
use crate::error::{Error, Result};
use crate::oauth::{DEFAULT_ACCESS_TOKEN_LIFETIME, KeyPair};
use crate::scope::Scope;

pub const XERO_AUTH_URL: &str = "https://login.xero.com/identity/connect/authorize";
pub const XERO_TOKEN_URL: &str = "https://identity.xero.com/connect/token";
pub const XERO_API_BASE_URL: &str = "https://api.xero.com/";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub key_pair: KeyPair,
    /// Callback address registered with the Xero app, needed for the code flow.
    pub redirect_url: Option<Url>,
    pub auth_url: Url,
    pub token_url: Url,
    /// Root under which `api.xro/2.0/` and `connections` live.
    pub api_base_url: Url,
    pub scope: Scope,
    pub refresh_skew: Duration,
    /// Upper bound for every call to the identity server or the API.
    pub request_timeout: Duration,
    /// Where an operator goes to re-authorize a tenant; logged when a
    /// refresh token is rejected.
    pub reauthorize_url: Option<Url>,
}

impl ConnectorConfig {
    /// Configuration pointing at the production Xero endpoints.
    ///
    /// # Panics
    /// Never: the built-in URLs are valid.
    #[must_use]
    #[allow(clippy::missing_panics_doc)]
    pub fn new(key_pair: KeyPair) -> Self {
        Self {
            key_pair,
            redirect_url: None,
            auth_url: Url::parse(XERO_AUTH_URL).expect("valid built-in URL"),
            token_url: Url::parse(XERO_TOKEN_URL).expect("valid built-in URL"),
            api_base_url: Url::parse(XERO_API_BASE_URL).expect("valid built-in URL"),
            scope: Scope::default(),
            refresh_skew: DEFAULT_REFRESH_SKEW,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reauthorize_url: None,
        }
    }

    /// Load the configuration from `XERO_*` environment variables.
    ///
    /// `XERO_CLIENT_ID` is required; everything else has a default.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load the configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let url = |name: &str| -> Result<Option<Url>> {
            var(name)
                .map(|raw| {
                    Url::parse(&raw).map_err(|e| Error::Config(format!("{name} is not a URL: {e}")))
                })
                .transpose()
        };
        let seconds = |name: &str| -> Result<Option<Duration>> {
            var(name)
                .map(|raw| {
                    raw.trim()
                        .parse::<u64>()
                        .map(Duration::from_secs)
                        .map_err(|e| Error::Config(format!("{name} is not a number of seconds: {e}")))
                })
                .transpose()
        };

        let client_id =
            var("XERO_CLIENT_ID").ok_or_else(|| Error::Config("XERO_CLIENT_ID not set".into()))?;
        let mut config = Self::new(KeyPair::new(client_id, var("XERO_CLIENT_SECRET")));

        config.redirect_url = url("XERO_REDIRECT_URL")?;
        config.reauthorize_url = url("XERO_OAUTH2_URL")?;
        if let Some(auth_url) = url("XERO_AUTH_URL")? {
            config.auth_url = auth_url;
        }
        if let Some(token_url) = url("XERO_TOKEN_URL")? {
            config.token_url = token_url;
        }
        if let Some(api_base_url) = url("XERO_API_BASE_URL")? {
            config = config.with_api_base_url(api_base_url);
        }
        if let Some(scopes) = var("XERO_SCOPES") {
            config.scope = Scope::parse(&scopes);
        }
        if let Some(skew) = seconds("XERO_REFRESH_SKEW_SECS")? {
            // Every credential would be stale the moment it is issued.
            if skew >= DEFAULT_ACCESS_TOKEN_LIFETIME {
                return Err(Error::Config(format!(
                    "XERO_REFRESH_SKEW_SECS must be below the {}s access token lifetime",
                    DEFAULT_ACCESS_TOKEN_LIFETIME.as_secs()
                )));
            }
            config.refresh_skew = skew;
        }
        if let Some(timeout) = seconds("XERO_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = timeout;
        }

        trace!(client_id = config.key_pair.client_id(), scope = %config.scope, "loaded configuration");
        Ok(config)
    }

    #[must_use]
    pub fn with_redirect_url(mut self, redirect_url: Url) -> Self {
        self.redirect_url = Some(redirect_url);
        self
    }

    #[must_use]
    pub fn with_token_url(mut self, token_url: Url) -> Self {
        self.token_url = token_url;
        self
    }

    #[must_use]
    pub fn with_auth_url(mut self, auth_url: Url) -> Self {
        self.auth_url = auth_url;
        self
    }

    /// Sets the API root. A missing trailing slash is added so relative
    /// joins keep the last path segment.
    #[must_use]
    pub fn with_api_base_url(mut self, mut api_base_url: Url) -> Self {
        if !api_base_url.path().ends_with('/') {
            let path = format!("{}/", api_base_url.path());
            api_base_url.set_path(&path);
        }
        self.api_base_url = api_base_url;
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Keep this below the 30 minute access token lifetime, or every call
    /// ends up refreshing.
    #[must_use]
    pub fn with_refresh_skew(mut self, refresh_skew: Duration) -> Self {
        self.refresh_skew = refresh_skew;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    #[must_use]
    pub fn with_reauthorize_url(mut self, reauthorize_url: Url) -> Self {
        self.reauthorize_url = Some(reauthorize_url);
        self
    }
}
