use std::time::Duration;

use async_trait::async_trait;
use oauth2::{
    AccessToken, AuthorizationCode, CsrfToken, EndpointNotSet, EndpointSet, ExtraTokenFields,
    RefreshToken, StandardTokenResponse, TokenResponse as _,
    basic::{BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse, BasicTokenType},
    StandardRevocableToken,
};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::config::ConnectorConfig;
use crate::error::{Error, Result};
use crate::scope::Scope;

/// Xero access tokens live for 30 minutes; used when a grant omits `expires_in`
/// or reports one that cannot be represented.
pub(crate) const DEFAULT_ACCESS_TOKEN_LIFETIME: Duration = Duration::from_secs(30 * 60);

/// Stores the OAuth 2 client ID and client secret.
#[derive(Debug, Clone)]
pub struct KeyPair(
    pub(crate) oauth2::ClientId,
    pub(crate) Option<oauth2::ClientSecret>,
);

impl KeyPair {
    /// Creates a new `KeyPair` from the provided `client_id` and `client_secret` strings.
    #[must_use]
    pub fn new(client_id: String, client_secret: Option<String>) -> Self {
        Self(
            oauth2::ClientId::new(client_id),
            client_secret.map(oauth2::ClientSecret::new),
        )
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        self.0.as_str()
    }
}

/// Extra fields Xero adds to its token responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct XeroTokenFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl ExtraTokenFields for XeroTokenFields {}

pub type TokenResponse = StandardTokenResponse<XeroTokenFields, BasicTokenType>;

pub type OAuthClient = oauth2::Client<
    BasicErrorResponse,
    TokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointSet,
>;

/// The part of a token-endpoint response the connector keeps.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: AccessToken,
    pub refresh_token: Option<RefreshToken>,
    pub expires_in: Duration,
}

impl From<TokenResponse> for TokenGrant {
    fn from(response: TokenResponse) -> Self {
        Self {
            access_token: response.access_token().clone(),
            refresh_token: response.refresh_token().cloned(),
            expires_in: response.expires_in().unwrap_or(DEFAULT_ACCESS_TOKEN_LIFETIME),
        }
    }
}

/// Exchanges a refresh token at the authorization server.
///
/// The tenant id is only used to label errors; Xero refresh tokens are bound
/// to the user connection, not to a single tenant.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange_refresh_token(
        &self,
        tenant_id: Uuid,
        refresh_token: &RefreshToken,
    ) -> Result<TokenGrant>;
}

/// The Xero identity server (`identity.xero.com`), or whatever the
/// configuration points the auth/token URLs at.
#[derive(Debug, Clone)]
pub struct XeroTokenEndpoint {
    oauth_client: OAuthClient,
    http_client: reqwest::Client,
    has_redirect: bool,
    scope: Scope,
}

impl XeroTokenEndpoint {
    pub fn from_config(config: &ConnectorConfig) -> Result<Self> {
        let KeyPair(client_id, client_secret) = config.key_pair.clone();

        let oauth_client = oauth2::Client::new(client_id)
            .set_auth_uri(oauth2::AuthUrl::from_url(config.auth_url.clone()))
            .set_token_uri(oauth2::TokenUrl::from_url(config.token_url.clone()));
        let oauth_client: OAuthClient = match client_secret {
            Some(secret) => oauth_client.set_client_secret(secret),
            None => oauth_client,
        };
        let oauth_client = match &config.redirect_url {
            Some(redirect_url) => {
                oauth_client.set_redirect_uri(oauth2::RedirectUrl::from_url(redirect_url.clone()))
            }
            None => oauth_client,
        };

        // The oauth2 crate requires redirects to be disabled to avoid SSRF.
        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build token HTTP client: {e}")))?;

        Ok(Self {
            oauth_client,
            http_client,
            has_redirect: config.redirect_url.is_some(),
            scope: config.scope.clone(),
        })
    }

    /// Generates an authorization URL to use for the code flow authorization method.
    pub fn authorize_url(&self) -> Result<(Url, CsrfToken)> {
        if !self.has_redirect {
            return Err(Error::Config(
                "a redirect URL is required for the code flow".into(),
            ));
        }

        Ok(self
            .oauth_client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(self.scope.to_oauth2())
            .url())
    }

    /// Exchanges an authorization code from the redirect for a token grant.
    #[instrument(skip(self, code))]
    pub async fn exchange_code(&self, code: String) -> Result<TokenGrant> {
        let response = self
            .oauth_client
            .exchange_code(AuthorizationCode::new(code))
            .request_async(&self.http_client)
            .await
            .map_err(|e| Error::from_token_request(Uuid::nil(), e))?;

        debug!("authorization code exchanged");
        Ok(response.into())
    }
}

#[async_trait]
impl TokenExchange for XeroTokenEndpoint {
    #[instrument(skip(self, refresh_token))]
    async fn exchange_refresh_token(
        &self,
        tenant_id: Uuid,
        refresh_token: &RefreshToken,
    ) -> Result<TokenGrant> {
        let response = self
            .oauth_client
            .exchange_refresh_token(refresh_token)
            .request_async(&self.http_client)
            .await
            .map_err(|e| Error::from_token_request(tenant_id, e))?;

        Ok(response.into())
    }
}
