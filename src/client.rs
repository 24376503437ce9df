use std::sync::Arc;

use oauth2::CsrfToken;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use url::Url;
use uuid::Uuid;

use crate::config::ConnectorConfig;
use crate::connection::Connection;
use crate::credential::Credential;
use crate::endpoints::XeroEndpoint;
use crate::error::{Error, Result};
use crate::oauth::XeroTokenEndpoint;
use crate::operation::Operation;
use crate::scope::OFFLINE_ACCESS;
use crate::session::{Attempt, Session};
use crate::store::{CredentialBackend, TokenStore};

/// This is the client that is used for interacting with the Xero API on behalf
/// of any connected tenant. Credentials come from the shared [`TokenStore`];
/// the client never holds tokens of its own.
#[derive(Debug, Clone)]
pub struct Client {
    store: Arc<TokenStore>,
    token_endpoint: Arc<XeroTokenEndpoint>,
    http: reqwest::Client,
    api_base_url: Url,
}

impl Client {
    /// Builds the token endpoint, the token store over `backend`, and the
    /// API client from one configuration.
    pub fn new(config: &ConnectorConfig, backend: Arc<dyn CredentialBackend>) -> Result<Self> {
        let token_endpoint = Arc::new(XeroTokenEndpoint::from_config(config)?);
        let store = Arc::new(TokenStore::new(config, backend, token_endpoint.clone()));
        Self::from_parts(config, store, token_endpoint)
    }

    /// Uses an existing store, e.g. one shared with other clients or backed by
    /// a custom token exchange.
    pub fn with_store(config: &ConnectorConfig, store: Arc<TokenStore>) -> Result<Self> {
        let token_endpoint = Arc::new(XeroTokenEndpoint::from_config(config)?);
        Self::from_parts(config, store, token_endpoint)
    }

    fn from_parts(
        config: &ConnectorConfig,
        store: Arc<TokenStore>,
        token_endpoint: Arc<XeroTokenEndpoint>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build API HTTP client: {e}")))?;

        Ok(Self {
            store,
            token_endpoint,
            http,
            api_base_url: config.api_base_url.clone(),
        })
    }

    #[must_use]
    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    /// Generates an authorization URL to use for the code flow authorization method.
    pub fn authorize_url(&self) -> Result<(Url, CsrfToken)> {
        self.token_endpoint.authorize_url()
    }

    /// Runs `operation` for `tenant_id`.
    ///
    /// A 401 triggers one refresh of the rejected credential and one replay.
    /// A second 401 means the freshly issued token was refused too, which is
    /// reported as [`Error::AuthExpired`].
    #[instrument(skip(self, operation), fields(method = %operation.method, endpoint = %operation.endpoint))]
    pub async fn call<R: DeserializeOwned>(&self, tenant_id: Uuid, operation: &Operation) -> Result<R> {
        let credential = self.store.get_credential(tenant_id).await?;
        let session = Session::new(&self.http, &self.api_base_url, credential);

        let detail = match session.attempt(operation).await? {
            Attempt::Completed(response) => return Ok(response),
            Attempt::Unauthorized { detail } => detail,
        };

        debug!(%detail, "access token rejected, refreshing once");
        let rejected = session.into_credential();
        let refreshed = self.store.refresh_rejected(tenant_id, &rejected).await?;
        let session = Session::new(&self.http, &self.api_base_url, refreshed);

        match session.attempt(operation).await? {
            Attempt::Completed(response) => Ok(response),
            Attempt::Unauthorized { detail } => {
                error!(%tenant_id, %detail, "refreshed access token was rejected");
                Err(Error::auth_expired(tenant_id, detail))
            }
        }
    }

    /// Retrieve a list of authorized connections (tenants) visible to the
    /// credential stored for `tenant_id`.
    #[instrument(skip(self))]
    pub async fn connections(&self, tenant_id: Uuid) -> Result<Vec<Connection>> {
        self.call(tenant_id, &Operation::get(XeroEndpoint::Connections))
            .await
    }

    /// Finishes the code flow: exchanges `code`, lists the tenants the user
    /// granted, and stores the new credential for one of them.
    ///
    /// Every tenant of one consent shares the same rotating refresh token, so
    /// the credential is bound to a single tenant: `tenant_id` when given,
    /// otherwise the only organisation in the grant.
    #[instrument(skip(self, code))]
    pub async fn complete_authorization(
        &self,
        code: String,
        tenant_id: Option<Uuid>,
    ) -> Result<Connection> {
        let grant = self.token_endpoint.exchange_code(code).await?;
        let bootstrap = Credential::from_grant(Uuid::nil(), grant, None, OffsetDateTime::now_utc())
            .ok_or_else(|| {
                Error::Config(format!(
                    "Xero issued no refresh token; request the {OFFLINE_ACCESS} scope"
                ))
            })?;

        let session = Session::new(&self.http, &self.api_base_url, bootstrap);
        let connections: Vec<Connection> = match session
            .attempt(&Operation::get(XeroEndpoint::Connections))
            .await?
        {
            Attempt::Completed(connections) => connections,
            Attempt::Unauthorized { detail } => return Err(Error::auth_expired(Uuid::nil(), detail)),
        };
        debug!(count = connections.len(), "tenants granted");

        let connection = select_connection(connections, tenant_id)?;
        self.store
            .save_initial(connection.tenant_id, session.into_credential())
            .await?;
        info!(
            tenant_id = %connection.tenant_id,
            tenant_name = ?connection.tenant_name,
            "xero authorization completed"
        );
        Ok(connection)
    }
}

fn select_connection(connections: Vec<Connection>, tenant_id: Option<Uuid>) -> Result<Connection> {
    if let Some(tenant_id) = tenant_id {
        return connections
            .into_iter()
            .find(|c| c.tenant_id == tenant_id)
            .ok_or(Error::NotConnected { tenant_id });
    }

    let mut organisations: Vec<Connection> = connections
        .into_iter()
        .filter(Connection::is_organisation)
        .collect();
    match organisations.len() {
        1 => Ok(organisations.remove(0)),
        0 => Err(Error::Config("the authorization granted no organisation".into())),
        n => Err(Error::Config(format!(
            "the authorization granted {n} organisations; pass the tenant id to connect"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn connection(tenant_type: &str) -> Connection {
        Connection {
            id: Uuid::new_v4(),
            auth_event_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            tenant_type: tenant_type.to_string(),
            tenant_name: Some("Demo Company".to_string()),
            created_date_utc: datetime!(2024-01-01 00:00 UTC),
            updated_date_utc: datetime!(2024-01-01 00:00 UTC),
        }
    }

    #[test]
    fn single_organisation_is_selected_without_tenant_id() {
        let org = connection("ORGANISATION");
        let practice = connection("PRACTICEMANAGER");

        let selected = select_connection(vec![practice, org.clone()], None).unwrap();
        assert_eq!(selected, org);
    }

    #[test]
    fn several_organisations_need_a_tenant_id() {
        let first = connection("ORGANISATION");
        let second = connection("ORGANISATION");

        let err = select_connection(vec![first.clone(), second.clone()], None).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let selected = select_connection(vec![first, second.clone()], Some(second.tenant_id)).unwrap();
        assert_eq!(selected, second);
    }

    #[test]
    fn unknown_tenant_id_is_not_connected() {
        let tenant_id = Uuid::new_v4();
        let err = select_connection(vec![connection("ORGANISATION")], Some(tenant_id)).unwrap_err();
        assert!(matches!(err, Error::NotConnected { tenant_id: t } if t == tenant_id));
    }
}
