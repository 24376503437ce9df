//! Durable storage and refresh of tenant credentials.
//!
//! [`TokenStore`] is the only writer of credential state. It reads and writes
//! through a [`CredentialBackend`], exchanges refresh tokens through a
//! [`TokenExchange`], and serializes refreshes per tenant so a rotated
//! refresh token is never presented twice.

mod file;
mod memory;

pub use file::FileBackend;
pub use memory::MemoryBackend;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use url::Url;
use uuid::Uuid;

use crate::config::ConnectorConfig;
use crate::credential::Credential;
use crate::error::{Error, Result};
use crate::oauth::TokenExchange;

/// Keyed persistence for credentials, one record per tenant.
///
/// `put` and `insert_new` must be atomic: a reader sees either the previous
/// record or the new one, never a mix.
#[async_trait]
pub trait CredentialBackend: Send + Sync {
    async fn get(&self, tenant_id: Uuid) -> Result<Option<Credential>>;

    /// Replace (or create) the record for `credential.tenant_id`.
    async fn put(&self, credential: &Credential) -> Result<()>;

    /// Store `credential` only if no record exists. Returns `false` and leaves
    /// the existing record untouched otherwise.
    async fn insert_new(&self, credential: &Credential) -> Result<bool>;

    /// Remove the record. Returns whether one existed.
    async fn delete(&self, tenant_id: Uuid) -> Result<bool>;
}

/// Where a tenant sits in the authorization lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationState {
    /// No usable credential; a human has to run the authorization flow.
    Unauthorized,
    Valid,
}

pub struct TokenStore {
    backend: Arc<dyn CredentialBackend>,
    exchange: Arc<dyn TokenExchange>,
    refresh_skew: Duration,
    exchange_timeout: Duration,
    reauthorize_url: Option<Url>,
    refresh_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("refresh_skew", &self.refresh_skew)
            .field("exchange_timeout", &self.exchange_timeout)
            .field("reauthorize_url", &self.reauthorize_url)
            .finish_non_exhaustive()
    }
}

impl TokenStore {
    pub fn new(
        config: &ConnectorConfig,
        backend: Arc<dyn CredentialBackend>,
        exchange: Arc<dyn TokenExchange>,
    ) -> Self {
        Self {
            backend,
            exchange,
            refresh_skew: config.refresh_skew,
            exchange_timeout: config.request_timeout,
            reauthorize_url: config.reauthorize_url.clone(),
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn refresh_skew(&self) -> Duration {
        self.refresh_skew
    }

    /// Returns a credential that is valid for at least the skew margin,
    /// refreshing it first when needed.
    #[instrument(skip(self))]
    pub async fn get_credential(&self, tenant_id: Uuid) -> Result<Credential> {
        let credential = self.load(tenant_id).await?;
        if !credential.expires_within(self.refresh_skew, OffsetDateTime::now_utc()) {
            return Ok(credential);
        }

        debug!(expires_at = %credential.expires_at, "credential inside refresh window");
        self.refresh_locked(tenant_id, |current| {
            current.expires_within(self.refresh_skew, OffsetDateTime::now_utc())
        })
        .await
    }

    /// Exchanges the stored refresh token for a new pair and persists it.
    ///
    /// Callers racing on the same tenant share one exchange: whoever waited
    /// on the lock gets the credential the first caller stored.
    #[instrument(skip(self))]
    pub async fn refresh(&self, tenant_id: Uuid) -> Result<Credential> {
        let observed = self.load(tenant_id).await?;
        self.refresh_rejected(tenant_id, &observed).await
    }

    /// Forced refresh after the API rejected `rejected`.
    ///
    /// Skips the exchange when the stored credential has already moved past
    /// `rejected`.
    #[instrument(skip(self, rejected))]
    pub async fn refresh_rejected(&self, tenant_id: Uuid, rejected: &Credential) -> Result<Credential> {
        self.refresh_locked(tenant_id, |current| current.same_tokens(rejected))
            .await
    }

    /// Stores the credential from a first-time authorization.
    #[instrument(skip(self, credential))]
    pub async fn save_initial(&self, tenant_id: Uuid, credential: Credential) -> Result<()> {
        let credential = Credential {
            tenant_id,
            ..credential
        };
        if self.backend.insert_new(&credential).await? {
            info!("tenant connected");
            Ok(())
        } else {
            warn!("refusing to overwrite existing credential");
            Err(Error::Conflict { tenant_id })
        }
    }

    /// Drops the tenant's credential. Returns whether one was stored.
    #[instrument(skip(self))]
    pub async fn disconnect(&self, tenant_id: Uuid) -> Result<bool> {
        let guard = self.lock_for(tenant_id).await;
        let existed = self.backend.delete(tenant_id).await;
        drop(guard);
        self.forget_lock(tenant_id).await;

        let existed = existed?;
        if existed {
            info!("tenant disconnected");
        }
        Ok(existed)
    }

    pub async fn state(&self, tenant_id: Uuid) -> Result<AuthorizationState> {
        Ok(match self.backend.get(tenant_id).await? {
            Some(_) => AuthorizationState::Valid,
            None => AuthorizationState::Unauthorized,
        })
    }

    async fn load(&self, tenant_id: Uuid) -> Result<Credential> {
        self.backend
            .get(tenant_id)
            .await?
            .ok_or(Error::NotConnected { tenant_id })
    }

    async fn lock_for(&self, tenant_id: Uuid) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.refresh_locks.lock().await;
            Arc::clone(locks.entry(tenant_id).or_default())
        };
        lock.lock_owned().await
    }

    /// Drops the tenant's lock entry unless another task still holds or
    /// waits on it. Clones are only taken under the map lock, so the count
    /// cannot grow while it is checked.
    async fn forget_lock(&self, tenant_id: Uuid) {
        let mut locks = self.refresh_locks.lock().await;
        if locks
            .get(&tenant_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&tenant_id);
        }
    }

    /// Re-reads the credential under the tenant lock and exchanges it only if
    /// `still_stale` holds for what is stored now.
    async fn refresh_locked<F>(&self, tenant_id: Uuid, still_stale: F) -> Result<Credential>
    where
        F: Fn(&Credential) -> bool,
    {
        let _guard = self.lock_for(tenant_id).await;

        let current = self.load(tenant_id).await?;
        if !still_stale(&current) {
            debug!("credential already refreshed by a concurrent caller");
            return Ok(current);
        }

        let exchanged = tokio::time::timeout(
            self.exchange_timeout,
            self.exchange
                .exchange_refresh_token(tenant_id, &current.refresh_token),
        )
        .await
        .map_err(|_| {
            Error::network(
                format!("token refresh timed out after {:?}", self.exchange_timeout),
                None,
            )
        })
        .and_then(|result| result);

        let grant = match exchanged {
            Ok(grant) => grant,
            Err(err @ Error::AuthExpired { .. }) => {
                self.backend.delete(tenant_id).await?;
                self.notify_to_reauthorize(tenant_id);
                return Err(err);
            }
            Err(err) => {
                warn!(error = %err, "token refresh failed");
                return Err(err);
            }
        };

        let refreshed = Credential::from_grant(
            tenant_id,
            grant,
            Some(&current.refresh_token),
            OffsetDateTime::now_utc(),
        )
        .ok_or_else(|| Error::auth_expired(tenant_id, "token endpoint returned no refresh token"))?;

        self.backend.put(&refreshed).await?;
        info!(expires_at = %refreshed.expires_at, "refreshed xero credential");
        if refreshed.expires_within(self.refresh_skew, OffsetDateTime::now_utc()) {
            warn!(
                refresh_skew = ?self.refresh_skew,
                "new credential already inside the refresh window, every call will refresh"
            );
        }
        Ok(refreshed)
    }

    fn notify_to_reauthorize(&self, tenant_id: Uuid) {
        match &self.reauthorize_url {
            Some(url) => error!(%tenant_id, %url, "refresh token rejected, xero needs to be re-authorized"),
            None => error!(%tenant_id, "refresh token rejected, xero needs to be re-authorized"),
        }
    }
}
