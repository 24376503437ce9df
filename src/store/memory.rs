use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::CredentialBackend;
use crate::credential::Credential;
use crate::error::Result;

/// Process-local backend. Credentials do not survive a restart; meant for
/// tests and short-lived tools.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    credentials: RwLock<HashMap<Uuid, Credential>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.credentials.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.credentials.read().await.is_empty()
    }
}

#[async_trait]
impl CredentialBackend for MemoryBackend {
    async fn get(&self, tenant_id: Uuid) -> Result<Option<Credential>> {
        Ok(self.credentials.read().await.get(&tenant_id).cloned())
    }

    async fn put(&self, credential: &Credential) -> Result<()> {
        self.credentials
            .write()
            .await
            .insert(credential.tenant_id, credential.clone());
        Ok(())
    }

    async fn insert_new(&self, credential: &Credential) -> Result<bool> {
        let mut credentials = self.credentials.write().await;
        if credentials.contains_key(&credential.tenant_id) {
            return Ok(false);
        }
        credentials.insert(credential.tenant_id, credential.clone());
        Ok(true)
    }

    async fn delete(&self, tenant_id: Uuid) -> Result<bool> {
        Ok(self.credentials.write().await.remove(&tenant_id).is_some())
    }
}
