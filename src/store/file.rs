use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::CredentialBackend;
use crate::credential::Credential;
use crate::error::{Error, Result};

/// Stores one JSON document per tenant under a directory.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// crash mid-write leaves the previous credential intact. Writers inside one
/// process are serialized; the directory is not meant to be shared between
/// processes.
#[derive(Debug)]
pub struct FileBackend {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileBackend {
    /// Opens (and creates, if needed) the credential directory.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::storage(format!("cannot create {}", dir.display()), e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700)).await {
                warn!(dir = %dir.display(), error = %e, "cannot restrict credential directory to 0700");
            }
        }
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, tenant_id: Uuid) -> PathBuf {
        self.dir.join(format!("{tenant_id}.json"))
    }

    async fn read(&self, tenant_id: Uuid) -> Result<Option<Credential>> {
        let path = self.path_for(tenant_id);
        match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| Error::storage(format!("corrupt credential file {}", path.display()), e)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::storage(format!("cannot read {}", path.display()), e)),
        }
    }

    async fn write_atomic(&self, credential: &Credential) -> Result<()> {
        let path = self.path_for(credential.tenant_id);
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", credential.tenant_id, Uuid::new_v4()));
        let text = serde_json::to_vec_pretty(credential)
            .map_err(|e| Error::storage("cannot serialize credential", e))?;

        if let Err(e) = write_private(&tmp, &text).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(Error::storage(format!("cannot write {}", tmp.display()), e));
        }
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(Error::storage(format!("cannot replace {}", path.display()), e));
        }
        trace!(path = %path.display(), "credential written");
        Ok(())
    }
}

async fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut options = fs::OpenOptions::new();
    options.create_new(true).write(true);
    #[cfg(unix)]
    options.mode(0o600);
    let mut file = options.open(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

#[async_trait]
impl CredentialBackend for FileBackend {
    async fn get(&self, tenant_id: Uuid) -> Result<Option<Credential>> {
        self.read(tenant_id).await
    }

    async fn put(&self, credential: &Credential) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write_atomic(credential).await
    }

    async fn insert_new(&self, credential: &Credential) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        if self.read(credential.tenant_id).await?.is_some() {
            return Ok(false);
        }
        self.write_atomic(credential).await?;
        Ok(true)
    }

    async fn delete(&self, tenant_id: Uuid) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let path = self.path_for(tenant_id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::storage(format!("cannot remove {}", path.display()), e)),
        }
    }
}
