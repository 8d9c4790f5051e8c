//! On-disk persistence of the credential record
//!
//! The record lives in a single JSON file readable and writable by the owner
//! only. Writes go to a temporary file in the same directory which is then
//! renamed over the record, so readers see either the old or the new file.
//! Writers serialize through an exclusive advisory lock on a sidecar
//! `<record>.lock` file; [`CredentialStore::save`] and
//! [`CredentialStore::remove`] take the lock guard as a parameter so they
//! cannot be called without holding it.

use fs2::FileExt;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{AuthError, Result};
use crate::record::CredentialRecord;

#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

/// Exclusive hold on the store; released when dropped
#[derive(Debug)]
pub struct StoreLock {
    _file: File,
    path: PathBuf,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        debug!("Released credential lock {:?}", self.path);
    }
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> PathBuf {
        let mut name: OsString = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    fn dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Read the record.
    ///
    /// `Ok(None)` means no record exists. Unparseable content is reported as
    /// [`AuthError::StorageCorrupted`].
    pub async fn load(&self) -> Result<Option<CredentialRecord>> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No credential record at {:?}", self.path);
                return Ok(None);
            }
            Err(e) => return Err(AuthError::storage_io(&self.path, e)),
        };

        let record: CredentialRecord =
            serde_json::from_slice(&content).map_err(|e| AuthError::StorageCorrupted {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        if let Err(e) = secure_token_file(&self.path).await {
            warn!("Could not restrict permissions on {:?}: {}", self.path, e);
        }

        debug!(
            "Loaded credential record from {:?} (expiry={})",
            self.path, record.expiry
        );
        Ok(Some(record))
    }

    /// Atomically replace the record
    pub async fn save(&self, record: &CredentialRecord, _lock: &StoreLock) -> Result<()> {
        let json = serde_json::to_vec_pretty(record)?;
        let path = self.path.clone();
        let dir = self.dir();

        run_blocking(move || write_atomic(&dir, &path, &json)).await?;
        debug!("Saved credential record to {:?}", self.path);
        Ok(())
    }

    /// Delete the record, returning whether one existed
    pub async fn remove(&self, _lock: &StoreLock) -> Result<bool> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!("Removed credential record {:?}", self.path);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AuthError::storage_io(&self.path, e)),
        }
    }

    /// Take the exclusive store lock, waiting for other holders
    pub async fn lock(&self) -> Result<StoreLock> {
        let lock_path = self.lock_path();
        let dir = self.dir();

        let file = run_blocking({
            let lock_path = lock_path.clone();
            move || {
                std::fs::create_dir_all(&dir).map_err(|e| AuthError::storage_io(&dir, e))?;
                let file = open_owner_only(&lock_path)
                    .map_err(|e| AuthError::storage_io(&lock_path, e))?;
                FileExt::lock_exclusive(&file).map_err(|e| AuthError::storage_io(&lock_path, e))?;
                Ok(file)
            }
        })
        .await?;

        debug!("Acquired credential lock {:?}", lock_path);
        Ok(StoreLock {
            _file: file,
            path: lock_path,
        })
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AuthError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}

fn write_atomic(dir: &Path, path: &Path, content: &[u8]) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| AuthError::storage_io(dir, e))?;

    let mut temp = tempfile::Builder::new()
        .prefix(".gmail_token")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| AuthError::storage_io(dir, e))?;

    set_owner_only(temp.as_file()).map_err(|e| AuthError::storage_io(temp.path(), e))?;
    temp.write_all(content)
        .map_err(|e| AuthError::storage_io(temp.path(), e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| AuthError::storage_io(temp.path(), e))?;

    temp.persist(path)
        .map_err(|e| AuthError::storage_io(path, e.error))?;
    Ok(())
}

#[cfg(unix)]
fn open_owner_only(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_owner_only(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
}

#[cfg(unix)]
fn set_owner_only(file: &File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn set_owner_only(_file: &File) -> std::io::Result<()> {
    // Windows uses ACLs; the file inherits the user profile's ACL
    Ok(())
}

/// Secure token file permissions on Unix systems
///
/// Tightens the mode to 0600 if group or other bits are set
#[cfg(unix)]
pub async fn secure_token_file(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = tokio::fs::metadata(path).await?.permissions();
    if perms.mode() & 0o077 != 0 {
        warn!(
            "Credential file {:?} had mode {:o}, restricting to 0600",
            path,
            perms.mode() & 0o777
        );
        perms.set_mode(0o600);
        tokio::fs::set_permissions(path, perms).await?;
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn secure_token_file(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::TokenGrant;
    use crate::scopes::ScopeSet;
    use chrono::{Duration, Utc};

    fn sample_record() -> CredentialRecord {
        let grant = TokenGrant {
            access_token: "ya29.sample".to_string(),
            expires_in: Duration::seconds(3600),
            refresh_token: Some("1//sample".to_string()),
            scopes: None,
            token_type: None,
        };
        CredentialRecord::from_grant(grant, &ScopeSet::default_scopes(), "cid", Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("token.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("token.json"));
        let record = sample_record();

        let lock = store.lock().await.unwrap();
        store.save(&record, &lock).await.unwrap();
        drop(lock);

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, record);
    }

    #[tokio::test]
    async fn test_save_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("a").join("b").join("token.json"));

        let lock = store.lock().await.unwrap();
        store.save(&sample_record(), &lock).await.unwrap();
        assert!(store.path().exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("token.json"));
        let lock = store.lock().await.unwrap();
        store.save(&sample_record(), &lock).await.unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_load_tightens_loose_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(&path, serde_json::to_vec(&sample_record()).unwrap()).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        CredentialStore::new(&path).load().await.unwrap().unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_corrupted_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(&path, b"{\"access_token\": \"ya29.trunc").unwrap();

        let err = CredentialStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, AuthError::StorageCorrupted { .. }));
        assert!(err.requires_reauth());
    }

    #[tokio::test]
    async fn test_empty_file_is_corrupted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(&path, b"").unwrap();

        let err = CredentialStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, AuthError::StorageCorrupted { .. }));
    }

    #[tokio::test]
    async fn test_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("token.json"));
        let lock = store.lock().await.unwrap();

        assert!(!store.remove(&lock).await.unwrap());
        store.save(&sample_record(), &lock).await.unwrap();
        assert!(store.remove(&lock).await.unwrap());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("token.json"));
        let lock = store.lock().await.unwrap();
        for _ in 0..3 {
            store.save(&sample_record(), &lock).await.unwrap();
        }

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_lock_path() {
        let store = CredentialStore::new("/home/u/.gmail_token.json");
        assert_eq!(store.lock_path(), PathBuf::from("/home/u/.gmail_token.json.lock"));
    }

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("token.json"));

        let first = store.lock().await.unwrap();

        let contender = store.clone();
        let waiter = tokio::spawn(async move { contender.lock().await.map(|_| ()) });

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(!waiter.is_finished());

        drop(first);
        tokio::time::timeout(std::time::Duration::from_secs(5), waiter)
            .await
            .expect("lock was not handed over")
            .unwrap()
            .unwrap();
    }
}
