//! A file-backed token store

use std::{
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};

use super::TokenStore;
use crate::{StoreError, TokenPair};

/// A token store that persists the pair as a JSON file
///
/// Writes go to a sibling temporary file which is then renamed over the
/// target, so a reader never observes half of a pair. On unix the file is
/// readable only by its owner.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    staging: PathBuf,
}

impl FileTokenStore {
    /// Constructs a new file token store
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut staging = path.clone().into_os_string();
        staging.push(".tmp");

        Self {
            path,
            staging: staging.into(),
        }
    }

    /// The path of the persisted pair
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_staged(&self, pair: &TokenPair) -> Result<(), StoreError> {
        use tokio::io::AsyncWriteExt;

        let mut file_opts = OpenOptions::new();

        file_opts.create(true).truncate(true).write(true);

        #[cfg(unix)]
        file_opts.mode(0o600);

        let mut file = file_opts.open(&self.staging).await?;
        let data = serde_json::to_string_pretty(pair)?;
        file.write_all(data.as_bytes()).await?;
        file.sync_all().await?;
        Ok(())
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn get(&self) -> Result<Option<TokenPair>, StoreError> {
        let data = match fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        Ok(Some(serde_json::from_str(&data)?))
    }

    async fn set(&self, pair: &TokenPair) -> Result<(), StoreError> {
        self.write_staged(pair).await?;
        fs::rename(&self.staging, &self.path).await?;
        tracing::trace!(path = %self.path.display(), "persisted token pair");
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> FileTokenStore {
        FileTokenStore::new(dir.path().join("session.json"))
    }

    #[tokio::test]
    async fn missing_file_is_an_empty_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn pair_survives_a_new_store_instance() {
        let dir = tempfile::tempdir().unwrap();
        store_in(&dir)
            .set(&TokenPair::new("access", "refresh"))
            .await
            .unwrap();

        let reopened = store_in(&dir);
        assert_eq!(
            reopened.get().await.unwrap(),
            Some(TokenPair::new("access", "refresh"))
        );
    }

    #[tokio::test]
    async fn persisted_layout_uses_fixed_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.set(&TokenPair::new("access", "refresh")).await.unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["auth_token"], "access");
        assert_eq!(value["refresh_token"], "refresh");
    }

    #[tokio::test]
    async fn clear_removes_the_file_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.set(&TokenPair::new("access", "refresh")).await.unwrap();

        store.clear().await.unwrap();
        assert!(!store.path().exists());
        store.clear().await.unwrap();
        assert_eq!(store.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupt_file_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), "{ not json").unwrap();

        assert!(matches!(store.get().await, Err(StoreError::Format(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_is_private_to_the_owner() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.set(&TokenPair::new("access", "refresh")).await.unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
