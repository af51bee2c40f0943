//! Date-partitioned photo storage.
//!
//! Layout: `<base>/data/YYYY-MM-DD/HHMMSS.jpg`, both parts taken from the
//! local clock at save time. Names have second granularity, so two photos
//! stored within the same second share a path and the last write wins.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::TransferError;

/// Directory under the base holding all partitions.
const DATA_DIR: &str = "data";

/// Fixed extension, whatever the payload format.
const PHOTO_EXTENSION: &str = "jpg";

/// Writes photos into per-day partition directories.
#[derive(Debug, Clone)]
pub struct PhotoStore {
    root: PathBuf,
}

impl PhotoStore {
    /// Create a store rooted at `<base_dir>/data`. Nothing is created yet.
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            root: base_dir.as_ref().join(DATA_DIR),
        }
    }

    /// Root of the partition tree.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Partition directory for the calendar day of `at`.
    pub fn partition_for(&self, at: &DateTime<Local>) -> PathBuf {
        self.root.join(at.format("%Y-%m-%d").to_string())
    }

    /// Full path a photo saved at `at` would be written to.
    pub fn photo_path(&self, at: &DateTime<Local>) -> PathBuf {
        self.partition_for(at)
            .join(format!("{}.{}", at.format("%H%M%S"), PHOTO_EXTENSION))
    }

    /// Create the partition for `at` if missing. Existing partitions are
    /// left untouched.
    pub async fn ensure_partition(&self, at: &DateTime<Local>) -> Result<PathBuf, TransferError> {
        let dir = self.partition_for(at);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| TransferError::Storage {
                path: dir.clone(),
                source,
            })?;
        debug!(path = %dir.display(), "Partition ready");
        Ok(dir)
    }

    /// Save a photo received at `at`, truncating any file of the same name.
    pub async fn save_at(
        &self,
        payload: &[u8],
        at: &DateTime<Local>,
    ) -> Result<PathBuf, TransferError> {
        self.ensure_partition(at).await?;

        let path = self.photo_path(at);
        tokio::fs::write(&path, payload)
            .await
            .map_err(|source| TransferError::Storage {
                path: path.clone(),
                source,
            })?;

        info!(path = %path.display(), size = payload.len(), "Photo saved");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, h, m, s).unwrap()
    }

    #[test]
    fn test_layout() {
        let store = PhotoStore::new("/srv/photos");
        assert_eq!(
            store.partition_for(&at(7, 5, 3)),
            PathBuf::from("/srv/photos/data/2024-03-09")
        );
        assert_eq!(
            store.photo_path(&at(7, 5, 3)),
            PathBuf::from("/srv/photos/data/2024-03-09/070503.jpg")
        );
    }

    #[tokio::test]
    async fn test_save_writes_exact_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = PhotoStore::new(dir.path());

        let payload = vec![0xFFu8, 0xD8, 0xFF, 0x00, 0x42];
        let path = store.save_at(&payload, &at(12, 0, 1)).await.unwrap();

        assert_eq!(path, dir.path().join("data/2024-03-09/120001.jpg"));
        assert_eq!(std::fs::read(&path).unwrap(), payload);
    }

    #[tokio::test]
    async fn test_partition_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = PhotoStore::new(dir.path());

        let path = store.save_at(b"first", &at(9, 0, 0)).await.unwrap();
        let partition = store.ensure_partition(&at(9, 0, 0)).await.unwrap();
        let again = store.ensure_partition(&at(23, 59, 59)).await.unwrap();

        assert_eq!(partition, again);
        assert_eq!(std::fs::read(&path).unwrap(), b"first");
        assert_eq!(std::fs::read_dir(&partition).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_same_second_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = PhotoStore::new(dir.path());

        let first = store.save_at(b"first photo", &at(10, 30, 0)).await.unwrap();
        let second = store.save_at(b"second", &at(10, 30, 0)).await.unwrap();
        let third = store.save_at(b"third", &at(10, 30, 1)).await.unwrap();

        // Last writer wins within the same second, truncating the old contents
        assert_eq!(first, second);
        assert_eq!(std::fs::read(&second).unwrap(), b"second");
        assert_ne!(second, third);
        assert_eq!(std::fs::read(&third).unwrap(), b"third");
    }

    #[tokio::test]
    async fn test_storage_failure() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the data directory should be
        std::fs::write(dir.path().join("data"), b"not a directory").unwrap();
        let store = PhotoStore::new(dir.path());

        match store.save_at(b"photo", &at(1, 2, 3)).await {
            Err(TransferError::Storage { path, .. }) => {
                assert_eq!(path, dir.path().join("data/2024-03-09"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
