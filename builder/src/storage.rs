//! Object storage collaborator.
//!
//! Uploaded model files live in an external object store and are
//! referenced by bucket + path. The builder only ever downloads them
//! into a working directory, so the trait surface is small.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use wharf_core::error::{Result, WharfError};

/// Bucket/path addressed object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Download an object to a local file.
    async fn get_object(&self, bucket: &str, path: &str, dest: &Path) -> Result<()>;

    /// Upload a local file as an object.
    async fn put_object(&self, bucket: &str, path: &str, src: &Path) -> Result<()>;

    /// Move an object within a bucket.
    async fn move_object(&self, bucket: &str, from: &str, to: &str) -> Result<()>;
}

/// Filesystem-backed [`ObjectStore`]: buckets are directories under a
/// root. Used by tests and single-node deployments.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)
            .map_err(|e| WharfError::StorageError(format!("{}: {e}", root.display())))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn object_path(&self, bucket: &str, path: &str) -> PathBuf {
        self.root.join(bucket).join(path)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get_object(&self, bucket: &str, path: &str, dest: &Path) -> Result<()> {
        let src = self.object_path(bucket, path);
        tokio::fs::copy(&src, dest).await.map_err(|e| {
            WharfError::StorageError(format!("get {bucket}/{path}: {e}"))
        })?;
        tracing::debug!(bucket, path, dest = %dest.display(), "Object fetched");
        Ok(())
    }

    async fn put_object(&self, bucket: &str, path: &str, src: &Path) -> Result<()> {
        let dest = self.object_path(bucket, path);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| WharfError::StorageError(format!("put {bucket}/{path}: {e}")))?;
        }
        tokio::fs::copy(src, &dest)
            .await
            .map_err(|e| WharfError::StorageError(format!("put {bucket}/{path}: {e}")))?;
        Ok(())
    }

    async fn move_object(&self, bucket: &str, from: &str, to: &str) -> Result<()> {
        let dest = self.object_path(bucket, to);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| WharfError::StorageError(format!("move {bucket}/{to}: {e}")))?;
        }
        tokio::fs::rename(self.object_path(bucket, from), &dest)
            .await
            .map_err(|e| WharfError::StorageError(format!("move {bucket}/{from}: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let root = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(root.path()).unwrap();

        let src = scratch.path().join("model.bin");
        std::fs::write(&src, b"weights").unwrap();
        store.put_object("uploads", "v1/model.bin", &src).await.unwrap();

        let dest = scratch.path().join("fetched.bin");
        store
            .get_object("uploads", "v1/model.bin", &dest)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"weights");
    }

    #[tokio::test]
    async fn test_get_missing_object_is_storage_error() {
        let root = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(root.path()).unwrap();

        let result = store
            .get_object("uploads", "nope", &root.path().join("out"))
            .await;
        assert!(matches!(result, Err(WharfError::StorageError(_))));
    }

    #[tokio::test]
    async fn test_move_object() {
        let root = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(root.path()).unwrap();

        let src = scratch.path().join("f");
        std::fs::write(&src, b"x").unwrap();
        store.put_object("b", "a/f", &src).await.unwrap();
        store.move_object("b", "a/f", "done/f").await.unwrap();

        let dest = scratch.path().join("out");
        assert!(store.get_object("b", "a/f", &dest).await.is_err());
        store.get_object("b", "done/f", &dest).await.unwrap();
    }
}
