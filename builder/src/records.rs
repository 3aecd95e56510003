//! Model-record collaborators.
//!
//! The surrounding governance application owns users and model
//! versions; the builder consumes them through these traits and only
//! ever reads a record or flips its `built` flag. In-memory
//! implementations back tests and single-node deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use wharf_core::error::{Result, WharfError};

use crate::registry::ImageRef;

/// Options controlling how a version's image is built.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildOptions {
    /// Base image for the generated build recipe
    pub runtime_image: Option<String>,
}

/// One uploaded version of a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelVersion {
    pub id: String,
    pub namespace: String,
    pub model: String,
    pub version: String,
    #[serde(default)]
    pub build_options: BuildOptions,
    #[serde(default)]
    pub built: bool,
}

impl ModelVersion {
    /// The image this version builds into.
    pub fn image_ref(&self) -> ImageRef {
        ImageRef::new(&self.namespace, &self.model, &self.version)
    }
}

/// A user known to the governance application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Internal record id (what queue payloads carry)
    pub internal_id: String,
    /// External user id
    pub id: String,
}

/// Read/update access to model version records.
#[async_trait]
pub trait VersionStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<ModelVersion>>;

    /// Flip the version's `built` flag once its pipeline succeeded.
    async fn mark_built(&self, id: &str) -> Result<()>;
}

/// Lookup of users by their internal record id.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_internal_id(&self, id: &str) -> Result<Option<User>>;
}

/// In-memory [`VersionStore`].
#[derive(Default)]
pub struct MemoryVersionStore {
    versions: RwLock<HashMap<String, ModelVersion>>,
}

impl MemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, version: ModelVersion) {
        self.versions
            .write()
            .await
            .insert(version.id.clone(), version);
    }
}

#[async_trait]
impl VersionStore for MemoryVersionStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<ModelVersion>> {
        Ok(self.versions.read().await.get(id).cloned())
    }

    async fn mark_built(&self, id: &str) -> Result<()> {
        let mut versions = self.versions.write().await;
        let version = versions.get_mut(id).ok_or(WharfError::MissingRecord {
            kind: "version",
            id: id.to_string(),
        })?;
        version.built = true;
        Ok(())
    }
}

/// In-memory [`UserStore`].
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<String, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, user: User) {
        self.users
            .write()
            .await
            .insert(user.internal_id.clone(), user);
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_internal_id(&self, id: &str) -> Result<Option<User>> {
        Ok(self.users.read().await.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version() -> ModelVersion {
        ModelVersion {
            id: "v-1".to_string(),
            namespace: "internal".to_string(),
            model: "sentiment".to_string(),
            version: "v1.0".to_string(),
            build_options: BuildOptions::default(),
            built: false,
        }
    }

    #[test]
    fn test_image_ref_mapping() {
        let image = version().image_ref();
        assert_eq!(image.repository(), "internal/sentiment");
        assert_eq!(image.tag(), "v1.0");
    }

    #[tokio::test]
    async fn test_mark_built() {
        let store = MemoryVersionStore::new();
        store.insert(version()).await;

        store.mark_built("v-1").await.unwrap();
        assert!(store.find_by_id("v-1").await.unwrap().unwrap().built);
    }

    #[tokio::test]
    async fn test_mark_built_missing_version() {
        let store = MemoryVersionStore::new();
        let result = store.mark_built("nope").await;
        assert!(matches!(
            result,
            Err(WharfError::MissingRecord { kind: "version", .. })
        ));
    }
}
