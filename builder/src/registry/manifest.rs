//! Image manifests and references.

use serde::{Deserialize, Serialize};

/// Media type of a schema 2 image manifest.
pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Media type of an image config blob.
pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.docker.container.image.v1+json";

/// Media type of an image layer blob.
pub const LAYER_MEDIA_TYPE: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// Identifies a logical image built from a model version.
///
/// Maps deterministically onto the registry: repository
/// `namespace/model`, tag `version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub namespace: String,
    pub model: String,
    pub version: String,
}

impl ImageRef {
    pub fn new(
        namespace: impl Into<String>,
        model: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            model: model.into(),
            version: version.into(),
        }
    }

    /// Registry repository path.
    pub fn repository(&self) -> String {
        format!("{}/{}", self.namespace, self.model)
    }

    /// Registry tag.
    pub fn tag(&self) -> &str {
        &self.version
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}:{}", self.namespace, self.model, self.version)
    }
}

/// One content-addressed blob of an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    /// `sha256:<hex>` content digest
    pub digest: String,
    /// Size in bytes
    pub size: u64,
    pub media_type: String,
}

/// Schema 2 image manifest: a config blob plus ordered layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: u32,
    pub media_type: String,
    pub config: Layer,
    pub layers: Vec<Layer>,
}

impl Manifest {
    pub fn new(config: Layer, layers: Vec<Layer>) -> Self {
        Self {
            schema_version: 2,
            media_type: MANIFEST_MEDIA_TYPE.to_string(),
            config,
            layers,
        }
    }
}
