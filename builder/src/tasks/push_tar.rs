//! Pushing a `docker save` tar to the registry.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use wharf_core::error::Result;

use crate::registry::manifest::{CONFIG_MEDIA_TYPE, LAYER_MEDIA_TYPE};
use crate::registry::{Manifest, Registry};

use super::{step_error, BuildContext, BuildTask};

/// One entry of a `docker save` tar's `manifest.json`.
#[derive(Debug, Deserialize)]
struct SavedImage {
    #[serde(rename = "Config")]
    config: String,
    #[serde(rename = "Layers")]
    layers: Vec<String>,
}

/// Unpacks the fetched image tar and pushes its config, layers and
/// assembled manifest to the registry.
///
/// Blobs are content-addressed, so redelivery re-pushes the same
/// digests and the registry deduplicates; the final manifest PUT just
/// overwrites the tag.
pub struct PushImageTar {
    registry: Arc<dyn Registry>,
}

impl PushImageTar {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl BuildTask for PushImageTar {
    fn name(&self) -> &'static str {
        "push_image_tar"
    }

    async fn run(&self, ctx: &mut BuildContext) -> Result<()> {
        let tar_path = ctx.file("docker")?.to_path_buf();
        let unpack_dir = ctx.workdir()?.join("docker");

        {
            let name = self.name();
            let tar_path = tar_path.clone();
            let unpack_dir = unpack_dir.clone();
            // tar extraction is blocking work
            tokio::task::spawn_blocking(move || -> Result<()> {
                let file = std::fs::File::open(&tar_path)?;
                let mut archive = tar::Archive::new(file);
                archive
                    .unpack(&unpack_dir)
                    .map_err(|e| step_error(name, format!("malformed image tar: {e}")))
            })
            .await
            .map_err(|e| step_error(self.name(), e.to_string()))??;
        }

        let manifest_path = unpack_dir.join("manifest.json");
        let manifest_data = tokio::fs::read(&manifest_path)
            .await
            .map_err(|e| step_error(self.name(), format!("image tar has no manifest.json: {e}")))?;
        let saved: Vec<SavedImage> = serde_json::from_slice(&manifest_data)
            .map_err(|e| step_error(self.name(), format!("invalid manifest.json: {e}")))?;
        let image = saved
            .first()
            .ok_or_else(|| step_error(self.name(), "image tar contains no images"))?;

        // the same blob may back several layer entries
        let mut seen = HashSet::new();
        let unique_layers: Vec<&String> = image
            .layers
            .iter()
            .filter(|l| seen.insert(l.as_str()))
            .collect();

        let mut layers = Vec::with_capacity(unique_layers.len());
        for layer_rel in unique_layers {
            let layer = self
                .registry
                .push_blob(&ctx.image, &unpack_dir.join(layer_rel), LAYER_MEDIA_TYPE)
                .await?;
            tracing::info!(
                job = %ctx.job_id,
                image = %ctx.image,
                digest = %layer.digest,
                size = layer.size,
                "Layer pushed"
            );
            layers.push(layer);
        }

        let config = self
            .registry
            .push_blob(&ctx.image, &unpack_dir.join(&image.config), CONFIG_MEDIA_TYPE)
            .await?;

        let manifest = Manifest::new(config, layers.clone());
        self.registry.put_manifest(&ctx.image, &manifest).await?;

        tracing::info!(
            job = %ctx.job_id,
            image = %ctx.image,
            layers = layers.len(),
            "Image tar pushed"
        );
        ctx.layers = layers;
        Ok(())
    }
}
