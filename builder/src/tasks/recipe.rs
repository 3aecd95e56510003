//! Build recipe generation for archive uploads.

use async_trait::async_trait;

use wharf_core::error::Result;

use super::{step_error, BuildContext, BuildTask};

/// Renders the Dockerfile that turns an extracted archive upload into
/// a runnable image. The base image comes from the version's build
/// options, falling back to a configured default.
///
/// Rendering is deterministic: the same version always yields the
/// same recipe.
pub struct GenerateBuildRecipe {
    default_runtime_image: String,
}

impl GenerateBuildRecipe {
    pub fn new(default_runtime_image: impl Into<String>) -> Self {
        Self {
            default_runtime_image: default_runtime_image.into(),
        }
    }

    fn render(&self, ctx: &BuildContext) -> String {
        let base = ctx
            .version
            .build_options
            .runtime_image
            .as_deref()
            .unwrap_or(&self.default_runtime_image);

        format!(
            "FROM {base}\n\
             WORKDIR /model\n\
             COPY binary ./binary\n\
             COPY code ./code\n\
             ENV MODEL_NAME={model}\n\
             ENV MODEL_VERSION={version}\n",
            model = ctx.version.model,
            version = ctx.version.version,
        )
    }
}

#[async_trait]
impl BuildTask for GenerateBuildRecipe {
    fn name(&self) -> &'static str {
        "generate_build_recipe"
    }

    async fn run(&self, ctx: &mut BuildContext) -> Result<()> {
        let path = ctx.workdir()?.join("Dockerfile");
        let content = self.render(ctx);

        tokio::fs::write(&path, &content)
            .await
            .map_err(|e| step_error(self.name(), format!("{}: {e}", path.display())))?;

        tracing::debug!(job = %ctx.job_id, recipe = %path.display(), "Build recipe generated");
        ctx.recipe = Some(path);
        Ok(())
    }
}
