//! Workspace creation, the first task of every pipeline.

use std::path::PathBuf;

use async_trait::async_trait;

use wharf_core::error::Result;

use super::{step_error, BuildContext, BuildTask};

/// Creates a fresh, unique working directory for the job.
pub struct CreateWorkspace {
    root: PathBuf,
}

impl CreateWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl BuildTask for CreateWorkspace {
    fn name(&self) -> &'static str {
        "create_workspace"
    }

    async fn run(&self, ctx: &mut BuildContext) -> Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| step_error(self.name(), format!("{}: {e}", self.root.display())))?;

        let dir = tempfile::Builder::new()
            .prefix("wharf-build-")
            .tempdir_in(&self.root)
            .map_err(|e| step_error(self.name(), e.to_string()))?;

        tracing::debug!(job = %ctx.job_id, workdir = %dir.path().display(), "Workspace created");
        ctx.set_workdir(dir);
        Ok(())
    }
}
