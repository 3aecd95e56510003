//! External image builder invocation.

use async_trait::async_trait;

use wharf_core::config::BuildEnvironment;
use wharf_core::error::Result;

use super::{step_error, BuildContext, BuildTask};

/// Runs the configured image builder over the generated recipe.
///
/// The builder both builds and pushes the tagged image; registry
/// credentials are the builder process's own concern. Re-running a
/// build produces the same tag, so redelivery overwrites rather than
/// duplicates.
pub struct InvokeImageBuilder {
    command: String,
    environment: BuildEnvironment,
    registry_host: String,
}

impl InvokeImageBuilder {
    pub fn new(
        command: impl Into<String>,
        environment: BuildEnvironment,
        registry_host: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            environment,
            registry_host: registry_host.into(),
        }
    }

    fn args(&self, tag: &str) -> Vec<String> {
        match self.environment {
            BuildEnvironment::Img => vec![
                "build".to_string(),
                "-f".to_string(),
                "Dockerfile".to_string(),
                "-t".to_string(),
                tag.to_string(),
                ".".to_string(),
            ],
            BuildEnvironment::Openshift => vec![
                "start-build".to_string(),
                tag.to_string(),
                "--from-dir".to_string(),
                ".".to_string(),
                "--follow".to_string(),
                "--wait".to_string(),
            ],
        }
    }
}

#[async_trait]
impl BuildTask for InvokeImageBuilder {
    fn name(&self) -> &'static str {
        "invoke_image_builder"
    }

    async fn run(&self, ctx: &mut BuildContext) -> Result<()> {
        let workdir = ctx.workdir()?;
        if ctx.recipe.is_none() {
            return Err(step_error(self.name(), "no build recipe was generated"));
        }

        let tag = format!(
            "{}/{}:{}",
            self.registry_host,
            ctx.image.repository(),
            ctx.image.tag()
        );

        tracing::info!(job = %ctx.job_id, command = %self.command, tag = %tag, "Invoking image builder");

        let output = tokio::process::Command::new(&self.command)
            .args(self.args(&tag))
            .current_dir(workdir)
            .output()
            .await
            .map_err(|e| step_error(self.name(), format!("spawning '{}': {e}", self.command)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(step_error(
                self.name(),
                format!(
                    "'{}' exited with {}: {}",
                    self.command,
                    output.status.code().unwrap_or(-1),
                    stderr.trim()
                ),
            ));
        }

        tracing::info!(job = %ctx.job_id, tag = %tag, "Image built");
        Ok(())
    }
}
