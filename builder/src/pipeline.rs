//! Pipeline planning and execution.
//!
//! Each upload type maps to a fixed, ordered task list. Planning is a
//! pure function of the upload type and configuration; execution runs
//! the tasks sequentially over one [`BuildContext`] and aborts on the
//! first failure.

use std::sync::Arc;

use wharf_core::config::WharfConfig;
use wharf_core::error::Result;
use wharf_core::job::UploadType;

use crate::registry::Registry;
use crate::storage::ObjectStore;
use crate::tasks::{
    BuildContext, BuildTask, CreateWorkspace, ExtractArchives, FetchRawFiles, FetchSpec,
    GenerateBuildRecipe, InvokeImageBuilder, PushImageTar,
};

/// Shared collaborators the planner wires into tasks.
#[derive(Clone)]
pub struct PipelineDeps {
    pub storage: Arc<dyn ObjectStore>,
    pub registry: Arc<dyn Registry>,
}

/// An ordered task list for one job.
pub struct Pipeline {
    tasks: Vec<Box<dyn BuildTask>>,
}

impl Pipeline {
    /// The task list for an upload type.
    ///
    /// Every pipeline starts with workspace creation so later tasks
    /// have somewhere to put files. Metadata-only uploads stop there.
    pub fn plan(upload_type: UploadType, deps: &PipelineDeps, config: &WharfConfig) -> Self {
        let mut tasks: Vec<Box<dyn BuildTask>> =
            vec![Box::new(CreateWorkspace::new(&config.build.work_dir))];

        match upload_type {
            UploadType::Zip => {
                tasks.push(Box::new(FetchRawFiles::new(
                    Arc::clone(&deps.storage),
                    vec![
                        FetchSpec::new("binary", "binary.zip"),
                        FetchSpec::new("code", "code.zip"),
                    ],
                )));
                tasks.push(Box::new(ExtractArchives::new(vec![
                    ("binary", "binary"),
                    ("code", "code"),
                ])));
                tasks.push(Box::new(GenerateBuildRecipe::new(
                    &config.build.default_runtime_image,
                )));
                tasks.push(Box::new(InvokeImageBuilder::new(
                    &config.build.builder_command,
                    config.build.environment,
                    &config.registry.host,
                )));
            }
            UploadType::Docker => {
                tasks.push(Box::new(FetchRawFiles::new(
                    Arc::clone(&deps.storage),
                    vec![FetchSpec::new("docker", "docker.tar")],
                )));
                tasks.push(Box::new(PushImageTar::new(Arc::clone(&deps.registry))));
            }
            UploadType::ModelCard => {}
        }

        Self { tasks }
    }

    /// The names of the planned tasks, in execution order.
    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|t| t.name()).collect()
    }

    /// Runs the tasks in order. The first error aborts the pipeline
    /// and is returned unchanged so the caller can classify it.
    pub async fn run(&self, ctx: &mut BuildContext) -> Result<()> {
        for task in &self.tasks {
            tracing::info!(job = %ctx.job_id, task = task.name(), "Running build task");
            task.run(ctx).await?;
        }
        Ok(())
    }
}
