//! Build task library.
//!
//! A pipeline is an ordered list of tasks, each a named unit of work
//! over a shared [`BuildContext`]. Tasks are stateless aside from
//! constructor-supplied parameters and must be idempotent: queue
//! redelivery re-runs a pipeline from the start, so re-running a step
//! that already completed has to be safe.

mod build;
mod extract;
mod fetch;
mod push_tar;
mod recipe;
mod workspace;

pub use build::InvokeImageBuilder;
pub use extract::ExtractArchives;
pub use fetch::{FetchRawFiles, FetchSpec};
pub use push_tar::PushImageTar;
pub use recipe::GenerateBuildRecipe;
pub use workspace::CreateWorkspace;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::TempDir;

use wharf_core::error::{Result, WharfError};
use wharf_core::job::{BuildJob, FileRef};

use crate::records::ModelVersion;
use crate::registry::{ImageRef, Layer};

/// Per-job state threaded through one pipeline execution.
///
/// Exclusively owned by that execution and discarded at job
/// completion; the working directory is removed with it.
pub struct BuildContext {
    pub job_id: String,
    pub version: ModelVersion,
    /// The image this build produces
    pub image: ImageRef,
    /// Source object references by payload field name
    pub file_refs: HashMap<String, FileRef>,
    /// Fetched files by payload field name
    pub files: HashMap<String, PathBuf>,
    /// Generated build recipe, if any
    pub recipe: Option<PathBuf>,
    /// Layers pushed to the registry, if any
    pub layers: Vec<Layer>,
    workdir: Option<TempDir>,
}

impl BuildContext {
    pub fn new(job_id: impl Into<String>, job: &BuildJob, version: ModelVersion) -> Self {
        let mut file_refs = HashMap::new();
        for field in ["binary", "code", "docker"] {
            if let Some(file_ref) = job.file_ref(field) {
                file_refs.insert(field.to_string(), file_ref.clone());
            }
        }

        Self {
            job_id: job_id.into(),
            image: version.image_ref(),
            version,
            file_refs,
            files: HashMap::new(),
            recipe: None,
            layers: Vec::new(),
            workdir: None,
        }
    }

    /// Install the working directory. The guard removes it on drop.
    pub fn set_workdir(&mut self, dir: TempDir) {
        self.workdir = Some(dir);
    }

    /// The working directory; an error before workspace creation ran.
    pub fn workdir(&self) -> Result<&Path> {
        self.workdir
            .as_ref()
            .map(TempDir::path)
            .ok_or_else(|| step_error("workspace", "no working directory created"))
    }

    /// A previously fetched file by payload field name.
    pub fn file(&self, field: &str) -> Result<&Path> {
        self.files
            .get(field)
            .map(PathBuf::as_path)
            .ok_or_else(|| step_error("fetch_raw_files", format!("file '{field}' was not fetched")))
    }
}

/// A named, composable unit of build work.
#[async_trait]
pub trait BuildTask: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &mut BuildContext) -> Result<()>;
}

/// Shorthand for a fatal build-step failure.
pub(crate) fn step_error(step: &str, message: impl Into<String>) -> WharfError {
    WharfError::BuildStepError {
        step: step.to_string(),
        message: message.into(),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use wharf_core::job::{BuildJob, UploadType};

    use crate::records::{BuildOptions, ModelVersion};

    use super::BuildContext;

    pub fn version() -> ModelVersion {
        ModelVersion {
            id: "v-1".to_string(),
            namespace: "internal".to_string(),
            model: "sentiment".to_string(),
            version: "v1.0".to_string(),
            build_options: BuildOptions::default(),
            built: false,
        }
    }

    pub fn job(upload_type: UploadType) -> BuildJob {
        BuildJob {
            version_id: "v-1".to_string(),
            user_id: "u-1".to_string(),
            upload_type,
            binary: None,
            code: None,
            docker: None,
        }
    }

    /// A context for a metadata-only job with no file references.
    pub fn context() -> BuildContext {
        BuildContext::new("job-1", &job(UploadType::ModelCard), version())
    }

    /// A context for an arbitrary job payload.
    pub fn context_for(job: &BuildJob) -> BuildContext {
        BuildContext::new("job-1", job, version())
    }

    /// A context with a live working directory rooted in `root`.
    pub async fn context_with_workdir(root: &std::path::Path) -> BuildContext {
        use super::{BuildTask, CreateWorkspace};
        let mut ctx = context();
        CreateWorkspace::new(root).run(&mut ctx).await.unwrap();
        ctx
    }
}
