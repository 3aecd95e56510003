//! Raw file retrieval from object storage.

use std::sync::Arc;

use async_trait::async_trait;

use wharf_core::error::Result;

use crate::storage::ObjectStore;

use super::{step_error, BuildContext, BuildTask};

/// One file to fetch: which payload field references it and the file
/// name it lands under in the workspace.
#[derive(Debug, Clone)]
pub struct FetchSpec {
    pub field: &'static str,
    pub dest: &'static str,
}

impl FetchSpec {
    pub fn new(field: &'static str, dest: &'static str) -> Self {
        Self { field, dest }
    }
}

/// Downloads the job's referenced objects into the workspace.
pub struct FetchRawFiles {
    store: Arc<dyn ObjectStore>,
    files: Vec<FetchSpec>,
}

impl FetchRawFiles {
    pub fn new(store: Arc<dyn ObjectStore>, files: Vec<FetchSpec>) -> Self {
        Self { store, files }
    }
}

#[async_trait]
impl BuildTask for FetchRawFiles {
    fn name(&self) -> &'static str {
        "fetch_raw_files"
    }

    async fn run(&self, ctx: &mut BuildContext) -> Result<()> {
        let workdir = ctx.workdir()?.to_path_buf();

        for spec in &self.files {
            let file_ref = ctx.file_refs.get(spec.field).ok_or_else(|| {
                step_error(
                    self.name(),
                    format!("job carries no '{}' file reference", spec.field),
                )
            })?;

            let dest = workdir.join(spec.dest);
            self.store
                .get_object(&file_ref.bucket, &file_ref.path, &dest)
                .await?;

            tracing::info!(
                job = %ctx.job_id,
                field = spec.field,
                bucket = %file_ref.bucket,
                path = %file_ref.path,
                "Raw file fetched"
            );
            ctx.files.insert(spec.field.to_string(), dest);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FsObjectStore;
    use crate::tasks::test_support::{context_for, job};
    use crate::tasks::{BuildTask, CreateWorkspace};
    use wharf_core::job::{FileRef, UploadType};
    use wharf_core::WharfError;

    #[tokio::test]
    async fn test_fetches_referenced_files() {
        let storage_root = tempfile::tempdir().unwrap();
        let work_root = tempfile::tempdir().unwrap();
        let store = Arc::new(FsObjectStore::new(storage_root.path()).unwrap());

        let src = storage_root.path().join("seed");
        std::fs::write(&src, b"tar bytes").unwrap();
        store.put_object("uploads", "v-1/docker.tar", &src).await.unwrap();

        let mut payload = job(UploadType::Docker);
        payload.docker = Some(FileRef {
            bucket: "uploads".to_string(),
            path: "v-1/docker.tar".to_string(),
        });
        let mut ctx = context_for(&payload);
        CreateWorkspace::new(work_root.path())
            .run(&mut ctx)
            .await
            .unwrap();

        let task = FetchRawFiles::new(store, vec![FetchSpec::new("docker", "docker.tar")]);
        task.run(&mut ctx).await.unwrap();

        let fetched = ctx.file("docker").unwrap();
        assert_eq!(std::fs::read(fetched).unwrap(), b"tar bytes");
        assert!(fetched.starts_with(ctx.workdir().unwrap()));
    }

    #[tokio::test]
    async fn test_missing_reference_is_fatal() {
        let storage_root = tempfile::tempdir().unwrap();
        let work_root = tempfile::tempdir().unwrap();
        let store = Arc::new(FsObjectStore::new(storage_root.path()).unwrap());

        // docker upload without the docker file reference
        let mut ctx = context_for(&job(UploadType::Docker));
        CreateWorkspace::new(work_root.path())
            .run(&mut ctx)
            .await
            .unwrap();

        let task = FetchRawFiles::new(store, vec![FetchSpec::new("docker", "docker.tar")]);
        let result = task.run(&mut ctx).await;
        assert!(matches!(result, Err(WharfError::BuildStepError { .. })));
    }

    #[tokio::test]
    async fn test_missing_object_is_transient() {
        let storage_root = tempfile::tempdir().unwrap();
        let work_root = tempfile::tempdir().unwrap();
        let store = Arc::new(FsObjectStore::new(storage_root.path()).unwrap());

        let mut payload = job(UploadType::Docker);
        payload.docker = Some(FileRef {
            bucket: "uploads".to_string(),
            path: "gone".to_string(),
        });
        let mut ctx = context_for(&payload);
        CreateWorkspace::new(work_root.path())
            .run(&mut ctx)
            .await
            .unwrap();

        let task = FetchRawFiles::new(store, vec![FetchSpec::new("docker", "docker.tar")]);
        let result = task.run(&mut ctx).await;
        assert!(matches!(result, Err(WharfError::StorageError(_))));
    }
}
