//! Archive extraction for zip uploads.

use async_trait::async_trait;

use wharf_core::error::Result;

use super::{step_error, BuildContext, BuildTask};

/// Unpacks fetched zip archives into per-field workspace directories
/// (`binary.zip` into `binary/`, `code.zip` into `code/`).
///
/// Extraction into a fresh directory overwrites nothing, so a re-run
/// after redelivery is safe.
pub struct ExtractArchives {
    entries: Vec<(&'static str, &'static str)>,
}

impl ExtractArchives {
    /// `entries` pairs a fetched payload field with the directory name
    /// its contents land under.
    pub fn new(entries: Vec<(&'static str, &'static str)>) -> Self {
        Self { entries }
    }
}

#[async_trait]
impl BuildTask for ExtractArchives {
    fn name(&self) -> &'static str {
        "extract_archives"
    }

    async fn run(&self, ctx: &mut BuildContext) -> Result<()> {
        let workdir = ctx.workdir()?.to_path_buf();

        for (field, dir_name) in &self.entries {
            let archive = ctx.file(field)?.to_path_buf();
            let dest = workdir.join(dir_name);

            let name = self.name();
            let field_name = *field;
            let dest_for_task = dest.clone();
            // zip extraction is blocking work
            tokio::task::spawn_blocking(move || -> Result<()> {
                let file = std::fs::File::open(&archive)?;
                let mut zip = zip::ZipArchive::new(file).map_err(|e| {
                    step_error(name, format!("'{field_name}' is not a valid archive: {e}"))
                })?;
                zip.extract(&dest_for_task)
                    .map_err(|e| step_error(name, format!("extracting '{field_name}': {e}")))
            })
            .await
            .map_err(|e| step_error(self.name(), e.to_string()))??;

            tracing::info!(job = %ctx.job_id, field, dest = %dest.display(), "Archive extracted");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::test_support::context_with_workdir;
    use std::io::Write;
    use wharf_core::WharfError;
    use zip::write::FileOptions;

    fn write_zip(path: &std::path::Path, name: &str, content: &[u8]) {
        let file = std::fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        writer
            .start_file(name, FileOptions::default())
            .unwrap();
        writer.write_all(content).unwrap();
        writer.finish().unwrap();
    }

    #[tokio::test]
    async fn test_extracts_archives_into_directories() {
        let root = tempfile::tempdir().unwrap();
        let mut ctx = context_with_workdir(root.path()).await;
        let workdir = ctx.workdir().unwrap().to_path_buf();

        let binary_zip = workdir.join("binary.zip");
        let code_zip = workdir.join("code.zip");
        write_zip(&binary_zip, "model.bin", b"weights");
        write_zip(&code_zip, "predict.py", b"def predict(): ...");
        ctx.files.insert("binary".to_string(), binary_zip);
        ctx.files.insert("code".to_string(), code_zip);

        let task = ExtractArchives::new(vec![("binary", "binary"), ("code", "code")]);
        task.run(&mut ctx).await.unwrap();

        assert_eq!(
            std::fs::read(workdir.join("binary/model.bin")).unwrap(),
            b"weights"
        );
        assert!(workdir.join("code/predict.py").exists());
    }

    #[tokio::test]
    async fn test_malformed_archive_is_fatal() {
        let root = tempfile::tempdir().unwrap();
        let mut ctx = context_with_workdir(root.path()).await;
        let workdir = ctx.workdir().unwrap().to_path_buf();

        let bogus = workdir.join("binary.zip");
        std::fs::write(&bogus, b"definitely not a zip").unwrap();
        ctx.files.insert("binary".to_string(), bogus);

        let task = ExtractArchives::new(vec![("binary", "binary")]);
        let result = task.run(&mut ctx).await;
        assert!(matches!(result, Err(WharfError::BuildStepError { .. })));
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let mut ctx = context_with_workdir(root.path()).await;
        let workdir = ctx.workdir().unwrap().to_path_buf();

        let binary_zip = workdir.join("binary.zip");
        write_zip(&binary_zip, "model.bin", b"weights");
        ctx.files.insert("binary".to_string(), binary_zip);

        let task = ExtractArchives::new(vec![("binary", "binary")]);
        task.run(&mut ctx).await.unwrap();
        task.run(&mut ctx).await.unwrap();

        assert_eq!(
            std::fs::read(workdir.join("binary/model.bin")).unwrap(),
            b"weights"
        );
    }
}
