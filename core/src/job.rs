//! Build job payloads.
//!
//! A `BuildJob` is the queue message schema: the version and user a
//! build belongs to, the upload type, and references to the uploaded
//! files in object storage. File fields carry bucket/path references,
//! never inline bytes.

use serde::{Deserialize, Serialize};

/// How a model was uploaded, which decides the build pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UploadType {
    /// Archive upload: binary + code zips, built into an image
    Zip,
    /// Pre-built image uploaded as a `docker save` tar
    Docker,
    /// Metadata-only upload, nothing to build
    ModelCard,
}

/// Reference to an object in external storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub bucket: String,
    pub path: String,
}

/// A queued request to build an uploaded model into a runnable artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildJob {
    pub version_id: String,
    pub user_id: String,
    pub upload_type: UploadType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<FileRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<FileRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker: Option<FileRef>,
}

impl BuildJob {
    /// Look up a file reference by its payload field name.
    pub fn file_ref(&self, field: &str) -> Option<&FileRef> {
        match field {
            "binary" => self.binary.as_ref(),
            "code" => self.code.as_ref(),
            "docker" => self.docker.as_ref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_type_wire_names() {
        assert_eq!(serde_json::to_string(&UploadType::Zip).unwrap(), "\"zip\"");
        assert_eq!(
            serde_json::to_string(&UploadType::Docker).unwrap(),
            "\"docker\""
        );
        assert_eq!(
            serde_json::to_string(&UploadType::ModelCard).unwrap(),
            "\"modelCard\""
        );
    }

    #[test]
    fn test_job_round_trip() {
        let json = r#"{
            "versionId": "v-1",
            "userId": "u-1",
            "uploadType": "docker",
            "docker": { "bucket": "uploads", "path": "v-1/docker.tar" }
        }"#;
        let job: BuildJob = serde_json::from_str(json).unwrap();
        assert_eq!(job.version_id, "v-1");
        assert_eq!(job.upload_type, UploadType::Docker);
        assert_eq!(job.file_ref("docker").unwrap().bucket, "uploads");
        assert!(job.file_ref("binary").is_none());

        let out = serde_json::to_value(&job).unwrap();
        assert_eq!(out["uploadType"], "docker");
        // absent file fields are omitted, not null
        assert!(out.get("binary").is_none());
    }
}
