//! Registry v2 HTTP transport.
//!
//! Implements the minimal protocol surface needed to push and pull
//! one image: manifest GET/PUT, blob GET/HEAD, and the chunked
//! blob-upload flow (POST upload session, PATCH chunks, final PUT
//! with the content digest). Every request mints a fresh token scoped
//! to exactly the repository and actions it needs; tokens are never
//! reused across scopes or images.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use wharf_core::config::RegistryConfig;
use wharf_core::error::{Result, WharfError};

use super::auth::{Access, RegistryAction, RegistryUser, TokenIssuer};
use super::manifest::{ImageRef, Layer, Manifest, MANIFEST_MEDIA_TYPE};

/// Registry operations the build tasks depend on.
///
/// The trait is the seam between the pipeline and the network; tests
/// substitute an in-memory registry.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Fetch the manifest for a tag. An absent manifest is not an
    /// error: it signals "image not yet pushed".
    async fn get_manifest(&self, image: &ImageRef) -> Result<Option<Manifest>>;

    /// Fetch a blob by digest.
    async fn get_blob(&self, image: &ImageRef, digest: &str) -> Result<Vec<u8>>;

    /// Whether a blob with this digest already exists.
    async fn blob_exists(&self, image: &ImageRef, digest: &str) -> Result<bool>;

    /// Upload a file as a blob, returning its layer descriptor.
    /// Re-pushing existing content is a no-op (blobs are
    /// content-addressed).
    async fn push_blob(&self, image: &ImageRef, path: &Path, media_type: &str) -> Result<Layer>;

    /// Upload the assembled manifest for a tag.
    async fn put_manifest(&self, image: &ImageRef, manifest: &Manifest) -> Result<()>;
}

/// HTTP client for a container registry.
pub struct RegistryClient {
    http: reqwest::Client,
    base_url: String,
    host: String,
    issuer: Arc<TokenIssuer>,
    user: RegistryUser,
    chunk_size: usize,
    max_blob_bytes: u64,
}

impl RegistryClient {
    /// Create a client from registry configuration. The service
    /// identity (the `admin` user backed by the key-derived id) signs
    /// all requests.
    pub fn new(config: &RegistryConfig, issuer: Arc<TokenIssuer>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| WharfError::ConfigError(format!("HTTP client: {e}")))?;

        let user = RegistryUser {
            id: "admin".to_string(),
            internal_id: issuer.admin_id().to_string(),
        };

        Ok(Self {
            http,
            base_url: config.base_url(),
            host: config.host.clone(),
            issuer,
            user,
            chunk_size: config.chunk_size_bytes,
            max_blob_bytes: config.max_blob_bytes,
        })
    }

    fn bearer(&self, image: &ImageRef, actions: &[RegistryAction]) -> Result<String> {
        let access = Access::repository(image.repository(), actions);
        let token = self.issuer.access_token(&self.user, &[access])?;
        Ok(format!("Bearer {token}"))
    }

    fn registry_error(&self, message: impl std::fmt::Display) -> WharfError {
        WharfError::RegistryError {
            registry: self.host.clone(),
            message: message.to_string(),
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> WharfError {
        if err.is_timeout() {
            WharfError::TimeoutError(format!("registry {}: {err}", self.host))
        } else {
            self.registry_error(err)
        }
    }

    /// Classify an unexpected status: 5xx is worth a redelivery, the
    /// rest means the request itself is wrong.
    fn status_error(&self, context: &str, status: StatusCode) -> WharfError {
        if status.is_server_error() {
            self.registry_error(format!("{context}: {status}"))
        } else {
            WharfError::ProtocolError {
                registry: self.host.clone(),
                message: format!("{context}: {status}"),
            }
        }
    }

    async fn start_upload(&self, image: &ImageRef, auth: &str) -> Result<String> {
        let url = format!("{}/v2/{}/blobs/uploads/", self.base_url, image.repository());
        let response = self
            .http
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, auth)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status != StatusCode::ACCEPTED {
            return Err(self.status_error("blob upload session", status));
        }

        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| self.registry_error("upload session missing Location header"))?;
        Ok(resolve_location(&self.base_url, location))
    }

    /// Hash a file without loading it whole.
    async fn file_digest(&self, path: &Path) -> Result<(String, u64)> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; self.chunk_size];
        let mut size = 0u64;
        loop {
            let read = file.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
            size += read as u64;
        }
        Ok((format!("sha256:{}", hex::encode(hasher.finalize())), size))
    }
}

#[async_trait]
impl Registry for RegistryClient {
    async fn get_manifest(&self, image: &ImageRef) -> Result<Option<Manifest>> {
        let auth = self.bearer(image, &[RegistryAction::Pull])?;
        let url = format!(
            "{}/v2/{}/manifests/{}",
            self.base_url,
            image.repository(),
            image.tag()
        );

        let response = self
            .http
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, auth)
            .header(reqwest::header::ACCEPT, MANIFEST_MEDIA_TYPE)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        match response.status() {
            StatusCode::OK => {
                let manifest = response
                    .json::<Manifest>()
                    .await
                    .map_err(|e| self.transport_error(e))?;
                Ok(Some(manifest))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(self.status_error("manifest fetch", status)),
        }
    }

    async fn get_blob(&self, image: &ImageRef, digest: &str) -> Result<Vec<u8>> {
        let auth = self.bearer(image, &[RegistryAction::Pull])?;
        let url = format!(
            "{}/v2/{}/blobs/{}",
            self.base_url,
            image.repository(),
            digest
        );

        let response = self
            .http
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, auth)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(self.status_error("blob fetch", status));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(e))?;
        Ok(bytes.to_vec())
    }

    async fn blob_exists(&self, image: &ImageRef, digest: &str) -> Result<bool> {
        let auth = self.bearer(image, &[RegistryAction::Pull])?;
        let url = format!(
            "{}/v2/{}/blobs/{}",
            self.base_url,
            image.repository(),
            digest
        );

        let response = self
            .http
            .head(&url)
            .header(reqwest::header::AUTHORIZATION, auth)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(self.status_error("blob check", status)),
        }
    }

    async fn push_blob(&self, image: &ImageRef, path: &Path, media_type: &str) -> Result<Layer> {
        let (digest, size) = self.file_digest(path).await?;
        if size > self.max_blob_bytes {
            return Err(WharfError::ProtocolError {
                registry: self.host.clone(),
                message: format!(
                    "blob {} is {size} bytes, exceeding the {} byte limit",
                    path.display(),
                    self.max_blob_bytes
                ),
            });
        }

        // content-addressed: identical content is already there
        if self.blob_exists(image, &digest).await? {
            tracing::debug!(image = %image, digest = %digest, "Blob already present, skipping upload");
            return Ok(Layer {
                digest,
                size,
                media_type: media_type.to_string(),
            });
        }

        let auth = self.bearer(image, &[RegistryAction::Pull, RegistryAction::Push])?;
        let mut location = self.start_upload(image, &auth).await?;

        let mut file = tokio::fs::File::open(path).await?;
        let mut offset = 0u64;
        loop {
            let mut chunk = vec![0u8; self.chunk_size];
            let read = file.read(&mut chunk).await?;
            if read == 0 {
                break;
            }
            chunk.truncate(read);
            let end = offset + read as u64;

            let response = self
                .http
                .patch(&location)
                .header(reqwest::header::AUTHORIZATION, &auth)
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .header(reqwest::header::CONTENT_LENGTH, read)
                .header(reqwest::header::CONTENT_RANGE, format!("{}-{}", offset, end - 1))
                .body(chunk)
                .send()
                .await
                .map_err(|e| self.transport_error(e))?;

            let status = response.status();
            if status != StatusCode::ACCEPTED && status != StatusCode::NO_CONTENT {
                return Err(self.status_error("blob chunk upload", status));
            }
            // the registry may hand out a new upload URL per chunk
            if let Some(next) = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
            {
                location = resolve_location(&self.base_url, next);
            }
            offset = end;
        }

        let finalize_url = append_digest(&location, &digest);
        let response = self
            .http
            .put(&finalize_url)
            .header(reqwest::header::AUTHORIZATION, &auth)
            .header(reqwest::header::CONTENT_LENGTH, 0)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST {
            // a 400 is only a digest mismatch when the registry says so
            let body = response.bytes().await.map_err(|e| self.transport_error(e))?;
            if digest_rejected(&body) {
                return Err(WharfError::DigestMismatch {
                    expected: digest,
                    actual: "rejected by registry".to_string(),
                });
            }
            return Err(WharfError::ProtocolError {
                registry: self.host.clone(),
                message: format!(
                    "blob upload finalize: {status}: {}",
                    String::from_utf8_lossy(&body)
                ),
            });
        }
        if status != StatusCode::CREATED && status != StatusCode::NO_CONTENT {
            return Err(self.status_error("blob upload finalize", status));
        }

        tracing::debug!(image = %image, digest = %digest, size, "Blob pushed");
        Ok(Layer {
            digest,
            size,
            media_type: media_type.to_string(),
        })
    }

    async fn put_manifest(&self, image: &ImageRef, manifest: &Manifest) -> Result<()> {
        let auth = self.bearer(image, &[RegistryAction::Push])?;
        let url = format!(
            "{}/v2/{}/manifests/{}",
            self.base_url,
            image.repository(),
            image.tag()
        );

        let response = self
            .http
            .put(&url)
            .header(reqwest::header::AUTHORIZATION, auth)
            .header(reqwest::header::CONTENT_TYPE, MANIFEST_MEDIA_TYPE)
            .body(serde_json::to_vec(manifest)?)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status != StatusCode::CREATED && status != StatusCode::OK {
            return Err(self.status_error("manifest put", status));
        }

        tracing::info!(image = %image, layers = manifest.layers.len(), "Manifest pushed");
        Ok(())
    }
}

/// Registry error response: `{"errors": [{"code": ..., ...}, ...]}`.
#[derive(Deserialize)]
struct RegistryErrorBody {
    #[serde(default)]
    errors: Vec<RegistryErrorDetail>,
}

#[derive(Deserialize)]
struct RegistryErrorDetail {
    #[serde(default)]
    code: String,
}

/// Whether an error body reports a digest verification failure.
fn digest_rejected(body: &[u8]) -> bool {
    serde_json::from_slice::<RegistryErrorBody>(body)
        .map(|b| b.errors.iter().any(|e| e.code == "DIGEST_INVALID"))
        .unwrap_or(false)
}

/// Resolve an upload Location header that may be absolute or a path.
fn resolve_location(base_url: &str, location: &str) -> String {
    if location.starts_with("http://") || location.starts_with("https://") {
        location.to_string()
    } else {
        format!("{base_url}{location}")
    }
}

/// Append the `digest` query parameter to an upload URL that may
/// already carry session parameters.
fn append_digest(url: &str, digest: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}digest={digest}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_location_absolute() {
        assert_eq!(
            resolve_location("https://registry:5000", "https://cdn.example/upload/1"),
            "https://cdn.example/upload/1"
        );
    }

    #[test]
    fn test_resolve_location_relative() {
        assert_eq!(
            resolve_location("https://registry:5000", "/v2/ns/model/blobs/uploads/xyz"),
            "https://registry:5000/v2/ns/model/blobs/uploads/xyz"
        );
    }

    #[test]
    fn test_append_digest_plain_url() {
        assert_eq!(
            append_digest("https://r/v2/u/1", "sha256:abc"),
            "https://r/v2/u/1?digest=sha256:abc"
        );
    }

    #[test]
    fn test_append_digest_with_existing_query() {
        assert_eq!(
            append_digest("https://r/v2/u/1?_state=s", "sha256:abc"),
            "https://r/v2/u/1?_state=s&digest=sha256:abc"
        );
    }

    #[test]
    fn test_digest_rejected_matches_registry_error_code() {
        let body = br#"{"errors":[{"code":"DIGEST_INVALID","message":"provided digest did not match uploaded content"}]}"#;
        assert!(digest_rejected(body));
    }

    #[test]
    fn test_digest_rejected_ignores_other_failures() {
        let body = br#"{"errors":[{"code":"NAME_INVALID","message":"invalid repository name"}]}"#;
        assert!(!digest_rejected(body));
        assert!(!digest_rejected(b"upstream connect error"));
        assert!(!digest_rejected(b"{}"));
    }
}
