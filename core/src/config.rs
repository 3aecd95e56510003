use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Wharf builder configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WharfConfig {
    /// Container registry settings
    pub registry: RegistryConfig,

    /// Signing key material
    pub keys: KeyConfig,

    /// Upload queue settings
    pub queue: QueueConfig,

    /// Build pipeline settings
    pub build: BuildConfig,

    /// Object storage settings
    pub storage: StorageConfig,

    /// Log level
    pub log_level: LogLevel,
}

impl WharfConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&data)?)
    }
}

/// Container registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Registry host, including port (e.g. "localhost:5000")
    pub host: String,

    /// Scheme used to reach the registry
    pub protocol: String,

    /// Token audience, the service name the registry was started with
    pub service: String,

    /// Token issuer
    pub issuer: String,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,

    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,

    /// Chunk size for blob uploads in bytes
    pub chunk_size_bytes: usize,

    /// Upper bound on a single blob upload in bytes
    pub max_blob_bytes: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            host: "localhost:5000".to_string(),
            protocol: "https".to_string(),
            service: "registry".to_string(),
            issuer: "wharf".to_string(),
            request_timeout_secs: 60,
            connect_timeout_secs: 10,
            chunk_size_bytes: 8 * 1024 * 1024,
            max_blob_bytes: 5 * 1024 * 1024 * 1024,
        }
    }
}

impl RegistryConfig {
    /// Base URL of the registry (no trailing slash).
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.host)
    }
}

/// Signing key configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    /// RSA private key (PEM)
    pub private_key: PathBuf,

    /// Matching public key: SPKI PEM or X.509 certificate PEM
    pub public_key: PathBuf,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            private_key: PathBuf::from("certs/key.pem"),
            public_key: PathBuf::from("certs/cert.pem"),
        }
    }
}

/// Upload queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Seconds a delivered job stays invisible to other receivers
    pub visibility_secs: u64,

    /// Redeliveries before a job is dead-lettered
    pub max_retries: u32,

    /// Store poll interval in milliseconds
    pub poll_interval_ms: u64,

    /// How long a single receive call waits for a job, in seconds
    pub receive_timeout_secs: u64,

    /// Number of concurrent worker loops
    pub workers: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_secs: 9 * 60,
            max_retries: 2,
            poll_interval_ms: 500,
            receive_timeout_secs: 30,
            workers: 1,
        }
    }
}

/// Build pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Which image builder the recipe pipeline invokes
    pub environment: BuildEnvironment,

    /// Builder executable
    pub builder_command: String,

    /// Root directory for per-job working directories
    pub work_dir: PathBuf,

    /// Base image used when a version does not specify one
    pub default_runtime_image: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            environment: BuildEnvironment::Img,
            builder_command: "img".to_string(),
            work_dir: std::env::temp_dir().join("wharf"),
            default_runtime_image: "python:3.11-slim".to_string(),
        }
    }
}

/// Image build environment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildEnvironment {
    /// Daemonless `img` builds
    #[default]
    Img,
    /// OpenShift binary builds
    Openshift,
}

/// Object storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory of the filesystem-backed object store
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./storage"),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WharfConfig::default();
        assert_eq!(config.queue.visibility_secs, 540);
        assert_eq!(config.queue.max_retries, 2);
        assert_eq!(config.registry.chunk_size_bytes, 8 * 1024 * 1024);
        assert_eq!(config.registry.base_url(), "https://localhost:5000");
    }

    #[test]
    fn test_from_file_partial_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "registry:\n  host: registry.internal:5443\nqueue:\n  max_retries: 5\n",
        )
        .unwrap();

        let config = WharfConfig::from_file(&path).unwrap();
        assert_eq!(config.registry.host, "registry.internal:5443");
        assert_eq!(config.queue.max_retries, 5);
        // untouched sections keep defaults
        assert_eq!(config.queue.visibility_secs, 540);
        assert_eq!(config.registry.protocol, "https");
    }

    #[test]
    fn test_from_file_missing() {
        let result = WharfConfig::from_file(Path::new("/nonexistent/config.yaml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_build_environment_serde() {
        let env: BuildEnvironment = serde_yaml::from_str("openshift").unwrap();
        assert_eq!(env, BuildEnvironment::Openshift);
    }
}
