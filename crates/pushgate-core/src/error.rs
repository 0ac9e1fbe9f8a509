//! Error taxonomy for the push gate.

use std::path::PathBuf;

/// Errors produced by the discovery boundary.
///
/// Per-binary analysis problems never surface here; they are logged and
/// reported as skipped entries by the worker.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("build output directory not found: {0}")]
    MissingDirectory(PathBuf),

    #[error("failed to spawn discovery worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("discovery worker exited with {status}: {stderr}")]
    WorkerFailed { status: String, stderr: String },

    #[error("discovery worker timed out after {0}s")]
    Timeout(u64),

    #[error("malformed discovery report: {0}")]
    MalformedReport(#[source] serde_json::Error),

    #[error("io error during discovery: {0}")]
    Io(#[from] std::io::Error),
}

/// Gate-level errors.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("configuration file not found: {0}")]
    ConfigurationMissing(PathBuf),

    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),

    #[error("branch rejected: {0}")]
    BranchRejected(String),

    #[error("build failed for {0}")]
    Build(PathBuf),

    #[error("discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("git error: {0}")]
    Git(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GateError {
    /// Whether this error belongs to the configuration stage (pre-work abort).
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            GateError::ConfigurationMissing(_) | GateError::ConfigurationInvalid(_)
        )
    }
}

/// Result type for gate operations.
pub type Result<T> = std::result::Result<T, GateError>;
