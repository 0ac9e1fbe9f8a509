//! Discovery behind a disposable process boundary.
//!
//! The scan runs in a short-lived worker process. A broken binary that
//! crashes the analysis takes down the worker, never the gate, and every
//! file handle the scan opened is gone once the worker exits. The worker is
//! killed if it outlives the configured timeout or if the discovering future
//! is dropped.
//!
//! The shadow directory the worker copies binaries into is owned by this
//! side of the boundary, so it is removed even when the worker is killed.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::scan::DiscoveryReport;
use crate::config::DiscoverySettings;
use crate::error::DiscoveryError;

/// A binary identified as holding tests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct ContainerRef {
    pub path: PathBuf,
}

impl ContainerRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Finds test containers in a build-output directory.
#[async_trait]
pub trait TestDiscoverer: Send + Sync {
    async fn discover(&self, build_output: &Path) -> Result<Vec<ContainerRef>, DiscoveryError>;
}

/// How to launch the discovery worker.
///
/// The `--ext` and `--shadow-dir` options and the build-output directory
/// are appended to `args`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    /// Subcommand the `pushgate` binary exposes for the worker.
    pub const SUBCOMMAND: &'static str = "discover-worker";

    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Re-invoke the running executable as the worker.
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(
            std::env::current_exe()?,
            vec![Self::SUBCOMMAND.to_string()],
        ))
    }
}

/// [`TestDiscoverer`] that runs the scan in a worker process.
#[derive(Debug, Clone)]
pub struct IsolatedTestDiscoverer {
    worker: WorkerCommand,
    settings: DiscoverySettings,
    shadow_root: Option<PathBuf>,
}

impl IsolatedTestDiscoverer {
    pub fn new(worker: WorkerCommand, settings: DiscoverySettings) -> Self {
        Self {
            worker,
            settings,
            shadow_root: None,
        }
    }

    /// Create per-call shadow directories under `root` instead of the
    /// system temp directory.
    pub fn with_shadow_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.shadow_root = Some(root.into());
        self
    }

    fn shadow_dir(&self) -> std::io::Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("pushgate-shadow-");
        match &self.shadow_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
    }

    /// Run the worker and return its full report.
    #[instrument(skip(self), fields(dir = %build_output.display()))]
    pub async fn discover_report(
        &self,
        build_output: &Path,
    ) -> Result<DiscoveryReport, DiscoveryError> {
        if !build_output.is_dir() {
            return Err(DiscoveryError::MissingDirectory(build_output.to_path_buf()));
        }

        // Dropped on every return path, after the worker is gone.
        let shadow = self.shadow_dir()?;

        let mut cmd = Command::new(&self.worker.program);
        cmd.args(&self.worker.args);
        for ext in &self.settings.extensions {
            cmd.arg(format!("--ext={ext}"));
        }
        cmd.arg(format!("--shadow-dir={}", shadow.path().display()));
        cmd.arg(build_output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(program = %self.worker.program.display(), "starting discovery worker");
        let child = cmd.spawn().map_err(DiscoveryError::Spawn)?;

        let output = if self.settings.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(self.settings.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| DiscoveryError::Timeout(self.settings.timeout_secs))??
        } else {
            child.wait_with_output().await?
        };

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
            debug!(target: "pushgate::discovery::worker", "{line}");
        }

        if !output.status.success() {
            return Err(DiscoveryError::WorkerFailed {
                status: output.status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        let report: DiscoveryReport =
            serde_json::from_slice(&output.stdout).map_err(DiscoveryError::MalformedReport)?;

        for path in &report.containers {
            info!(container = %path.display(), "found test container");
        }
        for path in &report.opted_out {
            info!(binary = %path.display(), "skipping opted-out binary");
        }
        for skipped in &report.skipped {
            warn!(
                binary = %skipped.path.display(),
                reason = %skipped.reason,
                "binary could not be analysed"
            );
        }

        Ok(report)
    }
}

#[async_trait]
impl TestDiscoverer for IsolatedTestDiscoverer {
    async fn discover(&self, build_output: &Path) -> Result<Vec<ContainerRef>, DiscoveryError> {
        let report = self.discover_report(build_output).await?;
        Ok(report.containers.into_iter().map(ContainerRef::new).collect())
    }
}
