//! In-memory fakes for the core collaborator traits (testing only)
//!
//! Provides `FakeVcs` and `FixedDiscoverer` that satisfy the trait contracts
//! without git or a worker process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::discovery::{ContainerRef, TestDiscoverer};
use crate::error::DiscoveryError;
use crate::git::VersionControlClient;

// ---------------------------------------------------------------------------
// FakeVcs
// ---------------------------------------------------------------------------

/// Version control answers fixed at construction.
#[derive(Debug, Clone, Default)]
pub struct FakeVcs {
    pub branch: Option<String>,
    pub last_changed: Option<PathBuf>,
}

impl FakeVcs {
    pub fn on_branch(branch: &str) -> Self {
        Self {
            branch: Some(branch.to_string()),
            last_changed: None,
        }
    }

    pub fn with_last_changed(mut self, path: impl Into<PathBuf>) -> Self {
        self.last_changed = Some(path.into());
        self
    }
}

impl VersionControlClient for FakeVcs {
    fn current_branch(&self, _repo: &Path) -> Option<String> {
        self.branch.clone()
    }

    fn last_changed_file(&self, _repo: &Path) -> Option<PathBuf> {
        self.last_changed.clone()
    }
}

// ---------------------------------------------------------------------------
// FixedDiscoverer
// ---------------------------------------------------------------------------

/// Returns the files currently present in the build output whose names are
/// registered as containers. An output holding a file registered with
/// [`failing_when_present`](Self::failing_when_present) fails like a crashed
/// worker.
#[derive(Debug, Default)]
pub struct FixedDiscoverer {
    container_names: Vec<String>,
    fail_on: Vec<String>,
    calls: Mutex<HashMap<PathBuf, usize>>,
}

impl FixedDiscoverer {
    /// Treat files with these names as test containers.
    pub fn new(container_names: &[&str]) -> Self {
        Self {
            container_names: container_names.iter().map(|s| s.to_string()).collect(),
            fail_on: Vec::new(),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Fail discovery whenever the output contains a file with this name.
    pub fn failing_when_present(mut self, marker_file: &str) -> Self {
        self.fail_on.push(marker_file.to_string());
        self
    }

    /// Number of discover calls made for `dir`.
    pub fn calls_for(&self, dir: &Path) -> usize {
        self.calls.lock().unwrap().get(dir).copied().unwrap_or(0)
    }

    /// Total discover calls.
    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl TestDiscoverer for FixedDiscoverer {
    async fn discover(&self, build_output: &Path) -> Result<Vec<ContainerRef>, DiscoveryError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(build_output.to_path_buf())
            .or_insert(0) += 1;

        if !build_output.is_dir() {
            return Err(DiscoveryError::MissingDirectory(build_output.to_path_buf()));
        }
        if self.fail_on.iter().any(|f| build_output.join(f).exists()) {
            return Err(DiscoveryError::WorkerFailed {
                status: "exit status: 134".to_string(),
                stderr: "fake worker crash".to_string(),
            });
        }

        let mut found: Vec<ContainerRef> = self
            .container_names
            .iter()
            .map(|name| build_output.join(name))
            .filter(|p| p.is_file())
            .map(ContainerRef::new)
            .collect();
        found.sort();
        Ok(found)
    }
}
