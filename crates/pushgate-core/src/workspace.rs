//! Per-run scratch directories.
//!
//! A [`RunContext`] is created once at pipeline start and passed to every
//! component that needs a scratch directory. Directories are named after the
//! run id and their [`ScopedKind`]; asking twice for the same kind returns the
//! same path. Dropping the context releases whatever is still allocated, so
//! early returns and panics clean up as well.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Kind of scratch directory.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScopedKind {
    /// Compiled output of the current work item.
    BuildOutput,
    /// Result documents written by test-runner invocations.
    RunResults,
    /// Build logs.
    Logs,
}

impl ScopedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopedKind::BuildOutput => "build-output",
            ScopedKind::RunResults => "run-results",
            ScopedKind::Logs => "logs",
        }
    }
}

impl fmt::Display for ScopedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a best-effort [`RunContext::release`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseReport {
    pub files_removed: usize,
    pub dirs_removed: usize,
    /// Entries that could not be deleted.
    pub residual: Vec<PathBuf>,
}

impl ReleaseReport {
    /// Whether the directory is completely gone.
    pub fn is_clean(&self) -> bool {
        self.residual.is_empty()
    }
}

/// Run-scoped resource manager.
#[derive(Debug)]
pub struct RunContext {
    run_id: Uuid,
    temp_root: PathBuf,
    keep: Vec<ScopedKind>,
    paths: Mutex<BTreeMap<ScopedKind, PathBuf>>,
}

impl RunContext {
    /// New run rooted at the system temp directory.
    pub fn new() -> Self {
        Self::with_root(std::env::temp_dir())
    }

    /// New run rooted at `temp_root`.
    pub fn with_root(temp_root: impl Into<PathBuf>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            temp_root: temp_root.into(),
            keep: Vec::new(),
            paths: Mutex::new(BTreeMap::new()),
        }
    }

    /// Exclude `kind` from [`teardown`](Self::teardown).
    pub fn keep_on_teardown(mut self, kind: ScopedKind) -> Self {
        self.keep.push(kind);
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }

    /// Directory for `kind`, created on demand.
    ///
    /// The first call fixes the path; later calls in the same run return the
    /// identical path, recreating the directory if it was released meanwhile.
    pub fn scoped_path(&self, kind: ScopedKind) -> io::Result<PathBuf> {
        let mut paths = self.lock();
        let path = paths
            .entry(kind)
            .or_insert_with(|| {
                self.temp_root
                    .join(format!("pushgate-{}-{}", self.run_id.simple(), kind))
            })
            .clone();
        drop(paths);

        fs::create_dir_all(&path)?;
        debug!(kind = %kind, path = %path.display(), "scoped directory ready");
        Ok(path)
    }

    /// Path previously allocated for `kind`, without creating anything.
    pub fn allocated(&self, kind: ScopedKind) -> Option<PathBuf> {
        self.lock().get(&kind).cloned()
    }

    /// A fresh, collision-free file path inside the `RunResults` directory.
    pub fn fresh_result_file(&self, extension: &str) -> io::Result<PathBuf> {
        let dir = self.scoped_path(ScopedKind::RunResults)?;
        Ok(dir.join(format!("{}.{extension}", Uuid::new_v4().simple())))
    }

    /// Release the directory of `kind`, if allocated. The memoized path is
    /// kept so a later [`scoped_path`](Self::scoped_path) reuses it.
    pub fn release_kind(&self, kind: ScopedKind) -> ReleaseReport {
        match self.allocated(kind) {
            Some(path) => release(&path),
            None => ReleaseReport::default(),
        }
    }

    /// Release every allocated directory not marked as kept.
    pub fn teardown(&self) -> Vec<(ScopedKind, ReleaseReport)> {
        let allocated: Vec<(ScopedKind, PathBuf)> = self
            .lock()
            .iter()
            .map(|(k, p)| (*k, p.clone()))
            .collect();

        let mut reports = Vec::new();
        for (kind, path) in allocated {
            if self.keep.contains(&kind) {
                info!(kind = %kind, path = %path.display(), "keeping scoped directory");
                continue;
            }
            reports.push((kind, release(&path)));
        }
        reports
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<ScopedKind, PathBuf>> {
        // A poisoned map is still a valid map; cleanup must proceed regardless.
        self.paths.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RunContext {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Best-effort recursive delete: files first, then subdirectories, then the
/// directory itself. Failures are logged and reported as residual entries.
pub fn release(path: &Path) -> ReleaseReport {
    let mut report = ReleaseReport::default();
    if !path.exists() {
        return report;
    }
    debug!(path = %path.display(), "releasing scoped directory");
    release_into(path, &mut report);
    if report.is_clean() {
        debug!(path = %path.display(), "scoped directory released");
    } else {
        warn!(
            path = %path.display(),
            residual = report.residual.len(),
            "scoped directory only partially released"
        );
    }
    report
}

fn release_into(dir: &Path, report: &mut ReleaseReport) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "unable to list directory");
            report.residual.push(dir.to_path_buf());
            return;
        }
    };

    let mut subdirs = Vec::new();
    for entry in entries.flatten() {
        let entry_path = entry.path();
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir {
            subdirs.push(entry_path);
            continue;
        }
        match fs::remove_file(&entry_path) {
            Ok(()) => report.files_removed += 1,
            Err(e) => {
                warn!(path = %entry_path.display(), error = %e, "unable to delete file");
                report.residual.push(entry_path);
            }
        }
    }

    for sub in subdirs {
        release_into(&sub, report);
    }

    if !report.residual.iter().any(|r| r.starts_with(dir)) {
        match fs::remove_dir(dir) {
            Ok(()) => report.dirs_removed += 1,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "unable to delete directory");
                report.residual.push(dir.to_path_buf());
            }
        }
    }
}
