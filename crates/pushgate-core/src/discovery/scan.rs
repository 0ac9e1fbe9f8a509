//! The scan that runs inside the discovery worker.
//!
//! Every candidate is shadow-copied into a temp directory and only the copy
//! is read, so the build output is never held open. The shadow directory is
//! removed when the scan returns, whether it succeeded or not. When the
//! parent supplies a shadow root, the directory lives under it so the parent
//! can reclaim it even if the worker is killed mid-scan.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::metadata::{classify, AnalysisError, BinaryMetadata, ContainerVerdict};
use crate::error::DiscoveryError;

/// A binary that could not be analysed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkippedBinary {
    pub path: PathBuf,
    pub reason: String,
}

/// Result of scanning one build-output directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveryReport {
    /// Qualifying test containers, sorted by path.
    pub containers: Vec<PathBuf>,
    /// Binaries excluded by the opt-out marker.
    #[serde(default)]
    pub opted_out: Vec<PathBuf>,
    /// Binaries whose metadata failed to load.
    #[serde(default)]
    pub skipped: Vec<SkippedBinary>,
}

/// Files directly under `dir` whose extension is listed in `extensions`.
///
/// An empty entry in `extensions` selects files without an extension.
pub fn candidate_binaries(dir: &Path, extensions: &[String]) -> io::Result<Vec<PathBuf>> {
    let mut candidates = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(&ext)) {
            candidates.push(path);
        }
    }
    candidates.sort();
    Ok(candidates)
}

/// Scan `dir` for test containers.
///
/// The shadow directory is created under `shadow_root`, or under the system
/// temp directory when `None`. Only failures to list `dir` or to create the
/// shadow directory are errors; anything wrong with an individual binary
/// lands in [`DiscoveryReport::skipped`].
pub fn scan_directory(
    dir: &Path,
    extensions: &[String],
    shadow_root: Option<&Path>,
) -> Result<DiscoveryReport, DiscoveryError> {
    if !dir.is_dir() {
        return Err(DiscoveryError::MissingDirectory(dir.to_path_buf()));
    }

    let mut builder = tempfile::Builder::new();
    builder.prefix("pushgate-shadow-");
    let shadow = match shadow_root {
        Some(root) => builder.tempdir_in(root)?,
        None => builder.tempdir()?,
    };
    let candidates = candidate_binaries(dir, extensions)?;
    debug!(
        count = candidates.len(),
        dir = %dir.display(),
        shadow = %shadow.path().display(),
        "scanning candidate binaries"
    );

    let mut report = DiscoveryReport::default();
    for (idx, path) in candidates.into_iter().enumerate() {
        match analyse(&path, shadow.path(), idx) {
            Ok(ContainerVerdict::Container { test_types }) => {
                for ty in &test_types {
                    debug!(binary = %path.display(), class = %ty, "found test class");
                }
                report.containers.push(path);
            }
            Ok(ContainerVerdict::OptedOut) => {
                info!(binary = %path.display(), "binary opted out of pre-push tests");
                report.opted_out.push(path);
            }
            Ok(ContainerVerdict::NoTests) => {
                debug!(binary = %path.display(), "no test classes");
            }
            Err(e) => {
                warn!(binary = %path.display(), error = %e, "failed to analyse binary");
                report.skipped.push(SkippedBinary {
                    path,
                    reason: e.to_string(),
                });
            }
        }
    }

    shadow.close()?;
    Ok(report)
}

fn analyse(path: &Path, shadow_dir: &Path, idx: usize) -> Result<ContainerVerdict, AnalysisError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let copy = shadow_dir.join(format!("{idx}-{file_name}"));
    fs::copy(path, &copy)?;
    let bytes = fs::read(&copy);
    // The copy is scratch; the shadow directory is removed at the end anyway.
    let _ = fs::remove_file(&copy);
    let meta = BinaryMetadata::load(&bytes?)?;
    Ok(classify(&meta))
}

/// Worker entry point: scan `dir` and write the report as JSON to `out`.
pub fn run_worker<W: Write>(
    dir: &Path,
    extensions: &[String],
    shadow_root: Option<&Path>,
    mut out: W,
) -> Result<(), DiscoveryError> {
    let report = scan_directory(dir, extensions, shadow_root)?;
    serde_json::to_writer(&mut out, &report).map_err(DiscoveryError::MalformedReport)?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::metadata::{encode_registration, BinaryFormat, DeclaredType, OPT_OUT_KEY};

    fn exts() -> Vec<String> {
        ["dll", "exe", "so", ""].iter().map(|s| s.to_string()).collect()
    }

    fn test_type() -> DeclaredType {
        DeclaredType {
            name: "Suite.Tests".to_string(),
            markers: vec!["TestClass".to_string()],
        }
    }

    #[test]
    fn test_candidates_filter_by_extension_non_recursive() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.dll"), b"x").unwrap();
        fs::write(dir.path().join("b.pdb"), b"x").unwrap();
        fs::write(dir.path().join("runner"), b"x").unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/c.dll"), b"x").unwrap();

        let found = candidate_binaries(dir.path(), &exts()).unwrap();
        let names: Vec<String> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.dll", "runner"]);
    }

    #[test]
    fn test_scan_survives_corrupt_binary() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("one.dll"),
            encode_registration(BinaryFormat::Pe, &[], &[test_type()]),
        )
        .unwrap();
        fs::write(dir.path().join("corrupt.dll"), b"garbage bytes").unwrap();
        fs::write(
            dir.path().join("two.so"),
            encode_registration(BinaryFormat::Elf, &[], &[test_type()]),
        )
        .unwrap();

        let report = scan_directory(dir.path(), &exts(), None).unwrap();
        assert_eq!(
            report.containers,
            vec![dir.path().join("one.dll"), dir.path().join("two.so")]
        );
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].path, dir.path().join("corrupt.dll"));
    }

    #[test]
    fn test_scan_excludes_opted_out() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("slow.dll"),
            encode_registration(BinaryFormat::Pe, &[(OPT_OUT_KEY, "false")], &[test_type()]),
        )
        .unwrap();

        let report = scan_directory(dir.path(), &exts(), None).unwrap();
        assert!(report.containers.is_empty());
        assert_eq!(report.opted_out, vec![dir.path().join("slow.dll")]);
    }

    #[test]
    fn test_originals_remain_deletable_after_scan() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("t.dll");
        fs::write(&bin, encode_registration(BinaryFormat::Pe, &[], &[test_type()])).unwrap();
        scan_directory(dir.path(), &exts(), None).unwrap();
        fs::remove_file(&bin).unwrap();
    }

    #[test]
    fn test_shadow_copies_live_under_given_root_and_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let shadow_root = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("t.dll"),
            encode_registration(BinaryFormat::Elf, &[], &[test_type()]),
        )
        .unwrap();

        let report = scan_directory(dir.path(), &exts(), Some(shadow_root.path())).unwrap();
        assert_eq!(report.containers, vec![dir.path().join("t.dll")]);
        assert_eq!(fs::read_dir(shadow_root.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_shadow_root_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no-shadow");
        let err = scan_directory(dir.path(), &exts(), Some(&missing)).unwrap_err();
        assert!(matches!(err, DiscoveryError::Io(_)));
    }

    #[test]
    fn test_scan_missing_directory_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = scan_directory(&dir.path().join("nope"), &exts(), None).unwrap_err();
        assert!(matches!(err, DiscoveryError::MissingDirectory(_)));
    }

    #[test]
    fn test_run_worker_writes_json_report() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("t.dll"),
            encode_registration(BinaryFormat::Pe, &[], &[test_type()]),
        )
        .unwrap();

        let mut out = Vec::new();
        run_worker(dir.path(), &exts(), None, &mut out).unwrap();
        let report: DiscoveryReport = serde_json::from_slice(&out).unwrap();
        assert_eq!(report.containers, vec![dir.path().join("t.dll")]);
    }
}
