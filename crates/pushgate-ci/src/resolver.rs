//! Work item resolution.
//!
//! Turns the configured [`SelectionStrategy`] into the ordered list of build
//! definitions the gate will build and test.

use std::path::{Path, PathBuf};

use pushgate_core::{GateConfiguration, SelectionStrategy, VersionControlClient};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Upward search limit when locating the build definition that owns a
/// changed file.
pub const MAX_HOPS: usize = 10;

/// One build unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Absolute path of the build definition.
    pub path: PathBuf,
    pub build: bool,
    pub test: bool,
}

impl WorkItem {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            build: true,
            test: true,
        }
    }

    /// Path relative to `repo_root`, or the absolute path when outside it.
    pub fn relative_to<'a>(&'a self, repo_root: &Path) -> &'a Path {
        self.path.strip_prefix(repo_root).unwrap_or(&self.path)
    }
}

/// Resolves work items for one run.
pub struct WorkItemResolver<'a> {
    vcs: &'a dyn VersionControlClient,
}

impl<'a> WorkItemResolver<'a> {
    pub fn new(vcs: &'a dyn VersionControlClient) -> Self {
        Self { vcs }
    }

    pub fn resolve(&self, config: &GateConfiguration, repo_root: &Path) -> Vec<WorkItem> {
        let items = match config.selection {
            SelectionStrategy::All => Self::all(config, repo_root),
            SelectionStrategy::ByChange => self.by_change(config, repo_root),
            SelectionStrategy::Explicit => Self::explicit(config, repo_root),
        };
        info!(
            selection = ?config.selection,
            count = items.len(),
            "resolved work items"
        );
        items
    }

    fn all(config: &GateConfiguration, repo_root: &Path) -> Vec<WorkItem> {
        let walker = WalkDir::new(repo_root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0
                    || !e.file_type().is_dir()
                    || !config
                        .ignore_dirs
                        .iter()
                        .any(|d| e.file_name().to_string_lossy() == d.as_str())
            });

        let mut paths = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if entry.file_type().is_file()
                && config.is_build_file(&entry.file_name().to_string_lossy())
            {
                paths.push(entry.into_path());
            }
        }
        paths.sort();
        paths.into_iter().map(WorkItem::new).collect()
    }

    fn by_change(&self, config: &GateConfiguration, repo_root: &Path) -> Vec<WorkItem> {
        let Some(changed) = self.vcs.last_changed_file(repo_root) else {
            debug!("no pending change");
            return Vec::new();
        };
        let changed = repo_root.join(changed);
        debug!(changed = %changed.display(), "locating owning build definition");

        let mut dir = changed.parent().map(Path::to_path_buf);
        let mut hops = 0;
        while let Some(current) = dir {
            if hops >= MAX_HOPS || current == repo_root || !current.starts_with(repo_root) {
                break;
            }
            if let Some(found) = first_build_file(config, &current) {
                return vec![WorkItem::new(found)];
            }
            dir = current.parent().map(Path::to_path_buf);
            hops += 1;
        }

        info!(changed = %changed.display(), "changed file has no owning build definition");
        Vec::new()
    }

    fn explicit(config: &GateConfiguration, repo_root: &Path) -> Vec<WorkItem> {
        config
            .items
            .iter()
            .filter_map(|item| {
                let path = repo_root.join(&item.path);
                if path.exists() {
                    Some(WorkItem {
                        path,
                        build: item.build,
                        test: item.test,
                    })
                } else {
                    warn!(item = %path.display(), "configured item does not exist; skipping");
                    None
                }
            })
            .collect()
    }
}

fn first_build_file(config: &GateConfiguration, dir: &Path) -> Option<PathBuf> {
    let mut matches: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter(|e| config.is_build_file(&e.file_name().to_string_lossy()))
        .map(|e| e.path())
        .collect();
    matches.sort();
    matches.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pushgate_core::fakes::FakeVcs;
    use pushgate_core::ItemConfig;
    use std::fs;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    fn config(selection: SelectionStrategy) -> GateConfiguration {
        let mut c = GateConfiguration::new("vstest");
        c.selection = selection;
        c
    }

    #[test]
    fn test_all_finds_sorted_build_files() {
        let repo = tempfile::tempdir().unwrap();
        touch(repo.path(), "B/B.sln");
        touch(repo.path(), "A/A.sln");
        touch(repo.path(), "A/src/Foo.cs");
        touch(repo.path(), "node_modules/pkg/X.sln");
        touch(repo.path(), ".git/Y.sln");

        let vcs = FakeVcs::default();
        let items =
            WorkItemResolver::new(&vcs).resolve(&config(SelectionStrategy::All), repo.path());
        let rel: Vec<_> = items
            .iter()
            .map(|i| i.relative_to(repo.path()).to_path_buf())
            .collect();
        assert_eq!(rel, vec![PathBuf::from("A/A.sln"), PathBuf::from("B/B.sln")]);
        assert!(items.iter().all(|i| i.build && i.test && i.path.is_absolute()));
    }

    #[test]
    fn test_all_matches_exact_names_too() {
        let repo = tempfile::tempdir().unwrap();
        touch(repo.path(), "svc/Makefile");
        touch(repo.path(), "lib/L.SLN");
        let mut c = config(SelectionStrategy::All);
        c.build_files = vec!["*.sln".to_string(), "Makefile".to_string()];

        let vcs = FakeVcs::default();
        let items = WorkItemResolver::new(&vcs).resolve(&c, repo.path());
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_by_change_finds_owning_build_file() {
        let repo = tempfile::tempdir().unwrap();
        touch(repo.path(), "A/A.sln");
        touch(repo.path(), "A/src/Foo.cs");

        let vcs = FakeVcs::on_branch("develop").with_last_changed("A/src/Foo.cs");
        let items =
            WorkItemResolver::new(&vcs).resolve(&config(SelectionStrategy::ByChange), repo.path());
        assert_eq!(items, vec![WorkItem::new(repo.path().join("A/A.sln"))]);
    }

    #[test]
    fn test_by_change_without_pending_change_is_empty() {
        let repo = tempfile::tempdir().unwrap();
        touch(repo.path(), "A/A.sln");
        let vcs = FakeVcs::on_branch("develop");
        let items =
            WorkItemResolver::new(&vcs).resolve(&config(SelectionStrategy::ByChange), repo.path());
        assert!(items.is_empty());
    }

    #[test]
    fn test_by_change_at_repo_root_is_empty() {
        let repo = tempfile::tempdir().unwrap();
        touch(repo.path(), "All.sln");
        touch(repo.path(), "docs/readme.md");
        let vcs = FakeVcs::default().with_last_changed("docs/readme.md");
        let items =
            WorkItemResolver::new(&vcs).resolve(&config(SelectionStrategy::ByChange), repo.path());
        assert!(items.is_empty());
    }

    #[test]
    fn test_by_change_gives_up_after_max_hops() {
        let repo = tempfile::tempdir().unwrap();
        let deep: String = (0..MAX_HOPS + 1).map(|i| format!("d{i}/")).collect();
        touch(repo.path(), "d0/Top.sln");
        touch(repo.path(), &format!("{deep}f.cs"));

        let vcs = FakeVcs::default().with_last_changed(format!("{deep}f.cs"));
        let items =
            WorkItemResolver::new(&vcs).resolve(&config(SelectionStrategy::ByChange), repo.path());
        assert!(items.is_empty());
    }

    #[test]
    fn test_explicit_keeps_existing_items() {
        let repo = tempfile::tempdir().unwrap();
        touch(repo.path(), "A/A.sln");
        let mut c = config(SelectionStrategy::Explicit);
        c.items = vec![
            ItemConfig {
                path: PathBuf::from("A/A.sln"),
                build: true,
                test: false,
            },
            ItemConfig {
                path: PathBuf::from("Gone/Gone.sln"),
                build: true,
                test: true,
            },
        ];

        let vcs = FakeVcs::default();
        let items = WorkItemResolver::new(&vcs).resolve(&c, repo.path());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].path, repo.path().join("A/A.sln"));
        assert!(!items[0].test);
    }
}
