//! Git integration: the repository queries the gate needs.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::error::{GateError, Result};

/// Version-control queries consumed by branch validation and work-item
/// resolution.
pub trait VersionControlClient: Send + Sync {
    /// Current branch name, or `None` when it cannot be determined.
    fn current_branch(&self, repo: &Path) -> Option<String>;

    /// Path (relative to the repository root) of the most recently changed
    /// file among unpushed commits, or `None` when nothing is pending.
    fn last_changed_file(&self, repo: &Path) -> Option<PathBuf>;
}

/// [`VersionControlClient`] backed by the `git` command line.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            program: PathBuf::from("git"),
        }
    }
}

impl GitCli {
    /// Use a specific git executable.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, repo: &Path, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.program)
            .args(args)
            .current_dir(repo)
            .output()
            .map_err(|e| GateError::Git(format!("failed to run git: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GateError::Git(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Repository top-level directory for `dir`.
    pub fn toplevel(&self, dir: &Path) -> Result<PathBuf> {
        let out = self.run(dir, &["rev-parse", "--show-toplevel"])?;
        let top = out.trim();
        if top.is_empty() {
            return Err(GateError::Git(
                "git rev-parse --show-toplevel returned empty output".to_string(),
            ));
        }
        Ok(PathBuf::from(top))
    }

    /// Absolute path of the git directory for `dir`.
    pub fn git_dir(&self, dir: &Path) -> Result<PathBuf> {
        let out = self.run(dir, &["rev-parse", "--absolute-git-dir"])?;
        match first_non_empty_line(&out) {
            Some(git_dir) => Ok(PathBuf::from(git_dir)),
            None => Err(GateError::Git(
                "git rev-parse --absolute-git-dir returned empty output".to_string(),
            )),
        }
    }

    /// First line of `git cherry -v`: an unpushed commit, if any.
    ///
    /// Fails when the branch has no upstream.
    pub fn pending_change(&self, repo: &Path) -> Result<Option<String>> {
        let out = self.run(repo, &["cherry", "-v"])?;
        Ok(first_non_empty_line(&out).map(str::to_string))
    }
}

impl VersionControlClient for GitCli {
    fn current_branch(&self, repo: &Path) -> Option<String> {
        match self.run(repo, &["rev-parse", "--abbrev-ref", "HEAD"]) {
            Ok(out) => first_non_empty_line(&out).map(str::to_string),
            Err(e) => {
                debug!(error = %e, "could not determine current branch");
                None
            }
        }
    }

    fn last_changed_file(&self, repo: &Path) -> Option<PathBuf> {
        let pending = match self.pending_change(repo) {
            Ok(pending) => pending,
            Err(e) => {
                debug!(error = %e, "could not list unpushed commits");
                None
            }
        };
        let pending = pending?;
        debug!(change = %pending, "found unpushed change");

        // NUL-separated names are never C-quoted by git.
        match self.run(repo, &["show", "-z", "--name-only", "--format=", "HEAD"]) {
            Ok(out) => first_nul_field(&out).map(PathBuf::from),
            Err(e) => {
                debug!(error = %e, "could not list files of HEAD");
                None
            }
        }
    }
}

fn first_non_empty_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).find(|l| !l.is_empty())
}

fn first_nul_field(text: &str) -> Option<&str> {
    text.split('\0')
        .map(|f| f.trim_matches('\n'))
        .find(|f| !f.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn run_git(repo_dir: &Path, args: &[&str]) {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn make_git_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init", "-b", "develop"]);
        run_git(dir.path(), &["config", "user.name", "test-user"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        run_git(dir.path(), &["commit", "--allow-empty", "-m", "initial"]);
        dir
    }

    #[test]
    fn current_branch_reports_checked_out_branch() {
        let repo = make_git_repo();
        let branch = GitCli::default().current_branch(repo.path());
        assert_eq!(branch.as_deref(), Some("develop"));
    }

    #[test]
    fn current_branch_none_outside_repo() {
        let dir = tempfile::tempdir().unwrap();
        assert!(GitCli::default().current_branch(dir.path()).is_none());
    }

    #[test]
    fn last_changed_file_with_unpushed_commit() {
        // A bare "remote" that has only the initial commit.
        let remote = tempfile::tempdir().unwrap();
        run_git(remote.path(), &["init", "--bare"]);

        let repo = make_git_repo();
        let remote_url = remote.path().to_string_lossy().to_string();
        run_git(repo.path(), &["remote", "add", "origin", &remote_url]);
        run_git(repo.path(), &["push", "-u", "origin", "develop"]);

        std::fs::create_dir_all(repo.path().join("A/src")).unwrap();
        std::fs::write(repo.path().join("A/src/Foo.cs"), "class Foo {}").unwrap();
        run_git(repo.path(), &["add", "."]);
        run_git(repo.path(), &["commit", "-m", "add foo"]);

        let changed = GitCli::default().last_changed_file(repo.path());
        assert_eq!(changed, Some(PathBuf::from("A/src/Foo.cs")));
    }

    #[test]
    fn last_changed_file_reports_non_ascii_path_verbatim() {
        let remote = tempfile::tempdir().unwrap();
        run_git(remote.path(), &["init", "--bare"]);

        let repo = make_git_repo();
        let remote_url = remote.path().to_string_lossy().to_string();
        run_git(repo.path(), &["remote", "add", "origin", &remote_url]);
        run_git(repo.path(), &["push", "-u", "origin", "develop"]);

        std::fs::create_dir_all(repo.path().join("A/src")).unwrap();
        std::fs::write(repo.path().join("A/src/Föo.cs"), "class Föo {}").unwrap();
        run_git(repo.path(), &["add", "."]);
        run_git(repo.path(), &["commit", "-m", "add föo"]);

        let changed = GitCli::default().last_changed_file(repo.path());
        assert_eq!(changed, Some(PathBuf::from("A/src/Föo.cs")));
    }

    #[test]
    fn current_branch_none_when_git_is_missing() {
        let repo = make_git_repo();
        let git = GitCli::with_program("/definitely/not/git");
        assert!(git.current_branch(repo.path()).is_none());
        assert!(git.last_changed_file(repo.path()).is_none());
    }

    #[test]
    fn last_changed_file_none_without_upstream() {
        let repo = make_git_repo();
        assert!(GitCli::default().last_changed_file(repo.path()).is_none());
    }

    #[test]
    fn toplevel_resolves_repo_root() {
        let repo = make_git_repo();
        std::fs::create_dir_all(repo.path().join("nested")).unwrap();
        let top = GitCli::default().toplevel(&repo.path().join("nested")).unwrap();
        assert_eq!(
            top.canonicalize().unwrap(),
            repo.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn git_dir_resolves_dot_git() {
        let repo = make_git_repo();
        let git_dir = GitCli::default().git_dir(repo.path()).unwrap();
        assert_eq!(
            git_dir.canonicalize().unwrap(),
            repo.path().join(".git").canonicalize().unwrap()
        );
        let outside = tempfile::tempdir().unwrap();
        assert!(GitCli::default().git_dir(outside.path()).is_err());
    }

    #[test]
    fn first_non_empty_line_skips_blanks() {
        assert_eq!(first_non_empty_line("\n\n  a.txt\nb.txt"), Some("a.txt"));
        assert_eq!(first_non_empty_line("  \n"), None);
    }

    #[test]
    fn first_nul_field_keeps_names_unquoted() {
        assert_eq!(first_nul_field("\nA/Föo.cs\0B.cs\0"), Some("A/Föo.cs"));
        assert_eq!(first_nul_field("\n"), None);
    }
}
