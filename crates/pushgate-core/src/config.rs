//! Gate configuration loaded from `pushgate.toml` at the repository root.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{GateError, Result};

/// Name of the configuration file looked up in the repository root.
pub const CONFIG_FILE_NAME: &str = "pushgate.toml";

/// How the set of work items is chosen.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Every build-definition file under the repository root.
    #[default]
    All,
    /// The build unit owning the most recently changed file.
    ByChange,
    /// The configured `items` list.
    Explicit,
}

/// What to do when `on_develop_only` is set and the current branch differs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OffBranchPolicy {
    /// Fail the gate.
    #[default]
    Reject,
    /// Let the push through without building anything.
    Skip,
}

/// How runner outputs without a readable result document are judged.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResultPolicy {
    /// An unparseable runner result fails the item.
    #[default]
    Strict,
    /// Unparseable results are dropped; only failing tests fail the item.
    Lenient,
}

/// One explicitly configured build unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemConfig {
    /// Path of the build-definition file, relative to the repository root.
    pub path: PathBuf,

    /// Whether to build the item. A non-built item is skipped entirely.
    #[serde(default = "default_true")]
    pub build: bool,

    /// Whether to run the item's tests after a successful build.
    #[serde(default = "default_true")]
    pub test: bool,
}

/// External build tool invocation.
///
/// `args` may contain the placeholders `{item}`, `{output}` and `{logs}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuildSettings {
    pub program: String,
    pub args: Vec<String>,
    /// 0 disables the timeout.
    pub timeout_secs: u64,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            program: "dotnet".to_string(),
            args: vec![
                "build".to_string(),
                "{item}".to_string(),
                "--output".to_string(),
                "{output}".to_string(),
            ],
            timeout_secs: 0,
        }
    }
}

/// Test-runner fan-out controls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct RunnerSettings {
    /// Maximum concurrent runner processes (0 = one per container).
    pub max_concurrency: usize,
    /// Per-container timeout (0 = none).
    pub timeout_secs: u64,
}

/// Discovery boundary controls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DiscoverySettings {
    /// Candidate extensions without the dot; `""` matches extensionless files.
    pub extensions: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            extensions: ["dll", "exe", "so", "dylib", "wasm", ""]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            timeout_secs: 120,
        }
    }
}

/// Full gate configuration. Read-only for the duration of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateConfiguration {
    /// Test-runner executable.
    pub test_runner: String,

    /// Runner arguments; `{container}` and `{results}` are substituted.
    #[serde(default = "default_runner_args")]
    pub runner_args: Vec<String>,

    #[serde(default)]
    pub on_develop_only: bool,

    #[serde(default = "default_gated_branch")]
    pub gated_branch: String,

    #[serde(default)]
    pub off_branch: OffBranchPolicy,

    #[serde(default)]
    pub selection: SelectionStrategy,

    #[serde(default)]
    pub items: Vec<ItemConfig>,

    /// Build-definition file patterns: `*.ext` or an exact file name.
    #[serde(default = "default_build_files")]
    pub build_files: Vec<String>,

    /// Directory names never descended into by the `all` strategy.
    #[serde(default = "default_ignore_dirs")]
    pub ignore_dirs: Vec<String>,

    #[serde(default)]
    pub build: BuildSettings,

    #[serde(default)]
    pub runner: RunnerSettings,

    #[serde(default)]
    pub discovery: DiscoverySettings,

    #[serde(default)]
    pub result_policy: ResultPolicy,

    /// Root for scoped run directories (system temp dir when unset).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_root: Option<PathBuf>,

    /// Keep the logs directory after the run.
    #[serde(default)]
    pub keep_logs: bool,

    /// Directory for durable trace logs, relative to the repository root.
    /// Unset keeps the logs out of the work tree; see
    /// [`GateConfiguration::trace_dir_in`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_dir: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_runner_args() -> Vec<String> {
    vec![
        "{container}".to_string(),
        "--results".to_string(),
        "{results}".to_string(),
    ]
}

fn default_gated_branch() -> String {
    "develop".to_string()
}

fn default_build_files() -> Vec<String> {
    vec!["*.sln".to_string()]
}

fn default_ignore_dirs() -> Vec<String> {
    [".git", "target", "node_modules", "bin", "obj"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Trace log directory under the git directory when `trace_dir` is unset.
const GIT_DIR_TRACE_SUBDIR: &str = "pushgate/logs";

/// Fallback trace log directory, relative to the root, outside a git repository.
const FALLBACK_TRACE_DIR: &str = ".pushgate/logs";

impl GateConfiguration {
    /// Minimal configuration with every optional field at its default.
    pub fn new(test_runner: impl Into<String>) -> Self {
        Self {
            test_runner: test_runner.into(),
            runner_args: default_runner_args(),
            on_develop_only: false,
            gated_branch: default_gated_branch(),
            off_branch: OffBranchPolicy::default(),
            selection: SelectionStrategy::default(),
            items: Vec::new(),
            build_files: default_build_files(),
            ignore_dirs: default_ignore_dirs(),
            build: BuildSettings::default(),
            runner: RunnerSettings::default(),
            discovery: DiscoverySettings::default(),
            result_policy: ResultPolicy::default(),
            temp_root: None,
            keep_logs: false,
            trace_dir: None,
        }
    }

    /// Path of the configuration file for `repo_root`.
    pub fn path_in(repo_root: &Path) -> PathBuf {
        repo_root.join(CONFIG_FILE_NAME)
    }

    /// Load and validate `pushgate.toml` from the repository root.
    pub fn load(repo_root: &Path) -> Result<Self> {
        let path = Self::path_in(repo_root);
        if !path.is_file() {
            return Err(GateError::ConfigurationMissing(path));
        }
        let raw = std::fs::read_to_string(&path)?;
        let config = Self::from_toml(&raw)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| GateError::ConfigurationInvalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot drive a run.
    pub fn validate(&self) -> Result<()> {
        if self.test_runner.trim().is_empty() {
            return Err(GateError::ConfigurationInvalid(
                "test_runner must not be empty".to_string(),
            ));
        }
        if self.build.program.trim().is_empty() {
            return Err(GateError::ConfigurationInvalid(
                "build.program must not be empty".to_string(),
            ));
        }
        if self.build_files.is_empty() {
            return Err(GateError::ConfigurationInvalid(
                "build_files must list at least one pattern".to_string(),
            ));
        }
        if self.selection == SelectionStrategy::Explicit && self.items.is_empty() {
            return Err(GateError::ConfigurationInvalid(
                "selection = \"explicit\" requires at least one [[items]] entry".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether `file_name` matches one of the build-definition patterns.
    pub fn is_build_file(&self, file_name: &str) -> bool {
        self.build_files.iter().any(|pattern| match pattern.strip_prefix("*.") {
            Some(ext) => Path::new(file_name)
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case(ext)),
            None => file_name == pattern,
        })
    }

    /// Directory the trace log goes to for a repository rooted at
    /// `repo_root` whose git directory is `git_dir`.
    pub fn trace_dir_in(&self, repo_root: &Path, git_dir: Option<&Path>) -> PathBuf {
        match (&self.trace_dir, git_dir) {
            (Some(dir), _) => repo_root.join(dir),
            (None, Some(git_dir)) => git_dir.join(GIT_DIR_TRACE_SUBDIR),
            (None, None) => repo_root.join(FALLBACK_TRACE_DIR),
        }
    }

    /// Render a starter configuration file.
    pub fn default_toml(test_runner: &str) -> Result<String> {
        toml::to_string_pretty(&Self::new(test_runner))
            .map_err(|e| GateError::ConfigurationInvalid(e.to_string()))
    }
}
