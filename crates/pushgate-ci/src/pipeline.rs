//! Gate pipeline orchestration.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use pushgate_core::{
    AggregateResult, GateConfiguration, GateError, GitCli, IsolatedTestDiscoverer,
    OffBranchPolicy, ResultAggregator, ResultParser, RunContext, ScopedKind, TestDiscoverer,
    VersionControlClient, WorkerCommand,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::build::{BuildTool, CommandBuildTool};
use crate::resolver::{WorkItem, WorkItemResolver};
use crate::runner::{self, CommandTestRunner, TestRunner};

/// Pipeline states, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Init,
    ConfigLoaded,
    BranchValidated,
    NoWorkItems,
    Building,
    BuildFailed,
    Discovering,
    Running,
    Aggregating,
    ItemDone,
    ItemFailed,
    Teardown,
    Terminal,
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

fn transition(state: GateState, item: Option<&Path>) {
    match item {
        Some(path) => debug!(state = %state, item = %path.display(), "gate state"),
        None => debug!(state = %state, "gate state"),
    }
}

/// Overall verdict of one gate run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GateOutcome {
    Passed,
    Failed,
    /// No work items resolved; the push is allowed.
    NothingToGate,
    /// Off the gated branch with the `skip` policy.
    BranchSkipped,
    BranchRejected { reason: String },
}

impl GateOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            GateOutcome::Passed | GateOutcome::NothingToGate | GateOutcome::BranchSkipped
        )
    }
}

/// Result of one work item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemReport {
    /// Build definition.
    pub path: PathBuf,

    /// Item configured with `build = false`.
    pub skipped: bool,

    pub build_succeeded: bool,

    /// Test containers found in the build output.
    pub containers: Vec<PathBuf>,

    /// Merged results; absent when tests did not run.
    pub aggregate: Option<AggregateResult>,

    pub success: bool,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Why the item failed before producing results.
    pub error: Option<String>,
}

impl ItemReport {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            skipped: false,
            build_succeeded: false,
            containers: Vec::new(),
            aggregate: None,
            success: false,
            duration_ms: 0,
            error: None,
        }
    }

    fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

/// Result of a complete gate run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateReport {
    pub run_id: String,

    /// Branch checked out when the gate ran.
    pub branch: Option<String>,

    pub outcome: GateOutcome,

    /// Whether the push may proceed.
    pub success: bool,

    pub items: Vec<ItemReport>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,

    /// Build log directory kept after teardown (`keep_logs`).
    pub logs_dir: Option<PathBuf>,
}

impl GateReport {
    /// Number of items that passed.
    pub fn passed_count(&self) -> usize {
        self.items.iter().filter(|i| i.success).count()
    }

    /// Number of items that failed.
    pub fn failed_count(&self) -> usize {
        self.items.iter().filter(|i| !i.success).count()
    }

    /// Pretty-printed JSON for `--report`.
    pub fn to_json(&self) -> pushgate_core::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// External collaborators of the pipeline.
#[derive(Clone)]
pub struct Collaborators {
    pub vcs: Arc<dyn VersionControlClient>,
    pub build_tool: Arc<dyn BuildTool>,
    pub discoverer: Arc<dyn TestDiscoverer>,
    pub runner: Arc<dyn TestRunner>,
}

/// Drives branch validation, work item resolution and the per-item
/// build, discover, run and aggregate sequence.
pub struct PipelineOrchestrator {
    config: GateConfiguration,
    repo_root: PathBuf,
    collaborators: Collaborators,
    parser: ResultParser,
}

impl PipelineOrchestrator {
    /// Load `pushgate.toml` from `repo_root` and wire the command-line
    /// collaborators. `worker` is the discovery worker to spawn.
    pub fn load(repo_root: &Path, worker: WorkerCommand) -> pushgate_core::Result<Self> {
        transition(GateState::Init, None);
        let config = GateConfiguration::load(repo_root)?;
        Ok(Self::from_config(config, repo_root, worker))
    }

    /// Wire the command-line collaborators for an already loaded configuration.
    pub fn from_config(
        config: GateConfiguration,
        repo_root: &Path,
        worker: WorkerCommand,
    ) -> Self {
        let collaborators = Collaborators {
            vcs: Arc::new(GitCli::default()),
            build_tool: Arc::new(CommandBuildTool::new(config.build.clone())),
            discoverer: Arc::new(IsolatedTestDiscoverer::new(worker, config.discovery.clone())),
            runner: Arc::new(CommandTestRunner::new(
                config.test_runner.clone(),
                config.runner_args.clone(),
                config.runner.timeout_secs,
            )),
        };
        Self::with_collaborators(config, repo_root, collaborators)
    }

    pub fn with_collaborators(
        config: GateConfiguration,
        repo_root: &Path,
        collaborators: Collaborators,
    ) -> Self {
        transition(GateState::ConfigLoaded, None);
        Self {
            config,
            repo_root: repo_root.to_path_buf(),
            collaborators,
            parser: ResultParser::new(),
        }
    }

    pub fn config(&self) -> &GateConfiguration {
        &self.config
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Work items this configuration selects right now.
    pub fn resolve(&self) -> Vec<WorkItem> {
        WorkItemResolver::new(self.collaborators.vcs.as_ref())
            .resolve(&self.config, &self.repo_root)
    }

    fn run_context(&self) -> RunContext {
        let ctx = match &self.config.temp_root {
            Some(root) => RunContext::with_root(root),
            None => RunContext::new(),
        };
        if self.config.keep_logs {
            ctx.keep_on_teardown(ScopedKind::Logs)
        } else {
            ctx
        }
    }

    /// `Ok(true)` to proceed, `Ok(false)` to skip the gate.
    fn validate_branch(&self, branch: Option<&str>) -> Result<bool, GateError> {
        let Some(branch) = branch.filter(|b| !b.trim().is_empty()) else {
            return Err(GateError::BranchRejected(
                "unable to determine the current branch; run from inside the repository"
                    .to_string(),
            ));
        };
        if !self.config.on_develop_only || branch.eq_ignore_ascii_case(&self.config.gated_branch) {
            return Ok(true);
        }
        match self.config.off_branch {
            OffBranchPolicy::Skip => Ok(false),
            OffBranchPolicy::Reject => Err(GateError::BranchRejected(format!(
                "current branch '{branch}' is not '{}'",
                self.config.gated_branch
            ))),
        }
    }

    /// Run the gate. All scoped directories are released before returning.
    pub async fn run(&self) -> GateReport {
        let start = Instant::now();
        let ctx = self.run_context();
        let run_id = ctx.run_id().to_string();
        info!(run_id = %run_id, repo = %self.repo_root.display(), "starting gate");

        let branch = self.collaborators.vcs.current_branch(&self.repo_root);
        let mut report = GateReport {
            run_id,
            branch: branch.clone(),
            outcome: GateOutcome::Passed,
            success: true,
            items: Vec::new(),
            duration_ms: 0,
            logs_dir: None,
        };

        match self.validate_branch(branch.as_deref()) {
            Err(e) => {
                error!(error = %e, "branch validation failed");
                report.outcome = GateOutcome::BranchRejected {
                    reason: e.to_string(),
                };
            }
            Ok(false) => {
                info!(
                    branch = ?branch,
                    gated = %self.config.gated_branch,
                    "not on the gated branch; skipping"
                );
                report.outcome = GateOutcome::BranchSkipped;
            }
            Ok(true) => {
                transition(GateState::BranchValidated, None);
                info!(branch = ?branch, "branch validated");
                report.outcome = self.run_items(&ctx, &mut report.items).await;
            }
        }

        transition(GateState::Teardown, None);
        for (kind, released) in ctx.teardown() {
            if !released.is_clean() {
                warn!(
                    kind = %kind,
                    residual = released.residual.len(),
                    "scoped directory not fully released"
                );
            }
        }
        if self.config.keep_logs {
            report.logs_dir = ctx.allocated(ScopedKind::Logs).filter(|p| p.exists());
        }

        report.success = report.outcome.is_success();
        report.duration_ms = start.elapsed().as_millis() as u64;
        transition(GateState::Terminal, None);
        info!(
            success = report.success,
            passed = report.passed_count(),
            failed = report.failed_count(),
            duration_ms = report.duration_ms,
            "gate finished"
        );
        report
    }

    async fn run_items(&self, ctx: &RunContext, reports: &mut Vec<ItemReport>) -> GateOutcome {
        let items = self.resolve();
        if items.is_empty() {
            transition(GateState::NoWorkItems, None);
            info!("no work items; nothing to gate");
            return GateOutcome::NothingToGate;
        }

        for item in &items {
            let start = Instant::now();
            let mut item_report = self.process_item(ctx, item).await;

            ctx.release_kind(ScopedKind::BuildOutput);
            ctx.release_kind(ScopedKind::RunResults);

            item_report.duration_ms = start.elapsed().as_millis() as u64;
            if item_report.success {
                transition(GateState::ItemDone, Some(&item.path));
            } else {
                transition(GateState::ItemFailed, Some(&item.path));
            }
            reports.push(item_report);
        }

        if reports.iter().all(|r| r.success) {
            GateOutcome::Passed
        } else {
            GateOutcome::Failed
        }
    }

    async fn process_item(&self, ctx: &RunContext, item: &WorkItem) -> ItemReport {
        let mut report = ItemReport::new(&item.path);
        if !item.build {
            info!(item = %item.path.display(), "build disabled; skipping item");
            report.skipped = true;
            report.success = true;
            return report;
        }

        transition(GateState::Building, Some(&item.path));
        let dirs = ctx
            .scoped_path(ScopedKind::BuildOutput)
            .and_then(|out| Ok((out, ctx.scoped_path(ScopedKind::Logs)?)));
        let (output_dir, logs_dir) = match dirs {
            Ok(dirs) => dirs,
            Err(e) => return report.failed(GateError::Io(e).to_string()),
        };

        if !self
            .collaborators
            .build_tool
            .build(&item.path, &output_dir, &logs_dir)
            .await
        {
            transition(GateState::BuildFailed, Some(&item.path));
            return report.failed(GateError::Build(item.path.clone()).to_string());
        }
        report.build_succeeded = true;

        if !item.test {
            info!(item = %item.path.display(), "tests disabled; build only");
            report.success = true;
            return report;
        }

        transition(GateState::Discovering, Some(&item.path));
        let containers = match self.collaborators.discoverer.discover(&output_dir).await {
            Ok(containers) => containers,
            Err(e) => {
                let e = GateError::from(e);
                error!(item = %item.path.display(), error = %e, "test discovery failed");
                return report.failed(e.to_string());
            }
        };
        report.containers = runner::container_paths(&containers);
        if containers.is_empty() {
            info!(item = %item.path.display(), "no test containers found");
        }

        transition(GateState::Running, Some(&item.path));
        let outputs = runner::run_containers(
            Arc::clone(&self.collaborators.runner),
            ctx,
            &containers,
            self.config.runner.max_concurrency,
        )
        .await;

        transition(GateState::Aggregating, Some(&item.path));
        let aggregate = ResultAggregator::aggregate(outputs.iter().map(|o| self.parser.parse(o)));
        for name in &aggregate.failing_names {
            error!(item = %item.path.display(), test = %name, "test failed");
        }
        info!(
            item = %item.path.display(),
            passed = aggregate.passed,
            failed = aggregate.failed,
            unparsed = aggregate.unparsed,
            "item results"
        );
        report.success = aggregate.is_success(self.config.result_policy);
        report.aggregate = Some(aggregate);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeBuildTool, ScriptedRunner};
    use pushgate_core::fakes::{FakeVcs, FixedDiscoverer};

    fn orchestrator(config: GateConfiguration, root: &Path, vcs: FakeVcs) -> PipelineOrchestrator {
        PipelineOrchestrator::with_collaborators(
            config,
            root,
            Collaborators {
                vcs: Arc::new(vcs),
                build_tool: Arc::new(FakeBuildTool::producing(&["Tests.dll"])),
                discoverer: Arc::new(FixedDiscoverer::new(&["Tests.dll"])),
                runner: Arc::new(ScriptedRunner::new()),
            },
        )
    }

    fn gated_config(temp: &Path) -> GateConfiguration {
        let mut c = GateConfiguration::new("vstest");
        c.on_develop_only = true;
        c.temp_root = Some(temp.to_path_buf());
        c
    }

    #[test]
    fn test_gate_state_display() {
        assert_eq!(GateState::BranchValidated.to_string(), "BranchValidated");
    }

    #[test]
    fn test_branch_comparison_is_case_insensitive() {
        let tmp = tempfile::tempdir().unwrap();
        let o = orchestrator(gated_config(tmp.path()), tmp.path(), FakeVcs::default());
        assert!(o.validate_branch(Some("Develop")).unwrap());
        assert!(o.validate_branch(Some("feature/x")).is_err());
        assert!(o.validate_branch(None).is_err());
        assert!(o.validate_branch(Some("")).is_err());
    }

    #[test]
    fn test_unrestricted_branch_still_needs_a_branch() {
        let tmp = tempfile::tempdir().unwrap();
        let mut c = gated_config(tmp.path());
        c.on_develop_only = false;
        let o = orchestrator(c, tmp.path(), FakeVcs::default());
        assert!(o.validate_branch(Some("feature/x")).unwrap());
        assert!(o.validate_branch(None).is_err());
    }

    #[tokio::test]
    async fn test_skip_policy_passes_without_building() {
        let tmp = tempfile::tempdir().unwrap();
        let mut c = gated_config(tmp.path());
        c.off_branch = OffBranchPolicy::Skip;
        let o = orchestrator(c, tmp.path(), FakeVcs::on_branch("main"));

        let report = o.run().await;
        assert!(report.success);
        assert_eq!(report.outcome, GateOutcome::BranchSkipped);
        assert!(report.items.is_empty());
    }

    #[tokio::test]
    async fn test_report_json_round_trips_outcome() {
        let tmp = tempfile::tempdir().unwrap();
        let report = orchestrator(
            gated_config(tmp.path()),
            tmp.path(),
            FakeVcs::on_branch("main"),
        )
        .run()
        .await;
        let parsed: GateReport = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert!(!parsed.success);
        assert!(matches!(parsed.outcome, GateOutcome::BranchRejected { .. }));
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(GateOutcome::BranchRejected {
            reason: "no".to_string(),
        })
        .unwrap();
        assert_eq!(json["status"], "branch_rejected");
        assert_eq!(json["reason"], "no");
    }
}
