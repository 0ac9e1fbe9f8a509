//! Test runner client and concurrent fan-out over discovered containers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use pushgate_core::{ContainerRef, RawRunOutput, RunContext};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::command;

/// Extension of result documents requested from the runner.
pub const RESULT_EXTENSION: &str = "json";

/// Executes the tests of one container.
#[async_trait]
pub trait TestRunner: Send + Sync {
    /// Run `container`, asking the runner to write its result document to
    /// `results_file`. Never fails: a runner that cannot be launched yields
    /// output without a results marker.
    async fn run(&self, container: &Path, results_file: &Path) -> RawRunOutput;
}

/// [`TestRunner`] that launches the configured test-runner program.
#[derive(Debug, Clone)]
pub struct CommandTestRunner {
    program: String,
    args: Vec<String>,
    timeout_secs: u64,
}

impl CommandTestRunner {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            program: program.into(),
            args,
            timeout_secs,
        }
    }

    pub fn args_for(&self, container: &Path, results_file: &Path) -> Vec<String> {
        command::expand_args(
            &self.args,
            &[("container", container), ("results", results_file)],
        )
    }
}

#[async_trait]
impl TestRunner for CommandTestRunner {
    async fn run(&self, container: &Path, results_file: &Path) -> RawRunOutput {
        let args = self.args_for(container, results_file);
        debug!(
            container = %container.display(),
            program = %self.program,
            ?args,
            "launching test runner"
        );

        match command::execute(&self.program, &args, container.parent(), self.timeout_secs).await {
            Ok(output) => {
                if !output.success {
                    // Failing tests exit non-zero too; the result document decides.
                    debug!(
                        container = %container.display(),
                        exit_code = output.exit_code,
                        "test runner exited non-zero"
                    );
                }
                RawRunOutput::new(container, output.combined())
            }
            Err(e) => {
                error!(container = %container.display(), error = %e, "test runner could not run");
                RawRunOutput::new(container, format!("test runner error: {e}"))
            }
        }
    }
}

/// Run every container concurrently, at most `max_concurrency` at a time
/// (0 means unbounded). Outputs come back in container order.
///
/// Each invocation gets its own result file from the run's `RunResults`
/// directory.
pub async fn run_containers(
    runner: Arc<dyn TestRunner>,
    ctx: &RunContext,
    containers: &[ContainerRef],
    max_concurrency: usize,
) -> Vec<RawRunOutput> {
    if containers.is_empty() {
        return Vec::new();
    }

    let permits = if max_concurrency == 0 {
        containers.len()
    } else {
        max_concurrency
    };
    let sem = Arc::new(Semaphore::new(permits));
    info!(
        containers = containers.len(),
        max_concurrency = permits,
        "running test containers"
    );

    let mut join_set = JoinSet::new();
    for (idx, container) in containers.iter().enumerate() {
        let container = container.path.clone();
        let results_file = match ctx.fresh_result_file(RESULT_EXTENSION) {
            Ok(path) => path,
            Err(e) => {
                // The runner still runs; its output will point at a file that
                // cannot exist, which the parser reports.
                warn!(error = %e, "unable to allocate results directory");
                ctx.temp_root().join(format!("unallocated-{idx}.{RESULT_EXTENSION}"))
            }
        };
        let runner = Arc::clone(&runner);
        let sem = Arc::clone(&sem);

        join_set.spawn(async move {
            let _permit = sem.acquire_owned().await.ok();
            let output = runner.run(&container, &results_file).await;
            (idx, output)
        });
    }

    let mut ordered: Vec<Option<RawRunOutput>> = vec![None; containers.len()];
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((idx, output)) => ordered[idx] = Some(output),
            Err(e) => error!(error = %e, "test runner task join error"),
        }
    }

    containers
        .iter()
        .zip(ordered)
        .map(|(container, slot)| {
            slot.unwrap_or_else(|| {
                RawRunOutput::new(container.path.clone(), "test runner task did not complete")
            })
        })
        .collect()
}

/// Containers as plain paths, in order.
pub fn container_paths(containers: &[ContainerRef]) -> Vec<PathBuf> {
    containers.iter().map(|c| c.path.clone()).collect()
}
