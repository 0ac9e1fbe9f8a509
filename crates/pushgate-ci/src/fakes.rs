//! In-memory fakes for the build and test-runner seams (testing only)
//!
//! `FakeBuildTool` writes configured files into the build output instead of
//! compiling; `ScriptedRunner` writes canned result documents instead of
//! running tests.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use pushgate_core::{RawRunOutput, RESULTS_MARKER};
use serde_json::json;

use crate::build::BuildTool;
use crate::runner::TestRunner;

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// FakeBuildTool
// ---------------------------------------------------------------------------

/// Build tool that "compiles" by writing empty files into the output.
#[derive(Debug, Default)]
pub struct FakeBuildTool {
    outputs: Vec<String>,
    failing: HashSet<String>,
    calls: Mutex<Vec<PathBuf>>,
}

impl FakeBuildTool {
    /// Every successful build writes files with these names.
    pub fn producing(outputs: &[&str]) -> Self {
        Self {
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Fail builds of items with this file name.
    pub fn failing_for(mut self, item_file_name: &str) -> Self {
        self.failing.insert(item_file_name.to_string());
        self
    }

    /// Items built so far, in call order.
    pub fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BuildTool for FakeBuildTool {
    async fn build(&self, item: &Path, output_dir: &Path, _logs_dir: &Path) -> bool {
        self.calls.lock().unwrap().push(item.to_path_buf());
        if self.failing.contains(&file_name(item)) {
            return false;
        }
        self.outputs
            .iter()
            .all(|name| std::fs::write(output_dir.join(name), b"").is_ok())
    }
}

// ---------------------------------------------------------------------------
// ScriptedRunner
// ---------------------------------------------------------------------------

/// Test runner with canned behaviour per container file name.
///
/// Containers pass with two tests unless marked failing (one pass, one fail)
/// or crashing (output without results marker).
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    failing: HashSet<String>,
    crashing: HashSet<String>,
    delay_ms: u64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    runs: Mutex<Vec<PathBuf>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, container_file_name: &str) -> Self {
        self.failing.insert(container_file_name.to_string());
        self
    }

    pub fn crashing(mut self, container_file_name: &str) -> Self {
        self.crashing.insert(container_file_name.to_string());
        self
    }

    /// Hold every invocation open this long.
    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn invocations(&self) -> usize {
        self.runs.lock().unwrap().len()
    }

    /// Containers run so far, in start order.
    pub fn runs(&self) -> Vec<PathBuf> {
        self.runs.lock().unwrap().clone()
    }

    /// Highest number of simultaneous invocations observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TestRunner for ScriptedRunner {
    async fn run(&self, container: &Path, results_file: &Path) -> RawRunOutput {
        self.runs.lock().unwrap().push(container.to_path_buf());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }

        let name = file_name(container);
        let output = if self.crashing.contains(&name) {
            RawRunOutput::new(container, "Unhandled exception. Test host process crashed.\n")
        } else {
            let (second, outcome) = if self.failing.contains(&name) {
                ("Fails", "Failed")
            } else {
                ("AlsoPasses", "Passed")
            };
            let results = vec![
                json!({ "test_name": format!("{name}.Passes"), "outcome": "Passed" }),
                json!({ "test_name": format!("{name}.{second}"), "outcome": outcome }),
            ];
            let doc = json!({ "results": results });
            match std::fs::write(results_file, doc.to_string()) {
                Ok(()) => RawRunOutput::new(
                    container,
                    format!(
                        "Starting test execution\n{RESULTS_MARKER} {}\n",
                        results_file.display()
                    ),
                ),
                Err(e) => RawRunOutput::new(container, format!("could not write results: {e}\n")),
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        output
    }
}
