//! Test-runner result parsing and aggregation.
//!
//! A runner prints `Results file: <path>` on its console output and writes a
//! JSON result document to that path:
//!
//! ```json
//! { "results": [ { "test_name": "MathTests.Adds", "outcome": "Passed" } ] }
//! ```

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ResultPolicy;

/// Marker preceding the result-document path in runner output.
pub const RESULTS_MARKER: &str = "Results file:";

/// Outcome of one test.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TestOutcome {
    Passed,
    Failed,
    Error,
    Timeout,
    Aborted,
    Inconclusive,
    NotExecuted,
    #[serde(other)]
    Other,
}

impl TestOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TestOutcome::Failed | TestOutcome::Error | TestOutcome::Timeout | TestOutcome::Aborted
        )
    }
}

/// One entry of a result document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestEntry {
    pub test_name: String,
    pub outcome: TestOutcome,
}

/// Parsed result document of one runner invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StructuredRunResult {
    #[serde(rename = "results")]
    pub entries: Vec<TestEntry>,
}

/// Console capture of one runner invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawRunOutput {
    pub container: PathBuf,
    pub text: String,
}

impl RawRunOutput {
    pub fn new(container: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            text: text.into(),
        }
    }
}

/// Extracts [`StructuredRunResult`]s from raw runner output.
#[derive(Debug, Clone)]
pub struct ResultParser {
    marker: Regex,
}

impl Default for ResultParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultParser {
    pub fn new() -> Self {
        let pattern = format!(r"{}[ \t]*([^\r\n]*)", regex::escape(RESULTS_MARKER));
        Self {
            marker: Regex::new(&pattern).expect("results marker pattern is valid"),
        }
    }

    /// Path following the first `Results file:` marker, if any.
    pub fn result_path(&self, text: &str) -> Option<PathBuf> {
        let caps = self.marker.captures(text)?;
        let path = caps.get(1)?.as_str().trim().trim_matches('"');
        if path.is_empty() {
            return None;
        }
        Some(PathBuf::from(path))
    }

    /// Parse one runner output. Every failure is logged and yields `None`.
    pub fn parse(&self, raw: &RawRunOutput) -> Option<StructuredRunResult> {
        let Some(path) = self.result_path(&raw.text) else {
            warn!(
                container = %raw.container.display(),
                "runner output has no results marker; the container probably failed to run"
            );
            return None;
        };

        match read_document(&path) {
            Ok(result) => Some(result),
            Err(reason) => {
                warn!(
                    container = %raw.container.display(),
                    results = %path.display(),
                    reason = %reason,
                    "unable to read result document"
                );
                None
            }
        }
    }
}

fn read_document(path: &Path) -> Result<StructuredRunResult, String> {
    let raw = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_json::from_str(&raw).map_err(|e| e.to_string())
}

/// Merged outcome across the containers of one work item.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AggregateResult {
    pub passed: usize,
    pub failed: usize,
    pub failing_names: Vec<String>,
    /// Runner outputs that produced no readable result document.
    pub unparsed: usize,
}

impl AggregateResult {
    /// Whether the item passes under `policy`.
    pub fn is_success(&self, policy: ResultPolicy) -> bool {
        match policy {
            ResultPolicy::Strict => self.failed == 0 && self.unparsed == 0,
            ResultPolicy::Lenient => self.failed == 0,
        }
    }
}

/// Merge parsed results into pass/fail totals.
pub struct ResultAggregator;

impl ResultAggregator {
    /// Absent results count as `unparsed` and contribute no entries.
    pub fn aggregate<I>(results: I) -> AggregateResult
    where
        I: IntoIterator<Item = Option<StructuredRunResult>>,
    {
        let mut aggregate = AggregateResult::default();
        for result in results {
            let Some(result) = result else {
                aggregate.unparsed += 1;
                continue;
            };
            for entry in result.entries {
                if entry.outcome == TestOutcome::Passed {
                    aggregate.passed += 1;
                } else if entry.outcome.is_failure() {
                    aggregate.failed += 1;
                    aggregate.failing_names.push(entry.test_name);
                }
            }
        }
        aggregate
    }
}
