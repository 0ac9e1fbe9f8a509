//! pushgate Core Library
//!
//! Domain building blocks of the pre-push gate: configuration, error
//! taxonomy, version-control queries, run-scoped scratch directories,
//! isolated test-container discovery and result aggregation.

pub mod config;
pub mod discovery;
pub mod error;
pub mod fakes;
pub mod git;
pub mod results;
pub mod telemetry;
pub mod workspace;

pub use config::{
    BuildSettings, DiscoverySettings, GateConfiguration, ItemConfig, OffBranchPolicy,
    ResultPolicy, RunnerSettings, SelectionStrategy, CONFIG_FILE_NAME,
};
pub use discovery::{
    ContainerRef, DiscoveryReport, IsolatedTestDiscoverer, TestDiscoverer, WorkerCommand,
};
pub use error::{DiscoveryError, GateError, Result};
pub use git::{GitCli, VersionControlClient};
pub use results::{
    AggregateResult, RawRunOutput, ResultAggregator, ResultParser, StructuredRunResult,
    TestEntry, TestOutcome, RESULTS_MARKER,
};
pub use telemetry::{init_tracing, init_worker_tracing, open_trace_log};
pub use workspace::{release, ReleaseReport, RunContext, ScopedKind};

/// pushgate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
