//! pushgate CI - build and test execution for the pre-push gate
//!
//! Provides the gate pipeline that:
//! - Resolves the work items selected by the configuration
//! - Builds each item with the configured build tool
//! - Discovers test containers in the build output and runs them concurrently
//! - Aggregates results into a pass/fail verdict for the push

pub mod build;
pub mod command;
pub mod fakes;
pub mod pipeline;
pub mod resolver;
pub mod runner;

// Re-export key types
pub use build::{BuildTool, CommandBuildTool};
pub use command::{CommandError, CommandOutput};
pub use pipeline::{
    Collaborators, GateOutcome, GateReport, GateState, ItemReport, PipelineOrchestrator,
};
pub use resolver::{WorkItem, WorkItemResolver};
pub use runner::{run_containers, CommandTestRunner, TestRunner};
