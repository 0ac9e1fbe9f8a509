//! Test-container discovery.
//!
//! Finds which binaries in a freshly built output directory hold tests,
//! without locking them and without letting a broken binary crash the gate.
//!
//! # Modules
//!
//! - [`metadata`] : format sniffing, registration block, `classify()`
//! - [`scan`]     : in-worker directory scan with shadow copies
//! - [`isolated`] : `TestDiscoverer` trait and the process-boundary discoverer

pub mod isolated;
pub mod metadata;
pub mod scan;

pub use isolated::{ContainerRef, IsolatedTestDiscoverer, TestDiscoverer, WorkerCommand};
pub use metadata::{
    classify, BinaryFormat, BinaryMetadata, ContainerVerdict, DeclaredType, OPT_OUT_KEY,
    TEST_CLASS_MARKER,
};
pub use scan::{candidate_binaries, run_worker, scan_directory, DiscoveryReport, SkippedBinary};
