//! pushgate - pre-push build & test gate
//!
//! Installed as a git `pre-push` hook, `pushgate` rebuilds the affected
//! build units and runs their tests; a non-zero exit blocks the push.
//!
//! ## Commands
//!
//! - `run`: run the gate (default when no command is given)
//! - `init`: write a starter `pushgate.toml`
//! - `resolve`: list the work items the configuration selects
//! - `discover`: list the test containers in a build output directory
//!
//! ## Exit codes
//!
//! `0` gate passed, `1` gate failed, `2` configuration or unexpected error.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, Level};

use pushgate_ci::{GateOutcome, GateReport, PipelineOrchestrator};
use pushgate_core::{
    init_tracing, init_worker_tracing, open_trace_log, DiscoverySettings, GateConfiguration,
    GitCli, IsolatedTestDiscoverer, WorkerCommand, CONFIG_FILE_NAME,
};

const EXIT_FAILED: u8 = 1;
const EXIT_ERROR: u8 = 2;

#[derive(Parser)]
#[command(name = "pushgate")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Pre-push build & test gate", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct RunArgs {
    /// Repository to gate (default: current directory)
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Write the gate report as JSON to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Do not write a trace log file
    #[arg(long)]
    no_trace: bool,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            repo: PathBuf::from("."),
            report: None,
            no_trace: false,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build and test the selected work items
    Run(RunArgs),

    /// Write a starter pushgate.toml
    Init {
        /// Repository root (default: current directory)
        #[arg(long, default_value = ".")]
        repo: PathBuf,

        /// Test runner program to configure
        #[arg(long, default_value = "vstest.console")]
        test_runner: String,

        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// List the work items the configuration selects, without building
    Resolve {
        /// Repository root (default: current directory)
        #[arg(long, default_value = ".")]
        repo: PathBuf,
    },

    /// List the test containers in a build output directory
    Discover {
        /// Build output directory
        dir: PathBuf,

        /// Worker timeout in seconds (0 = none)
        #[arg(long, default_value_t = DiscoverySettings::default().timeout_secs)]
        timeout_secs: u64,
    },

    /// Discovery worker entry point
    #[command(hide = true, name = "discover-worker")]
    DiscoverWorker {
        /// File extension to consider (repeatable; empty = no extension)
        #[arg(long = "ext")]
        extensions: Vec<String>,

        /// Directory to hold shadow copies (default: system temp)
        #[arg(long)]
        shadow_dir: Option<PathBuf>,

        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let result = match cli.command.unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Run(args) => cmd_run(args, cli.json, level).await,
        Commands::Init {
            repo,
            test_runner,
            force,
        } => cmd_init(&repo, &test_runner, force),
        Commands::Resolve { repo } => {
            init_tracing(cli.json, level, None);
            cmd_resolve(&repo)
        }
        Commands::Discover { dir, timeout_secs } => {
            init_tracing(cli.json, level, None);
            cmd_discover(&dir, timeout_secs).await
        }
        Commands::DiscoverWorker {
            extensions,
            shadow_dir,
            dir,
        } => {
            init_worker_tracing(level);
            cmd_discover_worker(&dir, &extensions, shadow_dir.as_deref())
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

/// Resolve the repository root: the git top level when inside a work tree.
fn repo_root(path: &Path) -> Result<PathBuf> {
    let path = path
        .canonicalize()
        .with_context(|| format!("Repository path not found: {}", path.display()))?;
    Ok(GitCli::default().toplevel(&path).unwrap_or(path))
}

/// Run the gate
async fn cmd_run(args: RunArgs, json: bool, level: Level) -> Result<ExitCode> {
    let root = repo_root(&args.repo)?;
    let config = match GateConfiguration::load(&root) {
        Ok(config) => config,
        Err(e) => {
            if e.is_configuration() {
                eprintln!("hint: `pushgate init` writes a starter {CONFIG_FILE_NAME}");
            }
            return Err(e).with_context(|| {
                format!("Failed to load {CONFIG_FILE_NAME} from {}", root.display())
            });
        }
    };

    let trace_path = if args.no_trace {
        init_tracing(json, level, None);
        None
    } else {
        let git_dir = GitCli::default().git_dir(&root).ok();
        let dir = config.trace_dir_in(&root, git_dir.as_deref());
        let (path, file) = open_trace_log(&dir).context("Failed to create trace log")?;
        init_tracing(json, level, Some(file));
        Some(path)
    };
    if let Some(path) = &trace_path {
        info!(path = %path.display(), "writing trace log");
    }

    let worker = WorkerCommand::current_exe().context("Failed to locate pushgate executable")?;
    let orchestrator = PipelineOrchestrator::from_config(config, &root, worker);

    println!("Running pre-push gate for: {}", root.display());
    println!();

    // A panic inside the pipeline surfaces as a JoinError here; the run
    // context has already been torn down during unwinding.
    let report = tokio::spawn(async move { orchestrator.run().await })
        .await
        .context("Gate pipeline aborted unexpectedly")?;

    print_report(&report, &root);
    if let Some(path) = &trace_path {
        println!("Trace log: {}", path.display());
    }

    if let Some(path) = &args.report {
        let json = report.to_json().context("Failed to serialize report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        println!("Report written to: {}", path.display());
    }

    Ok(if report.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_FAILED)
    })
}

fn print_report(report: &GateReport, root: &Path) {
    println!("Run ID: {}", report.run_id);
    if let Some(branch) = &report.branch {
        println!("Branch: {branch}");
    }
    println!(
        "Status: {}",
        if report.success {
            "✓ PASSED"
        } else {
            "✗ FAILED"
        }
    );
    println!("Duration: {}ms", report.duration_ms);
    println!();

    match &report.outcome {
        GateOutcome::BranchRejected { reason } => {
            println!("Push rejected: {reason}");
            return;
        }
        GateOutcome::BranchSkipped => {
            println!("Not on the gated branch; nothing to do.");
            return;
        }
        GateOutcome::NothingToGate => {
            println!("No work items found; nothing to gate.");
            return;
        }
        GateOutcome::Passed | GateOutcome::Failed => {}
    }

    for item in &report.items {
        let status = if item.success { "✓" } else { "✗" };
        let name = item.path.strip_prefix(root).unwrap_or(&item.path);
        let detail = if item.skipped {
            "skipped".to_string()
        } else if let Some(error) = &item.error {
            error.clone()
        } else if let Some(agg) = &item.aggregate {
            let mut d = format!("{} passed, {} failed", agg.passed, agg.failed);
            if agg.unparsed > 0 {
                d.push_str(&format!(", {} without results", agg.unparsed));
            }
            d
        } else {
            "build only".to_string()
        };
        println!(
            "  {} {} ({}ms, {})",
            status,
            name.display(),
            item.duration_ms,
            detail
        );
        if let Some(agg) = &item.aggregate {
            for test in &agg.failing_names {
                println!("      ✗ {test}");
            }
        }
    }

    println!();
    println!(
        "Summary: {}/{} items passed",
        report.passed_count(),
        report.items.len()
    );
    if let Some(dir) = &report.logs_dir {
        println!("Build logs: {}", dir.display());
    }
}

/// Write a starter configuration
fn cmd_init(repo: &Path, test_runner: &str, force: bool) -> Result<ExitCode> {
    let path = GateConfiguration::path_in(repo);
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    let toml = GateConfiguration::default_toml(test_runner)?;
    std::fs::write(&path, toml)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("✓ Wrote {}", path.display());
    println!("  Install as a hook with:");
    println!("    printf '#!/bin/sh\\nexec pushgate run\\n' > .git/hooks/pre-push");
    println!("    chmod +x .git/hooks/pre-push");
    Ok(ExitCode::SUCCESS)
}

/// Print the resolved work items
fn cmd_resolve(repo: &Path) -> Result<ExitCode> {
    let root = repo_root(repo)?;
    let worker = WorkerCommand::current_exe().context("Failed to locate pushgate executable")?;
    let orchestrator = PipelineOrchestrator::load(&root, worker)
        .with_context(|| format!("Failed to load {CONFIG_FILE_NAME} from {}", root.display()))?;

    let items = orchestrator.resolve();
    if items.is_empty() {
        println!("No work items selected.");
        return Ok(ExitCode::SUCCESS);
    }

    println!("Work items ({:?}):", orchestrator.config().selection);
    for item in &items {
        let mut flags = Vec::new();
        if !item.build {
            flags.push("no build");
        }
        if !item.test {
            flags.push("no tests");
        }
        let suffix = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        println!("  {}{}", item.relative_to(&root).display(), suffix);
    }
    Ok(ExitCode::SUCCESS)
}

/// Discover test containers through the worker process
async fn cmd_discover(dir: &Path, timeout_secs: u64) -> Result<ExitCode> {
    let worker = WorkerCommand::current_exe().context("Failed to locate pushgate executable")?;
    let settings = DiscoverySettings {
        timeout_secs,
        ..DiscoverySettings::default()
    };
    let report = IsolatedTestDiscoverer::new(worker, settings)
        .discover_report(dir)
        .await
        .with_context(|| format!("Discovery failed for {}", dir.display()))?;

    println!("Test containers: {}", report.containers.len());
    for path in &report.containers {
        println!("  ✓ {}", path.display());
    }
    if !report.opted_out.is_empty() {
        println!("Opted out:");
        for path in &report.opted_out {
            println!("  - {}", path.display());
        }
    }
    if !report.skipped.is_empty() {
        println!("Could not analyse:");
        for skipped in &report.skipped {
            println!("  ✗ {} ({})", skipped.path.display(), skipped.reason);
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Worker side of the discovery boundary: report JSON on stdout
fn cmd_discover_worker(
    dir: &Path,
    extensions: &[String],
    shadow_dir: Option<&Path>,
) -> Result<ExitCode> {
    let stdout = std::io::stdout();
    pushgate_core::discovery::run_worker(dir, extensions, shadow_dir, stdout.lock())
        .with_context(|| format!("Discovery worker failed for {}", dir.display()))?;
    Ok(ExitCode::SUCCESS)
}
