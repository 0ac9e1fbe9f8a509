//! Build tool client.

use std::io::Write;
use std::path::Path;

use async_trait::async_trait;
use pushgate_core::BuildSettings;
use tracing::{error, info, warn};

use crate::command::{self, CommandOutput};

/// File inside the logs directory that receives build output.
pub const BUILD_LOG_FILE: &str = "build.log";

/// Compiles one work item into an output directory.
#[async_trait]
pub trait BuildTool: Send + Sync {
    /// `true` when the build succeeded. Every failure, including failure to
    /// launch the tool, is `false`.
    async fn build(&self, item: &Path, output_dir: &Path, logs_dir: &Path) -> bool;
}

/// [`BuildTool`] that runs a configured external program.
#[derive(Debug, Clone)]
pub struct CommandBuildTool {
    settings: BuildSettings,
}

impl CommandBuildTool {
    pub fn new(settings: BuildSettings) -> Self {
        Self { settings }
    }

    /// Arguments for building `item`.
    pub fn args_for(&self, item: &Path, output_dir: &Path, logs_dir: &Path) -> Vec<String> {
        command::expand_args(
            &self.settings.args,
            &[("item", item), ("output", output_dir), ("logs", logs_dir)],
        )
    }
}

#[async_trait]
impl BuildTool for CommandBuildTool {
    async fn build(&self, item: &Path, output_dir: &Path, logs_dir: &Path) -> bool {
        let args = self.args_for(item, output_dir, logs_dir);
        info!(item = %item.display(), program = %self.settings.program, "starting build");

        let result = command::execute(
            &self.settings.program,
            &args,
            item.parent(),
            self.settings.timeout_secs,
        )
        .await;

        match result {
            Ok(output) => {
                append_build_log(logs_dir, item, &output);
                if output.success {
                    info!(
                        item = %item.display(),
                        duration_ms = output.duration_ms,
                        "build completed successfully"
                    );
                } else {
                    error!(
                        item = %item.display(),
                        exit_code = output.exit_code,
                        log = %logs_dir.join(BUILD_LOG_FILE).display(),
                        "build failed"
                    );
                }
                output.success
            }
            Err(e) => {
                error!(item = %item.display(), error = %e, "build could not run");
                false
            }
        }
    }
}

fn append_build_log(logs_dir: &Path, item: &Path, output: &CommandOutput) {
    let path = logs_dir.join(BUILD_LOG_FILE);
    let written = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .and_then(|mut f| {
            writeln!(f, "==> {} (exit code {})", item.display(), output.exit_code)?;
            f.write_all(output.combined().as_bytes())?;
            writeln!(f)
        });
    if let Err(e) = written {
        warn!(path = %path.display(), error = %e, "unable to write build log");
    }
}
