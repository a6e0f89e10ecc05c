//! External tool invocation behind a narrow, fakeable seam.
//!
//! Every subprocess the pipeline spawns (protoc, C++ compiler, linker,
//! readelf) goes through [`ToolRunner`]. The trait is object-safe and
//! `Send + Sync` so worker threads in the bounded pool can share one runner.

use std::fmt;
use std::path::PathBuf;
use std::process::Command;

/// Errors from spawning or running an external tool.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The program could not be spawned at all (missing binary, permissions).
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program ran and exited non-zero. Diagnostics are relayed verbatim
    /// and the invocation is never retried.
    #[error("`{program}` exited with code {code}:\n{stderr}")]
    Failed {
        program: String,
        code: i32,
        stderr: String,
    },
}

/// A fully assembled external command, ready to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a completed tool invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs an external command and captures its output.
///
/// A zero-exit run yields `Ok(ToolOutput)`; a non-zero exit yields
/// [`ToolError::Failed`] with the captured stderr. Implementations must be
/// shareable across the worker pool.
pub trait ToolRunner: Send + Sync {
    fn run(&self, cmd: &ToolCommand) -> Result<ToolOutput, ToolError>;
}

/// The real subprocess-backed runner.
pub struct SystemRunner;

impl ToolRunner for SystemRunner {
    fn run(&self, cmd: &ToolCommand) -> Result<ToolOutput, ToolError> {
        let program = cmd.program.display().to_string();
        let output = Command::new(&cmd.program)
            .args(&cmd.args)
            .output()
            .map_err(|source| ToolError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if output.status.success() {
            Ok(ToolOutput { stdout, stderr })
        } else {
            Err(ToolError::Failed {
                program,
                code: output.status.code().unwrap_or(-1),
                stderr,
            })
        }
    }
}
