//! The Forge: layered-parallel compilation, linking, and verification.
//!
//! Pipeline position: after the import graph is filtered and layered, the
//! forge drives the native toolchain — one object per generated source on a
//! bounded worker pool, then one shared library per graph node in strict
//! layer order, then a relocatability check over every produced library.
//!
//! All toolchain invocations flow through `common::ToolRunner`, so every
//! scheduling property here is tested against an in-memory fake runner.

pub mod compile;
pub mod link;
pub mod pool;
pub mod verify;

pub use compile::{compile_all, CompileSettings, CompileUnit};
pub use link::{link_all, library_name, LinkSettings, LinkedLibrary};
pub use verify::{verify_all, VerifyReport, VerifySettings, Violation};

use common::ToolError;
use std::path::PathBuf;

/// Native toolchain binaries the forge shells out to.
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub compiler: PathBuf,
    pub linker: PathBuf,
    pub readelf: PathBuf,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            compiler: PathBuf::from("c++"),
            linker: PathBuf::from("c++"),
            readelf: PathBuf::from("readelf"),
        }
    }
}

/// One failed unit within a parallel stage.
#[derive(Debug)]
pub struct StageFailure {
    /// Logical proto file name of the failed unit.
    pub node: String,
    /// Diagnostic output relayed verbatim from the external tool.
    pub diagnostic: String,
}

/// Errors from the compile/link/verify stages.
#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// At least one compiler invocation exited non-zero. The stage is fatal:
    /// a silently skipped unit would surface later as a confusing link error.
    #[error("compilation failed for {} unit(s)", .failures.len())]
    CompileFailed { failures: Vec<StageFailure> },

    /// At least one link invocation exited non-zero within a layer.
    #[error("linking failed for {} node(s)", .failures.len())]
    LinkFailed { failures: Vec<StageFailure> },

    /// No compiled object exists for a node scheduled to link.
    #[error("no compiled objects for `{node}`")]
    MissingObjects { node: String },

    /// A node's dependency was neither linked earlier nor excluded — the
    /// graph handed to the linker is malformed.
    #[error("`{node}` depends on `{dependency}`, which was never linked nor excluded")]
    MissingDependency { node: String, dependency: String },

    /// The verifier's metadata inspection tool itself failed on a library.
    #[error("verifier failed on `{node}`: {source}")]
    VerifierFailed {
        node: String,
        #[source]
        source: ToolError,
    },
}

impl ForgeError {
    /// Per-unit failures for the aggregated stage errors, empty otherwise.
    pub fn failures(&self) -> &[StageFailure] {
        match self {
            ForgeError::CompileFailed { failures } | ForgeError::LinkFailed { failures } => {
                failures
            }
            _ => &[],
        }
    }
}


#[cfg(test)]
pub(crate) mod testing {
    use common::{ToolCommand, ToolError, ToolOutput, ToolRunner};
    use std::sync::Mutex;

    type Responder = Box<dyn Fn(&ToolCommand) -> Result<ToolOutput, ToolError> + Send + Sync>;

    /// In-memory `ToolRunner` recording every invocation.
    pub struct FakeRunner {
        pub log: Mutex<Vec<ToolCommand>>,
        respond: Responder,
    }

    impl FakeRunner {
        /// A runner where every invocation succeeds with empty output.
        pub fn ok() -> Self {
            Self::with(|_| Ok(ToolOutput::default()))
        }

        pub fn with(
            respond: impl Fn(&ToolCommand) -> Result<ToolOutput, ToolError> + Send + Sync + 'static,
        ) -> Self {
            Self {
                log: Mutex::new(Vec::new()),
                respond: Box::new(respond),
            }
        }

        pub fn commands(&self) -> Vec<ToolCommand> {
            self.log.lock().unwrap().clone()
        }

        pub fn failed(program: &str, stderr: &str) -> ToolError {
            ToolError::Failed {
                program: program.to_string(),
                code: 1,
                stderr: stderr.to_string(),
            }
        }
    }

    impl ToolRunner for FakeRunner {
        fn run(&self, cmd: &ToolCommand) -> Result<ToolOutput, ToolError> {
            self.log.lock().unwrap().push(cmd.clone());
            (self.respond)(cmd)
        }
    }
}
