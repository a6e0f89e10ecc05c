//! External proto-compiler collaboration: plugin discovery, protoc
//! invocation, and the deterministic mapping from logical proto names to
//! generated C++ sources.
//!
//! Nothing here schedules or orders anything — these are the leaf utilities
//! the core pipeline calls before graph construction.

pub mod plugin;
pub mod protoc;

pub use plugin::{plugin_candidates, resolve_plugin};
pub use protoc::{generated_sources, logical_name, ProtocRequest};

use common::ToolError;
use std::path::PathBuf;

/// Errors from plugin resolution and protoc invocation.
#[derive(Debug, thiserror::Error)]
pub enum ProtogenError {
    /// No candidate location yielded an executable plugin. Every location
    /// tried is listed so the operator can see the full search.
    #[error("grpc_cpp_plugin not found; tried:\n{}",
        .tried.iter().map(|p| format!("  - {}", p.display())).collect::<Vec<_>>().join("\n"))]
    PluginNotFound { tried: Vec<PathBuf> },

    /// protoc itself failed; diagnostics relayed verbatim, never retried.
    #[error("protoc failed: {0}")]
    ProtocFailed(#[from] ToolError),

    /// A root proto file does not exist.
    #[error("proto file not found: {0}")]
    InputNotFound(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
