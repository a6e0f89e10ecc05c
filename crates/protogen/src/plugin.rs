//! grpc_cpp_plugin path resolution.
//!
//! Resolution is a pure function over an explicit, ordered candidate list —
//! the environment is snapshotted by the caller, never read ambiently — so
//! the whole search is testable without mutating process state.
//!
//! Priority order:
//! 1. command-line override
//! 2. `GRPC_CPP_PLUGIN`, then `PROTOC_GEN_GRPC` environment variables
//! 3. `PATH` lookup of `grpc_cpp_plugin`
//! 4. fixed fallback locations

use crate::ProtogenError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const PLUGIN_BINARY: &str = "grpc_cpp_plugin";
const ENV_VARS: [&str; 2] = ["GRPC_CPP_PLUGIN", "PROTOC_GEN_GRPC"];
const FALLBACKS: [&str; 2] = ["/usr/bin/grpc_cpp_plugin", "/usr/local/bin/grpc_cpp_plugin"];

/// Builds the ordered, de-duplicated candidate list from a CLI override and
/// an environment snapshot.
pub fn plugin_candidates(
    cli_override: Option<&Path>,
    env: &HashMap<String, String>,
) -> Vec<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();

    if let Some(cli) = cli_override {
        candidates.push(cli.to_path_buf());
    }

    for var in ENV_VARS {
        if let Some(val) = env.get(var).filter(|v| !v.is_empty()) {
            candidates.push(PathBuf::from(val));
        }
    }

    if let Some(path_var) = env.get("PATH") {
        for dir in std::env::split_paths(path_var) {
            candidates.push(dir.join(PLUGIN_BINARY));
        }
    }

    candidates.extend(FALLBACKS.iter().map(PathBuf::from));

    let mut seen = std::collections::HashSet::new();
    candidates.retain(|c| seen.insert(c.clone()));
    candidates
}

/// Returns the first candidate that exists as an executable file, or
/// [`ProtogenError::PluginNotFound`] listing every location tried.
pub fn resolve_plugin(candidates: &[PathBuf]) -> Result<PathBuf, ProtogenError> {
    for candidate in candidates {
        if candidate.is_file() && is_executable(candidate) {
            return Ok(candidate.clone());
        }
    }
    Err(ProtogenError::PluginNotFound {
        tried: candidates.to_vec(),
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    true
}
