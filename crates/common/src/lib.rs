//! Shared plumbing for the protoforge pipeline.
//!
//! **Core Types**:
//! - [`tool::ToolRunner`]: the narrow "run external tool, capture output" seam
//!   that every stage (protoc, compiler, linker, readelf) goes through.
//! - [`tool::SystemRunner`]: the real subprocess implementation.
//! - [`tool::ToolError`]: spawn/exit failures of external tools.
//!
//! All scheduler and verifier logic is written against `&dyn ToolRunner`, so
//! tests substitute an in-memory fake instead of spawning real toolchains.

pub mod tool;

pub use tool::{SystemRunner, ToolCommand, ToolError, ToolOutput, ToolRunner};

use std::path::Path;

/// Normalizes a path for display and for use as a map key.
///
/// Converts to UTF-8 string with forward slashes, stripping UNC prefix on Windows.
pub fn normalize_path(path: &Path) -> String {
    dunce::simplified(path).to_string_lossy().replace('\\', "/")
}

/// Mangles a logical proto file name into an artifact stem.
///
/// `"a/b.proto"` -> `"a_b"`. The stem is the deterministic basis for object
/// and shared-library file names, so repeated runs overwrite rather than
/// accumulate.
pub fn artifact_stem(node: &str) -> String {
    node.strip_suffix(".proto")
        .unwrap_or(node)
        .replace(['/', '\\'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_stem_strips_suffix_and_slashes() {
        assert_eq!(artifact_stem("a/b.proto"), "a_b");
        assert_eq!(artifact_stem("echo.proto"), "echo");
        assert_eq!(artifact_stem("pkg/sub/svc.proto"), "pkg_sub_svc");
    }

    #[test]
    fn test_artifact_stem_without_proto_suffix() {
        assert_eq!(artifact_stem("weird/name"), "weird_name");
    }
}
