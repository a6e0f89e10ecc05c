//! Relocatability verification of produced shared libraries.
//!
//! Inspects each library's dynamic-section metadata (via `readelf -d`
//! through the `ToolRunner` seam) and reports every library that violates a
//! runtime-loading invariant:
//!
//! - the runtime search path must be relative to the library's own location
//!   (`$ORIGIN`), so the artifact set relocates as a unit;
//! - no declared dependency may be recorded as an absolute build-tree path,
//!   which would break once the build directory is cleaned or the artifacts
//!   are copied elsewhere.
//!
//! Detect-and-report only: a non-conforming library is never rewritten. The
//! linker is trusted to have requested the correct options; this stage
//! catches the cases where it did not.

use crate::{ForgeError, LinkedLibrary, Toolchain};
use common::{ToolCommand, ToolRunner};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy)]
pub struct VerifySettings {
    /// Require `$ORIGIN` in the library's RUNPATH (or legacy RPATH).
    pub require_relative_origin: bool,
    /// Reject NEEDED entries recorded as absolute paths.
    pub forbid_absolute_needed: bool,
}

impl Default for VerifySettings {
    fn default() -> Self {
        Self {
            require_relative_origin: true,
            forbid_absolute_needed: true,
        }
    }
}

/// A specific invariant violated by one library.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    #[error("runtime search path {} does not contain $ORIGIN",
        .found.as_deref().map(|p| format!("`{p}`")).unwrap_or_else(|| "(none)".into()))]
    MissingOriginRunpath { found: Option<String> },

    #[error("absolute dependency path recorded in NEEDED: `{entry}`")]
    AbsoluteNeeded { entry: String },
}

/// Verification outcome for one library.
#[derive(Debug)]
pub struct VerifyReport {
    pub node: String,
    pub library: PathBuf,
    pub violations: Vec<Violation>,
}

impl VerifyReport {
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Dynamic-section fields relevant to relocatability.
#[derive(Debug, Default, PartialEq, Eq)]
struct DynamicInfo {
    needed: Vec<String>,
    runpath: Option<String>,
    rpath: Option<String>,
}

impl DynamicInfo {
    /// Effective runtime search path: RUNPATH wins over legacy RPATH.
    fn search_path(&self) -> Option<&str> {
        self.runpath.as_deref().or(self.rpath.as_deref())
    }
}

/// Extracts the bracketed payload of a readelf dynamic-section line.
fn bracketed(line: &str) -> Option<&str> {
    let start = line.find('[')? + 1;
    let end = line.rfind(']')?;
    line.get(start..end)
}

/// Parses `readelf -d` output into the fields the checks need.
///
/// Lines look like:
/// ```text
///  0x0000000000000001 (NEEDED)   Shared library: [liba_b.so]
///  0x000000000000001d (RUNPATH)  Library runpath: [$ORIGIN]
/// ```
fn parse_dynamic_section(text: &str) -> DynamicInfo {
    let mut info = DynamicInfo::default();
    for line in text.lines() {
        if line.contains("(NEEDED)") {
            if let Some(entry) = bracketed(line) {
                info.needed.push(entry.to_string());
            }
        } else if line.contains("(RUNPATH)") {
            info.runpath = bracketed(line).map(str::to_string);
        } else if line.contains("(RPATH)") {
            info.rpath = bracketed(line).map(str::to_string);
        }
    }
    info
}

fn check(info: &DynamicInfo, settings: &VerifySettings) -> Vec<Violation> {
    let mut violations = Vec::new();

    if settings.require_relative_origin {
        let ok = info
            .search_path()
            .is_some_and(|p| p.split(':').any(|entry| entry.contains("$ORIGIN")));
        if !ok {
            violations.push(Violation::MissingOriginRunpath {
                found: info.search_path().map(str::to_string),
            });
        }
    }

    if settings.forbid_absolute_needed {
        for entry in &info.needed {
            if entry.starts_with('/') {
                violations.push(Violation::AbsoluteNeeded {
                    entry: entry.clone(),
                });
            }
        }
    }

    violations
}

/// Verifies every produced library, in deterministic node order.
///
/// All libraries are inspected even after a violation is found — the caller
/// gets the complete structured failure list and must not report the run as
/// successful if any report failed.
pub fn verify_all(
    runner: &dyn ToolRunner,
    toolchain: &Toolchain,
    outputs: &BTreeMap<String, LinkedLibrary>,
    settings: &VerifySettings,
) -> Result<Vec<VerifyReport>, ForgeError> {
    let mut reports = Vec::with_capacity(outputs.len());
    for (node, lib) in outputs {
        let cmd = ToolCommand::new(
            toolchain.readelf.clone(),
            vec!["-d".to_string(), lib.path.display().to_string()],
        );
        let output = runner.run(&cmd).map_err(|source| ForgeError::VerifierFailed {
            node: node.clone(),
            source,
        })?;
        let info = parse_dynamic_section(&output.stdout);
        reports.push(VerifyReport {
            node: node.clone(),
            library: lib.path.clone(),
            violations: check(&info, settings),
        });
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRunner;
    use common::ToolOutput;

    const CLEAN: &str = "\
Dynamic section at offset 0x2d48 contains 24 entries:
  Tag        Type                         Name/Value
 0x0000000000000001 (NEEDED)             Shared library: [liba.so]
 0x0000000000000001 (NEEDED)             Shared library: [libprotobuf.so.32]
 0x000000000000001d (RUNPATH)            Library runpath: [$ORIGIN]
 0x000000000000000c (INIT)               0x1000
";

    const ABSOLUTE_NEEDED: &str = "\
 0x0000000000000001 (NEEDED)             Shared library: [/home/build/tmp/lib/liba.so]
 0x000000000000001d (RUNPATH)            Library runpath: [$ORIGIN]
";

    const NO_RUNPATH: &str = "\
 0x0000000000000001 (NEEDED)             Shared library: [liba.so]
";

    const LEGACY_RPATH: &str = "\
 0x0000000000000001 (NEEDED)             Shared library: [liba.so]
 0x000000000000000f (RPATH)              Library rpath: [$ORIGIN:/usr/lib]
";

    fn outputs(node: &str) -> BTreeMap<String, LinkedLibrary> {
        [(
            node.to_string(),
            LinkedLibrary {
                node: node.to_string(),
                path: PathBuf::from(format!("/build/lib/lib{node}.so")),
                needed: Vec::new(),
            },
        )]
        .into_iter()
        .collect()
    }

    fn run_with(stdout: &'static str) -> Vec<VerifyReport> {
        let runner = FakeRunner::with(move |_| {
            Ok(ToolOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
            })
        });
        verify_all(
            &runner,
            &Toolchain::default(),
            &outputs("x"),
            &VerifySettings::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_parse_dynamic_section() {
        let info = parse_dynamic_section(CLEAN);
        assert_eq!(info.needed, vec!["liba.so", "libprotobuf.so.32"]);
        assert_eq!(info.runpath.as_deref(), Some("$ORIGIN"));
        assert_eq!(info.rpath, None);
    }

    #[test]
    fn test_relocatable_library_passes() {
        let reports = run_with(CLEAN);
        assert_eq!(reports.len(), 1);
        assert!(reports[0].passed());
    }

    #[test]
    fn test_absolute_needed_is_always_flagged() {
        let reports = run_with(ABSOLUTE_NEEDED);
        assert_eq!(
            reports[0].violations,
            vec![Violation::AbsoluteNeeded {
                entry: "/home/build/tmp/lib/liba.so".to_string()
            }]
        );
    }

    #[test]
    fn test_missing_runpath_is_flagged() {
        let reports = run_with(NO_RUNPATH);
        assert_eq!(
            reports[0].violations,
            vec![Violation::MissingOriginRunpath { found: None }]
        );
    }

    #[test]
    fn test_legacy_rpath_with_origin_passes() {
        let reports = run_with(LEGACY_RPATH);
        assert!(reports[0].passed());
    }

    #[test]
    fn test_readelf_failure_is_fatal() {
        let runner = FakeRunner::with(|_| Err(FakeRunner::failed("readelf", "not an ELF file")));
        let err = verify_all(
            &runner,
            &Toolchain::default(),
            &outputs("x"),
            &VerifySettings::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ForgeError::VerifierFailed { .. }));
    }
}
