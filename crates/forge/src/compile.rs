//! Parallel compilation of generated sources to position-independent objects.
//!
//! Compilation units carry no ordering constraints among themselves, so they
//! all dispatch to one bounded wave. Object names derive deterministically
//! from the unit's logical identity: repeated runs overwrite, never
//! accumulate.

use crate::pool::run_jobs;
use crate::{ForgeError, StageFailure, Toolchain};
use common::{artifact_stem, ToolCommand, ToolRunner};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One generated source to compile, owned by a graph node.
///
/// A proto with a service owns two units (`.pb.cc` and `.grpc.pb.cc`); one
/// without owns a single `.pb.cc`.
#[derive(Debug, Clone)]
pub struct CompileUnit {
    /// Logical proto file name, e.g. `"a/b.proto"`.
    pub node: String,
    /// Path of the generated C++ source.
    pub source: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CompileSettings {
    /// Directory holding the generated sources (added as an include root).
    pub gen_dir: PathBuf,
    /// Output directory for object files.
    pub obj_dir: PathBuf,
    /// Additional include search directories.
    pub include_dirs: Vec<PathBuf>,
    /// Worker pool size.
    pub jobs: usize,
    /// Extra compiler flags (e.g. pkg-config cflags for protobuf/grpc).
    pub extra_flags: Vec<String>,
}

/// Deterministic object path for a unit: `a/b.proto` + `b.grpc.pb.cc`
/// -> `<obj_dir>/a_b.grpc.pb.o`.
pub fn object_path(obj_dir: &Path, node: &str, source: &Path) -> PathBuf {
    let stem = artifact_stem(node);
    let suffix = if source
        .to_string_lossy()
        .ends_with(".grpc.pb.cc")
    {
        "grpc.pb.o"
    } else {
        "pb.o"
    };
    obj_dir.join(format!("{stem}.{suffix}"))
}

fn compile_command(
    toolchain: &Toolchain,
    unit: &CompileUnit,
    object: &Path,
    settings: &CompileSettings,
) -> ToolCommand {
    let mut args = vec![
        "-std=c++17".to_string(),
        "-fPIC".to_string(),
        "-c".to_string(),
        unit.source.display().to_string(),
        "-o".to_string(),
        object.display().to_string(),
        "-I".to_string(),
        settings.gen_dir.display().to_string(),
    ];
    for inc in &settings.include_dirs {
        args.push("-I".to_string());
        args.push(inc.display().to_string());
    }
    args.extend(settings.extra_flags.iter().cloned());
    ToolCommand::new(toolchain.compiler.clone(), args)
}

/// Compiles every unit on the bounded pool.
///
/// Returns the per-node object mapping (units grouped back under their
/// owning node, in unit order). Any compiler failure is fatal to the stage:
/// siblings already dispatched finish, nothing further dispatches, and all
/// captured diagnostics aggregate into [`ForgeError::CompileFailed`].
pub fn compile_all(
    runner: &dyn ToolRunner,
    toolchain: &Toolchain,
    units: &[CompileUnit],
    settings: &CompileSettings,
) -> Result<BTreeMap<String, Vec<PathBuf>>, ForgeError> {
    std::fs::create_dir_all(&settings.obj_dir)?;

    let results = run_jobs(units, settings.jobs, |unit| {
        let object = object_path(&settings.obj_dir, &unit.node, &unit.source);
        let cmd = compile_command(toolchain, unit, &object, settings);
        match runner.run(&cmd) {
            Ok(_) => Ok(object),
            Err(e) => Err(ForgeError::CompileFailed {
                failures: vec![StageFailure {
                    node: unit.node.clone(),
                    diagnostic: e.to_string(),
                }],
            }),
        }
    });

    let mut objects: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    let mut failures: Vec<StageFailure> = Vec::new();
    for (i, outcome) in results {
        match outcome {
            Ok(object) => objects.entry(units[i].node.clone()).or_default().push(object),
            Err(e) => failures.extend(
                e.failures()
                    .iter()
                    .map(|f| StageFailure {
                        node: f.node.clone(),
                        diagnostic: f.diagnostic.clone(),
                    }),
            ),
        }
    }

    if failures.is_empty() {
        Ok(objects)
    } else {
        failures.sort_by(|a, b| a.node.cmp(&b.node));
        Err(ForgeError::CompileFailed { failures })
    }
}
