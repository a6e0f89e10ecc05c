//! protoc command assembly and invocation.
//!
//! One invocation produces both outputs the pipeline needs: the descriptor
//! artifact (`--include_imports --descriptor_set_out`) and one generated
//! source pair per proto file (`--cpp_out` + `--grpc_out`).

use crate::ProtogenError;
use common::{normalize_path, ToolCommand, ToolRunner};
use std::path::{Path, PathBuf};

/// Inputs for one protoc run.
#[derive(Debug, Clone)]
pub struct ProtocRequest {
    /// Root proto source files.
    pub protos: Vec<PathBuf>,
    /// Include search directories, in order.
    pub includes: Vec<PathBuf>,
    /// Where to write the descriptor artifact.
    pub descriptor_out: PathBuf,
    /// Where generated sources land.
    pub gen_dir: PathBuf,
    /// Resolved grpc_cpp_plugin path.
    pub plugin: PathBuf,
}

/// Assembles the protoc command line for a request.
pub fn command(req: &ProtocRequest) -> ToolCommand {
    let mut args: Vec<String> = Vec::new();
    for inc in &req.includes {
        args.push(format!("-I{}", inc.display()));
    }
    args.push("--include_imports".to_string());
    args.push(format!("--descriptor_set_out={}", req.descriptor_out.display()));
    args.push(format!("--cpp_out={}", req.gen_dir.display()));
    args.push(format!("--grpc_out={}", req.gen_dir.display()));
    args.push(format!("--plugin=protoc-gen-grpc={}", req.plugin.display()));
    for proto in &req.protos {
        args.push(proto.display().to_string());
    }
    ToolCommand::new("protoc", args)
}

/// Runs protoc, creating the output directories first.
///
/// Fails fast on a missing root proto before spawning anything; a non-zero
/// protoc exit surfaces the captured diagnostics verbatim.
pub fn run(runner: &dyn ToolRunner, req: &ProtocRequest) -> Result<(), ProtogenError> {
    for proto in &req.protos {
        if !proto.exists() {
            return Err(ProtogenError::InputNotFound(proto.clone()));
        }
    }
    if let Some(parent) = req.descriptor_out.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::create_dir_all(&req.gen_dir)?;

    runner.run(&command(req))?;
    Ok(())
}

/// Resolves a root proto path to its logical, import-graph name: the path
/// relative to whichever include directory contains it.
///
/// The logical name is what the descriptor records, independent of which
/// search directory the file was found in. Falls back to the bare file name
/// when no include dir is a prefix.
pub fn logical_name(proto: &Path, includes: &[PathBuf]) -> String {
    let canonical = dunce::canonicalize(proto).unwrap_or_else(|_| proto.to_path_buf());
    for inc in includes {
        let inc_canonical = dunce::canonicalize(inc).unwrap_or_else(|_| inc.clone());
        if let Ok(rel) = canonical.strip_prefix(&inc_canonical) {
            return normalize_path(rel);
        }
    }
    proto
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| normalize_path(proto))
}

/// Generated sources for a node: `a/b.proto` -> `gen/a/b.pb.cc`, plus
/// `gen/a/b.grpc.pb.cc` when the proto declares a service.
pub fn generated_sources(gen_dir: &Path, node: &str, has_services: bool) -> Vec<PathBuf> {
    let base = node.strip_suffix(".proto").unwrap_or(node);
    let mut sources = vec![gen_dir.join(format!("{base}.pb.cc"))];
    if has_services {
        sources.push(gen_dir.join(format!("{base}.grpc.pb.cc")));
    }
    sources
}
