use clap::Parser;
use common::SystemRunner;
use depgraph::{layer::layer, ImportGraph};
use descriptor::DescriptorSet;
use forge::{CompileSettings, CompileUnit, LinkSettings, Toolchain, VerifySettings};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

mod config;

#[derive(Parser)]
#[command(name = "protoforge")]
#[command(
    about = "Builds a dependency-ordered set of relocatable gRPC plugin libraries from proto files",
    long_about = None
)]
struct Cli {
    /// Root .proto file(s), or directories to scan for them (repeatable).
    #[arg(long = "proto-file", required = true)]
    proto_file: Vec<PathBuf>,

    /// Proto include path (can be specified multiple times).
    #[arg(short = 'I', long = "include")]
    include: Vec<PathBuf>,

    /// Temporary directory for generated files.
    #[arg(long, default_value = "tmp")]
    build_dir: PathBuf,

    /// Path to grpc_cpp_plugin (default: auto-detect, fallback /usr/bin/grpc_cpp_plugin).
    #[arg(long)]
    grpc_plugin: Option<PathBuf>,

    /// gRPC server endpoint written into the generated configuration.
    #[arg(long, default_value = "dns:///localhost:50051")]
    grpc_endpoint: String,

    /// Path to write the generated ini file (default: the build directory).
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Base name used for the descriptor artifact and configuration file.
    #[arg(long)]
    name: Option<String>,

    /// Worker pool size for compile and link stages (default: host parallelism).
    #[arg(short = 'j', long)]
    jobs: Option<usize>,
}

/// Well-known schema files never generated locally; an externally supplied
/// library satisfies them at link time.
const EXCLUDED_PREFIXES: &[&str] = &["google/protobuf/"];

fn is_excluded(node: &str) -> bool {
    EXCLUDED_PREFIXES.iter().any(|p| node.starts_with(p))
}

fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("warning: .env: {}", e);
        }
    }
    let cli = Cli::parse();
    run(&cli)
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let roots = collect_proto_roots(&cli.proto_file)?;
    if roots.is_empty() {
        anyhow::bail!("no .proto files found under the given --proto-file paths");
    }
    for inc in &cli.include {
        if !inc.is_dir() {
            anyhow::bail!("include path not found: {}", inc.display());
        }
    }

    let base = cli.name.clone().unwrap_or_else(|| {
        roots[0]
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "protoforge".to_string())
    });

    let build_base = allocate_build_dir(&cli.build_dir);
    let gen_dir = build_base.join("gen");
    let obj_dir = build_base.join("obj");
    let lib_dir = build_base.join("lib");
    let descriptor_out = build_base.join("desc").join(format!("{base}.desc.pb"));

    let runner = SystemRunner;

    // --- protoc: descriptor artifact + generated source pairs ---
    let env: HashMap<String, String> = std::env::vars().collect();
    let candidates = protogen::plugin_candidates(cli.grpc_plugin.as_deref(), &env);
    let plugin = protogen::resolve_plugin(&candidates)?;

    let request = protogen::ProtocRequest {
        protos: roots.clone(),
        includes: cli.include.clone(),
        descriptor_out: descriptor_out.clone(),
        gen_dir: gen_dir.clone(),
        plugin,
    };
    println!("{}", protogen::protoc::command(&request));
    protogen::protoc::run(&runner, &request)?;

    // --- graph: build, scope to the roots, drop well-known schemas ---
    let descriptors = DescriptorSet::load(&descriptor_out)?;
    let graph = ImportGraph::from_descriptors(
        descriptors
            .imports()
            .map(|(name, deps)| (name, deps.iter().map(String::as_str))),
    )?;

    let mut root_names: Vec<String> = Vec::new();
    for root in &roots {
        let name = protogen::logical_name(root, &cli.include);
        if !graph.contains(&name) {
            anyhow::bail!("root proto `{name}` is not present in the descriptor set");
        }
        root_names.push(name);
    }

    let keep = graph.reachable_from(root_names.iter().map(String::as_str));
    let filtered = graph.filter(&keep, is_excluded);
    let layers = layer(&filtered)?;

    let excluded: BTreeSet<String> = keep.iter().filter(|n| is_excluded(n)).cloned().collect();

    // --- compile: one object per generated source, unordered ---
    let mut units: Vec<CompileUnit> = Vec::new();
    for node in filtered.nodes() {
        for source in protogen::generated_sources(&gen_dir, node, descriptors.has_services(node)) {
            if !source.exists() {
                anyhow::bail!(
                    "generated source missing for `{node}`: {}",
                    source.display()
                );
            }
            units.push(CompileUnit {
                node: node.to_string(),
                source,
            });
        }
    }

    let jobs = cli.jobs.unwrap_or_else(forge::pool::default_jobs);
    let toolchain = Toolchain::default();

    println!(
        "Compiling {} unit(s) from {} proto file(s) ({} workers)",
        units.len(),
        filtered.len(),
        jobs
    );
    let compile_settings = CompileSettings {
        gen_dir: gen_dir.clone(),
        obj_dir,
        include_dirs: Vec::new(),
        jobs,
        extra_flags: Vec::new(),
    };
    let objects = forge::compile_all(&runner, &toolchain, &units, &compile_settings)
        .map_err(report_stage_failures)?;

    // --- link: strict layer order, parallel within a layer ---
    println!("Linking {} node(s) across {} layer(s)", filtered.len(), layers.len());
    let link_settings = LinkSettings {
        lib_dir,
        jobs,
        extra_libs: vec!["-lprotobuf".to_string(), "-lgrpc++".to_string()],
    };
    let libraries = forge::link_all(
        &runner,
        &toolchain,
        &filtered,
        &layers,
        &objects,
        &excluded,
        &link_settings,
    )
    .map_err(report_stage_failures)?;

    // --- verify: relocatability of every produced library ---
    let reports = forge::verify_all(&runner, &toolchain, &libraries, &VerifySettings::default())?;
    let failed: Vec<_> = reports.iter().filter(|r| !r.passed()).collect();
    for report in &failed {
        for violation in &report.violations {
            eprintln!("{}: {}", report.library.display(), violation);
        }
    }

    // --- configuration for the serving side ---
    let output_dir = cli.output_dir.clone().unwrap_or_else(|| build_base.clone());
    let ini_path = output_dir.join(format!("{base}.ini"));
    config::write_ini(
        &ini_path,
        &descriptors.services(),
        &libraries,
        &cli.grpc_endpoint,
    )?;

    println!("+------------------------------------------+");
    println!("| PROTOFORGE BUILD                         |");
    println!("+------------------------------------------+");
    println!("| Proto files    : {:>22} |", filtered.len());
    println!("| Layers         : {:>22} |", layers.len());
    println!("| Objects        : {:>22} |", units.len());
    println!("| Libraries      : {:>22} |", libraries.len());
    println!("| Verified       : {:>22} |", reports.len() - failed.len());
    println!("+------------------------------------------+");
    println!("config: {}", ini_path.display());
    println!("build : {}", build_base.display());

    if !failed.is_empty() {
        anyhow::bail!("verification failed for {} library(ies)", failed.len());
    }
    Ok(())
}

/// Relays per-unit diagnostics of an aggregated stage failure, then returns
/// the error for propagation.
fn report_stage_failures(err: forge::ForgeError) -> anyhow::Error {
    for failure in err.failures() {
        eprintln!("--- {} ---", failure.node);
        eprintln!("{}", failure.diagnostic);
    }
    anyhow::Error::new(err)
}

/// Expands the given paths to concrete .proto files: files are taken as-is
/// (and must exist), directories are walked recursively.
fn collect_proto_roots(paths: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut roots = Vec::new();
    for path in paths {
        if path.is_file() {
            roots.push(path.clone());
        } else if path.is_dir() {
            let mut found: Vec<PathBuf> = walkdir::WalkDir::new(path)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| {
                    e.file_type().is_file()
                        && e.path().extension().and_then(|x| x.to_str()) == Some("proto")
                })
                .map(|e| e.path().to_path_buf())
                .collect();
            found.sort();
            roots.extend(found);
        } else {
            anyhow::bail!("--proto-file not found: {}", path.display());
        }
    }
    Ok(roots)
}

/// Picks a fresh build directory: `tmp`, then `tmp_1`, `tmp_2`, … so a
/// previous run's artifacts are never overwritten in place.
fn allocate_build_dir(base: &Path) -> PathBuf {
    if !base.exists() {
        return base.to_path_buf();
    }
    let name = base
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "tmp".to_string());
    let mut i = 1;
    loop {
        let candidate = base.with_file_name(format!("{name}_{i}"));
        if !candidate.exists() {
            return candidate;
        }
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_excluded_prefixes() {
        assert!(is_excluded("google/protobuf/timestamp.proto"));
        assert!(!is_excluded("my/google.proto"));
        assert!(!is_excluded("echo.proto"));
    }

    #[test]
    fn test_allocate_build_dir_suffixes() {
        let tmp = std::env::temp_dir().join("protoforge_alloc_test");
        fs::remove_dir_all(&tmp).ok();
        fs::create_dir_all(&tmp).ok();
        let base = tmp.join("tmp");

        assert_eq!(allocate_build_dir(&base), base);
        fs::create_dir_all(&base).ok();
        assert_eq!(allocate_build_dir(&base), tmp.join("tmp_1"));
        fs::create_dir_all(tmp.join("tmp_1")).ok();
        assert_eq!(allocate_build_dir(&base), tmp.join("tmp_2"));

        fs::remove_dir_all(tmp).ok();
    }

    #[test]
    fn test_collect_proto_roots_walks_directories() {
        let tmp = std::env::temp_dir().join("protoforge_roots_test");
        fs::remove_dir_all(&tmp).ok();
        fs::create_dir_all(tmp.join("nested")).ok();
        fs::write(tmp.join("b.proto"), "").ok();
        fs::write(tmp.join("nested/a.proto"), "").ok();
        fs::write(tmp.join("readme.md"), "").ok();

        let roots = collect_proto_roots(&[tmp.clone()]).unwrap();
        assert_eq!(roots.len(), 2);
        assert!(roots.iter().all(|p| p.extension().unwrap() == "proto"));

        fs::remove_dir_all(tmp).ok();
    }

    #[test]
    fn test_collect_proto_roots_missing_path_fails() {
        let err = collect_proto_roots(&[PathBuf::from("/nonexistent/x.proto")]).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
