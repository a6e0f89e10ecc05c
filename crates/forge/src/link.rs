//! Layered-parallel linking of shared libraries.
//!
//! Layers run strictly in sequence; nodes within a layer link concurrently
//! on the bounded pool. A node links its own objects against the
//! already-produced libraries of its direct dependencies — guaranteed to
//! exist because they belong to strictly earlier layers. The layer barrier
//! is what makes this safe without per-edge locking.

use crate::pool::run_jobs;
use crate::{ForgeError, StageFailure, Toolchain};
use common::{artifact_stem, ToolCommand, ToolRunner};
use depgraph::ImportGraph;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Deterministic library file name for a node: `a/b.proto` -> `liba_b.so`.
pub fn library_name(node: &str) -> String {
    format!("lib{}.so", artifact_stem(node))
}

#[derive(Debug, Clone)]
pub struct LinkSettings {
    /// Output directory for shared libraries.
    pub lib_dir: PathBuf,
    /// Worker pool size per layer.
    pub jobs: usize,
    /// Extra link arguments (e.g. `-lprotobuf`, `-lgrpc++`).
    pub extra_libs: Vec<String>,
}

/// A produced shared library. Written once by the linker, read-only after.
#[derive(Debug, Clone)]
pub struct LinkedLibrary {
    pub node: String,
    pub path: PathBuf,
    /// Direct-dependency libraries this node was linked against.
    pub needed: Vec<PathBuf>,
}

struct LinkJob {
    node: String,
    objects: Vec<PathBuf>,
    dep_libs: Vec<PathBuf>,
}

fn link_command(
    toolchain: &Toolchain,
    job: &LinkJob,
    out: &std::path::Path,
    settings: &LinkSettings,
) -> ToolCommand {
    let mut args = vec![
        "-shared".to_string(),
        "-o".to_string(),
        out.display().to_string(),
    ];
    for obj in &job.objects {
        args.push(obj.display().to_string());
    }
    args.push("-L".to_string());
    args.push(settings.lib_dir.display().to_string());
    for dep in &job.dep_libs {
        // Link by library name, never by path: an absolute path here would
        // bake the build tree into DT_NEEDED and break relocation.
        let file = dep
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| dep.display().to_string());
        args.push(format!("-l:{file}"));
    }
    args.push("-Wl,-rpath,$ORIGIN".to_string());
    args.push("-Wl,--enable-new-dtags".to_string());
    args.extend(settings.extra_libs.iter().cloned());
    ToolCommand::new(toolchain.linker.clone(), args)
}

/// Links every non-excluded node, one layer at a time.
///
/// `layers` must come from `depgraph::layer::layer` over `graph`; the linker
/// trusts the graph and never discovers dependencies itself. Excluded nodes
/// are skipped entirely — an externally supplied library is assumed to
/// satisfy them at load time — and edges to them contribute no `-l` entry.
pub fn link_all(
    runner: &dyn ToolRunner,
    toolchain: &Toolchain,
    graph: &ImportGraph,
    layers: &[Vec<String>],
    objects: &BTreeMap<String, Vec<PathBuf>>,
    excluded: &BTreeSet<String>,
    settings: &LinkSettings,
) -> Result<BTreeMap<String, LinkedLibrary>, ForgeError> {
    std::fs::create_dir_all(&settings.lib_dir)?;

    let mut produced: BTreeMap<String, LinkedLibrary> = BTreeMap::new();

    for wave in layers {
        let mut jobs: Vec<LinkJob> = Vec::new();
        for node in wave {
            if excluded.contains(node) {
                continue;
            }
            let node_objects = objects
                .get(node)
                .filter(|objs| !objs.is_empty())
                .cloned()
                .ok_or_else(|| ForgeError::MissingObjects { node: node.clone() })?;

            let mut dep_libs = Vec::new();
            for dep in graph.imports_of(node).into_iter().flatten() {
                if excluded.contains(dep) {
                    continue;
                }
                match produced.get(dep) {
                    Some(lib) => dep_libs.push(lib.path.clone()),
                    None => {
                        return Err(ForgeError::MissingDependency {
                            node: node.clone(),
                            dependency: dep.clone(),
                        })
                    }
                }
            }
            jobs.push(LinkJob {
                node: node.clone(),
                objects: node_objects,
                dep_libs,
            });
        }

        // Fan out this layer; run_jobs returning is the layer barrier.
        let results = run_jobs(&jobs, settings.jobs, |job| {
            let out = settings.lib_dir.join(library_name(&job.node));
            let cmd = link_command(toolchain, job, &out, settings);
            match runner.run(&cmd) {
                Ok(_) => Ok(LinkedLibrary {
                    node: job.node.clone(),
                    path: out,
                    needed: job.dep_libs.clone(),
                }),
                Err(e) => Err(ForgeError::LinkFailed {
                    failures: vec![StageFailure {
                        node: job.node.clone(),
                        diagnostic: e.to_string(),
                    }],
                }),
            }
        });

        let mut failures: Vec<StageFailure> = Vec::new();
        for (_, outcome) in results {
            match outcome {
                Ok(lib) => {
                    produced.insert(lib.node.clone(), lib);
                }
                Err(e) => failures.extend(e.failures().iter().map(|f| StageFailure {
                    node: f.node.clone(),
                    diagnostic: f.diagnostic.clone(),
                })),
            }
        }
        if !failures.is_empty() {
            failures.sort_by(|a, b| a.node.cmp(&b.node));
            return Err(ForgeError::LinkFailed { failures });
        }
    }

    Ok(produced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRunner;
    use depgraph::layer::layer;

    fn graph(edges: &[(&str, &[&str])]) -> ImportGraph {
        ImportGraph::from_descriptors(edges.iter().map(|(n, d)| (*n, d.iter().copied())))
            .unwrap()
    }

    fn objects_for(graph: &ImportGraph) -> BTreeMap<String, Vec<PathBuf>> {
        graph
            .nodes()
            .map(|n| {
                (
                    n.to_string(),
                    vec![PathBuf::from(format!("/obj/{}.pb.o", artifact_stem(n)))],
                )
            })
            .collect()
    }

    fn settings(jobs: usize) -> LinkSettings {
        LinkSettings {
            lib_dir: std::env::temp_dir().join("forge_link_test_lib"),
            jobs,
            extra_libs: vec!["-lprotobuf".to_string()],
        }
    }

    /// Index of the link invocation producing `node`, by output file name.
    fn link_index(cmds: &[ToolCommand], node: &str) -> usize {
        let lib = library_name(node);
        cmds.iter()
            .position(|c| c.args.iter().any(|a| a.ends_with(&lib)))
            .unwrap_or_else(|| panic!("no link invocation for {node}"))
    }

    #[test]
    fn test_diamond_links_in_dependency_order() {
        let g = graph(&[
            ("a.proto", &[]),
            ("b.proto", &["a.proto"]),
            ("c.proto", &["a.proto"]),
            ("d.proto", &["b.proto", "c.proto"]),
        ]);
        let layers = layer(&g).unwrap();
        let runner = FakeRunner::ok();

        // Single worker makes the recorded order total.
        let produced = link_all(
            &runner,
            &Toolchain::default(),
            &g,
            &layers,
            &objects_for(&g),
            &BTreeSet::new(),
            &settings(1),
        )
        .unwrap();

        assert_eq!(produced.len(), 4);
        let cmds = runner.commands();
        let a = link_index(&cmds, "a.proto");
        let b = link_index(&cmds, "b.proto");
        let c = link_index(&cmds, "c.proto");
        let d = link_index(&cmds, "d.proto");
        assert!(a < b && a < c, "a must link before b and c");
        assert!(b < d && c < d, "d must link after both b and c");

        // d links against both dependency libraries by name, with $ORIGIN.
        let d_args = &cmds[d].args;
        assert!(d_args.contains(&"-l:libb.so".to_string()));
        assert!(d_args.contains(&"-l:libc.so".to_string()));
        assert!(d_args.contains(&"-Wl,-rpath,$ORIGIN".to_string()));
        assert!(d_args.contains(&"-lprotobuf".to_string()));
    }

    #[test]
    fn test_excluded_nodes_are_skipped_and_omitted_from_link_line() {
        let g = graph(&[
            ("svc.proto", &["google/protobuf/empty.proto"]),
            ("google/protobuf/empty.proto", &[]),
        ]);
        let layers = layer(&g).unwrap();
        let excluded: BTreeSet<String> =
            ["google/protobuf/empty.proto".to_string()].into_iter().collect();
        let runner = FakeRunner::ok();

        let mut objects = objects_for(&g);
        objects.remove("google/protobuf/empty.proto");

        let produced = link_all(
            &runner,
            &Toolchain::default(),
            &g,
            &layers,
            &objects,
            &excluded,
            &settings(1),
        )
        .unwrap();

        assert_eq!(produced.len(), 1);
        assert!(produced.contains_key("svc.proto"));
        let cmds = runner.commands();
        assert_eq!(cmds.len(), 1);
        assert!(!cmds[0].args.iter().any(|a| a.contains("empty")));
    }

    #[test]
    fn test_missing_dependency_is_graph_malformed() {
        let g = graph(&[("b.proto", &["a.proto"])]);
        // Hand-crafted layers that skip a.proto entirely.
        let layers = vec![vec!["b.proto".to_string()]];
        let runner = FakeRunner::ok();
        let err = link_all(
            &runner,
            &Toolchain::default(),
            &g,
            &layers,
            &objects_for(&g),
            &BTreeSet::new(),
            &settings(1),
        )
        .unwrap_err();
        assert!(matches!(err, ForgeError::MissingDependency { .. }));
        assert!(runner.commands().is_empty(), "no link may be attempted");
    }

    #[test]
    fn test_link_failure_fails_the_stage_after_the_wave() {
        let g = graph(&[("x.proto", &[]), ("y.proto", &[])]);
        let layers = layer(&g).unwrap();
        let runner = FakeRunner::with(|cmd| {
            if cmd.args.iter().any(|a| a.ends_with("libx.so")) {
                Err(FakeRunner::failed("c++", "undefined reference to `foo'"))
            } else {
                Ok(Default::default())
            }
        });
        let err = link_all(
            &runner,
            &Toolchain::default(),
            &g,
            &layers,
            &objects_for(&g),
            &BTreeSet::new(),
            &settings(1),
        )
        .unwrap_err();
        let failures = err.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].node, "x.proto");
        assert!(failures[0].diagnostic.contains("undefined reference"));
    }

    #[test]
    fn test_missing_objects_rejected_before_linking() {
        let g = graph(&[("a.proto", &[])]);
        let layers = layer(&g).unwrap();
        let runner = FakeRunner::ok();
        let err = link_all(
            &runner,
            &Toolchain::default(),
            &g,
            &layers,
            &BTreeMap::new(),
            &BTreeSet::new(),
            &settings(1),
        )
        .unwrap_err();
        assert!(matches!(err, ForgeError::MissingObjects { .. }));
    }
}
