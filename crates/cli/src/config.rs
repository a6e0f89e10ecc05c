//! Per-service `.ini` configuration emission.
//!
//! One section per declared service of each locally built proto, recording
//! the produced library file name and the serving endpoint. Consumed by the
//! serving side when loading the plugin libraries.

use descriptor::ServiceInfo;
use forge::LinkedLibrary;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

/// Renders the ini text. Services whose proto produced no local library
/// (excluded or externally supplied) are omitted.
pub fn render_ini(
    services: &[ServiceInfo],
    libraries: &BTreeMap<String, LinkedLibrary>,
    endpoint: &str,
) -> String {
    let mut out = String::new();
    for svc in services {
        let Some(lib) = libraries.get(&svc.proto) else {
            continue;
        };
        let file = lib
            .path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| lib.path.display().to_string());

        let _ = writeln!(out, "[{}]", svc.full_name);
        let _ = writeln!(out, "library = {file}");
        let _ = writeln!(out, "endpoint = {endpoint}");
        let _ = writeln!(out, "enabled = true");
        let _ = writeln!(out, "secure = false");
        out.push('\n');
    }
    out
}

/// Writes the rendered ini to `path`, creating parent directories.
pub fn write_ini(
    path: &Path,
    services: &[ServiceInfo],
    libraries: &BTreeMap<String, LinkedLibrary>,
    endpoint: &str,
) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, render_ini(services, libraries, endpoint))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn lib(node: &str, file: &str) -> (String, LinkedLibrary) {
        (
            node.to_string(),
            LinkedLibrary {
                node: node.to_string(),
                path: PathBuf::from(format!("/build/lib/{file}")),
                needed: Vec::new(),
            },
        )
    }

    #[test]
    fn test_render_one_section_per_service() {
        let services = vec![
            ServiceInfo {
                proto: "echo.proto".to_string(),
                full_name: "tsurugi.udf.Echo".to_string(),
            },
            ServiceInfo {
                proto: "external.proto".to_string(),
                full_name: "other.External".to_string(),
            },
        ];
        let libraries: BTreeMap<String, LinkedLibrary> =
            [lib("echo.proto", "libecho.so")].into_iter().collect();

        let ini = render_ini(&services, &libraries, "dns:///localhost:50051");
        assert!(ini.contains("[tsurugi.udf.Echo]"));
        assert!(ini.contains("library = libecho.so"));
        assert!(ini.contains("endpoint = dns:///localhost:50051"));
        assert!(ini.contains("enabled = true"));
        assert!(ini.contains("secure = false"));
        // No section for the proto that produced no local library.
        assert!(!ini.contains("other.External"));
    }

    #[test]
    fn test_render_empty_when_no_services() {
        let ini = render_ini(&[], &BTreeMap::new(), "dns:///localhost:50051");
        assert!(ini.is_empty());
    }
}
