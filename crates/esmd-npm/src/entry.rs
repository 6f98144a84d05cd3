//! Entry-point discovery for a package or one of its submodules.

use std::path::Path;

use crate::error::{Error, Result};
use crate::manifest::NpmPackageInfo;

/// Conditions tried after the caller's own, in priority order.
const ESM_CONDITIONS: &[&str] = &["import", "module", "default", "require"];

/// A located entry file, relative to the package directory (`./dist/a.js`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryPoint {
    pub path: String,
    /// Declaration file next to the entry, if one exists.
    pub types: String,
}

/// Locate the file a `(package, submodule)` request should build from.
///
/// Root requests consult `exports["."]`, then `module`, then `main`.
/// Submodule requests consult `exports["./<sub>"]` (exact or wildcard), then
/// probe the filesystem for `<sub>.mjs`, `<sub>.js`, `<sub>/index.*` and a
/// nested `package.json`.
pub fn resolve_entry(
    package_dir: &Path,
    info: &NpmPackageInfo,
    sub_module: &str,
    conditions: &[&str],
) -> Result<EntryPoint> {
    let mut all_conditions: Vec<&str> = conditions.to_vec();
    all_conditions.extend_from_slice(ESM_CONDITIONS);

    let path = if sub_module.is_empty() {
        root_entry(package_dir, info, &all_conditions)
    } else {
        submodule_entry(package_dir, info, sub_module, &all_conditions)
    }
    .ok_or_else(|| Error::EntryNotFound {
        package: info.name.clone(),
        submodule: sub_module.to_string(),
    })?;

    let types = if sub_module.is_empty() {
        info.types_entry().to_string()
    } else {
        probe(
            package_dir,
            &[format!("{sub_module}.d.ts"), format!("{sub_module}/index.d.ts")],
        )
        .unwrap_or_default()
    };

    Ok(EntryPoint { path, types })
}

fn root_entry(package_dir: &Path, info: &NpmPackageInfo, conditions: &[&str]) -> Option<String> {
    if let Some(path) = info.exports.resolve(".", conditions) {
        return Some(path);
    }
    for candidate in [&info.module, &info.main] {
        if candidate.is_empty() {
            continue;
        }
        if let Some(found) = probe_module(package_dir, candidate) {
            return Some(found);
        }
    }
    probe(package_dir, &["index.mjs".to_string(), "index.js".to_string()])
}

fn submodule_entry(
    package_dir: &Path,
    info: &NpmPackageInfo,
    sub_module: &str,
    conditions: &[&str],
) -> Option<String> {
    if let Some(path) = info.exports.resolve(&format!("./{sub_module}"), conditions) {
        return Some(path);
    }
    if let Some(found) = probe_module(package_dir, sub_module) {
        return Some(found);
    }
    let nested = package_dir.join(sub_module);
    if nested.join("package.json").is_file() {
        if let Ok(nested_info) = NpmPackageInfo::from_dir(&nested) {
            for candidate in [&nested_info.module, &nested_info.main] {
                if !candidate.is_empty() {
                    let rel = format!("{sub_module}/{}", candidate.trim_start_matches("./"));
                    if let Some(found) = probe_module(package_dir, &rel) {
                        return Some(found);
                    }
                }
            }
        }
    }
    None
}

/// `path` as given, then with module extensions, then as a directory index.
fn probe_module(package_dir: &Path, path: &str) -> Option<String> {
    let path = path.trim_start_matches("./");
    probe(
        package_dir,
        &[
            path.to_string(),
            format!("{path}.mjs"),
            format!("{path}.js"),
            format!("{path}.cjs"),
            format!("{path}/index.mjs"),
            format!("{path}/index.js"),
        ],
    )
}

fn probe(package_dir: &Path, candidates: &[String]) -> Option<String> {
    candidates
        .iter()
        .find(|c| package_dir.join(c).is_file())
        .map(|c| format!("./{}", c.trim_start_matches("./")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, contents: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_root_prefers_exports() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "esm/index.mjs", "export {}");
        let info = NpmPackageInfo::from_slice(
            br#"{"name":"a","version":"1.0.0","main":"cjs.js","exports":{".":{"import":"./esm/index.mjs","require":"./cjs.js"}}}"#,
        )
        .unwrap();
        let entry = resolve_entry(dir.path(), &info, "", &["browser"]).unwrap();
        assert_eq!(entry.path, "./esm/index.mjs");
    }

    #[test]
    fn test_root_falls_back_to_main_without_extension() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "lib/main.js", "module.exports = 1");
        let info =
            NpmPackageInfo::from_slice(br#"{"name":"a","version":"1.0.0","main":"lib/main"}"#)
                .unwrap();
        let entry = resolve_entry(dir.path(), &info, "", &[]).unwrap();
        assert_eq!(entry.path, "./lib/main.js");
    }

    #[test]
    fn test_submodule_probes_files_and_types() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "debounce.js", "module.exports = function(){}");
        write(dir.path(), "debounce.d.ts", "export default 1");
        let info = NpmPackageInfo::from_slice(br#"{"name":"lodash","version":"4.17.21"}"#).unwrap();
        let entry = resolve_entry(dir.path(), &info, "debounce", &[]).unwrap();
        assert_eq!(entry.path, "./debounce.js");
        assert_eq!(entry.types, "./debounce.d.ts");
    }

    #[test]
    fn test_submodule_nested_package_json() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "client/package.json", r#"{"module":"../esm/client.js"}"#);
        write(dir.path(), "esm/client.js", "export {}");
        let info = NpmPackageInfo::from_slice(br#"{"name":"x","version":"1.0.0"}"#).unwrap();
        let entry = resolve_entry(dir.path(), &info, "client", &[]).unwrap();
        assert_eq!(entry.path, "./client/../esm/client.js");
    }

    #[test]
    fn test_missing_entry_is_an_error() {
        let dir = TempDir::new().unwrap();
        let info = NpmPackageInfo::from_slice(br#"{"name":"x","version":"1.0.0"}"#).unwrap();
        let err = resolve_entry(dir.path(), &info, "nope", &[]).unwrap_err();
        assert!(matches!(err, Error::EntryNotFound { .. }));
    }
}
