//! Normalized view over an installed package's `package.json`.

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::exports::ExportsMap;

/// Maximum allowed size for package.json files (10MB)
const MAX_PACKAGE_JSON_SIZE: u64 = 10 * 1024 * 1024;

/// Parsed package manifest, restricted to the fields the build engine reads.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NpmPackageInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, deserialize_with = "string_or_empty")]
    pub main: String,
    #[serde(default, deserialize_with = "string_or_empty")]
    pub module: String,
    /// `"module"` or `"commonjs"`
    #[serde(default, rename = "type", deserialize_with = "string_or_empty")]
    pub module_type: String,
    #[serde(default, deserialize_with = "string_or_empty")]
    pub types: String,
    #[serde(default, deserialize_with = "string_or_empty")]
    pub typings: String,
    /// `browser` field; `false` replacements are stored as `""`.
    #[serde(default, deserialize_with = "browser_map")]
    pub browser: IndexMap<String, String>,
    #[serde(default)]
    pub exports: ExportsMap,
    #[serde(default, deserialize_with = "import_map")]
    pub imports: IndexMap<String, ImportTarget>,
    #[serde(default, deserialize_with = "string_map")]
    pub dependencies: IndexMap<String, String>,
    #[serde(default, deserialize_with = "string_map")]
    pub peer_dependencies: IndexMap<String, String>,
    #[serde(default, deserialize_with = "side_effects")]
    pub side_effects: SideEffects,
    /// Per-package build hints, e.g. `{ "bundle": false }`.
    #[serde(default, rename = "esmd", deserialize_with = "object_or_none")]
    pub esm_config: Option<serde_json::Map<String, Value>>,
    #[serde(default, deserialize_with = "deprecation")]
    pub deprecated: String,
}

/// Value of one `imports` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ImportTarget {
    Path(String),
    Conditions(IndexMap<String, Value>),
}

impl ImportTarget {
    /// First string target among `order`, or the plain path.
    pub fn select(&self, order: &[&str]) -> Option<&str> {
        match self {
            Self::Path(p) => Some(p.as_str()),
            Self::Conditions(map) => order
                .iter()
                .find_map(|cond| map.get(*cond).and_then(Value::as_str)),
        }
    }
}

/// `sideEffects` field: a flag or a list of globs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SideEffects {
    Flag(bool),
    List(Vec<String>),
}

impl Default for SideEffects {
    fn default() -> Self {
        Self::Flag(true)
    }
}

impl SideEffects {
    /// Package lists individual files with side effects.
    pub fn has_list(&self) -> bool {
        matches!(self, Self::List(list) if !list.is_empty())
    }
}

impl NpmPackageInfo {
    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Load `package.json` from a file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(path).map_err(|e| Error::io(path, e))?;
        if metadata.len() > MAX_PACKAGE_JSON_SIZE {
            return Err(Error::io(
                path,
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "package.json exceeds maximum size of 10MB",
                ),
            ));
        }
        let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
        Self::from_slice(&bytes).map_err(|source| Error::InvalidManifest {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `<package_dir>/package.json`.
    pub fn from_dir(package_dir: &Path) -> Result<Self> {
        Self::from_path(&package_dir.join("package.json"))
    }

    /// `types`, falling back to the legacy `typings` field.
    pub fn types_entry(&self) -> &str {
        if self.types.is_empty() {
            &self.typings
        } else {
            &self.types
        }
    }

    pub fn is_esm_type(&self) -> bool {
        self.module_type == "module"
    }

    /// `"bundle": false` in the package's build hints.
    pub fn disables_bundling(&self) -> bool {
        self.esm_config
            .as_ref()
            .and_then(|cfg| cfg.get("bundle"))
            .and_then(Value::as_bool)
            == Some(false)
    }
}

fn string_or_empty<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => s,
        _ => String::new(),
    })
}

fn string_map<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<IndexMap<String, String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Object(map) => map
            .into_iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_string())))
            .collect(),
        _ => IndexMap::new(),
    })
}

fn import_map<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<IndexMap<String, ImportTarget>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Object(map) => map
            .into_iter()
            .filter_map(|(k, v)| serde_json::from_value(v).ok().map(|t| (k, t)))
            .collect(),
        _ => IndexMap::new(),
    })
}

fn side_effects<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<SideEffects, D::Error> {
    Ok(serde_json::from_value(Value::deserialize(d)?).unwrap_or_default())
}

fn object_or_none<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<serde_json::Map<String, Value>>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Object(map) => Some(map),
        _ => None,
    })
}

fn browser_map<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<IndexMap<String, String>, D::Error> {
    let mut out = IndexMap::new();
    match Value::deserialize(d)? {
        // "browser": "./browser.js" replaces the main entry.
        Value::String(s) => {
            out.insert(".".to_string(), s);
        }
        Value::Object(map) => {
            for (k, v) in map {
                match v {
                    Value::String(s) => {
                        out.insert(k, s);
                    }
                    Value::Bool(false) => {
                        out.insert(k, String::new());
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
    Ok(out)
}

fn deprecation<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => s,
        Value::Bool(true) => "this package is deprecated".to_string(),
        _ => String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_manifest() {
        let info = NpmPackageInfo::from_slice(
            br##"{
                "name": "demo",
                "version": "1.2.3",
                "main": "./index.js",
                "module": "./esm/index.js",
                "typings": "./index.d.ts",
                "browser": { "fs": false, "./lib/node.js": "./lib/browser.js" },
                "imports": { "#dep": { "node": "./node.js", "default": "./web.js" } },
                "dependencies": { "is-odd": "^3.0.0", "bad": 42 },
                "peerDependencies": { "react": ">=16" },
                "sideEffects": ["*.css"],
                "esmd": { "bundle": false },
                "deprecated": "use demo2"
            }"##,
        )
        .unwrap();

        assert_eq!(info.types_entry(), "./index.d.ts");
        assert_eq!(info.browser.get("fs").map(String::as_str), Some(""));
        assert_eq!(
            info.browser.get("./lib/node.js").map(String::as_str),
            Some("./lib/browser.js")
        );
        assert_eq!(
            info.imports["#dep"].select(&["browser", "default", "node"]),
            Some("./web.js")
        );
        assert_eq!(info.dependencies.len(), 1);
        assert!(info.side_effects.has_list());
        assert!(info.disables_bundling());
        assert_eq!(info.deprecated, "use demo2");
        assert!(info.exports.is_empty());
    }

    #[test]
    fn test_defaults_for_sparse_manifest() {
        let info = NpmPackageInfo::from_slice(br#"{"name":"x","version":"0.0.1","browser":"./b.js","sideEffects":false}"#)
            .unwrap();
        assert_eq!(info.browser.get(".").map(String::as_str), Some("./b.js"));
        assert!(!info.side_effects.has_list());
        assert!(!info.disables_bundling());
        assert!(!info.is_esm_type());
    }

    #[test]
    fn test_from_dir_reads_package_json() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"name":"on-disk","version":"2.0.0","type":"module"}"#,
        )
        .unwrap();
        let info = NpmPackageInfo::from_dir(dir.path()).unwrap();
        assert_eq!(info.name, "on-disk");
        assert!(info.is_esm_type());
    }

    #[test]
    fn test_invalid_manifest_error() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("package.json"), "{ nope").unwrap();
        let err = NpmPackageInfo::from_dir(dir.path()).unwrap_err();
        assert!(matches!(err, Error::InvalidManifest { .. }));
    }
}
