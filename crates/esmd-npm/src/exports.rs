//! The `exports` field of a package manifest.
//!
//! Each entry maps a public subpath (`.`, `./foo`, `./utils/*`) to either a
//! plain path or an ordered condition map whose values nest further targets.
//! See <https://nodejs.org/api/packages.html#package-entry-points>.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::pkg::strip_module_ext;

/// Target of one `exports` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportTarget {
    /// `"./foo": "./dist/foo.js"`
    Path(String),
    /// `"./foo": { "import": "./dist/foo.mjs", "require": "./dist/foo.cjs" }`
    Conditions(IndexMap<String, ExportTarget>),
}

impl ExportTarget {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::Path(s.clone())),
            Value::Object(map) => {
                let conditions: IndexMap<String, ExportTarget> = map
                    .iter()
                    .filter_map(|(k, v)| Self::from_value(v).map(|t| (k.clone(), t)))
                    .collect();
                Some(Self::Conditions(conditions))
            }
            // Fallback arrays: the first usable alternative wins.
            Value::Array(items) => items.iter().find_map(Self::from_value),
            _ => None,
        }
    }

    /// Every path reachable from this target, in declaration order.
    pub fn leaves(&self) -> Vec<&str> {
        match self {
            Self::Path(p) => vec![p.as_str()],
            Self::Conditions(map) => map.values().flat_map(|t| t.leaves()).collect(),
        }
    }

    /// Pick a path for the active `conditions`.
    ///
    /// Condition maps are walked in declaration order and the first key that
    /// is active wins, matching Node's resolution algorithm.
    pub fn select(&self, conditions: &[&str]) -> Option<&str> {
        match self {
            Self::Path(p) => Some(p.as_str()),
            Self::Conditions(map) => map
                .iter()
                .filter(|(key, _)| conditions.contains(&key.as_str()))
                .find_map(|(_, target)| target.select(conditions)),
        }
    }
}

/// Normalized `exports` field keyed by subpath.
///
/// A bare string or a top-level condition map is stored under `"."`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportsMap {
    entries: IndexMap<String, ExportTarget>,
}

impl ExportsMap {
    pub fn from_value(value: &Value) -> Self {
        let mut entries = IndexMap::new();
        match value {
            Value::Object(map) if map.keys().any(|k| k.starts_with('.')) => {
                for (key, target) in map {
                    // `"./internal/*": null` hides a subpath; nothing to split on.
                    if let Some(target) = ExportTarget::from_value(target) {
                        entries.insert(key.clone(), target);
                    }
                }
            }
            Value::Null => {}
            other => {
                if let Some(target) = ExportTarget::from_value(other) {
                    entries.insert(".".to_string(), target);
                }
            }
        }
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&ExportTarget> {
        self.entries.get(key)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &ExportTarget)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Resolve a public subpath (`.` or `./foo`) to a file path inside the
    /// package, honoring exact entries first and then single-wildcard ones.
    pub fn resolve(&self, subpath: &str, conditions: &[&str]) -> Option<String> {
        if let Some(target) = self.entries.get(subpath) {
            return target.select(conditions).map(str::to_string);
        }
        self.entries
            .iter()
            .filter(|(key, _)| key.contains('*'))
            .find_map(|(key, target)| {
                let (prefix, suffix) = split_by_last_byte(key, '*');
                let captured = subpath
                    .strip_prefix(prefix)
                    .and_then(|rest| rest.strip_suffix(suffix))?;
                target
                    .select(conditions)
                    .map(|path| path.replace('*', captured))
            })
    }

    /// Find the public submodule an in-package file belongs to.
    ///
    /// `bare_name` is the package-relative path without module extension
    /// (`./dist/foo`), `module_path` the same path with its extension. The
    /// return value is the bare specifier of the first matching public
    /// entry, e.g. `lodash/debounce`, or `None` if no entry exposes the file.
    pub fn public_submodule(
        &self,
        pkg_name: &str,
        bare_name: &str,
        module_path: &str,
    ) -> Option<String> {
        self.public_submodules(pkg_name, bare_name, module_path)
            .into_iter()
            .next()
    }

    /// Every public entry exposing the file, in declaration order.
    pub fn public_submodules(
        &self,
        pkg_name: &str,
        bare_name: &str,
        module_path: &str,
    ) -> Vec<String> {
        let mut found = Vec::new();
        for (key, target) in &self.entries {
            if key != "." && !key.starts_with("./") {
                continue;
            }
            if key.contains('*') {
                let matched_prefix = target.leaves().into_iter().find_map(|leaf| {
                    let (prefix, suffix) = split_by_last_byte(leaf, '*');
                    let matched = bare_name.starts_with(prefix)
                        && (suffix.is_empty() || module_path.ends_with(suffix));
                    matched.then_some(prefix)
                });
                if let Some(prefix) = matched_prefix {
                    let (export_prefix, _) = split_by_last_byte(key, '*');
                    let rest = &bare_name[prefix.len()..];
                    found.push(join_specifier(pkg_name, &format!("{export_prefix}{rest}")));
                }
            } else if target
                .leaves()
                .into_iter()
                .any(|leaf| strip_module_ext(leaf) == bare_name)
            {
                found.push(join_specifier(pkg_name, strip_module_ext(key)));
            }
        }
        found
    }
}

impl<'de> Deserialize<'de> for ExportsMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value))
    }
}

/// Split at the last occurrence of `byte`; `(s, "")` if absent.
pub fn split_by_last_byte(s: &str, byte: char) -> (&str, &str) {
    match s.rfind(byte) {
        Some(i) => (&s[..i], &s[i + byte.len_utf8()..]),
        None => (s, ""),
    }
}

/// `path.Join`-style join of a package name and a package-relative path.
fn join_specifier(pkg_name: &str, relative: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in relative.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        pkg_name.to_string()
    } else {
        format!("{pkg_name}/{}", segments.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_string_exports_is_root_entry() {
        let map = ExportsMap::from_value(&json!("./index.js"));
        assert_eq!(map.get("."), Some(&ExportTarget::Path("./index.js".into())));
    }

    #[test]
    fn test_top_level_conditions_are_root_entry() {
        let map = ExportsMap::from_value(&json!({
            "import": "./esm/index.mjs",
            "require": "./cjs/index.js"
        }));
        assert_eq!(
            map.resolve(".", &["import", "default"]).as_deref(),
            Some("./esm/index.mjs")
        );
        assert_eq!(
            map.resolve(".", &["require"]).as_deref(),
            Some("./cjs/index.js")
        );
    }

    #[test]
    fn test_select_follows_declaration_order() {
        let target = ExportTarget::from_value(&json!({
            "types": "./index.d.ts",
            "node": { "import": "./node.mjs" },
            "default": "./browser.js"
        }))
        .unwrap();
        assert_eq!(target.select(&["browser", "default"]), Some("./browser.js"));
        assert_eq!(
            target.select(&["node", "import", "default"]),
            Some("./node.mjs")
        );
    }

    #[test]
    fn test_wildcard_resolve() {
        let map = ExportsMap::from_value(&json!({
            ".": "./index.js",
            "./fp/*": "./fp/*.js",
            "./internal/*": null
        }));
        assert_eq!(
            map.resolve("./fp/map", &["default"]).as_deref(),
            Some("./fp/map.js")
        );
        assert_eq!(map.resolve("./internal/x", &["default"]), None);
    }

    #[test]
    fn test_public_submodule_exact() {
        let map = ExportsMap::from_value(&json!({
            ".": "./lodash.js",
            "./debounce": { "import": "./debounce.mjs", "default": "./debounce.js" }
        }));
        assert_eq!(
            map.public_submodule("lodash", "./debounce", "./debounce.js")
                .as_deref(),
            Some("lodash/debounce")
        );
        assert_eq!(
            map.public_submodule("lodash", "./lodash", "./lodash.js")
                .as_deref(),
            Some("lodash")
        );
        assert_eq!(
            map.public_submodule("lodash", "./_baseGet", "./_baseGet.js"),
            None
        );
    }

    #[test]
    fn test_public_submodule_wildcard() {
        let map = ExportsMap::from_value(&json!({
            "./*": { "import": "./dist/esm/*.mjs" }
        }));
        assert_eq!(
            map.public_submodule("pkg", "./dist/esm/utils/a", "./dist/esm/utils/a.mjs")
                .as_deref(),
            Some("pkg/utils/a")
        );
        assert_eq!(
            map.public_submodule("pkg", "./dist/esm/utils/a", "./dist/esm/utils/a.cjs"),
            None
        );
    }

    #[test]
    fn test_public_submodules_lists_every_entry() {
        let map = ExportsMap::from_value(&json!({
            ".": "./index.js",
            "./index": "./index.js",
            "./*": "./*.js"
        }));
        assert_eq!(
            map.public_submodules("pkg", "./index", "./index.js"),
            vec!["pkg", "pkg/index", "pkg/index"]
        );
    }

    #[test]
    fn test_split_by_last_byte() {
        assert_eq!(split_by_last_byte("./a/*.js", '*'), ("./a/", ".js"));
        assert_eq!(split_by_last_byte("./a.js", '*'), ("./a.js", ""));
    }
}
