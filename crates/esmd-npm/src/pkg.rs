//! Package locators and specifier helpers.
//!
//! A [`Pkg`] names one exact package version plus the optional subpath a
//! request asked for. Helpers in this module split bare specifiers into
//! `(name, version, subpath)` triples and normalize subpaths into the
//! extension-less "bare names" used for `exports` matching.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An exact package version and an optional subpath inside it.
///
/// Never mutated once built; derive a new value with [`Pkg::with_sub_path`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pkg {
    pub name: String,
    pub version: String,
    /// Subpath as requested, e.g. `debounce.js`.
    #[serde(default)]
    pub sub_path: String,
    /// Normalized, extension-stripped subpath, e.g. `debounce`.
    #[serde(default)]
    pub sub_module: String,
    /// Package was installed from a GitHub repository.
    #[serde(default)]
    pub from_github: bool,
}

impl Pkg {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    /// Same package and version with a different subpath.
    ///
    /// `strip_index` collapses `foo/index` into `foo`, which is what
    /// dependency references want; submodules of the package being built
    /// keep the index segment.
    pub fn with_sub_path(&self, sub_path: &str, strip_index: bool) -> Self {
        Self {
            name: self.name.clone(),
            version: self.version.clone(),
            sub_path: sub_path.to_string(),
            sub_module: to_module_bare_name(sub_path, strip_index),
            from_github: self.from_github,
        }
    }

    /// `name@version`
    pub fn version_name(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }

    /// The bare specifier a consumer would import, e.g. `lodash/debounce`.
    pub fn import_path(&self) -> String {
        if self.sub_module.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.name, self.sub_module)
        }
    }
}

impl fmt::Display for Pkg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)?;
        if !self.sub_path.is_empty() {
            write!(f, "/{}", self.sub_path)?;
        }
        Ok(())
    }
}

/// Split a bare specifier into `(name, version, subpath)`.
///
/// ```
/// use esmd_npm::split_pkg_path;
///
/// let (name, version, sub) = split_pkg_path("@babel/core@7.0.0/lib/index.js");
/// assert_eq!(name, "@babel/core");
/// assert_eq!(version, "7.0.0");
/// assert_eq!(sub, "lib/index.js");
/// ```
pub fn split_pkg_path(specifier: &str) -> (String, String, String) {
    let trimmed = specifier.trim_start_matches('/');
    let segments: Vec<&str> = trimmed.split('/').collect();
    let name_len = if trimmed.starts_with('@') && segments.len() > 1 {
        2
    } else {
        1
    };
    let head = segments[..name_len.min(segments.len())].join("/");
    let sub_path = segments
        .get(name_len..)
        .map(|rest| rest.join("/"))
        .unwrap_or_default();

    // A leading '@' belongs to the scope, not to a version.
    match head.rfind('@') {
        Some(i) if i > 0 => (head[..i].to_string(), head[i + 1..].to_string(), sub_path),
        _ => (head, String::new(), sub_path),
    }
}

/// Package name portion of a bare specifier.
pub fn pkg_name(specifier: &str) -> String {
    split_pkg_path(specifier).0
}

/// Remove a trailing `.mjs`, `.cjs` or `.js` extension.
pub fn strip_module_ext(path: &str) -> &str {
    for ext in [".mjs", ".cjs", ".js"] {
        if let Some(stripped) = path.strip_suffix(ext) {
            return stripped;
        }
    }
    path
}

/// Normalize a subpath into a module bare name: no leading `./`, no module
/// extension, and optionally no trailing `index`.
pub fn to_module_bare_name(path: &str, strip_index: bool) -> String {
    let path = path.trim_start_matches("./").trim_start_matches('/');
    if path.is_empty() {
        return String::new();
    }
    let bare = strip_module_ext(path);
    if strip_index {
        if bare == "index" {
            return String::new();
        }
        if let Some(parent) = bare.strip_suffix("/index") {
            return parent.to_string();
        }
    }
    bare.to_string()
}

/// `./x`, `../x`, `/x`, `.` and `..`
pub fn is_local_specifier(specifier: &str) -> bool {
    specifier == "."
        || specifier == ".."
        || specifier.starts_with("./")
        || specifier.starts_with("../")
        || specifier.starts_with('/')
}

/// True for a complete semantic version such as `1.2.3` or `1.0.0-beta.1`.
pub fn is_exact_version(version: &str) -> bool {
    semver::Version::parse(version).is_ok()
}

/// DefinitelyTyped package name for `name`, e.g. `@types/babel__core`.
pub fn types_package_name(name: &str) -> String {
    match name.strip_prefix('@') {
        Some(scoped) => format!("@types/{}", scoped.replacen('/', "__", 1)),
        None => format!("@types/{name}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_plain_and_scoped() {
        assert_eq!(
            split_pkg_path("react"),
            ("react".into(), String::new(), String::new())
        );
        assert_eq!(
            split_pkg_path("react-dom/client"),
            ("react-dom".into(), String::new(), "client".into())
        );
        assert_eq!(
            split_pkg_path("@scope/pkg"),
            ("@scope/pkg".into(), String::new(), String::new())
        );
        assert_eq!(
            split_pkg_path("@scope/pkg@^1.2/a/b"),
            ("@scope/pkg".into(), "^1.2".into(), "a/b".into())
        );
        assert_eq!(
            split_pkg_path("lodash@4.17.21/debounce"),
            ("lodash".into(), "4.17.21".into(), "debounce".into())
        );
    }

    #[test]
    fn test_module_bare_name() {
        assert_eq!(to_module_bare_name("debounce.js", true), "debounce");
        assert_eq!(to_module_bare_name("./lib/index.mjs", true), "lib");
        assert_eq!(to_module_bare_name("lib/index.mjs", false), "lib/index");
        assert_eq!(to_module_bare_name("index.cjs", true), "");
        assert_eq!(to_module_bare_name("", true), "");
        assert_eq!(to_module_bare_name("data.json", true), "data.json");
    }

    #[test]
    fn test_import_path_and_display() {
        let pkg = Pkg::new("lodash", "4.17.21").with_sub_path("debounce.js", true);
        assert_eq!(pkg.import_path(), "lodash/debounce");
        assert_eq!(pkg.to_string(), "lodash@4.17.21/debounce.js");
        assert_eq!(pkg.version_name(), "lodash@4.17.21");
        assert_eq!(Pkg::new("react", "18.2.0").import_path(), "react");
    }

    #[test]
    fn test_exact_version() {
        assert!(is_exact_version("1.0.0"));
        assert!(is_exact_version("1.0.0-rc.1"));
        assert!(!is_exact_version("^1.0.0"));
        assert!(!is_exact_version("latest"));
        assert!(!is_exact_version("1.0"));
    }

    #[test]
    fn test_local_specifier() {
        assert!(is_local_specifier("./a"));
        assert!(is_local_specifier("../a"));
        assert!(is_local_specifier(".."));
        assert!(is_local_specifier("/abs/path"));
        assert!(!is_local_specifier("react"));
        assert!(!is_local_specifier(".hidden"));
    }

    #[test]
    fn test_types_package_name() {
        assert_eq!(types_package_name("react"), "@types/react");
        assert_eq!(types_package_name("@babel/core"), "@types/babel__core");
    }
}
