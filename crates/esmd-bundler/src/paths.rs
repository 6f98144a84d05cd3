//! Build identifiers and the URLs derived from them.
//!
//! `<gh/>name@version/<argsPrefix><target>/<module>[.development][.bundle|.nobundle].js`
//!
//! The identifier is a stable function of the package, its resolved
//! arguments and the build options, so it doubles as the storage key and the
//! sub-build registry key.

use std::path::Path;

use esmd_npm::Pkg;

use crate::target::Target;

/// How dependencies are treated by a build; only affects the identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BundleMode {
    #[default]
    Default,
    Bundle,
    NoBundle,
}

impl BundleMode {
    pub fn from_flags(bundle: bool, no_bundle: bool) -> Self {
        if bundle {
            BundleMode::Bundle
        } else if no_bundle {
            BundleMode::NoBundle
        } else {
            BundleMode::Default
        }
    }
}

pub fn github_prefix(pkg: &Pkg) -> &'static str {
    if pkg.from_github { "gh/" } else { "" }
}

pub fn build_id(
    pkg: &Pkg,
    args_prefix: &str,
    target: Target,
    dev: bool,
    mode: BundleMode,
) -> String {
    let mut module = if pkg.sub_module.is_empty() {
        Path::new(&pkg.name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| pkg.name.clone())
    } else {
        pkg.sub_module.clone()
    };
    if dev {
        module.push_str(".development");
    }
    match mode {
        BundleMode::Bundle => module.push_str(".bundle"),
        BundleMode::NoBundle => module.push_str(".nobundle"),
        BundleMode::Default => {}
    }
    format!(
        "{}{}@{}/{}{}/{}.js",
        github_prefix(pkg),
        pkg.name,
        pkg.version,
        args_prefix,
        target,
        module
    )
}

/// URL another module imports this package through.
pub fn import_path(
    cdn_base_path: &str,
    pkg: &Pkg,
    args_prefix: &str,
    target: Target,
    dev: bool,
) -> String {
    format!(
        "{cdn_base_path}/{}",
        build_id(pkg, args_prefix, target, dev, BundleMode::Default)
    )
}

/// Storage path of a build's JavaScript artifact.
pub fn save_path(id: &str) -> String {
    format!("builds/{id}")
}

/// Insert `.nobundle` before the final extension.
pub fn with_nobundle_suffix(path: &str) -> String {
    match path.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem}.nobundle.{ext}"),
        None => format!("{path}.nobundle"),
    }
}

/// `<gh/>name@version/<prefix><path>` for a declaration file.
pub fn types_path(pkg: &Pkg, args_prefix: &str, dts: &str) -> String {
    format!(
        "{}{}@{}/{}{}",
        github_prefix(pkg),
        pkg.name,
        pkg.version,
        args_prefix,
        dts.trim_start_matches("./").trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_build_id_uses_basename() {
        let pkg = Pkg::new("@babel/core", "7.0.0");
        assert_eq!(
            build_id(&pkg, "", Target::Es2022, false, BundleMode::Default),
            "@babel/core@7.0.0/es2022/core.js"
        );
    }

    #[test]
    fn test_submodule_dev_bundle_id() {
        let pkg = Pkg::new("lodash", "4.17.21").with_sub_path("debounce.js", true);
        assert_eq!(
            build_id(&pkg, "X-abc/", Target::Deno, true, BundleMode::Bundle),
            "lodash@4.17.21/X-abc/deno/debounce.development.bundle.js"
        );
    }

    #[test]
    fn test_import_path_and_nobundle() {
        let mut pkg = Pkg::new("preact", "10.0.0");
        pkg.from_github = true;
        let url = import_path("/esm", &pkg, "", Target::Es2020, false);
        assert_eq!(url, "/esm/gh/preact@10.0.0/es2020/preact.js");
        assert_eq!(
            with_nobundle_suffix(&url),
            "/esm/gh/preact@10.0.0/es2020/preact.nobundle.js"
        );
    }

    #[test]
    fn test_types_path() {
        let pkg = Pkg::new("@types/react", "18.2.0");
        assert_eq!(
            types_path(&pkg, "", "./index.d.ts"),
            "@types/react@18.2.0/index.d.ts"
        );
    }
}
