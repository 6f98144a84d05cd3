//! Resolution policy: the fate of every specifier seen while bundling.
//!
//! [`ResolutionPolicy::resolve`] is a decision function. It reads the
//! filesystem and the metadata resolver but never mutates build state; the
//! caller applies the returned [`ResolveAction`] (recording externals,
//! claiming sub-builds). The checks run in a fixed order and the first match
//! wins.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use esmd_npm::{
    MetadataResolver, NpmPackageInfo, Pkg, is_exact_version, is_local_specifier, pkg_name,
    split_pkg_path, strip_module_ext,
};
use path_clean::PathClean;
use tracing::debug;

use crate::adapter::Attempt;
use crate::analyzer::single_reexport_target;
use crate::args::{BuildArgs, fix_build_args};
use crate::builtins::{is_denonext_unsupported, is_node_builtin, native_package, polyfill_data_url};
use crate::options::BuildOptions;
use crate::paths::{build_id, import_path, with_nobundle_suffix};
use crate::target::Target;

/// How a specifier is referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImportKind {
    Import,
    DynamicImport,
    Require,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveRequest {
    pub specifier: String,
    pub kind: ImportKind,
    /// Directory of the importing module.
    pub resolve_dir: PathBuf,
}

impl ResolveRequest {
    pub fn new(specifier: impl Into<String>, kind: ImportKind, resolve_dir: impl Into<PathBuf>) -> Self {
        Self {
            specifier: specifier.into(),
            kind,
            resolve_dir: resolve_dir.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveAction {
    /// Let the engine resolve the specifier itself.
    Bundle,
    /// Bundle this file.
    BundleFile(PathBuf),
    /// Keep as an import of the given path; not part of the manifest.
    External(String),
    /// A dependency reference that lands in the manifest's import list.
    Dependency(ExternalRef),
    /// Diagnostic stub URL, kept external.
    Reject(String),
    /// Empty module standing in for a `browser`-excluded specifier.
    BrowserExclude(String),
    /// Inline a `.wasm` binary as a compiled `WebAssembly.Module`.
    Wasm(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalRef {
    /// Specifier as it reached the dependency fallback.
    pub specifier: String,
    pub path: String,
    pub kind: DependencyKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyKind {
    Builtin,
    /// Listed in `external`; the specifier is kept verbatim.
    Forced,
    /// Another module of the package being built.
    SubBuild { id: String, pkg: Pkg },
    Polyfill,
    Npm,
}

/// Immutable view of one build task, shared with its resolve hooks.
pub struct BuildScope {
    pub pkg: Pkg,
    pub args: Arc<BuildArgs>,
    pub options: BuildOptions,
    pub npm: Arc<NpmPackageInfo>,
    /// Effective no-bundle flag: the option, a `sideEffects` list, or
    /// `esmd.bundle = false` in the manifest.
    pub no_bundle: bool,
    pub cdn_base_path: String,
    pub deno_std_version: String,
    /// Directory holding the `node_modules` the package was installed into.
    pub resolve_dir: PathBuf,
    /// Absolute path of the module the build starts from.
    pub entry: Option<PathBuf>,
    pub metadata: Arc<dyn MetadataResolver>,
}

impl BuildScope {
    pub fn node_modules(&self) -> PathBuf {
        self.resolve_dir.join("node_modules")
    }

    pub fn package_dir(&self) -> PathBuf {
        let name = if self.npm.name.is_empty() {
            &self.pkg.name
        } else {
            &self.npm.name
        };
        self.node_modules().join(name)
    }

    pub fn target(&self) -> Target {
        self.options.target
    }

    fn error_url(&self, kind: &str, name: &str) -> String {
        format!(
            "{}/error.js?type={kind}&name={name}&importer={}",
            self.cdn_base_path, self.pkg
        )
    }

    /// Version a dependency was declared with, `latest` if undeclared.
    fn declared_version(&self, name: &str) -> String {
        if name == self.pkg.name {
            return self.pkg.version.clone();
        }
        self.npm
            .dependencies
            .get(name)
            .or_else(|| self.npm.peer_dependencies.get(name))
            .cloned()
            .unwrap_or_else(|| "latest".to_string())
    }

    fn exact_version(&self, name: &str, version: String) -> String {
        if is_exact_version(&version) {
            return version;
        }
        match self.metadata.resolve(&self.resolve_dir, name, &version) {
            Ok(info) => info.version,
            Err(e) => {
                debug!(name, range = %version, error = %e, "range left unresolved");
                version
            }
        }
    }

    /// The exact package a bare dependency specifier refers to.
    ///
    /// Version precedence: explicit version in the specifier, the package's
    /// own version, a `deps` pin, `dependencies`, `peerDependencies`, then
    /// `latest`. A `deps` pin always wins, and `react` follows `react-dom`.
    pub fn dependency_pkg(&self, specifier: &str) -> Pkg {
        let (name, mut version, sub_path) = split_pkg_path(specifier);
        if version.is_empty() {
            version = if name == self.pkg.name {
                self.pkg.version.clone()
            } else if let Some(pinned) = self.args.deps.get(&name) {
                pinned.clone()
            } else {
                self.declared_version(&name)
            };
        }
        if let Some(pinned) = self.args.deps.get(&name) {
            version = pinned.clone();
        }
        if self.pkg.name == "react-dom" && name == "react" {
            version = self.pkg.version.clone();
        }
        let version = self.exact_version(&name, version);
        Pkg::new(name, version).with_sub_path(&sub_path, true)
    }

    /// Externalize a dependency specifier. Pure: sub-builds are only
    /// described, the caller claims them.
    pub fn resolve_external(&self, specifier: &str) -> ExternalRef {
        let external = |path: String, kind: DependencyKind| ExternalRef {
            specifier: specifier.to_string(),
            path,
            kind,
        };
        let target = self.target();
        let cdn = &self.cdn_base_path;

        if is_node_builtin(specifier) {
            let forced = self.args.external.contains("*")
                || self.args.external.contains(&format!("node:{specifier}"));
            let path = match target {
                _ if forced => format!("node:{specifier}"),
                Target::Node => format!("node:{specifier}"),
                Target::DenoNext if !is_denonext_unsupported(specifier) => {
                    format!("node:{specifier}")
                }
                Target::Deno => format!(
                    "https://deno.land/std@{}/node/{specifier}.ts",
                    self.deno_std_version
                ),
                _ => format!("{cdn}/node/{specifier}.js"),
            };
            return external(path, DependencyKind::Builtin);
        }

        if self.args.is_external(&pkg_name(specifier)) {
            return external(specifier.to_string(), DependencyKind::Forced);
        }

        if let Some(sub_path) = specifier.strip_prefix(&format!("{}/", self.pkg.name)) {
            let sub_pkg = self.pkg.with_sub_path(sub_path, false);
            let prefix = self.args.encode_prefix(&sub_pkg, false);
            let id = build_id(
                &sub_pkg,
                &prefix,
                target,
                self.options.dev,
                self.options.mode(),
            );
            let mut path = import_path(cdn, &sub_pkg, &prefix, target, self.options.dev);
            if self.options.no_bundle {
                path = with_nobundle_suffix(&path);
            }
            return external(path, DependencyKind::SubBuild { id, pkg: sub_pkg });
        }

        if let Some(url) = polyfill_data_url(specifier) {
            return external(url, DependencyKind::Polyfill);
        }
        if target != Target::Node && specifier == "node-fetch" {
            return external(format!("{cdn}/npm_node-fetch.js"), DependencyKind::Polyfill);
        }

        let dep = self.dependency_pkg(specifier);
        let dep_args = fix_build_args(&self.args.dependency_args(), &dep);
        let prefix = dep_args.encode_prefix(&dep, false);
        external(
            import_path(cdn, &dep, &prefix, target, self.options.dev),
            DependencyKind::Npm,
        )
    }
}

/// Decision function for one engine pass.
#[derive(Clone)]
pub struct ResolutionPolicy {
    scope: Arc<BuildScope>,
    attempt: Arc<Attempt>,
}

impl ResolutionPolicy {
    pub fn new(scope: Arc<BuildScope>, attempt: Arc<Attempt>) -> Self {
        Self { scope, attempt }
    }

    pub fn scope(&self) -> &BuildScope {
        &self.scope
    }

    pub fn attempt(&self) -> &Attempt {
        &self.attempt
    }

    pub fn resolve(&self, req: &ResolveRequest) -> ResolveAction {
        let scope = &*self.scope;
        let npm = &*scope.npm;
        let args = &*scope.args;
        let raw = req.specifier.as_str();

        if let Some(name) = raw.strip_prefix("file:") {
            return ResolveAction::Reject(scope.error_url("unsupported-file-dependency", name));
        }
        if raw.starts_with("data:") || raw.starts_with("https:") || raw.starts_with("http:") {
            return ResolveAction::External(raw.to_string());
        }

        if args.ignore_require && req.kind == ImportKind::Require && !npm.module.is_empty() {
            return ResolveAction::External(raw.to_string());
        }

        // Yarn PnP API
        if raw == "pnpapi" {
            return ResolveAction::BrowserExclude(raw.to_string());
        }

        if self.attempt.implicit_externals.contains(raw) {
            return ResolveAction::Dependency(scope.resolve_external(raw));
        }

        let mut specifier = raw.strip_suffix('/').unwrap_or(raw);
        specifier = specifier.strip_prefix("node:").unwrap_or(specifier);
        specifier = specifier.strip_prefix("npm:").unwrap_or(specifier);
        let mut specifier = specifier.to_string();

        // "@mark/html": "npm:@jsr/mark__html@^1.0.0"
        // "tslib": "git+https://github.com/microsoft/tslib.git#v2.3.0"
        if let Some(declared) = npm.dependencies.get(&specifier) {
            if let Some(aliased) = declared.strip_prefix("npm:") {
                specifier = aliased.to_string();
            } else if let Some(path) = github_dependency_path(declared) {
                return ResolveAction::External(path);
            }
        }

        if let Some(target) = npm.imports.get(&specifier) {
            let order: &[&str] = if scope.target().is_server() {
                &["node", "default", "browser"]
            } else {
                &["browser", "default", "node"]
            };
            if let Some(path) = target.select(order) {
                specifier = path.to_string();
            }
        }

        if !npm.browser.is_empty() && !scope.target().is_server() {
            let package_dir = scope.package_dir();
            let mut key = specifier.clone();
            if specifier.starts_with("./") || specifier.starts_with("../") || specifier == ".." {
                let full = req.resolve_dir.join(&specifier).clean();
                key = match full.strip_prefix(&package_dir) {
                    Ok(rel) => format!("./{}", rel.to_string_lossy()),
                    Err(_) => full.to_string_lossy().into_owned(),
                };
            }
            if !npm.browser.contains_key(&key) && Path::new(&key).extension().is_none() {
                key.push_str(".js");
            }
            if let Some(replacement) = npm.browser.get(&key) {
                if replacement.is_empty() {
                    return ResolveAction::BrowserExclude(raw.to_string());
                }
                specifier = if replacement.starts_with("./") {
                    path_string(&package_dir.join(replacement).clean())
                } else {
                    replacement.clone()
                };
            }
        }

        if !args.alias.is_empty() {
            if let Some(to) = args.alias.get(&specifier) {
                specifier = to.clone();
            } else {
                let (name, _, sub_path) = split_pkg_path(&specifier);
                if !sub_path.is_empty() {
                    if let Some(to) = args.alias.get(&name) {
                        specifier = format!("{to}/{sub_path}");
                    }
                }
            }
        }

        if native_package(&specifier).is_some() {
            return self.resolve_native(&specifier, raw);
        }

        let full = if is_local_specifier(&specifier) {
            req.resolve_dir.join(&specifier).clean()
        } else {
            scope.node_modules().join(&specifier).clean()
        };

        let full_str = path_string(&full);
        if full_str.ends_with(".node") && full.is_file() {
            let name = Path::new(raw)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| raw.to_string());
            return ResolveAction::Reject(scope.error_url("unsupported-node-native-module", &name));
        }
        if full_str.ends_with(".json") && full.is_file() {
            return ResolveAction::BundleFile(full);
        }
        if full_str.ends_with(".wasm") && full.is_file() {
            return ResolveAction::Wasm(full);
        }

        // "react/jsx-runtime" importing "react"
        if !scope.pkg.sub_module.is_empty() && scope.pkg.name == specifier && !scope.options.bundle
        {
            return ResolveAction::Dependency(scope.resolve_external(&specifier));
        }

        if let Some(action) = self.entry_identity(&specifier) {
            return action;
        }

        if is_node_builtin(&specifier) {
            return ResolveAction::Dependency(scope.resolve_external(&specifier));
        }

        if scope.options.bundle {
            let name = pkg_name(&specifier);
            if !args.external.contains(&name)
                && !self.attempt.implicit_externals.contains(&specifier)
                && !npm.peer_dependencies.contains_key(&name)
            {
                return ResolveAction::Bundle;
            }
        }

        if is_local_specifier(&specifier) {
            specifier = match full.strip_prefix(scope.node_modules()) {
                Ok(rel) => rel.to_string_lossy().into_owned(),
                Err(_) => full_str.clone(),
            };
            if let Some(action) = self.split_local_module(req, &specifier, &full) {
                return action;
            }
        }

        ResolveAction::Dependency(scope.resolve_external(&specifier))
    }

    fn resolve_native(&self, specifier: &str, raw: &str) -> ResolveAction {
        let scope = &*self.scope;
        if scope.target() == Target::DenoNext {
            let (name, _, sub_path) = split_pkg_path(specifier);
            let declared = scope.declared_version(&name);
            let version = if is_exact_version(&declared) {
                Some(declared)
            } else {
                match scope.metadata.resolve(&scope.resolve_dir, &name, &declared) {
                    Ok(info) => Some(info.version),
                    Err(e) => {
                        debug!(name, range = %declared, error = %e, "no npm: version for native package");
                        None
                    }
                }
            };
            if let Some(version) = version {
                let pkg = Pkg::new(name, version).with_sub_path(&sub_path, true);
                return ResolveAction::External(format!("npm:{pkg}"));
            }
        }
        if specifier == "fsevents" {
            return ResolveAction::External(format!("{}/npm_fsevents.js", scope.cdn_base_path));
        }
        debug!(specifier, raw, "native package rejected");
        ResolveAction::Reject(scope.error_url("unsupported-npm-package", specifier))
    }

    /// The module the build starts from, reached through any of its names.
    fn entry_identity(&self, specifier: &str) -> Option<ResolveAction> {
        let scope = &*self.scope;
        let npm = &*scope.npm;
        let is_entry_path = scope
            .entry
            .as_ref()
            .is_some_and(|entry| path_string(entry) == specifier);
        if is_entry_path || specifier == scope.pkg.import_path() {
            return Some(match &scope.entry {
                Some(entry) => ResolveAction::BundleFile(entry.clone()),
                None => ResolveAction::Bundle,
            });
        }
        for field in [&npm.module, &npm.main] {
            if field.is_empty() {
                continue;
            }
            let joined = Path::new(&npm.name).join(field).clean();
            if path_string(&joined) == specifier {
                let file = scope.node_modules().join(&joined);
                return Some(if file.is_file() {
                    ResolveAction::BundleFile(file)
                } else {
                    ResolveAction::Bundle
                });
            }
        }
        None
    }

    /// In-package files: split along the `exports` map, collapse pure
    /// re-export files, otherwise inline.
    fn split_local_module(
        &self,
        req: &ResolveRequest,
        specifier: &str,
        full: &Path,
    ) -> Option<ResolveAction> {
        let scope = &*self.scope;
        let npm = &*scope.npm;
        let in_package = specifier.strip_prefix(&format!("{}/", npm.name))?;
        let module_path = format!("./{in_package}");
        let bare_name = strip_module_ext(&module_path);

        // "lib/index.mjs" importing "lib/index.cjs"
        if bare_name == format!("./{}", scope.pkg.sub_module) {
            return Some(bundle_local(full));
        }

        let own = scope.pkg.import_path();
        let own_index = format!("{own}/index");
        if let Some(url) = npm
            .exports
            .public_submodules(&npm.name, bare_name, &module_path)
            .into_iter()
            .find(|url| *url != own && *url != own_index)
        {
            return Some(ResolveAction::Dependency(scope.resolve_external(&url)));
        }

        if let Some(dep) = single_reexport_target(full) {
            if !is_local_specifier(&dep) {
                return Some(ResolveAction::Dependency(scope.resolve_external(&dep)));
            }
        }

        if req.kind != ImportKind::DynamicImport && !scope.no_bundle {
            return Some(bundle_local(full));
        }
        None
    }
}

fn bundle_local(full: &Path) -> ResolveAction {
    if full.is_file() {
        ResolveAction::BundleFile(full.to_path_buf())
    } else {
        ResolveAction::Bundle
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// `/gh/<owner>/<repo>[@<ref>]` for a dependency declared as a GitHub URL.
fn github_dependency_path(declared: &str) -> Option<String> {
    let scheme_ok = declared.starts_with("git+ssh://")
        || declared.starts_with("git+https://")
        || declared.starts_with("git://");
    if !scheme_ok {
        return None;
    }
    // scp-like ssh form: git+ssh://git@github.com:owner/repo.git
    let normalized = declared.replacen("github.com:", "github.com/", 1);
    let url = url::Url::parse(&normalized).ok()?;
    if url.host_str() != Some("github.com") {
        return None;
    }
    let repo = url.path().trim_start_matches('/').trim_end_matches(".git");
    let mut path = format!("/gh/{repo}");
    if let Some(fragment) = url.fragment().filter(|f| !f.is_empty()) {
        path.push('@');
        path.extend(url::form_urlencoded::byte_serialize(fragment.as_bytes()));
    }
    Some(path)
}
