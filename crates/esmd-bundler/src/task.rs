//! Build tasks: one package (or subpath) built for one target.
//!
//! [`BuildTask::build`] installs the package, analyzes its entry, handles
//! the cases that need no bundler (raw JSON, declaration-only packages,
//! CommonJS re-export shims), otherwise synthesizes an entry, drives the
//! engine through the [`BuildAdapter`] and assembles the output. Sub-builds
//! claimed along the way run afterwards from a queue, sharing one
//! [`SubBuildRegistry`].

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use esmd_config::EsmdConfig;
use esmd_npm::{
    Installer, MetadataResolver, NodeModulesResolver, NpmPackageInfo, Pkg, PreinstalledInstaller,
    package_dir, types_package_name,
};
use path_clean::PathClean;
use tracing::{debug, error, info, warn};

use crate::adapter::BuildAdapter;
use crate::analyzer::{ModuleAnalysis, ModuleAnalyzer, StaticAnalyzer};
use crate::args::{BuildArgs, fix_build_args};
use crate::assembler::Assembler;
use crate::context::{BuildContext, PendingSubBuild};
use crate::dts::{DtsTransformer, NoopDtsTransformer};
use crate::engine::{BundleEngine, EnginePlatform, EngineRequest, VIRTUAL_ENTRY};
use crate::options::BuildOptions;
use crate::paths::{build_id, save_path, types_path};
use crate::policy::{BuildScope, DependencyKind};
use crate::registry::SubBuildRegistry;
use crate::result::{ESMBuildResult, filter_deps};
use crate::storage::Storage;
use crate::target::Target;
use crate::{Error, Result};

/// JavaScript reserved words; never valid as a named export binding.
const RESERVED: &[&str] = &[
    "await", "break", "case", "catch", "class", "const", "continue", "debugger", "default",
    "delete", "do", "else", "enum", "export", "extends", "false", "finally", "for", "function",
    "if", "implements", "import", "in", "instanceof", "interface", "let", "new", "null",
    "package", "private", "protected", "public", "return", "static", "super", "switch", "this",
    "throw", "true", "try", "typeof", "var", "void", "while", "with", "yield",
];

/// Collaborators shared by every task of a server.
#[derive(Clone)]
pub struct BuildServices {
    pub config: Arc<EsmdConfig>,
    pub installer: Arc<dyn Installer>,
    pub metadata: Arc<dyn MetadataResolver>,
    pub engine: Arc<dyn BundleEngine>,
    pub analyzer: Arc<dyn ModuleAnalyzer>,
    pub storage: Arc<dyn Storage>,
    pub dts: Arc<dyn DtsTransformer>,
}

impl BuildServices {
    /// Services that expect packages to be installed already and read
    /// versions out of `node_modules`.
    pub fn new(
        config: Arc<EsmdConfig>,
        engine: Arc<dyn BundleEngine>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            config,
            installer: Arc::new(PreinstalledInstaller),
            metadata: Arc::new(NodeModulesResolver::new()),
            engine,
            analyzer: Arc::new(StaticAnalyzer::new()),
            storage,
            dts: Arc::new(NoopDtsTransformer),
        }
    }

    pub fn with_installer(mut self, installer: Arc<dyn Installer>) -> Self {
        self.installer = installer;
        self
    }

    pub fn with_metadata(mut self, metadata: Arc<dyn MetadataResolver>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn ModuleAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn with_dts_transformer(mut self, dts: Arc<dyn DtsTransformer>) -> Self {
        self.dts = dts;
        self
    }
}

/// One build, plus the sub-builds it discovers.
pub struct BuildTask {
    pkg: Pkg,
    args: Arc<BuildArgs>,
    options: BuildOptions,
    services: BuildServices,
    registry: SubBuildRegistry,
}

/// Install location and manifest of the package being built.
struct Installed {
    package_dir: PathBuf,
    resolve_dir: PathBuf,
    npm: Arc<NpmPackageInfo>,
}

impl BuildTask {
    pub fn new(pkg: Pkg, args: BuildArgs, options: BuildOptions, services: BuildServices) -> Self {
        let args = fix_build_args(&args, &pkg);
        Self {
            pkg,
            args: Arc::new(args),
            options,
            services,
            registry: SubBuildRegistry::new(),
        }
    }

    /// Share a registry with other tasks of the same request.
    pub fn with_registry(mut self, registry: SubBuildRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &SubBuildRegistry {
        &self.registry
    }

    pub fn pkg(&self) -> &Pkg {
        &self.pkg
    }

    /// Storage key and URL tail of this build.
    pub fn id(&self) -> String {
        let prefix = self
            .args
            .encode_prefix(&self.pkg, self.options.target == Target::Types);
        build_id(
            &self.pkg,
            &prefix,
            self.options.target,
            self.options.dev,
            self.options.mode(),
        )
    }

    fn sub_task(&self, pkg: Pkg) -> BuildTask {
        BuildTask {
            pkg,
            args: Arc::clone(&self.args),
            options: self.options,
            services: self.services.clone(),
            registry: self.registry.clone(),
        }
    }

    /// Build this package, then every sub-build it claimed.
    ///
    /// Only this package's own failure is returned; failing sub-builds are
    /// logged. Claims made by a failing build are still built, since the
    /// registry keeps other builds from scheduling them again.
    pub async fn build(&self) -> Result<ESMBuildResult> {
        self.registry.try_register(&self.id());
        let (result, pending) = self.build_one().await;

        let mut queue: VecDeque<PendingSubBuild> = pending.into();
        while let Some(next) = queue.pop_front() {
            debug!(id = %next.id, "running sub-build");
            let (sub_result, more) = self.sub_task(next.pkg).build_one().await;
            if let Err(e) = sub_result {
                warn!(id = %next.id, error = %e, "sub-build failed");
            }
            queue.extend(more);
        }
        result
    }

    /// One build, and the sub-builds it claimed whether or not it succeeded.
    async fn build_one(&self) -> (Result<ESMBuildResult>, Vec<PendingSubBuild>) {
        let started = Instant::now();
        let id = self.id();
        let context = Arc::new(BuildContext::new(self.registry.clone()));

        let result = match self.install().await {
            Ok(installed) => self.run(&id, &installed, &context).await,
            Err(e) => Err(e),
        };
        if result.is_ok() {
            info!(
                pkg = %self.pkg,
                target = %self.options.target,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "built {id}"
            );
        }
        (result, context.take_pending())
    }

    async fn install(&self) -> Result<Installed> {
        let wd = self
            .services
            .config
            .work_dir
            .join("npm")
            .join(self.pkg.version_name());
        tokio::fs::create_dir_all(&wd).await.map_err(|e| Error::IoError {
            message: format!("Failed to create work directory {}", wd.display()),
            source: e,
        })?;
        self.services.installer.install(&wd, &self.pkg).await?;

        let dir = package_dir(&wd, &self.pkg.name);
        let dir = tokio::fs::canonicalize(&dir).await.unwrap_or(dir);
        let resolve_dir = install_root(&dir, &self.pkg.name).unwrap_or(wd);
        let npm = NpmPackageInfo::from_dir(&dir)?;
        Ok(Installed {
            package_dir: dir,
            resolve_dir,
            npm: Arc::new(npm),
        })
    }

    fn conditions(&self) -> Vec<String> {
        let mut conditions = self.args.conditions.clone();
        for condition in self.options.target.export_conditions() {
            if !conditions.iter().any(|c| c == condition) {
                conditions.push(condition.to_string());
            }
        }
        conditions
    }

    fn scope(&self, installed: &Installed, no_bundle: bool, entry: Option<PathBuf>) -> BuildScope {
        let config = &self.services.config;
        let deno_std_version = if self.args.deno_std_version.is_empty() {
            config.deno_std_version.clone()
        } else {
            self.args.deno_std_version.clone()
        };
        BuildScope {
            pkg: self.pkg.clone(),
            args: Arc::clone(&self.args),
            options: self.options,
            npm: Arc::clone(&installed.npm),
            no_bundle,
            cdn_base_path: config.cdn_base_path.clone(),
            deno_std_version,
            resolve_dir: installed.resolve_dir.clone(),
            entry,
            metadata: Arc::clone(&self.services.metadata),
        }
    }

    async fn run(
        &self,
        id: &str,
        installed: &Installed,
        context: &Arc<BuildContext>,
    ) -> Result<ESMBuildResult> {
        if self.pkg.sub_path.ends_with(".json") {
            if let Some(result) = self.build_json(id, installed).await? {
                return Ok(result);
            }
        }

        let conditions = self.conditions();
        let condition_refs: Vec<&str> = conditions.iter().map(String::as_str).collect();
        let analysis = self.services.analyzer.analyze(
            &installed.package_dir,
            &installed.npm,
            &self.pkg.sub_module,
            &condition_refs,
        )?;
        let dts = self.discover_types(&analysis, installed);

        if self.options.target == Target::Types {
            if dts.is_empty() {
                return Err(Error::UnresolvableEntry {
                    specifier: format!("{}.d.ts", self.pkg.import_path()),
                });
            }
            self.transform_dts(&dts).await;
            return Ok(ESMBuildResult {
                dts,
                types_only: analysis.types_only,
                ..Default::default()
            });
        }

        if analysis.types_only {
            self.transform_dts(&dts).await;
            let result = ESMBuildResult {
                dts,
                types_only: true,
                ..Default::default()
            };
            self.persist(id, &result).await;
            return Ok(result);
        }

        let no_bundle = self.options.no_bundle
            || installed.npm.side_effects.has_list()
            || installed.npm.disables_bundling();

        if let (true, Some(dep)) = (analysis.from_cjs, analysis.reexport.as_deref()) {
            let scope = self.scope(installed, no_bundle, None);
            return self.build_reexport(id, &scope, dep, dts, context).await;
        }

        let entry_file = analysis
            .entry
            .as_ref()
            .map(|e| installed.package_dir.join(&e.path).clean())
            .ok_or_else(|| Error::UnresolvableEntry {
                specifier: self.pkg.import_path(),
            })?;
        let entry_code = self.entry_code(&analysis);
        let entry = if entry_code.is_some() {
            VIRTUAL_ENTRY.to_string()
        } else {
            entry_file.to_string_lossy().into_owned()
        };

        let scope = Arc::new(self.scope(installed, no_bundle, Some(entry_file)));
        let request = EngineRequest {
            entry,
            cwd: installed.resolve_dir.clone(),
            platform: if self.options.target == Target::Node {
                EnginePlatform::Node
            } else {
                EnginePlatform::Browser
            },
            minify: !self.options.dev,
            conditions,
            main_fields: self
                .options
                .target
                .main_fields()
                .iter()
                .map(|f| f.to_string())
                .collect(),
            define: self.define(id, &installed.npm),
            es_target: self.options.target.es_version().to_string(),
            keep_names: self.args.keep_names,
            ignore_annotations: self.args.ignore_annotations,
        };

        let mut adapter =
            BuildAdapter::new(Arc::clone(&self.services.engine), Arc::clone(&scope), Arc::clone(context));
        if let Some(code) = entry_code {
            adapter = adapter.with_entry_code(code);
        }
        let output = adapter.run(request).await?;

        let records = context.snapshot();
        let assembled = Assembler::new(
            &scope,
            self.services.analyzer.as_ref(),
            self.services.storage.as_ref(),
            id,
        )
        .assemble(&output, &records)
        .await?;

        let named_exports = if self.args.exports.is_empty() || analysis.from_cjs {
            analysis.named_exports.clone()
        } else {
            self.args.exports.iter().cloned().collect()
        };
        let has_export_default = analysis.from_cjs
            || (analysis.has_default_export
                && (self.args.exports.is_empty() || self.args.exports.contains("default")));
        let result = ESMBuildResult {
            named_exports,
            has_export_default,
            from_cjs: analysis.from_cjs,
            dts,
            types_only: false,
            package_css: assembled.package_css,
            deps: filter_deps(records.imports.iter().chain(assembled.imports.iter())),
        };
        self.persist(id, &result).await;
        Ok(result)
    }

    /// `export default <json>;` with the file's own text, no bundler
    /// involved. `None` when the file does not exist, so the request is
    /// built like any other submodule.
    async fn build_json(&self, id: &str, installed: &Installed) -> Result<Option<ESMBuildResult>> {
        let file = installed.package_dir.join(&self.pkg.sub_path).clean();
        let json = match tokio::fs::read(&file).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(file = %file.display(), "no json file, building as a module");
                return Ok(None);
            }
            Err(e) => {
                return Err(Error::IoError {
                    message: format!("Failed to read {}", file.display()),
                    source: e,
                });
            }
        };
        let mut code = b"export default ".to_vec();
        code.extend_from_slice(&json);
        code.push(b';');
        self.services
            .storage
            .write_artifact(&save_path(id), &code)
            .await?;

        let result = ESMBuildResult {
            has_export_default: true,
            ..Default::default()
        };
        self.persist(id, &result).await;
        Ok(Some(result))
    }

    /// The entry is `module.exports = require("<dep>")`: re-export the
    /// dependency's build instead of bundling a copy of it.
    async fn build_reexport(
        &self,
        id: &str,
        scope: &BuildScope,
        dep: &str,
        dts: String,
        context: &BuildContext,
    ) -> Result<ESMBuildResult> {
        let external = scope.resolve_external(dep);
        if let DependencyKind::SubBuild { id: sub_id, pkg } = &external.kind {
            context.schedule_sub_build(sub_id, pkg);
        }
        let has_default = self.dependency_has_default(scope, dep);

        let mut code = format!("export * from \"{}\";\n", external.path);
        if has_default {
            code.push_str(&format!("export {{ default }} from \"{}\";\n", external.path));
        }
        self.services
            .storage
            .write_artifact(&save_path(id), code.as_bytes())
            .await?;

        let result = ESMBuildResult {
            has_export_default: has_default,
            from_cjs: true,
            dts,
            deps: filter_deps([&external.path]),
            ..Default::default()
        };
        self.persist(id, &result).await;
        Ok(result)
    }

    /// CommonJS dependencies always get a default export; unknown ones are
    /// assumed to have one.
    fn dependency_has_default(&self, scope: &BuildScope, dep: &str) -> bool {
        let dep_pkg = scope.dependency_pkg(dep);
        let dir = package_dir(&scope.resolve_dir, &dep_pkg.name);
        let Ok(info) = NpmPackageInfo::from_dir(&dir) else {
            return true;
        };
        let conditions = self.options.target.export_conditions();
        match self
            .services
            .analyzer
            .analyze(&dir, &info, &dep_pkg.sub_module, conditions)
        {
            Ok(analysis) => analysis.from_cjs || analysis.has_default_export,
            Err(e) => {
                debug!(dep, error = %e, "dependency analysis failed");
                true
            }
        }
    }

    /// Source of the virtual entry module, `None` to build from the entry
    /// file directly.
    ///
    /// CommonJS entries are always wrapped; an export subset only applies to
    /// ES module entries.
    fn entry_code(&self, analysis: &ModuleAnalysis) -> Option<String> {
        let import_path = self.pkg.import_path();
        if analysis.from_cjs {
            let names: Vec<&str> = analysis
                .named_exports
                .iter()
                .map(String::as_str)
                .filter(|n| *n != "__esModule" && is_identifier(n))
                .collect();
            let mut code = format!("import * as __module from \"{import_path}\";\n");
            if !names.is_empty() {
                code.push_str(&format!("export const {{ {} }} = __module;\n", names.join(", ")));
            }
            code.push_str("const { default: __default, ...__rest } = __module;\n");
            code.push_str("export default (__default !== undefined ? __default : __rest);\n");
            // names the lexer missed still come through
            code.push_str(&format!("export * from \"{import_path}\";\n"));
            return Some(code);
        }
        if !self.args.exports.is_empty() {
            let names: Vec<&str> = self.args.exports.iter().map(String::as_str).collect();
            return Some(format!(
                "export {{ {} }} from \"{import_path}\";\n",
                names.join(", ")
            ));
        }
        None
    }

    /// Compile-time replacements pointing Node globals at the shims the
    /// assembler injects.
    fn define(&self, id: &str, npm: &NpmPackageInfo) -> Vec<(String, String)> {
        let target = self.options.target;
        if target == Target::Node {
            return Vec::new();
        }
        let dir = id.rsplit_once('/').map_or(id, |(dir, _)| dir);
        let excluded = |name: &str| {
            !target.is_server() && npm.browser.get(name).is_some_and(|v| v.is_empty())
        };

        let mut define: Vec<(&str, String)> = vec![
            ("__filename", format!("\"/_virtual/esmd/{id}\"")),
            ("__dirname", format!("\"/_virtual/esmd/{dir}\"")),
            ("setImmediate", "__setImmediate$".into()),
            ("clearImmediate", "clearTimeout".into()),
            ("require.resolve", "__rResolve$".into()),
            (
                "process.env.NODE_ENV",
                format!("\"{}\"", self.options.node_env()),
            ),
            ("global", "__global$".into()),
            ("global.setImmediate", "__setImmediate$".into()),
            ("global.clearImmediate", "clearTimeout".into()),
            ("global.require.resolve", "__rResolve$".into()),
            (
                "global.process.env.NODE_ENV",
                format!("\"{}\"", self.options.node_env()),
            ),
        ];
        if !excluded("process") {
            define.push(("process", "__Process$".into()));
            define.push(("global.process", "__Process$".into()));
        }
        if !excluded("buffer") {
            define.push(("Buffer", "__Buffer$".into()));
            define.push(("global.Buffer", "__Buffer$".into()));
        }
        define
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    /// URL of the declarations for this build, empty when there are none.
    fn discover_types(&self, analysis: &ModuleAnalysis, installed: &Installed) -> String {
        let cdn = &self.services.config.cdn_base_path;
        if let Some(entry) = &analysis.entry {
            if !entry.types.is_empty() {
                let prefix = self.args.encode_prefix(&self.pkg, true);
                return format!("{cdn}/{}", types_path(&self.pkg, &prefix, &entry.types));
            }
        }
        if self.pkg.name.starts_with("@types/") {
            return String::new();
        }

        let types_name = types_package_name(&self.pkg.name);
        let mut ranges: Vec<String> = Vec::new();
        if let Some(pinned) = self.args.deps.get(&types_name) {
            ranges.push(pinned.clone());
        }
        if let Ok(version) = semver::Version::parse(&self.pkg.version) {
            ranges.push(format!("~{}.{}", version.major, version.minor));
            ranges.push(format!("~{}", version.major));
        }
        ranges.push("latest".to_string());

        for range in ranges {
            let Ok(info) = self
                .services
                .metadata
                .resolve(&installed.resolve_dir, &types_name, &range)
            else {
                continue;
            };
            let types_pkg = Pkg::new(types_name.clone(), info.version.clone());
            let prefix = fix_build_args(&self.args.dependency_args(), &types_pkg)
                .encode_prefix(&types_pkg, true);
            let entry = match info.types_entry() {
                "" => "index.d.ts",
                entry => entry,
            };
            debug!(pkg = %self.pkg, types = %types_pkg, range, "using DefinitelyTyped declarations");
            return format!("{cdn}/{}", types_path(&types_pkg, &prefix, entry));
        }
        String::new()
    }

    async fn transform_dts(&self, dts: &str) {
        if dts.is_empty() {
            return;
        }
        match self.services.dts.transform(&self.pkg, dts).await {
            Ok(count) => debug!(pkg = %self.pkg, dts, count, "transformed declarations"),
            Err(e) => warn!(pkg = %self.pkg, dts, error = %e, "failed to transform declarations"),
        }
    }

    async fn persist(&self, id: &str, result: &ESMBuildResult) {
        let bytes = match result.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(id, error = %e, "failed to encode build manifest");
                return;
            }
        };
        if let Err(e) = self.services.storage.put(id, &bytes).await {
            error!(id, error = %e, "failed to store build manifest");
        }
    }
}

/// Directory holding the `node_modules` a package was installed into.
fn install_root(package_dir: &Path, name: &str) -> Option<PathBuf> {
    let mut dir = package_dir;
    for _ in name.split('/') {
        dir = dir.parent()?;
    }
    if dir.file_name()? != "node_modules" {
        return None;
    }
    dir.parent().map(Path::to_path_buf)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_alphabetic() || first == '_' || first == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
        && !RESERVED.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_root() {
        assert_eq!(
            install_root(Path::new("/w/node_modules/react"), "react"),
            Some(PathBuf::from("/w"))
        );
        assert_eq!(
            install_root(
                Path::new("/w/node_modules/.pnpm/node_modules/@babel/core"),
                "@babel/core"
            ),
            Some(PathBuf::from("/w/node_modules/.pnpm"))
        );
        assert_eq!(install_root(Path::new("/w/lib/react"), "react"), None);
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("debounce"));
        assert!(is_identifier("$_a1"));
        assert!(!is_identifier("1a"));
        assert!(!is_identifier("a-b"));
        assert!(!is_identifier("default"));
        assert!(!is_identifier(""));
    }
}
