//! Shared test utilities for esmd-bundler tests
//!
//! A scripted [`FakeEngine`] stands in for Rolldown: it walks a fixed list of
//! imports through the resolve hooks and emits a chunk from what they
//! decide. Imports and failures can be scoped to one entry file, so a single
//! engine can script a parent build and its sub-builds. [`Fixture`] lays out `node_modules` trees the way an installer
//! would.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use esmd_bundler::diagnostics::ExtractedDiagnostic;
use esmd_bundler::engine::{HookDecision, ResolveHooks};
use esmd_bundler::{
    BuildServices, BundleEngine, EngineOutput, EngineRequest, FsStorage, ImportKind, OutputFile,
};
use esmd_config::EsmdConfig;
use tempfile::TempDir;

pub const SOURCE_MAP: &str = r#"{"version":3,"sources":["index.js"],"names":[],"mappings":"AAAA"}"#;

/// Bundler stand-in driven by a script of imports.
#[derive(Default)]
pub struct FakeEngine {
    /// `(entry suffix, specifier, kind)`; no suffix applies to every entry.
    imports: Vec<(Option<String>, String, ImportKind)>,
    body: String,
    unresolvable: Vec<String>,
    /// `(specifier, export)` a virtual module must provide.
    required_exports: Vec<(String, String)>,
    /// `(entry suffix, diagnostic)`, raised after the imports resolved.
    entry_failures: Vec<(String, ExtractedDiagnostic)>,
    source_map: bool,
    extra_files: Vec<OutputFile>,
    fail: Option<ExtractedDiagnostic>,
    calls: AtomicUsize,
    requests: Mutex<Vec<EngineRequest>>,
    entry_modules: Mutex<Vec<String>>,
    decisions: Mutex<Vec<(String, HookDecision)>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every pass resolves `specifier` from the entry module.
    pub fn import(mut self, specifier: &str, kind: ImportKind) -> Self {
        self.imports.push((None, specifier.to_string(), kind));
        self
    }

    /// Only passes whose entry ends with `entry_suffix` resolve `specifier`.
    pub fn import_in(mut self, entry_suffix: &str, specifier: &str, kind: ImportKind) -> Self {
        self.imports
            .push((Some(entry_suffix.to_string()), specifier.to_string(), kind));
        self
    }

    /// Fail passes whose entry ends with `entry_suffix`, after their imports
    /// were resolved.
    pub fn fail_in(mut self, entry_suffix: &str, diagnostic: ExtractedDiagnostic) -> Self {
        self.entry_failures
            .push((entry_suffix.to_string(), diagnostic));
        self
    }

    /// Report a missing export when the virtual module behind `specifier`
    /// does not declare `export const <name>`.
    pub fn requires_export(mut self, specifier: &str, name: &str) -> Self {
        self.required_exports
            .push((specifier.to_string(), name.to_string()));
        self
    }

    /// Code the chunk starts with, ahead of the import statements.
    pub fn body(mut self, code: &str) -> Self {
        self.body = code.to_string();
        self
    }

    /// Fail the pass when the hooks leave `specifier` to default resolution.
    pub fn unresolvable(mut self, specifier: &str) -> Self {
        self.unresolvable.push(specifier.to_string());
        self
    }

    pub fn source_map(mut self) -> Self {
        self.source_map = true;
        self
    }

    pub fn file(mut self, path: &str, contents: &str) -> Self {
        self.extra_files.push(OutputFile::new(path, contents));
        self
    }

    /// Fail every pass with `diagnostic`.
    pub fn always_fail(mut self, diagnostic: ExtractedDiagnostic) -> Self {
        self.fail = Some(diagnostic);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<EngineRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    /// Source of the last virtual entry module the engine loaded.
    pub fn last_entry_module(&self) -> Option<String> {
        self.entry_modules.lock().unwrap().last().cloned()
    }

    pub fn decision(&self, specifier: &str) -> Option<HookDecision> {
        self.decisions
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(s, _)| s == specifier)
            .map(|(_, d)| d.clone())
    }

    fn resolve(
        &self,
        hooks: &dyn ResolveHooks,
        specifier: &str,
        kind: ImportKind,
        importer: Option<&str>,
    ) -> HookDecision {
        let decision = hooks.resolve(specifier, kind, importer);
        self.decisions
            .lock()
            .unwrap()
            .push((specifier.to_string(), decision.clone()));
        decision
    }
}

fn load(hooks: &dyn ResolveHooks, id: &str) -> Result<String, Vec<ExtractedDiagnostic>> {
    hooks
        .load(id)
        .map(Option::unwrap_or_default)
        .map_err(|e| vec![ExtractedDiagnostic::other(e.to_string())])
}

/// Specifiers of the `from "<x>"` clauses in a synthesized entry.
fn from_clauses(code: &str) -> Vec<String> {
    code.split("from \"")
        .skip(1)
        .filter_map(|rest| rest.split('"').next())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl BundleEngine for FakeEngine {
    async fn bundle(
        &self,
        request: EngineRequest,
        hooks: Arc<dyn ResolveHooks>,
    ) -> Result<EngineOutput, Vec<ExtractedDiagnostic>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if let Some(diagnostic) = &self.fail {
            return Err(vec![diagnostic.clone()]);
        }

        let hooks = hooks.as_ref();
        let mut code = String::new();
        let importer = match self.resolve(hooks, &request.entry, ImportKind::Import, None) {
            HookDecision::Virtual(id) => {
                let entry = load(hooks, &id)?;
                self.entry_modules.lock().unwrap().push(entry.clone());
                let mut importer = id.clone();
                for specifier in from_clauses(&entry) {
                    if let HookDecision::File(path) =
                        self.resolve(hooks, &specifier, ImportKind::Import, Some(&id))
                    {
                        importer = path.to_string_lossy().into_owned();
                    }
                }
                importer
            }
            HookDecision::File(path) => path.to_string_lossy().into_owned(),
            other => {
                return Err(vec![ExtractedDiagnostic::other(format!(
                    "unexpected entry decision {other:?}"
                ))]);
            }
        };

        let scripted = self.imports.iter().filter(|(scope, _, _)| {
            scope
                .as_ref()
                .is_none_or(|suffix| request.entry.ends_with(suffix.as_str()))
        });
        for (_, specifier, kind) in scripted {
            match self.resolve(hooks, specifier, *kind, Some(&importer)) {
                HookDecision::External(path) => match kind {
                    ImportKind::Import => code.push_str(&format!("import \"{path}\";\n")),
                    ImportKind::DynamicImport => code.push_str(&format!("import(\"{path}\");\n")),
                    ImportKind::Require => code.push_str(&format!("__require(\"{path}\");\n")),
                },
                HookDecision::Default if self.unresolvable.contains(specifier) => {
                    return Err(vec![ExtractedDiagnostic::unresolved_import(
                        specifier.clone(),
                        importer.clone(),
                    )]);
                }
                HookDecision::Virtual(id) => {
                    let module = load(hooks, &id)?;
                    let missing = self
                        .required_exports
                        .iter()
                        .find(|(s, name)| s == specifier && !module.contains(&format!("export const {name} ")));
                    if let Some((_, name)) = missing {
                        return Err(vec![ExtractedDiagnostic::missing_export(name.clone(), id)]);
                    }
                    code.push_str(&module);
                    code.push('\n');
                }
                HookDecision::File(_) | HookDecision::Default => {}
            }
        }

        if let Some((_, diagnostic)) = self
            .entry_failures
            .iter()
            .find(|(suffix, _)| request.entry.ends_with(suffix.as_str()))
        {
            return Err(vec![diagnostic.clone()]);
        }

        code.insert_str(0, &self.body);
        code.push_str("\n//# sourceMappingURL=index.js.map\n");

        let mut files = vec![OutputFile::new("index.js", code)];
        if self.source_map {
            files.push(OutputFile::new("index.js.map", SOURCE_MAP));
        }
        files.extend(self.extra_files.iter().cloned());
        Ok(EngineOutput {
            files,
            warnings: Vec::new(),
        })
    }
}

/// A temporary work and storage directory.
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn work_dir(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.dir.path().join("storage")
    }

    /// Where a build of `name@version` installs its tree.
    pub fn install_root(&self, version_name: &str) -> PathBuf {
        self.work_dir().join("npm").join(version_name)
    }

    /// Write `<root>/node_modules/<rel>` for the build of `version_name`.
    pub fn write(&self, version_name: &str, rel: &str, contents: &str) -> &Self {
        let path = self.install_root(version_name).join("node_modules").join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
        self
    }

    pub fn config(&self) -> EsmdConfig {
        EsmdConfig {
            work_dir: self.work_dir(),
            storage_dir: self.storage_dir(),
            ..Default::default()
        }
    }

    pub fn services(&self, engine: Arc<FakeEngine>) -> BuildServices {
        let storage = FsStorage::open(&self.storage_dir()).unwrap();
        BuildServices::new(Arc::new(self.config()), engine, Arc::new(storage))
    }

    /// Contents of a stored artifact, relative to the storage root.
    pub fn artifact(&self, path: &str) -> Option<String> {
        std::fs::read_to_string(self.storage_dir().join(path)).ok()
    }
}

pub fn assert_contains(code: &str, needle: &str) {
    assert!(
        code.contains(needle),
        "Expected output to contain '{needle}', but it didn't.\nOutput:\n{code}"
    );
}

pub fn assert_not_contains(code: &str, needle: &str) {
    assert!(
        !code.contains(needle),
        "Expected output NOT to contain '{needle}', but it did.\nOutput:\n{code}"
    );
}

pub fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
