//! Engine driver with a bounded retry loop.
//!
//! Every pass runs against an [`Attempt`]: the implicit externals and
//! browser-exclude stub exports learned from earlier failures. A failing
//! pass is retried only when its first error teaches the attempt something
//! new, so the loop ends once the attempt stops growing.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, warn};

use crate::context::BuildContext;
use crate::diagnostics::{
    BROWSER_EXCLUDE_NAMESPACE, DiagnosticContext, DiagnosticKind, ExtractedDiagnostic,
    browser_exclude_key,
};
use crate::engine::{BundleEngine, EngineOutput, EngineRequest, HookDecision, ResolveHooks, VIRTUAL_ENTRY};
use crate::policy::{BuildScope, DependencyKind, ImportKind, ResolutionPolicy, ResolveAction, ResolveRequest};
use crate::{Error, Result};

const WASM_NAMESPACE: &str = "wasm:";

/// State learned from failed passes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attempt {
    /// Specifiers the engine could not resolve; externalized next time.
    pub implicit_externals: BTreeSet<String>,
    /// Named exports each browser-exclude stub must provide.
    pub browser_exclude: BTreeMap<String, BTreeSet<String>>,
}

/// Result of one engine pass.
#[derive(Debug)]
pub enum Outcome {
    Success(EngineOutput),
    Retry(Attempt),
    Fatal(Error),
}

/// Decide what a failed pass means. Only the first diagnostic is looked at.
pub fn classify_failure(
    own_import_path: &str,
    attempt: &Attempt,
    diagnostics: Vec<ExtractedDiagnostic>,
) -> Outcome {
    let mut next = attempt.clone();
    let learned = match diagnostics.first().and_then(|d| d.context.as_ref()) {
        Some(DiagnosticContext::UnresolvedImport { specifier, .. }) => {
            if specifier == own_import_path {
                return Outcome::Fatal(Error::UnresolvableEntry {
                    specifier: specifier.clone(),
                });
            }
            next.implicit_externals.insert(specifier.clone())
        }
        Some(DiagnosticContext::MissingExport {
            export_name,
            module_id,
        }) => match browser_exclude_key(module_id) {
            Some(key) if export_name != "default" => next
                .browser_exclude
                .entry(key.to_string())
                .or_default()
                .insert(export_name.clone()),
            _ => false,
        },
        _ => false,
    };
    if learned {
        Outcome::Retry(next)
    } else {
        Outcome::Fatal(Error::Bundler(diagnostics))
    }
}

/// Runs the engine until a pass succeeds or fails for good.
pub struct BuildAdapter {
    engine: Arc<dyn BundleEngine>,
    scope: Arc<BuildScope>,
    context: Arc<BuildContext>,
    entry_code: Option<Arc<str>>,
}

impl BuildAdapter {
    pub fn new(engine: Arc<dyn BundleEngine>, scope: Arc<BuildScope>, context: Arc<BuildContext>) -> Self {
        Self {
            engine,
            scope,
            context,
            entry_code: None,
        }
    }

    /// Serve `code` as the module behind [`VIRTUAL_ENTRY`].
    pub fn with_entry_code(mut self, code: impl Into<Arc<str>>) -> Self {
        self.entry_code = Some(code.into());
        self
    }

    pub async fn run(&self, request: EngineRequest) -> Result<EngineOutput> {
        let own_import_path = self.scope.pkg.import_path();
        let mut attempt = Attempt::default();
        let mut pass = 1usize;
        loop {
            self.context.reset();
            let hooks = Arc::new(PassHooks {
                policy: ResolutionPolicy::new(Arc::clone(&self.scope), Arc::new(attempt.clone())),
                context: Arc::clone(&self.context),
                entry_code: self.entry_code.clone(),
            });
            let outcome = match self.engine.bundle(request.clone(), hooks).await {
                Ok(output) => Outcome::Success(output),
                Err(diagnostics) => classify_failure(&own_import_path, &attempt, diagnostics),
            };
            match outcome {
                Outcome::Success(output) => {
                    for warning in &output.warnings {
                        if warning.kind == DiagnosticKind::UnresolvedImport {
                            warn!(pkg = %self.scope.pkg, message = %warning.message, "unresolved import");
                        }
                    }
                    debug!(pkg = %self.scope.pkg, passes = pass, "bundled");
                    return Ok(output);
                }
                Outcome::Retry(next) => {
                    debug!(
                        pkg = %self.scope.pkg,
                        pass,
                        implicit_externals = next.implicit_externals.len(),
                        "retrying build"
                    );
                    attempt = next;
                    pass += 1;
                }
                Outcome::Fatal(error) => return Err(error),
            }
        }
    }
}

/// Per-pass hooks: ask the policy, apply its decision to the context.
pub struct PassHooks {
    policy: ResolutionPolicy,
    context: Arc<BuildContext>,
    entry_code: Option<Arc<str>>,
}

impl PassHooks {
    fn resolve_dir(&self, importer: &str) -> PathBuf {
        if importer.starts_with('\0') {
            return self.policy.scope().resolve_dir.clone();
        }
        Path::new(importer)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.policy.scope().resolve_dir.clone())
    }

    fn browser_exclude_module(&self, key: &str) -> String {
        let mut code = String::from("export default {};");
        for name in self.policy.attempt().browser_exclude.get(key).into_iter().flatten() {
            code.push_str(&format!("export const {name} = {{}};"));
        }
        code
    }

    fn wasm_module(&self, path: &str) -> Result<String> {
        let bytes = std::fs::read(path).map_err(|e| Error::IoError {
            message: format!("Failed to read {path}"),
            source: e,
        })?;
        self.context.mark_embedded_wasm();
        Ok(format!(
            "export default new WebAssembly.Module(Uint8Array.from(atob('{}'), c => c.charCodeAt(0)));",
            STANDARD.encode(bytes)
        ))
    }
}

impl ResolveHooks for PassHooks {
    fn resolve(&self, specifier: &str, kind: ImportKind, importer: Option<&str>) -> HookDecision {
        let Some(importer) = importer else {
            return if specifier == VIRTUAL_ENTRY {
                HookDecision::Virtual(specifier.to_string())
            } else {
                HookDecision::File(PathBuf::from(specifier))
            };
        };
        let request = ResolveRequest::new(specifier, kind, self.resolve_dir(importer));
        match self.policy.resolve(&request) {
            ResolveAction::Bundle => HookDecision::Default,
            ResolveAction::BundleFile(path) => HookDecision::File(path),
            ResolveAction::External(path) | ResolveAction::Reject(path) => HookDecision::External(path),
            ResolveAction::Dependency(dep) => {
                if let DependencyKind::SubBuild { id, pkg } = &dep.kind {
                    self.context.schedule_sub_build(id, pkg);
                }
                HookDecision::External(self.context.record_external(kind, specifier, &dep.path))
            }
            ResolveAction::BrowserExclude(key) => {
                HookDecision::Virtual(format!("\0{BROWSER_EXCLUDE_NAMESPACE}{key}"))
            }
            ResolveAction::Wasm(path) => {
                HookDecision::Virtual(format!("\0{WASM_NAMESPACE}{}", path.to_string_lossy()))
            }
        }
    }

    fn load(&self, id: &str) -> Result<Option<String>> {
        if id == VIRTUAL_ENTRY {
            return Ok(self.entry_code.as_deref().map(str::to_string));
        }
        let Some(id) = id.strip_prefix('\0') else {
            return Ok(None);
        };
        if let Some(key) = id.strip_prefix(BROWSER_EXCLUDE_NAMESPACE) {
            return Ok(Some(self.browser_exclude_module(key)));
        }
        if let Some(path) = id.strip_prefix(WASM_NAMESPACE) {
            return self.wasm_module(path).map(Some);
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::ExtractedDiagnostic;

    #[test]
    fn test_unresolved_import_retries_once() {
        let attempt = Attempt::default();
        let diags = vec![ExtractedDiagnostic::unresolved_import("./gen.js", "/pkg/index.js")];
        let Outcome::Retry(next) = classify_failure("pkg", &attempt, diags.clone()) else {
            panic!("expected a retry");
        };
        assert!(next.implicit_externals.contains("./gen.js"));

        // the same failure again teaches nothing
        assert!(matches!(
            classify_failure("pkg", &next, diags),
            Outcome::Fatal(Error::Bundler(_))
        ));
    }

    #[test]
    fn test_unresolved_own_entry_is_fatal() {
        let diags = vec![ExtractedDiagnostic::unresolved_import("pkg/sub", "\0esmd:entry")];
        assert!(matches!(
            classify_failure("pkg/sub", &Attempt::default(), diags),
            Outcome::Fatal(Error::UnresolvableEntry { specifier }) if specifier == "pkg/sub"
        ));
    }

    #[test]
    fn test_missing_export_on_browser_stub() {
        let diags = vec![ExtractedDiagnostic::missing_export(
            "nextTick",
            "\0browser-exclude:process",
        )];
        let Outcome::Retry(next) = classify_failure("pkg", &Attempt::default(), diags) else {
            panic!("expected a retry");
        };
        assert_eq!(
            next.browser_exclude.get("process").map(|s| s.len()),
            Some(1)
        );

        let default = vec![ExtractedDiagnostic::missing_export(
            "default",
            "\0browser-exclude:process",
        )];
        assert!(matches!(
            classify_failure("pkg", &Attempt::default(), default),
            Outcome::Fatal(_)
        ));

        let elsewhere = vec![ExtractedDiagnostic::missing_export("x", "/pkg/a.js")];
        assert!(matches!(
            classify_failure("pkg", &Attempt::default(), elsewhere),
            Outcome::Fatal(_)
        ));
    }

    #[test]
    fn test_only_first_error_counts() {
        let diags = vec![
            ExtractedDiagnostic::other("parse failure"),
            ExtractedDiagnostic::unresolved_import("./gen.js", "/pkg/index.js"),
        ];
        assert!(matches!(
            classify_failure("pkg", &Attempt::default(), diags),
            Outcome::Fatal(Error::Bundler(d)) if d.len() == 2
        ));
    }
}
