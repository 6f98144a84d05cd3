//! Output assembly: turns the engine's chunk into the module that is served.
//!
//! The header prepended to the chunk carries a banner, Node global shims for
//! the placeholders the define map introduced and a `require()` dispatcher.
//! Every header line shifts the source map, so the map's `mappings` get the
//! same number of leading `;`. A deprecation warning goes after the code.

use std::path::Path;
use std::sync::LazyLock;

use esmd_npm::{NpmPackageInfo, Pkg, package_dir};
use regex::Regex;
use tracing::{debug, warn};

use crate::analyzer::ModuleAnalyzer;
use crate::builtins::is_node_builtin;
use crate::context::Records;
use crate::diagnostics::ExtractedDiagnostic;
use crate::engine::{EngineOutput, OutputFile};
use crate::paths::save_path;
use crate::policy::BuildScope;
use crate::storage::Storage;
use crate::target::Target;
use crate::{Error, Result};

/// A `var x = <callee>` right before a `("<spec>")` call.
static VAR_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:var|let|const)\s+([\w$]+)\s*=\s*[\w$]+$").expect("valid regex")
});

/// How far back from a require call the `var x =` binding is looked for.
const VAR_CALL_WINDOW: usize = 128;

/// What assembling wrote, beyond the JavaScript artifact itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assembled {
    /// A `.css` artifact was written.
    pub package_css: bool,
    /// Modules the injected header imports.
    pub imports: Vec<String>,
    /// Lines the served module gained over the engine's chunk.
    pub source_map_offset: usize,
}

/// `/* esmd - rolldown bundle(<pkg>) <target> <production|development> */`
pub fn banner(pkg: &Pkg, target: Target, dev: bool) -> String {
    let env = if dev { "development" } else { "production" };
    format!("/* esmd - rolldown bundle({pkg}) {target} {env} */\n")
}

/// Prefix a source map's `mappings` with `offset` empty lines.
pub fn shift_mappings(map: &[u8], offset: usize) -> serde_json::Result<Vec<u8>> {
    let mut map: serde_json::Value = serde_json::from_slice(map)?;
    if offset > 0 {
        if let Some(serde_json::Value::String(mappings)) = map.get_mut("mappings") {
            mappings.insert_str(0, &";".repeat(offset));
        }
    }
    serde_json::to_vec(&map)
}

fn strip_source_map_comment(code: &str) -> &str {
    let trimmed = code.trim_end();
    match trimmed.rfind("//# sourceMappingURL=") {
        Some(pos) if !trimmed[pos..].contains('\n') => trimmed[..pos].trim_end(),
        _ => code,
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// `name(` appears as a call, not as the tail of a longer identifier.
fn is_called(code: &str, name: &str) -> bool {
    let pattern = format!("{name}(");
    code.match_indices(&pattern).any(|(pos, _)| {
        !code[..pos]
            .chars()
            .next_back()
            .is_some_and(|c| is_ident_char(c) || c == '.')
    })
}

/// The required module is bound with `var x = require("<spec>")` and then
/// called as `x(...)`, so it must stay a plain function.
fn is_called_binding(code: &str, specifier: &str) -> bool {
    let needle = format!("(\"{specifier}\")");
    code.match_indices(&needle).any(|(pos, _)| {
        let mut start = pos.saturating_sub(VAR_CALL_WINDOW);
        while !code.is_char_boundary(start) {
            start -= 1;
        }
        VAR_CALL
            .captures(&code[start..pos])
            .and_then(|caps| caps.get(1))
            .is_some_and(|name| is_called(code, name.as_str()))
    })
}

/// Writes the served module, its stylesheet and its source map.
pub struct Assembler<'a> {
    scope: &'a BuildScope,
    analyzer: &'a dyn ModuleAnalyzer,
    storage: &'a dyn Storage,
    id: &'a str,
}

impl<'a> Assembler<'a> {
    pub fn new(
        scope: &'a BuildScope,
        analyzer: &'a dyn ModuleAnalyzer,
        storage: &'a dyn Storage,
        id: &'a str,
    ) -> Self {
        Self {
            scope,
            analyzer,
            storage,
            id,
        }
    }

    pub async fn assemble(&self, output: &EngineOutput, records: &Records) -> Result<Assembled> {
        let Some(chunk) = output
            .files
            .iter()
            .find(|f| f.path.ends_with(".js") || f.path.ends_with(".mjs"))
        else {
            return Err(Error::Bundler(vec![ExtractedDiagnostic::other(format!(
                "no JavaScript output for {}",
                self.scope.pkg
            ))]));
        };

        let raw = String::from_utf8_lossy(&chunk.contents);
        let mut code = strip_source_map_comment(&raw);
        let mut shebang = false;
        if code.starts_with("#!") {
            code = code.split_once('\n').map_or("", |(_, rest)| rest);
            shebang = true;
        }

        let mut assembled = Assembled::default();
        let options = &self.scope.options;
        let mut header = banner(&self.scope.pkg, options.target, options.dev);
        if options.target != Target::Node {
            header.push_str(&self.shims(code, &mut assembled.imports));
        }
        header.push_str(&self.require_dispatcher(code, &records.requires));
        assembled.source_map_offset = header.matches('\n').count().saturating_sub(usize::from(shebang));

        let mut js = header;
        js.push_str(code);
        let deprecation = deprecation_banner(&self.scope.npm);
        if !deprecation.is_empty() {
            if !js.ends_with('\n') {
                js.push('\n');
            }
            js.push_str(&deprecation);
        }
        let map = output
            .files
            .iter()
            .find(|f| f.path == format!("{}.map", chunk.path));
        let write_map = map.is_some() && !records.embedded_wasm;
        if write_map {
            let basename = Path::new(self.id)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !js.ends_with('\n') {
                js.push('\n');
            }
            js.push_str(&format!("//# sourceMappingURL={basename}.map"));
        }

        let js_path = save_path(self.id);
        self.storage.write_artifact(&js_path, js.as_bytes()).await?;

        let css: Vec<&OutputFile> = output.files.iter().filter(|f| f.path.ends_with(".css")).collect();
        if !css.is_empty() {
            let contents: Vec<u8> = css.iter().flat_map(|f| f.contents.iter().copied()).collect();
            let css_path = format!("{}.css", js_path.strip_suffix(".js").unwrap_or(js_path.as_str()));
            self.storage.write_artifact(&css_path, &contents).await?;
            assembled.package_css = true;
        }

        if let (Some(map), true) = (map, write_map) {
            match shift_mappings(&map.contents, assembled.source_map_offset) {
                Ok(fixed) => {
                    if let Err(e) = self.storage.write_artifact(&format!("{js_path}.map"), &fixed).await {
                        warn!(id = self.id, error = %e, "failed to store source map");
                    }
                }
                Err(e) => warn!(id = self.id, error = %e, "failed to rewrite source map"),
            }
        }

        Ok(assembled)
    }

    /// Shim imports and declarations for the Node globals `code` references.
    fn shims(&self, code: &str, imports: &mut Vec<String>) -> String {
        let mut header = String::new();
        if code.contains("__Process$") && !self.browser_excludes("process") {
            let path = self.scope.resolve_external("process").path;
            header.push_str(&format!("import __Process$ from \"{path}\";\n"));
            imports.push(path);
        }
        if code.contains("__Buffer$") && !self.browser_excludes("buffer") {
            let path = self.scope.resolve_external("buffer").path;
            header.push_str(&format!("import {{ Buffer as __Buffer$ }} from \"{path}\";\n"));
            imports.push(path);
        }
        if code.contains("__global$") {
            header.push_str(
                "var __global$ = globalThis || (typeof window !== \"undefined\" ? window : self);\n",
            );
        }
        if code.contains("__setImmediate$") {
            header.push_str("var __setImmediate$ = (cb, ...args) => setTimeout(cb, 0, ...args);\n");
        }
        if code.contains("__rResolve$") {
            header.push_str("var __rResolve$ = p => p;\n");
        }
        header
    }

    /// The `browser` map replaces the builtin with nothing.
    fn browser_excludes(&self, name: &str) -> bool {
        !self.scope.target().is_server()
            && self.scope.npm.browser.get(name).is_some_and(|v| v.is_empty())
    }

    fn require_dispatcher(&self, code: &str, requires: &[(String, String)]) -> String {
        if requires.is_empty() {
            return String::new();
        }
        let mut header = String::new();
        let mut cases = String::new();
        let mut seen: Vec<&str> = Vec::new();
        for (i, (specifier, path)) in requires.iter().enumerate() {
            header.push_str(&format!("import * as __{i:x}$ from \"{path}\";\n"));
            if seen.contains(&specifier.as_str()) {
                continue;
            }
            seen.push(specifier);
            let wrap = if self.is_es_module(code, specifier, path) { "c" } else { "e" };
            cases.push_str(&format!("case\"{specifier}\":return {wrap}(__{i:x}$);"));
        }
        header.push_str(
            "var require=n=>{const e=m=>typeof m.default<\"u\"?m.default:m,c=m=>Object.assign({},m);switch(n){",
        );
        header.push_str(&cases);
        header.push_str("default:throw new Error(\"module \\\"\"+n+\"\\\" not found\");}};\n");
        header
    }

    /// Whether `require("<specifier>")` should see the module namespace
    /// rather than its default export.
    fn is_es_module(&self, code: &str, specifier: &str, path: &str) -> bool {
        if code.contains(&format!("(\"{specifier}\").default")) {
            return true;
        }
        if is_called_binding(code, specifier) {
            return false;
        }
        if !path.starts_with('/') || is_node_builtin(specifier) {
            return false;
        }
        let dep = self.scope.dependency_pkg(specifier);
        let dir = package_dir(&self.scope.resolve_dir, &dep.name);
        let info = match NpmPackageInfo::from_dir(&dir) {
            Ok(info) => info,
            Err(e) => {
                debug!(specifier, error = %e, "dependency manifest unavailable");
                return false;
            }
        };
        if info.is_esm_type() {
            return true;
        }
        let conditions: Vec<&str> = self.scope.target().export_conditions().to_vec();
        self.analyzer
            .analyze(&dir, &info, &dep.sub_module, &conditions)
            .map(|analysis| analysis.named_exports.iter().any(|n| n == "__esModule"))
            .unwrap_or(false)
    }
}

fn deprecation_banner(npm: &NpmPackageInfo) -> String {
    if npm.deprecated.is_empty() {
        return String::new();
    }
    let message = format!(
        "[npm] %cdeprecated%c {}@{}: {}",
        npm.name, npm.version, npm.deprecated
    );
    match serde_json::to_string(&message) {
        Ok(literal) => format!("console.warn({literal}, \"color:red\", \"\");\n"),
        Err(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banner() {
        let pkg = Pkg::new("lodash", "4.17.21").with_sub_path("debounce", false);
        assert_eq!(
            banner(&pkg, Target::Es2022, false),
            "/* esmd - rolldown bundle(lodash@4.17.21/debounce) es2022 production */\n"
        );
    }

    #[test]
    fn test_shift_mappings() {
        let map = br#"{"version":3,"sources":["a.js"],"mappings":"AAAA"}"#;
        let shifted: serde_json::Value =
            serde_json::from_slice(&shift_mappings(map, 3).unwrap()).unwrap();
        assert_eq!(shifted["mappings"], ";;;AAAA");
        assert_eq!(shifted["sources"][0], "a.js");

        assert!(shift_mappings(b"not json", 1).is_err());
    }

    #[test]
    fn test_strip_source_map_comment() {
        assert_eq!(
            strip_source_map_comment("a();\n//# sourceMappingURL=index.js.map\n"),
            "a();"
        );
        assert_eq!(strip_source_map_comment("a();\n"), "a();\n");
    }

    #[test]
    fn test_called_binding() {
        let code = r#"var ms = __require("ms"); console.log(ms(1000));"#;
        assert!(is_called_binding(code, "ms"));

        let code = r#"var ms = __require("ms"); console.log(ms.parse(1000));"#;
        assert!(!is_called_binding(code, "ms"));
        assert!(!is_called_binding(r#"__require("ms")"#, "ms"));
    }

    #[test]
    fn test_deprecation_banner_escapes() {
        let npm = NpmPackageInfo {
            name: "request".into(),
            version: "2.88.2".into(),
            deprecated: "use \"fetch\"".into(),
            ..Default::default()
        };
        assert_eq!(
            deprecation_banner(&npm),
            "console.warn(\"[npm] %cdeprecated%c request@2.88.2: use \\\"fetch\\\"\", \"color:red\", \"\");\n"
        );
        assert_eq!(deprecation_banner(&NpmPackageInfo::default()), "");
    }
}
