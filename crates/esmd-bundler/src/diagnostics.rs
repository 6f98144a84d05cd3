//! Diagnostic extraction from engine errors and warnings.
//!
//! The retry loop only looks at [`DiagnosticContext`]; everything else is
//! carried along for error reporting. Rolldown diagnostics are read from
//! their `Debug` form so that upstream API churn stays contained here.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Namespace of the stub module served for `browser`-excluded specifiers.
pub const BROWSER_EXCLUDE_NAMESPACE: &str = "browser-exclude:";

/// Extracted diagnostic information from the bundling engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedDiagnostic {
    pub kind: DiagnosticKind,
    pub severity: DiagnosticSeverity,
    pub message: String,
    pub file: Option<String>,
    pub help: Option<String>,
    /// Structured context for the diagnostic (if available)
    pub context: Option<DiagnosticContext>,
}

/// Structured context for the diagnostic kinds the build reacts to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DiagnosticContext {
    MissingExport {
        /// Name of the missing export
        export_name: String,
        /// Module that was expected to provide it
        module_id: String,
    },
    UnresolvedImport {
        /// Import specifier that couldn't be resolved
        specifier: String,
        /// File that tried to import
        from_file: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    MissingExport,
    ParseError,
    UnresolvedEntry,
    UnresolvedImport,
    Plugin,
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
}

impl ExtractedDiagnostic {
    /// An unresolved-import error, as engines without structured errors
    /// would report it.
    pub fn unresolved_import(specifier: impl Into<String>, from_file: impl Into<String>) -> Self {
        let specifier = specifier.into();
        let from_file = from_file.into();
        Self {
            kind: DiagnosticKind::UnresolvedImport,
            severity: DiagnosticSeverity::Error,
            message: format!("Could not resolve \"{specifier}\""),
            file: Some(from_file.clone()),
            help: None,
            context: Some(DiagnosticContext::UnresolvedImport {
                specifier,
                from_file,
            }),
        }
    }

    pub fn missing_export(export_name: impl Into<String>, module_id: impl Into<String>) -> Self {
        let export_name = export_name.into();
        let module_id = module_id.into();
        Self {
            kind: DiagnosticKind::MissingExport,
            severity: DiagnosticSeverity::Error,
            message: format!("No matching export in \"{module_id}\" for import \"{export_name}\""),
            file: None,
            help: None,
            context: Some(DiagnosticContext::MissingExport {
                export_name,
                module_id,
            }),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: DiagnosticKind::Other(message.clone()),
            severity: DiagnosticSeverity::Error,
            message,
            file: None,
            help: None,
            context: None,
        }
    }

    pub fn with_severity(mut self, severity: DiagnosticSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Specifier of an unresolved import.
    pub fn unresolved_specifier(&self) -> Option<&str> {
        match &self.context {
            Some(DiagnosticContext::UnresolvedImport { specifier, .. }) => Some(specifier),
            _ => None,
        }
    }
}

/// Key of a browser-exclude stub named by a module id, if it is one.
pub fn browser_exclude_key(module_id: &str) -> Option<&str> {
    module_id
        .find(BROWSER_EXCLUDE_NAMESPACE)
        .map(|i| &module_id[i + BROWSER_EXCLUDE_NAMESPACE.len()..])
}

static DIAGNOSTIC_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bBuildDiagnostic \{").expect("valid regex"));

/// `specifier: "x"` as printed by `Debug`, not preceded by another word
/// (`imported_specifier` belongs to missing-export events).
static SPECIFIER_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?:^|[^\w])specifier: "([^"]*)""#).expect("valid regex"));

static COULD_NOT_RESOLVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"Could not resolve (?:"([^"]*)"|'([^']*)')"#).expect("valid regex")
});

static NOT_EXPORTED_BY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]*)" is not exported by "([^"]*)""#).expect("valid regex"));

static NO_MATCHING_EXPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"No matching export in "([^"]*)" for import "([^"]*)""#).expect("valid regex")
});

static IMPORTER_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:stable_importer|importer_id|importer): "([^"]*)""#).expect("valid regex")
});

/// Extract diagnostics from an engine error.
///
/// Batched errors are split per `BuildDiagnostic` and extracted one by one.
pub fn extract_from_rolldown_error(error: &dyn std::fmt::Debug) -> Vec<ExtractedDiagnostic> {
    let error_str = format!("{error:?}");

    let starts: Vec<usize> = DIAGNOSTIC_SPLIT
        .find_iter(&error_str)
        .map(|m| m.start())
        .collect();
    if starts.len() > 1 {
        return starts
            .iter()
            .enumerate()
            .map(|(i, start)| {
                let end = starts.get(i + 1).copied().unwrap_or(error_str.len());
                extract_from_message(&error_str[*start..end])
            })
            .collect();
    }

    vec![extract_from_message(&error_str)]
}

/// Extract a single diagnostic from a formatted message.
pub fn extract_from_message(text: &str) -> ExtractedDiagnostic {
    let kind = if text.contains("MissingExport")
        || text.contains("MISSING_EXPORT")
        || text.contains("is not exported by")
        || text.contains("No matching export")
    {
        DiagnosticKind::MissingExport
    } else if text.contains("UnresolvedEntry") || text.contains("UNRESOLVED_ENTRY") {
        DiagnosticKind::UnresolvedEntry
    } else if text.contains("UnresolvedImport")
        || text.contains("UNRESOLVED_IMPORT")
        || text.contains("Could not resolve")
    {
        DiagnosticKind::UnresolvedImport
    } else if text.contains("Parse error") || text.contains("PARSE_ERROR") {
        DiagnosticKind::ParseError
    } else if text.contains("Plugin") || text.contains("PLUGIN_ERROR") {
        DiagnosticKind::Plugin
    } else {
        DiagnosticKind::Other(first_line(text))
    };

    let severity = if text.contains("Severity::Warning") || text.starts_with("warning") {
        DiagnosticSeverity::Warning
    } else {
        DiagnosticSeverity::Error
    };

    let file = extract_importer(text);
    let help = extract_help_text(text);

    let context = match &kind {
        DiagnosticKind::MissingExport => extract_missing_export_context(text),
        DiagnosticKind::UnresolvedImport => {
            extract_unresolved_specifier(text).map(|specifier| DiagnosticContext::UnresolvedImport {
                specifier,
                from_file: file.clone().unwrap_or_else(|| "unknown".to_string()),
            })
        }
        _ => None,
    };

    ExtractedDiagnostic {
        kind,
        severity,
        message: text.trim().to_string(),
        file,
        help,
        context,
    }
}

fn extract_unresolved_specifier(text: &str) -> Option<String> {
    if let Some(caps) = SPECIFIER_FIELD.captures(text) {
        return Some(caps[1].to_string());
    }
    COULD_NOT_RESOLVE.captures(text).and_then(|caps| {
        caps.get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_string())
    })
}

fn extract_missing_export_context(text: &str) -> Option<DiagnosticContext> {
    if let Some(caps) = NO_MATCHING_EXPORT.captures(text) {
        return Some(DiagnosticContext::MissingExport {
            module_id: caps[1].to_string(),
            export_name: caps[2].to_string(),
        });
    }
    if let Some(caps) = NOT_EXPORTED_BY.captures(text) {
        return Some(DiagnosticContext::MissingExport {
            export_name: caps[1].to_string(),
            module_id: caps[2].to_string(),
        });
    }
    let export_name = extract_quoted_string_after(text, "imported_specifier:")
        .or_else(|| extract_quoted_string_after(text, "missing_export:"))?;
    let module_id = extract_quoted_string_after(text, "stable_importee:")
        .or_else(|| extract_quoted_string_after(text, "importee:"))
        .unwrap_or_else(|| "unknown".to_string());
    Some(DiagnosticContext::MissingExport {
        export_name,
        module_id,
    })
}

fn extract_importer(text: &str) -> Option<String> {
    IMPORTER_FIELD
        .captures(text)
        .map(|caps| caps[1].to_string())
        .or_else(|| {
            // "Could not resolve 'x' in src/a.js"
            let pos = text.find("Could not resolve")?;
            let rest = &text[pos..];
            let in_pos = rest.find(" in ")?;
            rest[in_pos + 4..]
                .split(['\n', '"', ','])
                .next()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

fn extract_help_text(text: &str) -> Option<String> {
    for indicator in ["help: ", "Help: ", "hint: ", "Hint: "] {
        if let Some(pos) = text.find(indicator) {
            let after = &text[pos + indicator.len()..];
            let help_str = after.lines().next().unwrap_or("").trim();
            if !help_str.is_empty() {
                return Some(help_str.to_string());
            }
        }
    }
    None
}

fn extract_quoted_string_after(text: &str, keyword: &str) -> Option<String> {
    let pos = text.find(keyword)?;
    extract_quoted_string(&text[pos + keyword.len()..])
}

/// Extract the first quoted string (single, double, or backtick)
fn extract_quoted_string(text: &str) -> Option<String> {
    let start = text.find(['"', '\'', '`'])?;
    let quote = text[start..].chars().next()?;
    let after = &text[start + 1..];
    let end = after.find(quote)?;
    Some(after[..end].to_string())
}

fn first_line(text: &str) -> String {
    text.trim().lines().next().unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_esbuild_style_unresolved() {
        let diag = extract_from_message(r#"Could not resolve "is-odd""#);
        assert_eq!(diag.kind, DiagnosticKind::UnresolvedImport);
        assert_eq!(diag.unresolved_specifier(), Some("is-odd"));
    }

    #[test]
    fn test_rolldown_style_unresolved() {
        let diag = extract_from_message("[UNRESOLVED_IMPORT] Error: Could not resolve 'foo' in node_modules/a/index.js");
        assert_eq!(diag.unresolved_specifier(), Some("foo"));
        assert_eq!(diag.file.as_deref(), Some("node_modules/a/index.js"));
    }

    #[test]
    fn test_debug_fields_prefer_specifier_over_imported_specifier() {
        let text = r#"UnresolvedImport { specifier: "bar", importer_id: "/w/a.js" }"#;
        let diag = extract_from_message(text);
        assert_eq!(diag.unresolved_specifier(), Some("bar"));
        assert_eq!(diag.file.as_deref(), Some("/w/a.js"));
    }

    #[test]
    fn test_missing_export_forms() {
        let esbuild = extract_from_message(
            r#"No matching export in "browser-exclude:process" for import "nextTick""#,
        );
        let rolldown = extract_from_message(
            r#"[MISSING_EXPORT] Error: "nextTick" is not exported by "\0browser-exclude:process"."#,
        );
        for diag in [esbuild, rolldown] {
            match diag.context {
                Some(DiagnosticContext::MissingExport {
                    export_name,
                    module_id,
                }) => {
                    assert_eq!(export_name, "nextTick");
                    assert_eq!(browser_exclude_key(&module_id), Some("process"));
                }
                other => panic!("unexpected context {other:?}"),
            }
        }
    }

    #[test]
    fn test_batched_errors_are_split() {
        #[derive(Debug)]
        #[allow(dead_code)]
        struct BuildDiagnostic {
            inner: &'static str,
        }
        #[derive(Debug)]
        #[allow(dead_code)]
        struct BatchedBuildDiagnostic(Vec<BuildDiagnostic>);

        let batch = BatchedBuildDiagnostic(vec![
            BuildDiagnostic {
                inner: "Could not resolve 'a'",
            },
            BuildDiagnostic {
                inner: "Parse error",
            },
        ]);
        let diags = extract_from_rolldown_error(&batch);
        assert_eq!(diags.len(), 2);
        assert_eq!(diags[0].unresolved_specifier(), Some("a"));
        assert_eq!(diags[1].kind, DiagnosticKind::ParseError);
    }

    #[test]
    fn test_help_text_and_plugin_kind() {
        let diag = extract_from_message("boom\nhelp: try again");
        assert_eq!(diag.help.as_deref(), Some("try again"));
        assert!(matches!(diag.kind, DiagnosticKind::Other(_)));

        let diag = extract_from_message("[PLUGIN_ERROR] Failed to load virtual module: \0wasm:/a.wasm");
        assert_eq!(diag.kind, DiagnosticKind::Plugin);
        assert!(diag.context.is_none());
    }
}
