//! Entry-module analysis: which names a module exports and whether it is
//! CommonJS.
//!
//! ESM entries are read straight from their export declarations. CommonJS
//! entries are scanned for the assignment shapes bundlers and compilers
//! emit (`exports.x =`, `module.exports = { .. }`, `Object.defineProperty`,
//! `module.exports = require(..)`); local re-exports are followed.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use esmd_npm::{EntryPoint, NpmPackageInfo, is_local_specifier, resolve_entry};
use oxc_allocator::Allocator;
use oxc_ast::ast::{
    Argument, AssignmentTarget, BindingPatternKind, CallExpression, Declaration, Expression,
    ModuleDeclaration, ModuleExportName, ObjectPropertyKind, PropertyKey, Statement,
};
use oxc_parser::Parser;
use oxc_span::SourceType;
use path_clean::PathClean;
use tracing::{debug, trace};

use crate::{Error, Result};

/// How deep local `export *` and `require` chains are followed.
const MAX_FOLLOW_DEPTH: usize = 8;

/// Files at or above this size are never treated as a bare re-export.
const REEXPORT_FILE_LIMIT: u64 = 256;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleAnalysis {
    /// `None` only for packages without any JavaScript entry.
    pub entry: Option<EntryPoint>,
    pub named_exports: Vec<String>,
    pub has_default_export: bool,
    pub from_cjs: bool,
    /// The package ships declarations and nothing else.
    pub types_only: bool,
    /// The entry is `module.exports = require("<dep>")` for a bare `<dep>`.
    pub reexport: Option<String>,
}

pub trait ModuleAnalyzer: Send + Sync {
    fn analyze(
        &self,
        package_dir: &Path,
        info: &NpmPackageInfo,
        sub_module: &str,
        conditions: &[&str],
    ) -> Result<ModuleAnalysis>;
}

/// Parses entry files with oxc; never executes package code.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticAnalyzer;

impl StaticAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

impl ModuleAnalyzer for StaticAnalyzer {
    fn analyze(
        &self,
        package_dir: &Path,
        info: &NpmPackageInfo,
        sub_module: &str,
        conditions: &[&str],
    ) -> Result<ModuleAnalysis> {
        let entry = match resolve_entry(package_dir, info, sub_module, conditions) {
            Ok(entry) => entry,
            Err(esmd_npm::Error::EntryNotFound { .. }) => {
                let types = declaration_entry(package_dir, info, sub_module);
                if types.is_empty() {
                    let specifier = if sub_module.is_empty() {
                        info.name.clone()
                    } else {
                        format!("{}/{sub_module}", info.name)
                    };
                    return Err(Error::UnresolvableEntry { specifier });
                }
                return Ok(ModuleAnalysis {
                    entry: Some(EntryPoint {
                        path: String::new(),
                        types,
                    }),
                    types_only: true,
                    ..Default::default()
                });
            }
            Err(e) => return Err(e.into()),
        };

        if is_declaration_file(&entry.path) {
            return Ok(ModuleAnalysis {
                entry: Some(EntryPoint {
                    types: entry.path.clone(),
                    path: String::new(),
                }),
                types_only: true,
                ..Default::default()
            });
        }

        let file = package_dir.join(&entry.path).clean();
        let mut analysis = if entry.path.ends_with(".json") {
            ModuleAnalysis {
                has_default_export: true,
                ..Default::default()
            }
        } else {
            let mut exports = Exports::default();
            let mut visited = HashSet::new();
            let from_cjs = scan_file(&file, 0, &mut visited, &mut exports)?;
            ModuleAnalysis {
                named_exports: exports.names,
                has_default_export: from_cjs || exports.has_default,
                from_cjs,
                reexport: exports.reexport,
                ..Default::default()
            }
        };
        debug!(
            entry = %entry.path,
            cjs = analysis.from_cjs,
            exports = analysis.named_exports.len(),
            "analyzed entry"
        );
        analysis.entry = Some(entry);
        Ok(analysis)
    }
}

fn is_declaration_file(path: &str) -> bool {
    path.ends_with(".d.ts") || path.ends_with(".d.mts") || path.ends_with(".d.cts")
}

fn declaration_entry(package_dir: &Path, info: &NpmPackageInfo, sub_module: &str) -> String {
    if sub_module.is_empty() {
        return info.types_entry().to_string();
    }
    [format!("{sub_module}.d.ts"), format!("{sub_module}/index.d.ts")]
        .into_iter()
        .find(|candidate| package_dir.join(candidate).is_file())
        .map(|candidate| format!("./{candidate}"))
        .unwrap_or_default()
}

#[derive(Debug, Default)]
struct Exports {
    names: Vec<String>,
    has_default: bool,
    reexport: Option<String>,
}

impl Exports {
    fn add(&mut self, name: &str) {
        if name == "default" {
            self.has_default = true;
        } else if !self.names.iter().any(|n| n == name) {
            self.names.push(name.to_string());
        }
    }
}

/// Collect the exports of `file` into `out`. Returns whether the file is
/// CommonJS.
fn scan_file(
    file: &Path,
    depth: usize,
    visited: &mut HashSet<PathBuf>,
    out: &mut Exports,
) -> Result<bool> {
    if !visited.insert(file.to_path_buf()) {
        return Ok(false);
    }
    let source = fs::read_to_string(file).map_err(|e| Error::IoError {
        message: format!("Failed to read {}", file.display()),
        source: e,
    })?;
    let dir = file.parent().unwrap_or(Path::new("."));

    let force_cjs = file.extension().is_some_and(|ext| ext == "cjs");
    if !force_cjs {
        let allocator = Allocator::default();
        let ret = Parser::new(&allocator, &source, SourceType::mjs()).parse();
        let is_esm = ret
            .program
            .body
            .iter()
            .any(|stmt| stmt.as_module_declaration().is_some());
        if is_esm {
            let mut stars = Vec::new();
            scan_esm(&ret.program.body, out, &mut stars);
            for star in stars {
                if depth >= MAX_FOLLOW_DEPTH {
                    break;
                }
                if let Some(next) = resolve_local_file(dir, &star) {
                    // `export *` never forwards the default export
                    let had_default = out.has_default;
                    scan_file(&next, depth + 1, visited, out)?;
                    out.has_default = had_default;
                }
            }
            return Ok(false);
        }
        if !ret.errors.is_empty() {
            trace!(file = %file.display(), "not parseable as a module, scanning as CommonJS");
        }
    }

    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, &source, SourceType::cjs()).parse();
    let mut scan = CjsScan::default();
    scan_cjs_statements(&ret.program.body, &mut scan);
    for name in &scan.names {
        out.add(name);
    }

    let followed = scan.reexports.into_iter().take(1).chain(scan.stars);
    for specifier in followed {
        if !is_local_specifier(&specifier) {
            if out.reexport.is_none() && out.names.is_empty() {
                out.reexport = Some(specifier);
            }
            continue;
        }
        if depth >= MAX_FOLLOW_DEPTH {
            break;
        }
        if let Some(next) = resolve_local_file(dir, &specifier) {
            scan_file(&next, depth + 1, visited, out)?;
        }
    }
    Ok(true)
}

/// Names exported by ESM declarations; local `export *` sources go to
/// `stars`.
fn scan_esm(body: &[Statement<'_>], out: &mut Exports, stars: &mut Vec<String>) {
    for stmt in body {
        let Some(decl) = stmt.as_module_declaration() else {
            continue;
        };
        match decl {
            ModuleDeclaration::ExportDefaultDeclaration(_) => out.has_default = true,
            ModuleDeclaration::ExportAllDeclaration(all) => match &all.exported {
                Some(name) => out.add(&export_name(name)),
                None => {
                    let source = all.source.value.to_string();
                    if is_local_specifier(&source) {
                        stars.push(source);
                    }
                }
            },
            ModuleDeclaration::ExportNamedDeclaration(named) => {
                for spec in &named.specifiers {
                    out.add(&export_name(&spec.exported));
                }
                match &named.declaration {
                    Some(Declaration::VariableDeclaration(var)) => {
                        for declarator in &var.declarations {
                            if let BindingPatternKind::BindingIdentifier(ident) = &declarator.id.kind {
                                out.add(ident.name.as_str());
                            }
                        }
                    }
                    Some(Declaration::FunctionDeclaration(func)) => {
                        if let Some(id) = &func.id {
                            out.add(id.name.as_str());
                        }
                    }
                    Some(Declaration::ClassDeclaration(class)) => {
                        if let Some(id) = &class.id {
                            out.add(id.name.as_str());
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }
}

fn export_name(name: &ModuleExportName<'_>) -> String {
    match name {
        ModuleExportName::IdentifierName(ident) => ident.name.to_string(),
        ModuleExportName::IdentifierReference(ident) => ident.name.to_string(),
        ModuleExportName::StringLiteral(lit) => lit.value.to_string(),
    }
}

#[derive(Debug, Default)]
struct CjsScan {
    names: Vec<String>,
    /// `module.exports = require(..)` targets, in source order.
    reexports: Vec<String>,
    /// `__exportStar(require(..), exports)` targets.
    stars: Vec<String>,
}

fn scan_cjs_statements(body: &[Statement<'_>], scan: &mut CjsScan) {
    for stmt in body {
        scan_cjs_statement(stmt, scan);
    }
}

fn scan_cjs_statement(stmt: &Statement<'_>, scan: &mut CjsScan) {
    match stmt {
        Statement::ExpressionStatement(s) => scan_cjs_expression(&s.expression, scan),
        Statement::BlockStatement(block) => scan_cjs_statements(&block.body, scan),
        // if (process.env.NODE_ENV === "production") module.exports = require(..)
        Statement::IfStatement(s) => {
            scan_cjs_statement(&s.consequent, scan);
            if let Some(alternate) = &s.alternate {
                scan_cjs_statement(alternate, scan);
            }
        }
        _ => {}
    }
}

fn scan_cjs_expression(expr: &Expression<'_>, scan: &mut CjsScan) {
    match expr {
        Expression::AssignmentExpression(assign) => {
            match &assign.left {
                AssignmentTarget::StaticMemberExpression(member) => {
                    if is_exports_object(&member.object) {
                        scan.names.push(member.property.name.to_string());
                    } else if is_identifier(&member.object, "module")
                        && member.property.name == "exports"
                    {
                        scan_module_exports_value(&assign.right, scan);
                    }
                }
                AssignmentTarget::ComputedMemberExpression(member) => {
                    if is_exports_object(&member.object) {
                        if let Expression::StringLiteral(lit) = &member.expression {
                            scan.names.push(lit.value.to_string());
                        }
                    }
                }
                _ => {}
            }
            // exports.a = exports.b = void 0
            scan_cjs_expression(&assign.right, scan);
        }
        Expression::SequenceExpression(seq) => {
            for expr in &seq.expressions {
                scan_cjs_expression(expr, scan);
            }
        }
        // 0 && (module.exports = { a, b })
        Expression::LogicalExpression(logical) => {
            scan_cjs_expression(&logical.left, scan);
            scan_cjs_expression(&logical.right, scan);
        }
        Expression::ParenthesizedExpression(paren) => scan_cjs_expression(&paren.expression, scan),
        Expression::CallExpression(call) => scan_cjs_call(call, scan),
        _ => {}
    }
}

fn scan_module_exports_value(value: &Expression<'_>, scan: &mut CjsScan) {
    match value {
        Expression::ObjectExpression(object) => {
            for property in &object.properties {
                let ObjectPropertyKind::ObjectProperty(property) = property else {
                    continue;
                };
                match &property.key {
                    PropertyKey::StaticIdentifier(ident) => scan.names.push(ident.name.to_string()),
                    PropertyKey::StringLiteral(lit) => scan.names.push(lit.value.to_string()),
                    _ => {}
                }
            }
        }
        Expression::CallExpression(call) => {
            if let Some(specifier) = require_specifier(call) {
                scan.reexports.push(specifier);
            }
        }
        Expression::ParenthesizedExpression(paren) => {
            scan_module_exports_value(&paren.expression, scan);
        }
        _ => {}
    }
}

/// `Object.defineProperty(exports, "x", ..)` and `__exportStar(require(..), exports)`.
fn scan_cjs_call(call: &CallExpression<'_>, scan: &mut CjsScan) {
    let callee_name = match &call.callee {
        Expression::Identifier(ident) => Some(ident.name.as_str()),
        Expression::StaticMemberExpression(member) => Some(member.property.name.as_str()),
        _ => None,
    };
    match callee_name {
        Some("defineProperty") => {
            let is_object_call = matches!(
                &call.callee,
                Expression::StaticMemberExpression(member) if is_identifier(&member.object, "Object")
            );
            if !is_object_call {
                return;
            }
            let target_is_exports = match call.arguments.first() {
                Some(Argument::Identifier(ident)) => ident.name == "exports",
                Some(Argument::StaticMemberExpression(member)) => {
                    is_identifier(&member.object, "module") && member.property.name == "exports"
                }
                _ => false,
            };
            if let (true, Some(Argument::StringLiteral(lit))) = (target_is_exports, call.arguments.get(1)) {
                scan.names.push(lit.value.to_string());
            }
        }
        Some("__exportStar") => {
            if let Some(Argument::CallExpression(inner)) = call.arguments.first() {
                if let Some(specifier) = require_specifier(inner) {
                    scan.stars.push(specifier);
                }
            }
        }
        _ => {}
    }
}

fn require_specifier(call: &CallExpression<'_>) -> Option<String> {
    if !is_identifier(&call.callee, "require") {
        return None;
    }
    match call.arguments.first() {
        Some(Argument::StringLiteral(lit)) => Some(lit.value.to_string()),
        _ => None,
    }
}

fn is_identifier(expr: &Expression<'_>, name: &str) -> bool {
    matches!(expr, Expression::Identifier(ident) if ident.name == name)
}

/// `exports` or `module.exports`
fn is_exports_object(expr: &Expression<'_>) -> bool {
    match expr {
        Expression::Identifier(ident) => ident.name == "exports",
        Expression::StaticMemberExpression(member) => {
            is_identifier(&member.object, "module") && member.property.name == "exports"
        }
        _ => false,
    }
}

/// Node-style lookup of a relative module file.
fn resolve_local_file(dir: &Path, specifier: &str) -> Option<PathBuf> {
    let base = dir.join(specifier).clean();
    let base_str = base.to_string_lossy();
    let candidates = [
        base.clone(),
        PathBuf::from(format!("{base_str}.js")),
        PathBuf::from(format!("{base_str}.cjs")),
        PathBuf::from(format!("{base_str}.mjs")),
        base.join("index.js"),
        base.join("index.cjs"),
        base.join("index.mjs"),
    ];
    candidates.into_iter().find(|candidate| candidate.is_file())
}

/// The bare specifier of a file whose only statement is
/// `export * from "<specifier>"`.
pub fn single_reexport_target(path: &Path) -> Option<String> {
    let meta = fs::metadata(path).ok()?;
    if !meta.is_file() || meta.len() >= REEXPORT_FILE_LIMIT {
        return None;
    }
    let source = fs::read_to_string(path).ok()?;
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, &source, SourceType::mjs()).parse();
    if !ret.errors.is_empty() {
        return None;
    }
    let [Statement::ExportAllDeclaration(all)] = &ret.program.body[..] else {
        return None;
    };
    if all.exported.is_some() {
        return None;
    }
    Some(all.source.value.to_string())
}
