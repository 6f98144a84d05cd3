//! Bundling engine seam.
//!
//! The build adapter drives an engine through [`BundleEngine`] and steers
//! resolution through [`ResolveHooks`]. [`RolldownEngine`] is the production
//! engine; tests script their own.

mod rolldown_engine;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::Result;
use crate::diagnostics::ExtractedDiagnostic;
use crate::policy::ImportKind;

pub use rolldown_engine::RolldownEngine;

/// Module id of the synthesized entry module.
pub const VIRTUAL_ENTRY: &str = "\0esmd:entry";

/// What the resolve hook tells the engine to do with a specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookDecision {
    /// Resolve normally.
    Default,
    /// Use this file.
    File(PathBuf),
    /// Keep this path as an external import.
    External(String),
    /// A module served by [`ResolveHooks::load`].
    Virtual(String),
}

/// Callbacks the engine invokes while it walks the module graph. Called
/// concurrently from the engine's workers.
pub trait ResolveHooks: Send + Sync {
    /// `importer` is `None` for the entry module.
    fn resolve(&self, specifier: &str, kind: ImportKind, importer: Option<&str>) -> HookDecision;

    /// Contents of a virtual module, `None` for ids the hooks don't own.
    fn load(&self, id: &str) -> Result<Option<String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnginePlatform {
    #[default]
    Browser,
    Node,
}

#[derive(Debug, Clone, Default)]
pub struct EngineRequest {
    /// Entry specifier, a file path or [`VIRTUAL_ENTRY`].
    pub entry: String,
    pub cwd: PathBuf,
    pub platform: EnginePlatform,
    pub minify: bool,
    pub conditions: Vec<String>,
    pub main_fields: Vec<String>,
    /// Compile-time replacements, `(identifier, expression)`.
    pub define: Vec<(String, String)>,
    /// Syntax level to lower to, e.g. `es2015` or `esnext`.
    pub es_target: String,
    pub keep_names: bool,
    /// Ignore `/* @__PURE__ */` and similar side-effect annotations.
    pub ignore_annotations: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    /// Path relative to the output directory, e.g. `index.js`.
    pub path: String,
    pub contents: Vec<u8>,
}

impl OutputFile {
    pub fn new(path: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EngineOutput {
    pub files: Vec<OutputFile>,
    pub warnings: Vec<ExtractedDiagnostic>,
}

/// One bundling pass. Errors come back as the engine's diagnostics so the
/// adapter can decide whether another pass would help.
#[async_trait]
pub trait BundleEngine: Send + Sync {
    async fn bundle(
        &self,
        request: EngineRequest,
        hooks: Arc<dyn ResolveHooks>,
    ) -> std::result::Result<EngineOutput, Vec<ExtractedDiagnostic>>;
}
