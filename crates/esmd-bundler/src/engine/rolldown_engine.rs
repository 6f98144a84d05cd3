//! Rolldown-backed [`BundleEngine`].

use std::borrow::Cow;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use rolldown::{
    BundlerBuilder, BundlerOptions, InputItem, OutputFormat, Platform, RawMinifyOptions,
    ResolveOptions, SourceMapType,
};
use rolldown_common::{
    BundlerTransformOptions, Either, ImportKind as RdImportKind, InnerOptions, ModuleType, Output,
    ResolvedExternal, StrOrBytes, TreeshakeOptions,
};
use rolldown_plugin::{
    __inner::SharedPluginable, HookLoadArgs, HookLoadOutput, HookLoadReturn, HookResolveIdArgs,
    HookResolveIdOutput, HookResolveIdReturn, HookUsage, Plugin, PluginContext,
};
use tracing::debug;

use super::{BundleEngine, EngineOutput, EnginePlatform, EngineRequest, HookDecision, OutputFile, ResolveHooks};
use crate::diagnostics::{DiagnosticSeverity, ExtractedDiagnostic, extract_from_rolldown_error};
use crate::policy::ImportKind;

#[derive(Debug, Clone, Copy, Default)]
pub struct RolldownEngine;

impl RolldownEngine {
    pub fn new() -> Self {
        Self
    }

    fn options(request: &EngineRequest) -> BundlerOptions {
        let platform = match request.platform {
            EnginePlatform::Browser => Platform::Browser,
            EnginePlatform::Node => Platform::Node,
        };
        BundlerOptions {
            input: Some(vec![InputItem {
                name: Some("index".to_string()),
                import: request.entry.clone(),
            }]),
            cwd: Some(request.cwd.clone()),
            platform: Some(platform),
            format: Some(OutputFormat::Esm),
            sourcemap: Some(SourceMapType::File),
            minify: Some(RawMinifyOptions::from(request.minify)),
            define: Some(request.define.iter().cloned().collect()),
            keep_names: Some(request.keep_names),
            treeshake: TreeshakeOptions::Option(InnerOptions {
                annotations: Some(!request.ignore_annotations),
                ..Default::default()
            }),
            transform: Some(BundlerTransformOptions {
                target: Some(Either::Left(request.es_target.clone())),
                ..Default::default()
            }),
            resolve: Some(ResolveOptions {
                condition_names: Some(request.conditions.clone()),
                main_fields: Some(request.main_fields.clone()),
                modules: Some(vec!["node_modules".to_string()]),
                symlinks: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[async_trait]
impl BundleEngine for RolldownEngine {
    async fn bundle(
        &self,
        request: EngineRequest,
        hooks: Arc<dyn ResolveHooks>,
    ) -> std::result::Result<EngineOutput, Vec<ExtractedDiagnostic>> {
        let options = Self::options(&request);
        let plugin: SharedPluginable = Arc::new(EsmPlugin { hooks });

        let mut bundler = BundlerBuilder::default()
            .with_options(options)
            .with_plugins(vec![plugin])
            .build()
            .map_err(|e| extract_from_rolldown_error(&e))?;

        let bundle = bundler
            .generate()
            .await
            .map_err(|e| extract_from_rolldown_error(&e))?;

        let mut files = Vec::new();
        for output in &bundle.assets {
            match output {
                Output::Chunk(chunk) => {
                    let filename = chunk.filename.to_string();
                    if let Some(map) = &chunk.map {
                        files.push(OutputFile::new(format!("{filename}.map"), map.to_json_string()));
                    }
                    files.push(OutputFile::new(filename, chunk.code.clone()));
                }
                Output::Asset(asset) => {
                    let filename = asset.filename.to_string();
                    if files.iter().any(|f| f.path == filename) {
                        continue;
                    }
                    let contents = match &asset.source {
                        StrOrBytes::Str(s) => s.as_bytes().to_vec(),
                        StrOrBytes::Bytes(b) => b.clone(),
                    };
                    files.push(OutputFile::new(filename, contents));
                }
            }
        }

        let warnings = bundle
            .warnings
            .iter()
            .flat_map(|w| extract_from_rolldown_error(w))
            .map(|d| d.with_severity(DiagnosticSeverity::Warning))
            .collect();

        debug!(files = files.len(), "rolldown pass finished");
        Ok(EngineOutput { files, warnings })
    }
}

/// Routes every resolve and load through the build's [`ResolveHooks`].
struct EsmPlugin {
    hooks: Arc<dyn ResolveHooks>,
}

impl std::fmt::Debug for EsmPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EsmPlugin").finish_non_exhaustive()
    }
}

fn import_kind(kind: RdImportKind) -> ImportKind {
    match kind {
        RdImportKind::DynamicImport => ImportKind::DynamicImport,
        RdImportKind::Require => ImportKind::Require,
        _ => ImportKind::Import,
    }
}

impl Plugin for EsmPlugin {
    fn name(&self) -> Cow<'static, str> {
        "esmd".into()
    }

    fn register_hook_usage(&self) -> HookUsage {
        HookUsage::ResolveId | HookUsage::Load
    }

    fn resolve_id(
        &self,
        _ctx: &PluginContext,
        args: &HookResolveIdArgs,
    ) -> impl std::future::Future<Output = HookResolveIdReturn> + Send {
        let decision = self
            .hooks
            .resolve(args.specifier, import_kind(args.kind), args.importer);

        async move {
            let (id, external) = match decision {
                HookDecision::Default => return Ok(None),
                HookDecision::File(path) => (path.to_string_lossy().into_owned(), false),
                HookDecision::Virtual(id) => (id, false),
                HookDecision::External(path) => (path, true),
            };
            Ok(Some(HookResolveIdOutput {
                id: id.into(),
                external: Some(ResolvedExternal::Bool(external)),
                ..Default::default()
            }))
        }
    }

    fn load(
        &self,
        _ctx: &PluginContext,
        args: &HookLoadArgs<'_>,
    ) -> impl std::future::Future<Output = HookLoadReturn> + Send {
        let id = args.id.to_string();
        let hooks = Arc::clone(&self.hooks);

        async move {
            let Some(code) = hooks
                .load(&id)
                .with_context(|| format!("Failed to load virtual module: {id}"))?
            else {
                return Ok(None);
            };
            Ok(Some(HookLoadOutput {
                code: code.into(),
                module_type: Some(ModuleType::Js),
                ..Default::default()
            }))
        }
    }
}
