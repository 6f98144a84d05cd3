#![cfg_attr(docsrs, feature(doc_cfg))]

//! # esmd-bundler
//!
//! Turns one npm package (or one of its subpaths) into a standalone ES
//! module for a given target, on top of Rolldown.
//!
//! A [`BuildTask`] installs the package, analyzes its entry, synthesizes an
//! ESM entry module, runs the bundler with a resolution policy that decides
//! per specifier whether to inline, externalize, split into a sub-build, or
//! stub it, then rewrites the output and stores the artifacts together with
//! an [`ESMBuildResult`] manifest.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use esmd_bundler::{BuildArgs, BuildOptions, BuildServices, BuildTask, FsStorage, RolldownEngine, Target};
//! use esmd_config::EsmdConfig;
//! use esmd_npm::Pkg;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(EsmdConfig::load(None)?);
//! let storage = Arc::new(FsStorage::open(&config.storage_dir)?);
//! let services = BuildServices::new(config, Arc::new(RolldownEngine::new()), storage);
//!
//! let task = BuildTask::new(
//!     Pkg::new("lodash", "4.17.21").with_sub_path("debounce", false),
//!     BuildArgs::default(),
//!     BuildOptions::new(Target::Es2022),
//!     services,
//! );
//! let result = task.build().await?;
//! println!("{}: {:?}", task.id(), result.deps);
//! # Ok(()) }
//! ```

pub mod adapter;
pub mod analyzer;
pub mod args;
pub mod assembler;
pub mod builtins;
pub mod context;
pub mod diagnostics;
pub mod dts;
pub mod engine;
pub mod options;
pub mod paths;
pub mod policy;
pub mod registry;
pub mod result;
pub mod storage;
pub mod target;
pub mod task;

// Logging utilities (optional, enabled with "logging" feature)
#[cfg(feature = "logging")]
#[cfg_attr(docsrs, doc(cfg(feature = "logging")))]
pub mod logging;

#[cfg(feature = "logging")]
#[cfg_attr(docsrs, doc(cfg(feature = "logging")))]
pub use logging::{LogLevel, init_logging, init_logging_from_config, init_logging_from_env};

pub use analyzer::{ModuleAnalysis, ModuleAnalyzer, StaticAnalyzer};
pub use args::BuildArgs;
pub use dts::{DtsTransformer, NoopDtsTransformer};
pub use engine::{BundleEngine, EngineOutput, EngineRequest, OutputFile, RolldownEngine};
pub use options::BuildOptions;
pub use policy::{ImportKind, ResolutionPolicy, ResolveAction};
pub use registry::SubBuildRegistry;
pub use result::ESMBuildResult;
pub use storage::{FsStorage, Storage, StorageError};
pub use target::Target;
pub use task::{BuildServices, BuildTask};

/// Error types for esmd-bundler operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The bundler failed with diagnostics the retry loop could not act on.
    #[error("Bundler error: {}", format_bundler_error(.0))]
    Bundler(Vec<diagnostics::ExtractedDiagnostic>),

    /// The requested package or subpath has no entry to build from.
    #[error("Could not resolve \"{specifier}\"")]
    UnresolvableEntry { specifier: String },

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A build-arguments path segment could not be decoded.
    #[error("Invalid build arguments: {0}")]
    InvalidBuildArgs(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O error with context message.
    #[error("{message}")]
    IoError {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// Error from the npm layer (manifests, entries, installs).
    #[error("npm error: {0}")]
    Npm(#[from] esmd_npm::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for esmd-bundler operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<esmd_config::ConfigError> for Error {
    fn from(error: esmd_config::ConfigError) -> Self {
        Error::InvalidConfig(error.to_string())
    }
}

/// Format bundler error diagnostics for display.
fn format_bundler_error(diagnostics: &[diagnostics::ExtractedDiagnostic]) -> String {
    match diagnostics {
        [] => "Unknown bundler error".to_string(),
        [diag] => format!("{}: {}", diag.kind, diag.message),
        _ => format!(
            "{} errors: {}",
            diagnostics.len(),
            diagnostics
                .iter()
                .map(|d| format!("{}: {}", d.kind, d.message))
                .collect::<Vec<_>>()
                .join("; ")
        ),
    }
}

impl std::fmt::Display for diagnostics::DiagnosticKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            diagnostics::DiagnosticKind::MissingExport => write!(f, "MissingExport"),
            diagnostics::DiagnosticKind::ParseError => write!(f, "ParseError"),
            diagnostics::DiagnosticKind::UnresolvedEntry => write!(f, "UnresolvedEntry"),
            diagnostics::DiagnosticKind::UnresolvedImport => write!(f, "UnresolvedImport"),
            diagnostics::DiagnosticKind::Plugin => write!(f, "Plugin"),
            diagnostics::DiagnosticKind::Other(s) => write!(f, "{s}"),
        }
    }
}

impl miette::Diagnostic for Error {
    fn code(&self) -> Option<Box<dyn std::fmt::Display + '_>> {
        Some(Box::new(match self {
            Error::Bundler(_) => "BUNDLER_ERROR",
            Error::UnresolvableEntry { .. } => "UNRESOLVABLE_ENTRY",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::InvalidBuildArgs(_) => "INVALID_BUILD_ARGS",
            Error::Io(_) => "IO_ERROR",
            Error::IoError { .. } => "IO_ERROR",
            Error::Npm(_) => "NPM_ERROR",
            Error::Storage(_) => "STORAGE_ERROR",
            Error::Json(_) => "JSON_ERROR",
        }))
    }

    fn severity(&self) -> Option<miette::Severity> {
        Some(miette::Severity::Error)
    }

    fn help(&self) -> Option<Box<dyn std::fmt::Display + '_>> {
        match self {
            Error::UnresolvableEntry { specifier } => Some(Box::new(format!(
                "'{specifier}' has no `exports`, `module` or `main` entry and no matching file.\nCheck the subpath against the package's published files."
            ))),
            Error::InvalidConfig(msg) => Some(Box::new(format!(
                "Check esmd.toml and ESMD_* environment variables.\nError: {msg}"
            ))),
            Error::InvalidBuildArgs(_) => Some(Box::new(
                "The `X-` path segment must be produced by the server; do not edit it by hand.",
            )),
            Error::Bundler(diagnostics) => match diagnostics.as_slice() {
                [diag] => diag
                    .help
                    .as_ref()
                    .map(|h| Box::new(h.clone()) as Box<dyn std::fmt::Display>),
                _ => Some(Box::new(
                    "Multiple bundler errors occurred. See details below.".to_string(),
                )),
            },
            _ => None,
        }
    }
}
