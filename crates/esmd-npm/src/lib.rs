//! npm-side building blocks for esmd.
//!
//! - [`Pkg`] and specifier helpers ([`split_pkg_path`], [`to_module_bare_name`])
//! - [`NpmPackageInfo`], a normalized `package.json` view with a typed
//!   [`ExportsMap`]
//! - [`resolve_entry`] for root and submodule entry discovery
//! - [`Installer`] / [`MetadataResolver`] seams plus filesystem-backed
//!   implementations

pub mod entry;
pub mod error;
pub mod exports;
pub mod manifest;
pub mod pkg;
pub mod resolver;

pub use entry::{EntryPoint, resolve_entry};
pub use error::{Error, Result};
pub use exports::{ExportTarget, ExportsMap, split_by_last_byte};
pub use manifest::{ImportTarget, NpmPackageInfo, SideEffects};
pub use pkg::{
    Pkg, is_exact_version, is_local_specifier, pkg_name, split_pkg_path, strip_module_ext,
    to_module_bare_name, types_package_name,
};
pub use resolver::{Installer, MetadataResolver, NodeModulesResolver, PreinstalledInstaller, package_dir};
