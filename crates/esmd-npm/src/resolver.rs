//! Installer and metadata-resolver seams.
//!
//! The build engine never talks to a registry. It asks an [`Installer`] to
//! materialize a package under `<wd>/node_modules` and a
//! [`MetadataResolver`] to turn `(name, range)` into an exact manifest.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Error, Result};
use crate::manifest::NpmPackageInfo;
use crate::pkg::Pkg;

/// Places a package and its declared dependencies under
/// `<wd>/node_modules`.
#[async_trait]
pub trait Installer: Send + Sync {
    async fn install(&self, wd: &Path, pkg: &Pkg) -> Result<()>;
}

/// Resolves a version range to an exact version and its manifest.
///
/// Synchronous: it is called from inside bundler resolve hooks.
pub trait MetadataResolver: Send + Sync {
    fn resolve(&self, root: &Path, name: &str, range: &str) -> Result<NpmPackageInfo>;
}

/// Reads manifests straight out of an installed `node_modules` tree.
#[derive(Debug, Clone, Default)]
pub struct NodeModulesResolver;

impl NodeModulesResolver {
    pub fn new() -> Self {
        Self
    }
}

impl MetadataResolver for NodeModulesResolver {
    fn resolve(&self, root: &Path, name: &str, range: &str) -> Result<NpmPackageInfo> {
        let not_found = || Error::PackageNotFound {
            name: name.to_string(),
            range: range.to_string(),
        };
        let dir = package_dir(root, name);
        if !dir.join("package.json").is_file() {
            return Err(not_found());
        }
        let info = NpmPackageInfo::from_dir(&dir)?;
        if !satisfies(&info.version, range) {
            debug!(name, range, installed = %info.version, "installed version does not satisfy range");
            return Err(not_found());
        }
        Ok(info)
    }
}

/// Accepts a package only when it is already installed; never fetches.
#[derive(Debug, Clone, Default)]
pub struct PreinstalledInstaller;

#[async_trait]
impl Installer for PreinstalledInstaller {
    async fn install(&self, wd: &Path, pkg: &Pkg) -> Result<()> {
        let manifest = package_dir(wd, &pkg.name).join("package.json");
        match tokio::fs::try_exists(&manifest).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::Install {
                package: pkg.to_string(),
                message: format!("{} is not installed", manifest.display()),
            }),
            Err(e) => Err(Error::io(manifest, e)),
        }
    }
}

/// `<root>/node_modules/<name>`
pub fn package_dir(root: &Path, name: &str) -> PathBuf {
    root.join("node_modules").join(name)
}

/// npm-style range check; tags and unparsable ranges accept any version.
fn satisfies(version: &str, range: &str) -> bool {
    let range = range.trim();
    if range.is_empty() || range == "latest" || range == "*" {
        return true;
    }
    let Ok(version) = semver::Version::parse(version) else {
        return false;
    };
    // `||` alternatives are not understood by semver::VersionReq.
    range.split("||").any(|alt| {
        let alt = alt.trim();
        match semver::VersionReq::parse(alt) {
            Ok(req) => req.matches(&version),
            Err(_) => semver::Version::parse(alt).map_or(true, |exact| exact == version),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn install(root: &Path, name: &str, version: &str) {
        let dir = package_dir(root, name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("package.json"),
            format!(r#"{{"name":"{name}","version":"{version}"}}"#),
        )
        .unwrap();
    }

    #[test]
    fn test_resolves_installed_range() {
        let dir = TempDir::new().unwrap();
        install(dir.path(), "is-odd", "3.0.1");
        let info = NodeModulesResolver::new()
            .resolve(dir.path(), "is-odd", "^3.0.0")
            .unwrap();
        assert_eq!(info.version, "3.0.1");
    }

    #[test]
    fn test_unsatisfied_range_is_not_found() {
        let dir = TempDir::new().unwrap();
        install(dir.path(), "is-odd", "3.0.1");
        let err = NodeModulesResolver::new()
            .resolve(dir.path(), "is-odd", "^4.0.0")
            .unwrap_err();
        assert!(matches!(err, Error::PackageNotFound { .. }));
    }

    #[test]
    fn test_scoped_and_latest() {
        let dir = TempDir::new().unwrap();
        install(dir.path(), "@types/react", "18.2.0");
        let info = NodeModulesResolver::new()
            .resolve(dir.path(), "@types/react", "latest")
            .unwrap();
        assert_eq!(info.name, "@types/react");
    }

    #[test]
    fn test_satisfies_alternatives() {
        assert!(satisfies("2.1.0", "^1.0.0 || ^2.0.0"));
        assert!(!satisfies("3.0.0", "^1.0.0 || ^2.0.0"));
        assert!(satisfies("1.0.0", "next"));
    }

    #[tokio::test]
    async fn test_preinstalled_installer() {
        let dir = TempDir::new().unwrap();
        install(dir.path(), "react", "18.2.0");
        let installer = PreinstalledInstaller;
        assert!(installer
            .install(dir.path(), &Pkg::new("react", "18.2.0"))
            .await
            .is_ok());
        let err = installer
            .install(dir.path(), &Pkg::new("vue", "3.0.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Install { .. }));
    }
}
