//! Server configuration for esmd.
//!
//! Sources are merged in priority order: built-in defaults, then an
//! `esmd.toml` (or an explicitly given file), then `ESMD_*` environment
//! variables.
//!
//! ```no_run
//! use esmd_config::EsmdConfig;
//!
//! let config = EsmdConfig::load(None).unwrap();
//! println!("{}", config.cdn_base_path);
//! ```

mod error;

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format as _, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

pub use error::{ConfigError, Result};

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "esmd.toml";

/// Environment variable prefix, e.g. `ESMD_CDN_BASE_PATH`.
pub const ENV_PREFIX: &str = "ESMD_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EsmdConfig {
    /// Public origin, e.g. `https://cdn.example.com`.
    #[serde(default)]
    pub cdn_origin: String,
    /// Path prefix every generated URL starts with; empty or `/x`.
    #[serde(default)]
    pub cdn_base_path: String,
    /// Scratch space for per-package installs.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Build artifacts and the manifest database.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
    /// Deno standard library version used for `deno` target builtins.
    #[serde(default = "default_deno_std_version")]
    pub deno_std_version: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub npm_registry: Option<String>,
    #[serde(default)]
    pub npm_registry_scope: Option<String>,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".esmd/work")
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from(".esmd/storage")
}

fn default_deno_std_version() -> String {
    "0.177.1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EsmdConfig {
    fn default() -> Self {
        Self {
            cdn_origin: String::new(),
            cdn_base_path: String::new(),
            work_dir: default_work_dir(),
            storage_dir: default_storage_dir(),
            deno_std_version: default_deno_std_version(),
            log_level: default_log_level(),
            npm_registry: None,
            npm_registry_scope: None,
        }
    }
}

impl EsmdConfig {
    /// The merged provider chain, exposed so callers can layer overrides.
    pub fn figment(config_path: Option<&Path>) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));

        let config_file = config_path.map(Path::to_path_buf).or_else(|| {
            let default_path = Path::new(CONFIG_FILE);
            default_path.exists().then(|| default_path.to_path_buf())
        });
        if let Some(path) = config_file {
            tracing::debug!(path = %path.display(), "loading config file");
            figment = figment.merge(Toml::file(path));
        }

        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    /// Load and validate configuration.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        Self::from_figment(Self::figment(config_path))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment
            .extract()
            .map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let base = &self.cdn_base_path;
        if !base.is_empty() && (!base.starts_with('/') || base.ends_with('/')) {
            return Err(ConfigError::InvalidBasePath(base.clone()));
        }
        if self.work_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue("work_dir cannot be empty".into()));
        }
        if self.npm_registry_scope.is_some() && self.npm_registry.is_none() {
            return Err(ConfigError::InvalidValue(
                "npm_registry_scope requires npm_registry".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_are_valid() {
        let config = EsmdConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.deno_std_version, "0.177.1");
    }

    #[test]
    fn test_file_then_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "esmd.toml",
                r#"
                cdn_origin = "https://cdn.test"
                cdn_base_path = "/esm"
                deno_std_version = "0.170.0"
                "#,
            )?;
            jail.set_env("ESMD_CDN_BASE_PATH", "/v2");

            let config = EsmdConfig::load(None).map_err(|e| e.to_string())?;
            assert_eq!(config.cdn_origin, "https://cdn.test");
            assert_eq!(config.cdn_base_path, "/v2");
            assert_eq!(config.deno_std_version, "0.170.0");
            Ok(())
        });
    }

    #[test]
    fn test_explicit_path() {
        Jail::expect_with(|jail| {
            jail.create_file("custom.toml", r#"log_level = "debug""#)?;
            let config =
                EsmdConfig::load(Some(Path::new("custom.toml"))).map_err(|e| e.to_string())?;
            assert_eq!(config.log_level, "debug");
            Ok(())
        });
    }

    #[test]
    fn test_invalid_base_path() {
        let config = EsmdConfig {
            cdn_base_path: "esm/".into(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBasePath(_))
        ));
    }

    #[test]
    fn test_scope_without_registry() {
        let config = EsmdConfig {
            npm_registry_scope: Some("@acme".into()),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));
    }
}
