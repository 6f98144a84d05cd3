//! Per-request build arguments and their URL encoding.
//!
//! Arguments are parsed once per request and shared by reference across
//! every sub-build of that request. Dependencies get a reduced copy (see
//! [`BuildArgs::dependency_args`]) fixed up for the dependency itself.

use std::collections::{BTreeMap, BTreeSet};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use esmd_npm::Pkg;

use crate::{Error, Result};

/// Immutable request configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildArgs {
    /// Specifier replacements, `from -> to`.
    pub alias: BTreeMap<String, String>,
    /// Pinned versions for transitive packages, `name -> version`.
    pub deps: BTreeMap<String, String>,
    /// Specifiers forced external; `*` externalizes everything.
    pub external: BTreeSet<String>,
    /// Requested named-export subset; empty means all.
    pub exports: BTreeSet<String>,
    /// Extra export-map conditions, highest priority first.
    pub conditions: Vec<String>,
    /// Overrides the configured Deno std version when non-empty.
    pub deno_std_version: String,
    pub ignore_annotations: bool,
    pub ignore_require: bool,
    pub keep_names: bool,
}

impl BuildArgs {
    /// `*` or `pkg_name` is in `external`.
    pub fn is_external(&self, pkg_name: &str) -> bool {
        self.external.contains("*") || self.external.contains(pkg_name)
    }

    /// The subset of arguments that propagates to dependency builds.
    pub fn dependency_args(&self) -> BuildArgs {
        BuildArgs {
            alias: self.alias.clone(),
            deps: self.deps.clone(),
            external: self.external.clone(),
            conditions: self.conditions.clone(),
            ..Default::default()
        }
    }

    /// Encode into the `X-<base64url>/` path segment, or `""` when nothing
    /// is set. Declaration builds (`is_dts`) ignore options that cannot
    /// change a `.d.ts` file.
    pub fn encode_prefix(&self, pkg: &Pkg, is_dts: bool) -> String {
        let mut lines: Vec<String> = Vec::new();

        let alias: Vec<String> = self
            .alias
            .iter()
            .filter(|(from, _)| **from != pkg.name)
            .map(|(from, to)| format!("{from}:{to}"))
            .collect();
        if !alias.is_empty() {
            lines.push(format!("a{}", alias.join(",")));
        }

        let deps: Vec<String> = self
            .deps
            .iter()
            .filter(|(name, _)| **name != pkg.name)
            .map(|(name, version)| format!("{name}@{version}"))
            .collect();
        if !deps.is_empty() {
            lines.push(format!("d{}", deps.join(",")));
        }

        let external: Vec<&str> = self
            .external
            .iter()
            .filter(|name| **name != pkg.name)
            .map(String::as_str)
            .collect();
        if !external.is_empty() {
            lines.push(format!("e{}", external.join(",")));
        }

        if !is_dts {
            if !self.exports.is_empty() {
                let exports: Vec<&str> = self.exports.iter().map(String::as_str).collect();
                lines.push(format!("s{}", exports.join(",")));
            }
            if !self.conditions.is_empty() {
                lines.push(format!("c{}", self.conditions.join(",")));
            }
            if !self.deno_std_version.is_empty() {
                lines.push(format!("V{}", self.deno_std_version));
            }
            if self.ignore_annotations {
                lines.push("ia".to_string());
            }
            if self.ignore_require {
                lines.push("ir".to_string());
            }
            if self.keep_names {
                lines.push("kn".to_string());
            }
        }

        if lines.is_empty() {
            return String::new();
        }
        format!("X-{}/", URL_SAFE_NO_PAD.encode(lines.join("\n")))
    }

    /// Inverse of [`BuildArgs::encode_prefix`]; accepts the segment with or
    /// without its `X-` marker and trailing slash.
    pub fn decode_prefix(segment: &str) -> Result<Self> {
        let encoded = segment.strip_prefix("X-").unwrap_or(segment);
        let encoded = encoded.strip_suffix('/').unwrap_or(encoded);
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| Error::InvalidBuildArgs(format!("{segment}: {e}")))?;
        let text = String::from_utf8(bytes)
            .map_err(|e| Error::InvalidBuildArgs(format!("{segment}: {e}")))?;

        let mut args = BuildArgs::default();
        for line in text.lines() {
            match line {
                "ia" => args.ignore_annotations = true,
                "ir" => args.ignore_require = true,
                "kn" => args.keep_names = true,
                _ => {
                    if let Some(v) = line.strip_prefix('V') {
                        args.deno_std_version = v.to_string();
                    } else if let Some(v) = line.strip_prefix('a') {
                        for pair in list(v) {
                            let (from, to) = pair.split_once(':').ok_or_else(|| {
                                Error::InvalidBuildArgs(format!("bad alias entry {pair:?}"))
                            })?;
                            args.alias.insert(from.to_string(), to.to_string());
                        }
                    } else if let Some(v) = line.strip_prefix('d') {
                        for dep in list(v) {
                            match dep.rfind('@') {
                                Some(i) if i > 0 => {
                                    args.deps
                                        .insert(dep[..i].to_string(), dep[i + 1..].to_string());
                                }
                                _ => {
                                    return Err(Error::InvalidBuildArgs(format!(
                                        "bad deps entry {dep:?}"
                                    )));
                                }
                            }
                        }
                    } else if let Some(v) = line.strip_prefix('e') {
                        args.external.extend(list(v).map(str::to_string));
                    } else if let Some(v) = line.strip_prefix('s') {
                        args.exports.extend(list(v).map(str::to_string));
                    } else if let Some(v) = line.strip_prefix('c') {
                        args.conditions.extend(list(v).map(str::to_string));
                    } else {
                        return Err(Error::InvalidBuildArgs(format!("unknown line {line:?}")));
                    }
                }
            }
        }
        Ok(args)
    }
}

fn list(v: &str) -> impl Iterator<Item = &str> {
    v.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// Drop entries that would make a dependency refer to itself.
pub fn fix_build_args(args: &BuildArgs, pkg: &Pkg) -> BuildArgs {
    let mut fixed = args.clone();
    fixed.alias.remove(&pkg.name);
    fixed.deps.remove(&pkg.name);
    fixed.external.remove(&pkg.name);
    fixed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BuildArgs {
        let mut args = BuildArgs::default();
        args.alias.insert("react".into(), "preact/compat".into());
        args.deps.insert("@scope/dep".into(), "1.2.3".into());
        args.external.insert("vue".into());
        args.exports.insert("debounce".into());
        args.conditions.push("worker".into());
        args.deno_std_version = "0.170.0".into();
        args.keep_names = true;
        args
    }

    #[test]
    fn test_empty_args_have_no_prefix() {
        assert_eq!(BuildArgs::default().encode_prefix(&Pkg::new("a", "1.0.0"), false), "");
    }

    #[test]
    fn test_prefix_decodes_back() {
        let args = sample();
        let prefix = args.encode_prefix(&Pkg::new("lodash", "4.17.21"), false);
        assert!(prefix.starts_with("X-") && prefix.ends_with('/'));
        assert_eq!(BuildArgs::decode_prefix(&prefix).unwrap(), args);
    }

    #[test]
    fn test_dts_prefix_skips_runtime_options() {
        let prefix = sample().encode_prefix(&Pkg::new("lodash", "4.17.21"), true);
        let decoded = BuildArgs::decode_prefix(&prefix).unwrap();
        assert!(decoded.exports.is_empty());
        assert!(decoded.conditions.is_empty());
        assert!(decoded.deno_std_version.is_empty());
        assert!(!decoded.keep_names);
        assert_eq!(decoded.external.len(), 1);
    }

    #[test]
    fn test_prefix_skips_self_references() {
        let mut args = BuildArgs::default();
        args.external.insert("vue".into());
        assert_eq!(args.encode_prefix(&Pkg::new("vue", "3.0.0"), false), "");
    }

    #[test]
    fn test_fix_and_dependency_args() {
        let mut args = sample();
        args.deps.insert("react".into(), "18.2.0".into());
        let dep = args.dependency_args();
        assert!(dep.exports.is_empty());
        assert!(!dep.keep_names);
        let fixed = fix_build_args(&dep, &Pkg::new("react", "18.2.0"));
        assert!(!fixed.alias.contains_key("react"));
        assert!(!fixed.deps.contains_key("react"));
        assert!(fixed.deps.contains_key("@scope/dep"));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(BuildArgs::decode_prefix("X-!!!/").is_err());
        let bad = format!("X-{}/", URL_SAFE_NO_PAD.encode("zzz"));
        assert!(BuildArgs::decode_prefix(&bad).is_err());
    }
}
