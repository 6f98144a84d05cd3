//! Build targets.
//!
//! A target names the runtime a build is produced for. It decides how Node
//! builtins are reached, which shims get injected, and which export
//! conditions the engine resolves with.

use std::fmt;
use std::str::FromStr;

/// Runtime a build is produced for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Target {
    Es2015,
    Es2016,
    Es2017,
    Es2018,
    Es2019,
    Es2020,
    Es2021,
    #[default]
    Es2022,
    EsNext,
    /// Deno with builtins served from `deno.land/std`.
    Deno,
    /// Deno with native `node:` builtins.
    DenoNext,
    Node,
    /// Declaration files only.
    Types,
}

impl Target {
    pub const ALL: &'static [Target] = &[
        Target::Es2015,
        Target::Es2016,
        Target::Es2017,
        Target::Es2018,
        Target::Es2019,
        Target::Es2020,
        Target::Es2021,
        Target::Es2022,
        Target::EsNext,
        Target::Deno,
        Target::DenoNext,
        Target::Node,
        Target::Types,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Es2015 => "es2015",
            Target::Es2016 => "es2016",
            Target::Es2017 => "es2017",
            Target::Es2018 => "es2018",
            Target::Es2019 => "es2019",
            Target::Es2020 => "es2020",
            Target::Es2021 => "es2021",
            Target::Es2022 => "es2022",
            Target::EsNext => "esnext",
            Target::Deno => "deno",
            Target::DenoNext => "denonext",
            Target::Node => "node",
            Target::Types => "types",
        }
    }

    /// Syntax level the output is lowered to. Runtime targets get the
    /// latest syntax.
    pub fn es_version(&self) -> &'static str {
        match self {
            Target::Es2015
            | Target::Es2016
            | Target::Es2017
            | Target::Es2018
            | Target::Es2019
            | Target::Es2020
            | Target::Es2021
            | Target::Es2022 => self.as_str(),
            _ => "esnext",
        }
    }

    /// Deno and Node targets; they read `imports` with `node` first and
    /// ignore the `browser` field.
    pub fn is_server(&self) -> bool {
        matches!(self, Target::Deno | Target::DenoNext | Target::Node)
    }

    /// Export conditions the engine resolves with, after the request's own.
    pub fn export_conditions(&self) -> &'static [&'static str] {
        match self {
            Target::Node => &["node", "import", "module", "default"],
            _ => &["browser", "import", "module", "default"],
        }
    }

    /// `package.json` fields consulted for a bare package entry.
    pub fn main_fields(&self) -> &'static [&'static str] {
        match self {
            Target::Node => &["module", "main"],
            _ => &["browser", "module", "main"],
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Target::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == lower)
            .ok_or_else(|| format!("Invalid target: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trips_names() {
        for target in Target::ALL {
            assert_eq!(target.as_str().parse::<Target>().unwrap(), *target);
        }
        assert_eq!("ESNext".parse::<Target>().unwrap(), Target::EsNext);
        assert!("es5".parse::<Target>().is_err());
    }

    #[test]
    fn test_server_targets() {
        assert!(Target::Node.is_server());
        assert!(Target::DenoNext.is_server());
        assert!(!Target::Es2022.is_server());
        assert_eq!(Target::default(), Target::Es2022);
    }

    #[test]
    fn test_es_version() {
        assert_eq!(Target::Es2015.es_version(), "es2015");
        assert_eq!(Target::Es2022.es_version(), "es2022");
        assert_eq!(Target::Deno.es_version(), "esnext");
        assert_eq!(Target::Node.es_version(), "esnext");
    }
}
