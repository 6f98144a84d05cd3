//! The build manifest persisted next to every artifact.

use serde::{Deserialize, Serialize};

fn is_false(value: &bool) -> bool {
    !*value
}

/// What a finished build exposes. Serialized with one-letter keys; named
/// exports are only carried in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ESMBuildResult {
    #[serde(skip)]
    pub named_exports: Vec<String>,
    #[serde(rename = "d", default, skip_serializing_if = "is_false")]
    pub has_export_default: bool,
    #[serde(rename = "c", default, skip_serializing_if = "is_false")]
    pub from_cjs: bool,
    /// URL of the declaration file, if any.
    #[serde(rename = "t", default, skip_serializing_if = "String::is_empty")]
    pub dts: String,
    #[serde(rename = "o", default, skip_serializing_if = "is_false")]
    pub types_only: bool,
    /// A `.css` artifact was written next to the module.
    #[serde(rename = "s", default, skip_serializing_if = "is_false")]
    pub package_css: bool,
    /// External modules the artifact imports.
    #[serde(rename = "p", default, skip_serializing_if = "Vec::is_empty")]
    pub deps: Vec<String>,
}

impl ESMBuildResult {
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// Keep absolute paths and http(s) URLs, first occurrence wins.
pub fn filter_deps<I, S>(imports: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut deps: Vec<String> = Vec::new();
    for import in imports {
        let import = import.as_ref();
        let keep = import.starts_with('/') || import.starts_with("http:") || import.starts_with("https:");
        if keep && !deps.iter().any(|d| d == import) {
            deps.push(import.to_string());
        }
    }
    deps
}
