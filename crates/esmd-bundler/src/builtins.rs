//! Fixed tables: Node builtins, native-only npm packages and the embedded
//! npm polyfills.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

/// Node.js builtin modules, without the `node:` prefix.
pub const NODE_BUILTINS: &[&str] = &[
    "_http_agent",
    "_http_client",
    "_http_common",
    "_http_incoming",
    "_http_outgoing",
    "_http_server",
    "_stream_duplex",
    "_stream_passthrough",
    "_stream_readable",
    "_stream_transform",
    "_stream_wrap",
    "_stream_writable",
    "_tls_common",
    "_tls_wrap",
    "assert",
    "assert/strict",
    "async_hooks",
    "buffer",
    "child_process",
    "cluster",
    "console",
    "constants",
    "crypto",
    "dgram",
    "diagnostics_channel",
    "dns",
    "dns/promises",
    "domain",
    "events",
    "fs",
    "fs/promises",
    "http",
    "http2",
    "https",
    "inspector",
    "module",
    "net",
    "os",
    "path",
    "path/posix",
    "path/win32",
    "perf_hooks",
    "process",
    "punycode",
    "querystring",
    "readline",
    "readline/promises",
    "repl",
    "stream",
    "stream/consumers",
    "stream/promises",
    "stream/web",
    "string_decoder",
    "sys",
    "timers",
    "timers/promises",
    "tls",
    "trace_events",
    "tty",
    "url",
    "util",
    "util/types",
    "v8",
    "vm",
    "wasi",
    "worker_threads",
    "zlib",
];

/// Builtins Deno does not provide under `node:`.
const DENONEXT_UNSUPPORTED: &[&str] = &["inspector", "repl", "trace_events", "v8", "wasi"];

/// npm packages that only work as compiled Node addons.
const NATIVE_PACKAGES: &[&str] = &[
    "@tensorflow/tfjs-node",
    "bufferutil",
    "canvas",
    "cpu-features",
    "fsevents",
    "isolated-vm",
    "node-pty",
    "sharp",
    "utf-8-validate",
    "zlib-sync",
];

const POLYFILLS: &[(&str, &str)] = &[
    (
        "abort-controller",
        include_str!("polyfills/npm_abort-controller.js"),
    ),
    (
        "node-domexception",
        include_str!("polyfills/npm_node-domexception.js"),
    ),
    ("object-assign", include_str!("polyfills/npm_object-assign.js")),
];

pub fn is_node_builtin(specifier: &str) -> bool {
    NODE_BUILTINS.contains(&specifier)
}

pub fn is_denonext_unsupported(specifier: &str) -> bool {
    DENONEXT_UNSUPPORTED.contains(&specifier)
}

/// The native package `specifier` points into, if any.
pub fn native_package(specifier: &str) -> Option<&'static str> {
    NATIVE_PACKAGES.iter().copied().find(|name| {
        specifier == *name
            || specifier
                .strip_prefix(name)
                .is_some_and(|rest| rest.starts_with('/'))
    })
}

/// Embedded replacement for an npm package, as a `data:` URL.
pub fn polyfill_data_url(specifier: &str) -> Option<String> {
    POLYFILLS
        .iter()
        .find(|(name, _)| *name == specifier)
        .map(|(_, source)| {
            format!(
                "data:application/javascript;base64,{}",
                STANDARD.encode(source.as_bytes())
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins() {
        assert!(is_node_builtin("fs"));
        assert!(is_node_builtin("fs/promises"));
        assert!(!is_node_builtin("node:fs"));
        assert!(!is_node_builtin("lodash"));
        assert!(is_denonext_unsupported("v8"));
        assert!(!is_denonext_unsupported("fs"));
    }

    #[test]
    fn test_native_package_matches_subpaths() {
        assert_eq!(native_package("fsevents"), Some("fsevents"));
        assert_eq!(native_package("sharp/lib/index.js"), Some("sharp"));
        assert_eq!(native_package("sharpie"), None);
    }

    #[test]
    fn test_polyfill_data_url() {
        let url = polyfill_data_url("object-assign").unwrap();
        assert!(url.starts_with("data:application/javascript;base64,"));
        let encoded = url.trim_start_matches("data:application/javascript;base64,");
        let decoded = STANDARD.decode(encoded).unwrap();
        assert_eq!(
            String::from_utf8(decoded).unwrap().trim(),
            "export default Object.assign;"
        );
        assert!(polyfill_data_url("lodash").is_none());
    }
}
