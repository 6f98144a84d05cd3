//! Property tests for output post-processing helpers.

use esmd_bundler::assembler::shift_mappings;
use esmd_bundler::result::filter_deps;
use proptest::prelude::*;

fn dep() -> impl Strategy<Value = String> {
    prop_oneof![
        "/[a-z]{1,6}@1\\.0\\.0/es2022/[a-z]{1,6}\\.js",
        "https://[a-z]{1,6}\\.test/[a-z]{1,6}\\.js",
        "node:[a-z]{1,6}",
        "[a-z]{1,6}",
    ]
}

proptest! {
    #[test]
    fn filtered_deps_are_unique_urls(imports in proptest::collection::vec(dep(), 0..12)) {
        let deps = filter_deps(&imports);
        for (i, d) in deps.iter().enumerate() {
            prop_assert!(d.starts_with('/') || d.starts_with("https:"));
            prop_assert!(!deps[..i].contains(d));
        }
        // nothing kept is lost
        for import in imports.iter().filter(|i| i.starts_with('/') || i.starts_with("https:")) {
            prop_assert!(deps.contains(import));
        }
    }

    #[test]
    fn shifted_mappings_gain_offset_semicolons(
        mappings in "[A-Za-z0-9+/,]{0,20}(;[A-Za-z0-9+/,]{1,10}){0,4}",
        offset in 0usize..40,
    ) {
        let map = serde_json::json!({"version": 3, "sources": ["a.js"], "mappings": mappings});
        let shifted = shift_mappings(&serde_json::to_vec(&map).unwrap(), offset).unwrap();
        let shifted: serde_json::Value = serde_json::from_slice(&shifted).unwrap();
        let shifted = shifted["mappings"].as_str().unwrap().to_string();

        prop_assert_eq!(shifted.len(), mappings.len() + offset);
        prop_assert!(shifted[..offset].chars().all(|c| c == ';'));
        prop_assert_eq!(&shifted[offset..], mappings.as_str());
    }
}
