//! Integration tests for cache determinism, key sensitivity, and the
//! eviction bound.

use std::collections::BTreeMap;

use proptest::prelude::*;
use veridoc_core::cache::{CacheKeyComponents, CachePolicy, ResultCache};
use veridoc_core::crypto::{ContentHasher, encode_hex};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn versions() -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    map.insert("ocr".to_string(), "2.1.0".to_string());
    map.insert("analyzer".to_string(), "1.4.2".to_string());
    map
}

fn components_for(file_bytes: &[u8], template: &serde_json::Value) -> CacheKeyComponents {
    CacheKeyComponents::new(
        encode_hex(&ContentHasher::hash_bytes(file_bytes)),
        encode_hex(&ContentHasher::hash_template(template).expect("template hash")),
        versions(),
    )
    .expect("valid components")
}

// ---------------------------------------------------------------------------
// cache_hit_returns_json_equal_payload
// ---------------------------------------------------------------------------

#[test]
fn cache_hit_returns_json_equal_payload() {
    let cache = ResultCache::with_defaults();
    let template = serde_json::json!({ "name": "T", "version": 1 });
    let components = components_for(b"A", &template);
    let key = components.derive_key();

    let payload = serde_json::json!({
        "documentId": "doc-123",
        "extractedFields": { "jobRef": "JOB-1" }
    });
    let stored_rendering = serde_json::to_string(&payload).expect("serializable");

    cache.set(key, payload, components);

    // Re-derive the key from the same bytes and template; the fetched
    // payload must render to exactly the original JSON string.
    let fetched = cache
        .get(&components_for(b"A", &template).derive_key())
        .expect("hit");
    assert_eq!(
        serde_json::to_string(&fetched).expect("serializable"),
        stored_rendering
    );
}

#[test]
fn varied_payload_shapes_survive_round_trip() {
    let cache = ResultCache::with_defaults();
    let template = serde_json::json!({ "name": "T", "version": 1 });
    let payloads = [
        serde_json::json!(null),
        serde_json::json!([1, 2, 3]),
        serde_json::json!({ "nested": { "deep": { "value": "x" } } }),
        serde_json::json!({ "confidence": 0.87, "flags": [true, false] }),
        serde_json::json!({ "unicode": "фактура — überprüft" }),
    ];

    for (i, payload) in payloads.iter().enumerate() {
        let components = components_for(format!("doc-{i}").as_bytes(), &template);
        let key = components.derive_key();
        cache.set(key, payload.clone(), components);
        assert_eq!(cache.get(&key).expect("hit"), *payload);
    }
}

// ---------------------------------------------------------------------------
// key_sensitivity
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn any_component_change_changes_the_key(
        file in "[a-f0-9]{16,64}",
        template in "[a-f0-9]{16,64}",
        version_a in "[0-9]\\.[0-9]\\.[0-9]",
        version_b in "[0-9]\\.[0-9]\\.[0-9]",
    ) {
        prop_assume!(version_a != version_b);

        let mut base_versions = BTreeMap::new();
        base_versions.insert("ocr".to_string(), version_a.clone());

        let base = CacheKeyComponents::new(file.clone(), template.clone(), base_versions.clone())
            .expect("valid");

        // Different file hash.
        let other_file =
            CacheKeyComponents::new(format!("{file}0"), template.clone(), base_versions.clone())
                .expect("valid");
        prop_assert_ne!(base.derive_key(), other_file.derive_key());

        // Different template hash.
        let other_template =
            CacheKeyComponents::new(file.clone(), format!("{template}0"), base_versions)
                .expect("valid");
        prop_assert_ne!(base.derive_key(), other_template.derive_key());

        // Different engine version string.
        let mut bumped = BTreeMap::new();
        bumped.insert("ocr".to_string(), version_b);
        let other_version =
            CacheKeyComponents::new(file, template, bumped).expect("valid");
        prop_assert_ne!(base.derive_key(), other_version.derive_key());
    }
}

#[test]
fn adding_an_engine_changes_the_key() {
    let template = serde_json::json!({ "name": "T", "version": 1 });
    let base = components_for(b"A", &template);
    let mut extended = base.clone();
    extended
        .engine_versions
        .insert("segmenter".to_string(), "0.9.0".to_string());
    assert_ne!(base.derive_key(), extended.derive_key());
}

// ---------------------------------------------------------------------------
// eviction_bound
// ---------------------------------------------------------------------------

#[test]
fn inserting_one_past_the_bound_never_exceeds_it() {
    let max_entries = 8;
    let cache = ResultCache::new(CachePolicy {
        max_entries,
        ..CachePolicy::default()
    })
    .expect("valid policy");

    let template = serde_json::json!({ "name": "T", "version": 1 });
    for i in 0..=max_entries {
        let components = components_for(format!("doc-{i}").as_bytes(), &template);
        cache.set(
            components.derive_key(),
            serde_json::json!({ "i": i }),
            components,
        );
    }

    assert!(cache.len() <= max_entries);
    assert_eq!(cache.stats().evictions, 1);
}
