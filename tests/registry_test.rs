//! Integration tests for the schema registry over the shipped corpus.

use std::path::PathBuf;

use oada_formats::{
    check_all, KeyStatus, Normalizer, RegistryOptions, SchemaRegistry, ValidateError,
};
use serde_json::{json, Value};

fn corpus_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("schemas")
}

fn registry() -> SchemaRegistry {
    SchemaRegistry::new(RegistryOptions::new(corpus_root()).offline(true)).unwrap()
}

// === Corpus invariants ===

mod corpus {
    use super::*;

    #[test]
    fn discovers_every_source() {
        let keys: Vec<String> = registry()
            .index()
            .keys()
            .into_iter()
            .map(|k| k.to_string())
            .collect();
        assert_eq!(
            keys,
            vec![
                "/oada/bookmarks/v1.schema.json",
                "/oada/link/v1.schema.json",
                "/oada/resource.schema.json",
                "/oada/service/jobs.schema.json",
                "/trellis/certification/v1.schema.json",
                "/trellis/document.schema.json",
            ]
        );
    }

    #[test]
    fn ids_match_keys() {
        let registry = registry();
        for key in registry.index().keys() {
            let document = registry.index().get(key.as_str()).unwrap();
            assert_eq!(
                document["$id"],
                format!("https://formats.openag.io{}", key),
                "{key}"
            );
        }
    }

    #[test]
    fn examples_validate() {
        let registry = registry();
        for key in registry.index().keys() {
            let document = registry.index().get(key.as_str()).unwrap();
            let examples = document["examples"].as_array().cloned().unwrap_or_default();
            assert!(!examples.is_empty(), "{key} has no examples");
            for example in examples {
                if let Err(e) = registry.validate(key.as_str(), &example) {
                    panic!("{key}: example rejected: {e:?}");
                }
            }
        }
    }

    #[test]
    fn check_passes() {
        let report = check_all(&registry(), true);
        for result in &report.results {
            assert_eq!(result.status, KeyStatus::Ok, "{:?}", result);
        }
        assert!(report.is_ok());
        assert_eq!(report.failed, 0);
    }

    #[test]
    fn loaded_documents_are_normalized() {
        let registry = registry();
        let normalizer = Normalizer::default();
        for key in registry.index().keys() {
            let document = registry.index().get(key.as_str()).unwrap();
            assert_eq!(normalizer.normalize(&document), *document, "{key}");
        }
    }
}

// === Validation by media type ===

mod validation {
    use super::*;

    fn bookmarks() -> Value {
        json!({
            "_id": "resources/bookmarks",
            "_rev": 1,
            "_type": "application/vnd.oada.bookmarks.1+json",
            "services": { "_id": "resources/services" }
        })
    }

    #[test]
    fn by_media_type() {
        let registry = registry();
        assert!(registry.is_valid("application/vnd.oada.bookmarks.1+json", &bookmarks()));
    }

    #[test]
    fn hoisted_properties_still_apply() {
        let registry = registry();
        let mut payload = bookmarks();
        payload["_type"] = json!("application/vnd.oada.other.1+json");
        assert!(!registry.is_valid("application/vnd.oada.bookmarks.1+json", &payload));
    }

    #[test]
    fn cross_document_refs_apply() {
        let registry = registry();
        let mut payload = bookmarks();
        payload["trellisfw"] = json!({ "_id": "resources/trellis" });
        match registry.validate("application/vnd.oada.bookmarks.1+json", &payload) {
            Err(ValidateError::Invalid { key, errors }) => {
                assert_eq!(key, "/oada/bookmarks/v1.schema.json");
                assert!(errors.iter().any(|e| e.keyword == "required"));
                assert!(errors.iter().all(|e| e.path.starts_with("/trellisfw")));
            }
            other => panic!("expected Invalid, got {other:?}"),
        }

        // Resource fields come from the allOf'd resource schema.
        let mut payload = bookmarks();
        payload["_rev"] = json!(-1);
        assert!(!registry.is_valid("application/vnd.oada.bookmarks.1+json", &payload));
    }

    #[test]
    fn legacy_unversioned_document() {
        let registry = registry();
        let job = json!({ "service": "trellis-shares", "type": "share" });
        assert!(registry.is_valid("application/vnd.oada.service.jobs.1+json", &job));
        assert!(!registry.is_valid("application/vnd.oada.service.jobs.1+json", &json!({})));
    }

    #[test]
    fn definitions_fragment_key() {
        let registry = registry();
        let reference = "/trellis/document.schema.json#/definitions/v1";
        assert!(registry.is_valid(
            reference,
            &json!({ "pdf": { "_id": "resources/pdf1", "_rev": 1 } })
        ));
        assert!(!registry.is_valid(reference, &json!({ "pdf": { "_id": "resources/pdf1" } })));
    }

    #[test]
    fn json_source_maps_to_schema_key() {
        let registry = registry();
        let cert = json!({ "audits": { "a1": { "_id": "resources/a1", "_rev": 2 } } });
        assert!(registry.is_valid("application/vnd.trellis.certification.1+json", &cert));
        // Neither anyOf branch is satisfied.
        assert!(!registry.is_valid("application/vnd.trellis.certification.1+json", &json!({})));
    }

    #[test]
    fn unknown_media_type() {
        let registry = registry();
        assert!(registry.get_schema("application/vnd.oada.nope.1+json").is_none());
        let err = registry
            .validate("application/vnd.oada.nope.1+json", &json!({}))
            .unwrap_err();
        assert!(matches!(err, ValidateError::NoSchema { .. }));
    }

    #[test]
    fn add_schema_extends_corpus() {
        let registry = registry();
        registry.add_schema(
            "/oada/extra/v1.schema.json",
            json!({
                "$id": "https://formats.openag.io/oada/extra/v1.schema.json",
                "properties": { "link": { "$ref": "../link/v1.schema.json" } },
                "required": ["link"]
            }),
        );
        assert!(registry.is_valid(
            "application/vnd.oada.extra.1+json",
            &json!({ "link": { "_id": "resources/x" } })
        ));
        assert!(!registry.is_valid(
            "application/vnd.oada.extra.1+json",
            &json!({ "link": {} })
        ));
    }
}

// === Dereferencing ===

mod deref {
    use super::*;

    #[test]
    fn bundled_document_has_no_site_refs() {
        let registry = registry();
        for key in registry.index().keys() {
            let bundled = registry.dereference(key.as_str()).unwrap();
            let text = bundled.to_string();
            assert!(
                !text.contains(r#""$ref":"https://formats.openag.io"#),
                "{key}: {text}"
            );
        }
    }

    #[test]
    fn ref_beside_closed_object_keeps_verdicts() {
        let registry = registry();
        registry.add_schema(
            "/test/open.schema.json",
            json!({
                "$id": "https://formats.openag.io/test/open.schema.json",
                "properties": { "a": {} },
                "patternProperties": { "^y": {} }
            }),
        );
        registry.add_schema(
            "/test/closed.schema.json",
            json!({
                "$id": "https://formats.openag.io/test/closed.schema.json",
                "$schema": "https://json-schema.org/draft/2019-09/schema",
                "$ref": "open.schema.json",
                "properties": { "a": {} },
                "additionalProperties": false
            }),
        );

        let bundled = registry.dereference("/test/closed.schema.json").unwrap();
        assert_eq!(bundled["$id"], "https://formats.openag.io/test/closed.schema.json");
        let validator = jsonschema::validator_for(&bundled).unwrap();
        for instance in [json!({ "a": 1 }), json!({ "a": 1, "y1": 2 }), json!({ "b": 1 })] {
            assert_eq!(
                validator.is_valid(&instance),
                registry.is_valid("/test/closed.schema.json", &instance),
                "{instance} against {bundled}"
            );
        }
        assert!(!validator.is_valid(&json!({ "a": 1, "y1": 2 })));
    }

    #[test]
    fn bundled_document_validates_like_original() {
        let registry = registry();
        let bundled = registry.dereference("/trellis/document.schema.json").unwrap();
        let validator = jsonschema::validator_for(&bundled).unwrap();
        assert!(validator.is_valid(&json!({ "pdf": { "_id": "a", "_rev": 1 } })));
        assert!(!validator.is_valid(&json!({ "pdf": { "_id": "a" } })));
    }
}
