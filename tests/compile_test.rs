//! Integration tests for resolving and compiling schema files.

use std::fs;
use std::path::Path;

use schemabind::{
    compile_schema, generate_module, resolve, source_uri, CompilationError, CompileOptions,
    CompositionRule, ConstraintKind, DeclaredType, DefaultFetcher, FileFetcher, MemoryFetcher,
    ResolutionError, SchemaError,
};
use serde_json::json;
use tempfile::TempDir;

fn write(dir: &Path, name: &str, content: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    source_uri(path.to_str().unwrap()).unwrap().to_string()
}

mod files {
    use super::*;

    #[test]
    fn compiles_across_documents() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "address.json",
            r#"{
                "title": "Address",
                "type": "object",
                "required": ["city"],
                "properties": { "city": { "type": "string", "minLength": 1 } }
            }"#,
        );
        let uri = write(
            dir.path(),
            "person.json",
            r#"{
                "type": "object",
                "properties": {
                    "home": { "$ref": "address.json" },
                    "work": { "$ref": "address.json" }
                }
            }"#,
        );

        let types = compile_schema(&uri, &FileFetcher, &CompileOptions::default()).unwrap();
        assert_eq!(types.len(), 2);

        let person = types.root().unwrap();
        let home = person.field("home").unwrap();
        let work = person.field("work").unwrap();
        // Both fields reference one shared descriptor.
        assert_eq!(home.schema.declared, work.schema.declared);
        match &home.schema.declared {
            DeclaredType::Object(target) => assert_eq!(target.name, "Address"),
            other => panic!("expected object reference, got {other:?}"),
        }

        let err = types
            .check(&person.uri, &json!({ "home": { "city": "" } }))
            .unwrap_err();
        assert_eq!(err.violations.len(), 1);
        assert_eq!(err.violations[0].pointer(), "/home/city");
        assert_eq!(err.violations[0].kind, ConstraintKind::MinLength);
    }

    #[test]
    fn yaml_documents() {
        let dir = TempDir::new().unwrap();
        let uri = write(
            dir.path(),
            "order.yaml",
            "type: object\nrequired: [total]\nproperties:\n  total:\n    type: number\n    minimum: 0\n",
        );
        let types = compile_schema(&uri, &DefaultFetcher::new(), &CompileOptions::default()).unwrap();
        let order = types.root().unwrap();
        assert_eq!(order.name, "order");
        assert!(types.check(&order.uri, &json!({ "total": 9.5 })).is_ok());
    }

    #[test]
    fn missing_document_is_a_fetch_failure() {
        let dir = TempDir::new().unwrap();
        let uri = write(
            dir.path(),
            "a.json",
            r#"{ "type": "object", "properties": { "b": { "$ref": "b.json" } } }"#,
        );
        let err = compile_schema(&uri, &FileFetcher, &CompileOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            SchemaError::Resolution(ResolutionError::Fetch { .. })
        ));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn syntax_error_is_a_parse_failure() {
        let dir = TempDir::new().unwrap();
        let uri = write(dir.path(), "a.json", "{ nope");
        let err = compile_schema(&uri, &FileFetcher, &CompileOptions::default()).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}

mod semantics {
    use super::*;

    fn fetcher() -> MemoryFetcher {
        MemoryFetcher::new().with_document(
            "https://example.com/tree.json",
            json!({
                "$defs": {
                    "Node": {
                        "type": "object",
                        "required": ["label"],
                        "properties": {
                            "label": { "type": "string" },
                            "children": { "type": "array", "items": { "$ref": "#/$defs/Node" } }
                        }
                    },
                    "Shape": {
                        "oneOf": [
                            { "type": "object", "required": ["radius"], "properties": { "radius": { "type": "number" } } },
                            { "type": "object", "required": ["side"], "properties": { "side": { "type": "number" } } }
                        ]
                    },
                    "Bounded": {
                        "allOf": [
                            { "type": "object", "properties": { "n": { "type": "integer", "minimum": 0, "maximum": 100 } } },
                            { "type": "object", "properties": { "n": { "minimum": 10, "maximum": 50 } } }
                        ]
                    }
                },
                "$ref": "#/$defs/Node"
            }),
        )
    }

    #[test]
    fn self_reference_compiles_to_itself() {
        let types = compile_schema(
            "https://example.com/tree.json",
            &fetcher(),
            &CompileOptions::default(),
        )
        .unwrap();
        let node = types.by_name("Node").unwrap();
        assert_eq!(types.root().unwrap().uri, node.uri);

        match &node.field("children").unwrap().schema.declared {
            DeclaredType::Array(items) => match &items.declared {
                DeclaredType::Object(target) => assert_eq!(target.uri, node.uri),
                other => panic!("unexpected item type {other:?}"),
            },
            other => panic!("unexpected children type {other:?}"),
        }

        let deep = json!({ "label": "a", "children": [{ "label": "b", "children": [{}] }] });
        let err = types.check(&node.uri, &deep).unwrap_err();
        assert_eq!(err.violations[0].pointer(), "/children/0/children/0");
        assert_eq!(err.violations[0].kind, ConstraintKind::Required);
    }

    #[test]
    fn one_of_reports_single_violation() {
        let types = compile_schema(
            "https://example.com/tree.json",
            &fetcher(),
            &CompileOptions::default(),
        )
        .unwrap();
        let shape = types.by_name("Shape").unwrap();
        assert_eq!(shape.composition, CompositionRule::OneOf);

        assert!(types.check(&shape.uri, &json!({ "radius": 1 })).is_ok());

        let both = types
            .check(&shape.uri, &json!({ "radius": 1, "side": 2 }))
            .unwrap_err();
        assert_eq!(both.violations.len(), 1);
        assert_eq!(both.violations[0].kind, ConstraintKind::AmbiguousMatch);
        assert_eq!(both.violations[0].message, "ambiguous: 2 alternatives matched");

        let neither = types.check(&shape.uri, &json!({})).unwrap_err();
        assert_eq!(neither.violations.len(), 1);
        assert_eq!(neither.violations[0].kind, ConstraintKind::NoAlternativeMatched);
    }

    #[test]
    fn all_of_merges_most_restrictive() {
        let types = compile_schema(
            "https://example.com/tree.json",
            &fetcher(),
            &CompileOptions::default(),
        )
        .unwrap();
        let bounded = types.by_name("Bounded").unwrap();
        let n = &bounded.field("n").unwrap().schema;
        assert_eq!(n.constraints.minimum, Some(10.0));
        assert_eq!(n.constraints.maximum, Some(50.0));
        assert!(types.check(&bounded.uri, &json!({ "n": 60 })).is_err());
    }

    #[test]
    fn compilation_is_idempotent() {
        let options = CompileOptions::default();
        let a = compile_schema("https://example.com/tree.json", &fetcher(), &options).unwrap();
        let b = compile_schema("https://example.com/tree.json", &fetcher(), &options).unwrap();
        assert_eq!(a, b);
        assert_eq!(generate_module(&a).unwrap(), generate_module(&b).unwrap());
    }

    #[test]
    fn cyclic_all_of_fails() {
        let doc = json!({
            "$defs": {
                "A": { "allOf": [{ "$ref": "#/$defs/B" }, { "type": "object" }] },
                "B": { "allOf": [{ "$ref": "#/$defs/A" }, { "type": "object" }] }
            },
            "type": "object",
            "properties": { "a": { "$ref": "#/$defs/A" } }
        });
        let graph = resolve(&doc, "https://example.com/cycle.json", &MemoryFetcher::new()).unwrap();
        let err = schemabind::compile(&graph, &CompileOptions::default()).unwrap_err();
        assert!(matches!(err, CompilationError::CyclicComposition { .. }));
    }
}
