//! CLI integration tests for the schemabind binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("schemabind"))
}

// Helper to create a temp schema file
fn write_temp_file(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

const PERSON: &str = r##"{
    "$id": "https://example.com/person.json",
    "title": "Person",
    "type": "object",
    "required": ["age"],
    "properties": {
        "age": { "type": "integer", "minimum": 0 },
        "name": { "type": "string", "default": "unknown" },
        "address": { "$ref": "#/$defs/Address" }
    },
    "$defs": {
        "Address": {
            "type": "object",
            "properties": { "city": { "type": "string" } }
        }
    }
}"##;

mod compile_command {
    use super::*;

    #[test]
    fn prints_type_summary() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "person.json", PERSON);

        cmd()
            .args(["compile", schema.to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""name":"Person""#))
            .stdout(predicate::str::contains(r#""name":"Address""#))
            .stdout(predicate::str::contains(r#""default":"unknown""#))
            .stdout(predicate::str::contains(r#""type":"object Address""#));
    }

    #[test]
    fn pretty_output() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "person.json", PERSON);

        cmd()
            .args(["compile", schema.to_str().unwrap(), "--pretty"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\n  \"types\": ["));
    }

    #[test]
    fn strict_closes_objects() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "person.json", PERSON);

        cmd()
            .args(["compile", schema.to_str().unwrap(), "--strict"])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""allowsExtra":true"#).not());
    }

    #[test]
    fn missing_file_exits_3() {
        cmd()
            .args(["compile", "/nonexistent/schema.json"])
            .assert()
            .code(3)
            .stderr(predicate::str::contains("Error:"));
    }

    #[test]
    fn invalid_json_exits_2() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "bad.json", "{ invalid");

        cmd()
            .args(["compile", schema.to_str().unwrap()])
            .assert()
            .code(2);
    }

    #[test]
    fn unresolvable_ref_exits_2() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(
            &dir,
            "a.json",
            r##"{ "type": "object", "properties": { "b": { "$ref": "#/$defs/B" } } }"##,
        );

        cmd()
            .args(["compile", schema.to_str().unwrap()])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("unresolvable $ref '#/$defs/B'"));
    }

    #[test]
    fn unsatisfiable_schema_exits_2() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(
            &dir,
            "a.json",
            r#"{ "type": "object", "properties": { "n": { "type": "integer", "minimum": 9, "maximum": 1 } } }"#,
        );

        cmd()
            .args(["compile", schema.to_str().unwrap()])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("unsatisfiable"));
    }
}

mod validate_command {
    use super::*;

    #[test]
    fn valid_payload() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "person.json", PERSON);
        let payload = write_temp_file(&dir, "ann.json", r#"{"age": 30, "name": "Ann"}"#);

        cmd()
            .args([
                "validate",
                payload.to_str().unwrap(),
                "--schema",
                schema.to_str().unwrap(),
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("Valid"));
    }

    #[test]
    fn invalid_payload_lists_every_violation() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "person.json", PERSON);
        let payload = write_temp_file(&dir, "bad.json", r#"{"name": 7, "address": {"city": 1}}"#);

        cmd()
            .args([
                "validate",
                payload.to_str().unwrap(),
                "--schema",
                schema.to_str().unwrap(),
            ])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("Validation failed"))
            .stderr(predicate::str::contains("missing required field 'age'"))
            .stderr(predicate::str::contains("/name:"))
            .stderr(predicate::str::contains("/address/city:"));
    }

    #[test]
    fn json_output() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "person.json", PERSON);
        let payload = write_temp_file(&dir, "bad.json", r#"{"age": -1}"#);

        cmd()
            .args([
                "validate",
                payload.to_str().unwrap(),
                "--schema",
                schema.to_str().unwrap(),
                "--json",
            ])
            .assert()
            .code(1)
            .stdout(predicate::str::contains(r#""valid":false"#))
            .stdout(predicate::str::contains(r#""kind":"minimum""#));
    }

    #[test]
    fn named_type() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "person.json", PERSON);
        let payload = write_temp_file(&dir, "home.yaml", "city: Lagos\n");

        cmd()
            .args([
                "validate",
                payload.to_str().unwrap(),
                "--schema",
                schema.to_str().unwrap(),
                "--type",
                "Address",
            ])
            .assert()
            .success();
    }

    #[test]
    fn unknown_type_exits_2() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "person.json", PERSON);
        let payload = write_temp_file(&dir, "p.json", "{}");

        cmd()
            .args([
                "validate",
                payload.to_str().unwrap(),
                "--schema",
                schema.to_str().unwrap(),
                "--type",
                "Nope",
            ])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("no type 'Nope'"));
    }

    #[test]
    fn missing_payload_exits_3() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "person.json", PERSON);

        cmd()
            .args([
                "validate",
                "/nonexistent/payload.json",
                "--schema",
                schema.to_str().unwrap(),
            ])
            .assert()
            .code(3);
    }
}

mod generate_command {
    use super::*;

    #[test]
    fn generates_to_stdout() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "person.json", PERSON);

        cmd()
            .args(["generate", schema.to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::starts_with("// @generated by schemabind"))
            .stdout(predicate::str::contains("pub struct Person {"))
            .stdout(predicate::str::contains("pub struct Address {"))
            .stdout(predicate::str::contains("pub const NAME_DEFAULT: &'static str = \"unknown\";"))
            .stdout(predicate::str::contains("address: Option<Box<Address>>,"));
    }

    #[test]
    fn generates_to_file_with_runtime_path() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "person.json", PERSON);
        let output = dir.path().join("person.rs");

        cmd()
            .args([
                "generate",
                schema.to_str().unwrap(),
                "--output",
                output.to_str().unwrap(),
                "--runtime-crate",
                "crate::schema",
            ])
            .assert()
            .success()
            .stdout(predicate::str::is_empty());

        let source = fs::read_to_string(&output).unwrap();
        assert!(source.contains("crate::schema::check_serializable(types, Self::TYPE_URI, &next)?;"));
    }

    #[test]
    fn unmapped_type_exits_2() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(
            &dir,
            "a.json",
            r#"{ "type": "object", "properties": { "id": { "type": ["string", "integer"] } } }"#,
        );

        cmd()
            .args(["generate", schema.to_str().unwrap()])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("no target type for string | integer"));
    }

    #[test]
    fn output_is_reproducible() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "person.json", PERSON);

        let first = cmd()
            .args(["generate", schema.to_str().unwrap()])
            .output()
            .unwrap();
        let second = cmd()
            .args(["generate", schema.to_str().unwrap()])
            .output()
            .unwrap();
        assert_eq!(first.stdout, second.stdout);
    }
}

mod lint_command {
    use super::*;

    #[test]
    fn clean_directory() {
        let dir = TempDir::new().unwrap();
        write_temp_file(&dir, "schemas/person.json", PERSON);

        cmd()
            .args(["lint", dir.path().to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains("1 files checked, all passed"));
    }

    #[test]
    fn reports_errors() {
        let dir = TempDir::new().unwrap();
        write_temp_file(&dir, "good.json", PERSON);
        write_temp_file(&dir, "broken.json", "{ nope");

        cmd()
            .args(["lint", dir.path().to_str().unwrap()])
            .assert()
            .code(1)
            .stdout(predicate::str::contains("error[E001]"))
            .stdout(predicate::str::contains("1 passed, 1 failed"));
    }

    #[test]
    fn json_format() {
        let dir = TempDir::new().unwrap();
        write_temp_file(&dir, "a.json", r#"{ "type": "object" }"#);

        cmd()
            .args(["lint", dir.path().to_str().unwrap(), "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""code": "W001""#))
            .stdout(predicate::str::contains(r#""files_checked": 1"#));
    }

    #[test]
    fn strict_fails_on_warnings() {
        let dir = TempDir::new().unwrap();
        write_temp_file(&dir, "a.json", r#"{ "type": "object" }"#);

        cmd()
            .args(["lint", dir.path().to_str().unwrap(), "--strict"])
            .assert()
            .code(1);
    }

    #[test]
    fn quiet_hides_passing_files() {
        let dir = TempDir::new().unwrap();
        write_temp_file(&dir, "person.json", PERSON);

        cmd()
            .args(["lint", dir.path().to_str().unwrap(), "--quiet"])
            .assert()
            .success()
            .stdout(predicate::str::contains("person.json").not())
            .stdout(predicate::str::contains("Linting").not());
    }

    #[test]
    fn missing_path_exits_2() {
        cmd()
            .args(["lint", "/nonexistent/dir"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("path not found"));
    }
}
