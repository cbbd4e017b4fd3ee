//! CLI integration tests for the oada-formats binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn cmd() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("oada-formats"));
    cmd.env_remove("OADA_FORMATS_ROOT")
        .env_remove("OADA_FORMATS_BASE_URL")
        .env_remove("RUST_LOG");
    cmd
}

fn corpus() -> String {
    format!("{}/schemas", env!("CARGO_MANIFEST_DIR"))
}

// Helper to create a temp file
fn write_temp_file(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

mod resolve_command {
    use super::*;

    #[test]
    fn lists_schema_url() {
        cmd()
            .args(["resolve", "application/vnd.oada.bookmarks.1+json"])
            .assert()
            .success()
            .stdout("https://formats.openag.io/oada/bookmarks/v1.schema.json\n");
    }

    #[test]
    fn legacy_lists_all_candidates() {
        cmd()
            .args(["resolve", "application/vnd.oada.service.jobs.1+json", "--legacy"])
            .assert()
            .success()
            .stdout(predicate::str::contains("/oada/service/jobs/v1.schema.json\n"))
            .stdout(predicate::str::contains("/oada/service/jobs.schema.json#/$defs/v1\n"))
            .stdout(predicate::str::contains(
                "/oada/service/jobs.schema.json#/definitions/v1\n",
            ));
    }

    #[test]
    fn schema_override_is_verbatim() {
        cmd()
            .args([
                "resolve",
                r#"application/vnd.test.not.oada+json; schema="test foo bar""#,
            ])
            .assert()
            .success()
            .stdout("test\nfoo\nbar\n");
    }

    #[test]
    fn link_format() {
        cmd()
            .args([
                "resolve",
                "application/vnd.oada.bookmarks.1+json",
                "--format",
                "link",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains(
                r#"<https://formats.openag.io/oada/bookmarks/v1.schema.json>; rel="describedby""#,
            ));
    }

    #[test]
    fn content_type_format() {
        cmd()
            .args([
                "resolve",
                "application/vnd.oada.bookmarks.1+json",
                "--format",
                "content-type",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains(
                r#"application/vnd.oada.bookmarks.1+json; schema="/oada/bookmarks/v1.schema.json""#,
            ));
    }

    #[test]
    fn json_format() {
        cmd()
            .args([
                "resolve",
                "application/vnd.oada.bookmarks.1+json",
                "--format",
                "json",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""mode":"strict""#))
            .stdout(predicate::str::contains(
                r#""keys":["/oada/bookmarks/v1.schema.json"]"#,
            ));
    }

    #[test]
    fn custom_base_url() {
        cmd()
            .args([
                "--base-url",
                "https://schemas.example.org",
                "resolve",
                "application/vnd.oada.bookmarks.1+json",
            ])
            .assert()
            .success()
            .stdout("https://schemas.example.org/oada/bookmarks/v1.schema.json\n");
    }

    #[test]
    fn unversioned_type_fails() {
        cmd()
            .args(["resolve", "application/vnd.test.not.oada+json"])
            .assert()
            .code(1)
            .stdout("")
            .stderr(predicate::str::contains("invalid format version"));
    }

    #[test]
    fn not_vendor_json_fails() {
        cmd()
            .args(["resolve", "application/json"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("not a vendor JSON media type"));
    }
}

mod list_command {
    use super::*;

    #[test]
    fn lists_corpus_keys() {
        cmd()
            .args(["--root", &corpus(), "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("/oada/bookmarks/v1.schema.json\n"))
            .stdout(predicate::str::contains("/trellis/certification/v1.schema.json\n"));
    }

    #[test]
    fn root_from_env() {
        cmd()
            .env("OADA_FORMATS_ROOT", corpus())
            .arg("list")
            .assert()
            .success()
            .stdout(predicate::str::contains("/oada/link/v1.schema.json"));
    }

    #[test]
    fn missing_root_is_io_error() {
        let dir = TempDir::new().unwrap();
        cmd()
            .args(["--root", dir.path().join("nope").to_str().unwrap(), "list"])
            .assert()
            .code(3)
            .stderr(predicate::str::contains("cannot discover schemas"));
    }

    #[test]
    fn key_collision_is_schema_error() {
        let dir = TempDir::new().unwrap();
        write_temp_file(&dir, "a/b.json", "{}");
        write_temp_file(&dir, "a/b.schema.json", "{}");
        cmd()
            .args(["--root", dir.path().to_str().unwrap(), "list"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("/a/b.schema.json"));
    }
}

mod validate_command {
    use super::*;

    #[test]
    fn valid_payload() {
        let dir = TempDir::new().unwrap();
        let payload = write_temp_file(
            &dir,
            "bookmarks.json",
            r#"{ "_id": "resources/b", "_rev": 1, "services": { "_id": "resources/s" } }"#,
        );
        cmd()
            .args([
                "--root",
                &corpus(),
                "--offline",
                "validate",
                "application/vnd.oada.bookmarks.1+json",
                payload.to_str().unwrap(),
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("Valid"));
    }

    #[test]
    fn invalid_payload() {
        let dir = TempDir::new().unwrap();
        let payload = write_temp_file(&dir, "doc.json", r#"{ "name": "x" }"#);
        cmd()
            .args([
                "--root",
                &corpus(),
                "--offline",
                "validate",
                "/trellis/document.schema.json",
                payload.to_str().unwrap(),
            ])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("Validation against /trellis/document.schema.json failed"))
            .stderr(predicate::str::contains("[required]"));
    }

    #[test]
    fn invalid_payload_json_output() {
        let dir = TempDir::new().unwrap();
        let payload = write_temp_file(&dir, "job.json", r#"{ "service": "x" }"#);
        cmd()
            .args([
                "--root",
                &corpus(),
                "--offline",
                "validate",
                "application/vnd.oada.service.jobs.1+json",
                payload.to_str().unwrap(),
                "--json",
            ])
            .assert()
            .code(1)
            .stdout(predicate::str::contains(r#""valid":false"#))
            .stdout(predicate::str::contains(r#""keyword":"required""#));
    }

    #[test]
    fn valid_payload_json_output() {
        let dir = TempDir::new().unwrap();
        let payload = write_temp_file(&dir, "job.json", r#"{ "service": "x", "type": "y" }"#);
        cmd()
            .args([
                "--root",
                &corpus(),
                "--offline",
                "validate",
                "https://formats.openag.io/oada/service/jobs.schema.json",
                payload.to_str().unwrap(),
                "--json",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#"{"valid":true}"#));
    }

    #[test]
    fn unknown_schema() {
        let dir = TempDir::new().unwrap();
        let payload = write_temp_file(&dir, "p.json", "{}");
        cmd()
            .args([
                "--root",
                &corpus(),
                "validate",
                "application/vnd.oada.nope.1+json",
                payload.to_str().unwrap(),
            ])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("no schema found"));
    }

    #[test]
    fn missing_payload_file() {
        cmd()
            .args([
                "--root",
                &corpus(),
                "validate",
                "application/vnd.oada.bookmarks.1+json",
                "/nonexistent/payload.json",
            ])
            .assert()
            .code(3)
            .stderr(predicate::str::contains("file not found"));
    }
}

mod deref_command {
    use super::*;

    #[test]
    fn inlines_refs() {
        cmd()
            .args(["--root", &corpus(), "deref", "/trellis/document.schema.json"])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""required":["_id","_rev"]"#))
            .stdout(predicate::str::contains("formats.openag.io/oada/link").not());
    }

    #[test]
    fn pretty_output() {
        cmd()
            .args([
                "--root",
                &corpus(),
                "deref",
                "application/vnd.oada.bookmarks.1+json",
                "--pretty",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("{\n"));
    }

    #[test]
    fn unknown_key() {
        cmd()
            .args(["--root", &corpus(), "deref", "/oada/nope/v1.schema.json"])
            .assert()
            .code(2);
    }
}

mod check_command {
    use super::*;

    #[test]
    fn corpus_passes() {
        cmd()
            .args(["--root", &corpus(), "--offline", "check", "--strict"])
            .assert()
            .success()
            .stdout(predicate::str::contains("6 schemas checked, all passed"));
    }

    #[test]
    fn json_report() {
        cmd()
            .args(["--root", &corpus(), "--offline", "check", "--json"])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""keys_checked": 6"#))
            .stdout(predicate::str::contains(r#""failed": 0"#));
    }

    #[test]
    fn reports_failures() {
        let dir = TempDir::new().unwrap();
        write_temp_file(
            &dir,
            "x/v1.schema.json",
            r#"{ "$id": "https://formats.openag.io/x/wrong.schema.json" }"#,
        );
        write_temp_file(
            &dir,
            "y/v1.schema.json",
            r#"{
                "$id": "https://formats.openag.io/y/v1.schema.json",
                "type": "string",
                "examples": [1]
            }"#,
        );
        cmd()
            .args(["--root", dir.path().to_str().unwrap(), "--offline", "check"])
            .assert()
            .code(1)
            .stdout(predicate::str::contains("error[E002]"))
            .stdout(predicate::str::contains("error[E004]"))
            .stdout(predicate::str::contains("2 failed"));
    }

    #[test]
    fn warnings_fail_only_in_strict_mode() {
        let dir = TempDir::new().unwrap();
        write_temp_file(
            &dir,
            "z/v1.schema.json",
            r#"{ "$id": "https://formats.openag.io/z/v1.schema.json" }"#,
        );
        cmd()
            .args(["--root", dir.path().to_str().unwrap(), "check"])
            .assert()
            .success()
            .stdout(predicate::str::contains("warning[W001]"));
        cmd()
            .args(["--root", dir.path().to_str().unwrap(), "check", "--strict"])
            .assert()
            .code(1);
    }

    #[test]
    fn quiet_hides_passing_schemas() {
        cmd()
            .args(["--root", &corpus(), "check", "--quiet"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Checking").not())
            .stdout(predicate::str::contains("/oada/link/v1.schema.json").not());
    }
}
