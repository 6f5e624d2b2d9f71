//! End-to-end tests for the `push` command, against a local remote root.

mod common;

use common::prelude::*;
use common::{remote_file, remote_paths, remote_tip};

fn write_index(fixture: &TestFixture) -> std::path::PathBuf {
    let path = fixture.remote_root().join("index.json");
    let json = serde_json::json!({
        "entries": {
            SLUG: {"org": "me50", "repo": "alice", "branch": BRANCH}
        }
    });
    std::fs::write(&path, json.to_string()).unwrap();
    path
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_push_uses_config_file_rules() {
    if !git_available() {
        return;
    }
    let fixture = TestFixture::new()
        .with_config(
            r#"
submit50:
  files:
    - !exclude "*"
    - !require hello.py
"#,
        )
        .with_file("hello.py", "print('hello')\n")
        .with_file("notes.txt", "scratch\n");
    let bare = fixture.bare_remote("me50", "alice");
    let index = write_index(&fixture);

    fixture
        .command()
        .args(["push", SLUG, "--tool", "submit50", "--remote-root"])
        .arg(fixture.remote_root())
        .arg("--index-file")
        .arg(&index)
        .assert()
        .success()
        .stdout(predicate::str::contains("Pushed"))
        .stdout(predicate::str::contains(BRANCH));

    assert!(remote_tip(&bare, BRANCH).is_some());
    assert_eq!(remote_paths(&bare, BRANCH), vec!["hello.py"]);
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_push_with_pattern_flags_and_data() {
    if !git_available() {
        return;
    }
    let fixture = TestFixture::new()
        .with_file("a.py", "a\n")
        .with_file("secret.key", "k\n");
    let bare = fixture.bare_remote("me50", "alice");
    let index = write_index(&fixture);

    fixture
        .command()
        .args(["push", SLUG, "--include", "*.py", "--exclude", "secret.key"])
        .args(["--data", "check50=true", "--remote-root"])
        .arg(fixture.remote_root())
        .arg("--index-file")
        .arg(&index)
        .assert()
        .success();

    assert_eq!(remote_paths(&bare, BRANCH), vec!["a.py"]);
    assert_eq!(remote_file(&bare, BRANCH, "a.py").as_deref(), Some("a\n"));
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_push_missing_required_file_reports_hint() {
    let fixture = TestFixture::new().with_file("a.py", "a\n");
    let index = write_index(&fixture);

    fixture
        .command()
        .args(["push", SLUG, "--require", "hello.c", "--remote-root"])
        .arg(fixture.remote_root())
        .arg("--index-file")
        .arg(&index)
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing these required files: hello.c"))
        .stderr(predicate::str::contains("hint: Make sure you are in the right directory"));
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_push_twice_reports_nothing_to_push() {
    if !git_available() {
        return;
    }
    let fixture = TestFixture::new().with_file("a.py", "a\n");
    fixture.bare_remote("me50", "alice");
    let index = write_index(&fixture);

    for expected in ["Pushed", "Nothing to push"] {
        fixture
            .command()
            .args(["push", SLUG, "--remote-root"])
            .arg(fixture.remote_root())
            .arg("--index-file")
            .arg(&index)
            .assert()
            .success()
            .stdout(predicate::str::contains(expected));
    }
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_push_unknown_slug() {
    if !git_available() {
        return;
    }
    let fixture = TestFixture::new().with_file("a.py", "a\n");
    let index = write_index(&fixture);

    fixture
        .command()
        .env("LIB50_TOOL", "submit50")
        .args(["push", "bogus/slug", "--remote-root"])
        .arg(fixture.remote_root())
        .arg("--index-file")
        .arg(&index)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown slug 'bogus/slug'"));
}
