//! End-to-end tests for the `validate` command.
//!
//! These tests invoke the actual CLI binary and check the behavior of the
//! `validate` subcommand from a user's perspective.

mod common;

use common::prelude::*;

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_validate_prints_options_with_defaults() {
    let fixture = TestFixture::new().with_config(
        r#"
check50:
  language: python
"#,
    );

    fixture
        .command()
        .args(["validate", "check50", "--require-option", "language"])
        .assert()
        .success()
        .stdout(predicate::str::contains("language: python"))
        .stdout(predicate::str::contains("files: []"));
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_validate_missing_required_option() {
    let fixture = TestFixture::new().with_config("check50: true\n");

    fixture
        .command()
        .args(["validate", "check50", "--require-option", "language"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Missing required option 'language'"));
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_validate_tool_not_enabled() {
    let fixture = TestFixture::new().with_config("submit50: true\n");

    fixture
        .command()
        .args(["validate", "check50"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("check50 is not enabled"))
        .stderr(predicate::str::contains("hint:"));
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_validate_malformed_yaml() {
    let fixture = TestFixture::new().with_config("check50:\n  files: [unclosed\n");

    fixture
        .command()
        .args(["validate", "check50"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Malformed config"));
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_validate_unknown_option_warns_then_fails_when_strict() {
    let config = r#"
check50:
  langauge: python
"#;
    let fixture = TestFixture::new().with_config(config);

    fixture
        .command()
        .args(["validate", "check50"])
        .assert()
        .success()
        .stderr(predicate::str::contains("warning: Unknown option 'langauge'"));

    fixture
        .command()
        .args(["validate", "check50", "--strict", "--require-option", "language"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("did you mean 'language'?"));
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_validate_tagged_files() {
    let config = r#"
submit50:
  files:
    - !exclude "*"
    - !include "*.py"
    - !require hello.py
"#;
    let fixture = TestFixture::new().with_config(config);

    fixture
        .command()
        .args(["validate", "submit50", "--dir"])
        .arg(fixture.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("!require"));
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_validate_help() {
    let mut cmd = cargo_bin_cmd!("lib50");
    cmd.args(["validate", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--require-option"));
}
