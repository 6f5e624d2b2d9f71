//! Config validation tests using datatest-stable for fixture discovery
//!
//! Every YAML file under `tests/testdata/configs` is validated against the
//! `check50` schema below. The first lines of each fixture state what should
//! happen:
//!
//! ```yaml
//! # expect: ok
//! # warnings: unknown_option
//! ```
//!
//! `expect` is either `ok` or a comma-separated list of error kinds; the
//! optional `warnings` line lists the warning kinds of a successful load.

use lib50::config::{ConfigLoader, Diagnostics};
use lib50::schema::{files_fragment, Constraint, OptionDef, OptionSpec, OptionType, SchemaBuilder};
use std::path::Path;

const TOOL: &str = "check50";

fn loader() -> ConfigLoader {
    let options = OptionSpec::new()
        .option(
            OptionDef::new("language", OptionType::String)
                .required()
                .constraint(Constraint::one_of(["python", "c", "java"])),
        )
        .option(OptionDef::new("dependencies", OptionType::list_of(OptionType::String)));
    let schema = SchemaBuilder::new()
        .register(TOOL, files_fragment())
        .and_then(|b| b.register(TOOL, options))
        .expect("fixture schema has no conflicts")
        .build();
    ConfigLoader::new(schema)
}

/// Read a `# name: a, b` header line.
fn header(content: &str, name: &str) -> Option<Vec<String>> {
    let prefix = format!("# {}:", name);
    content
        .lines()
        .take_while(|line| line.starts_with('#'))
        .find_map(|line| line.strip_prefix(&prefix))
        .map(|rest| {
            let mut kinds: Vec<String> = rest
                .split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
            kinds.sort();
            kinds
        })
}

fn kinds<'a>(diagnostics: impl Iterator<Item = &'a lib50::config::Diagnostic>) -> Vec<String> {
    let mut kinds: Vec<String> = diagnostics.map(|d| d.kind().to_string()).collect();
    kinds.sort();
    kinds
}

fn describe(diagnostics: &Diagnostics) -> String {
    diagnostics.iter().map(|d| d.to_string()).collect::<Vec<_>>().join("; ")
}

/// Validate one fixture and compare the outcome with its header.
fn test_config_fixture(path: &Path) -> datatest_stable::Result<()> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read test file {}: {}", path.display(), e))?;

    let expected = header(&content, "expect")
        .ok_or_else(|| format!("{} has no '# expect:' header", path.display()))?;
    let result = loader().load_str(&content, TOOL, path);

    match (expected.as_slice(), result) {
        ([ok], Ok(options)) if ok == "ok" => {
            let warnings = header(&content, "warnings").unwrap_or_default();
            assert_eq!(
                kinds(options.warnings().iter()),
                warnings,
                "unexpected warnings for {}",
                path.display()
            );
            assert!(
                options.get_str("language").is_some(),
                "{} validated without a language",
                path.display()
            );
            assert!(options.get_list("files").is_some(), "files default missing");
        }
        ([ok], Err(diagnostics)) if ok == "ok" => {
            return Err(format!(
                "{} should be valid but failed: {}",
                path.display(),
                describe(&diagnostics)
            )
            .into());
        }
        (_, Ok(_)) => {
            return Err(format!("{} should fail with {:?} but loaded", path.display(), expected).into());
        }
        (_, Err(diagnostics)) => {
            assert_eq!(
                kinds(diagnostics.errors()),
                expected,
                "unexpected errors for {}: {}",
                path.display(),
                describe(&diagnostics)
            );
        }
    }

    Ok(())
}

datatest_stable::harness!(test_config_fixture, "tests/testdata/configs", r".*\.yaml$");
