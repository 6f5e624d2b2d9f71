//! # CLI Command Implementations
//!
//! Each subcommand of the `lib50` tool lives in its own file with:
//! - an `Args` struct deriving `clap::Args`;
//! - an `execute` function that takes the parsed `Args` and calls into the
//!   `lib50` library.

pub mod push;
pub mod validate;

use lib50::config::{ConfigLoader, ValidatedOptions};
use lib50::schema::{
    files_fragment, OptionDef, OptionSpec, OptionType, SchemaBuilder, UnknownKeyPolicy,
};
use std::path::Path;

/// A loader for `tool` whose schema is the shared `files` fragment plus
/// `required` string options.
pub fn loader_for(tool: &str, required: &[String], strict: bool) -> anyhow::Result<ConfigLoader> {
    let mut extra = OptionSpec::new();
    for name in required {
        extra = extra.option(OptionDef::new(name, OptionType::String).required());
    }
    if strict {
        extra = extra.unknown_keys(UnknownKeyPolicy::Reject);
    }

    let schema = SchemaBuilder::new()
        .register(tool, files_fragment())?
        .register(tool, extra)?
        .build();
    Ok(ConfigLoader::new(schema))
}

/// Load and validate, turning diagnostics into a hinted error.
pub fn load_options(loader: &ConfigLoader, root: &Path, tool: &str) -> anyhow::Result<ValidatedOptions> {
    loader
        .load(root, tool)
        .map_err(|diagnostics| lib50::suggestions::config_invalid(&diagnostics, loader.schema().tool(tool)))
}
