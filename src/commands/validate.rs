//! # Validate Command Implementation
//!
//! Validates a workspace's `.cs50.yml` for one tool without pushing anything.
//! On success the validated options are printed as YAML, defaults filled in;
//! warnings go to stderr. On failure every diagnostic is printed.

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

/// Validate the .cs50.yml configuration of a workspace for one tool
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Tool whose section of the config file is validated (e.g. check50).
    pub tool: String,

    /// Workspace directory holding .cs50.yml.
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    pub dir: PathBuf,

    /// Additional string option the tool requires. May be repeated.
    #[arg(long = "require-option", value_name = "NAME")]
    pub required: Vec<String>,

    /// Treat unknown options as errors instead of warnings.
    #[arg(long)]
    pub strict: bool,
}

pub fn execute(args: ValidateArgs) -> Result<()> {
    let loader = super::loader_for(&args.tool, &args.required, args.strict)?;
    let options = super::load_options(&loader, &args.dir, &args.tool)?;

    for warning in options.warnings() {
        eprintln!("{}", warning);
    }
    print!("{}", options.to_yaml_string()?);
    Ok(())
}
