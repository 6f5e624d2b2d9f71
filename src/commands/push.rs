//! # Push Command Implementation
//!
//! Pushes the current workspace to the repository its slug resolves to.
//!
//! File rules come from `--include`/`--exclude`/`--require` when any is given,
//! otherwise from the `files:` list of the tool's section in `.cs50.yml`.
//! Credentials are read from `LIB50_TOKEN` and `LIB50_USERNAME`.
//!
//! With `--remote-root`, bare repositories under a local directory stand in
//! for the remote host.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;

use lib50::error::ErrorKind;
use lib50::git::{SystemGit, VersionControl};
use lib50::host::{Credentials, HttpHost, LocalHost, RemoteHost};
use lib50::push::{PushRequest, Pusher};
use lib50::selector::FilterRules;
use lib50::settings::Settings;
use lib50::suggestions;

/// Push a workspace to the repository a slug resolves to
#[derive(Args, Debug)]
pub struct PushArgs {
    /// Slug identifying the target, e.g. cs50/problems/2024/x/hello.
    pub slug: String,

    /// Name of the calling tool; selects the .cs50.yml section and is recorded
    /// in the commit message.
    #[arg(long, default_value = "lib50", env = "LIB50_TOOL")]
    pub tool: String,

    /// Workspace directory to push.
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    pub dir: PathBuf,

    /// Include files matching this pattern. May be repeated.
    #[arg(long, value_name = "PATTERN")]
    pub include: Vec<String>,

    /// Exclude files matching this pattern; excludes always win.
    #[arg(long, value_name = "PATTERN")]
    pub exclude: Vec<String>,

    /// Fail unless a file matching this pattern is selected.
    #[arg(long, value_name = "PATTERN")]
    pub require: Vec<String>,

    /// Extra KEY=VALUE pair recorded in the commit message. May be repeated.
    #[arg(long, value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub data: Vec<(String, String)>,

    /// Serve bare repositories from this directory instead of the remote host.
    #[arg(long, value_name = "DIR", env = "LIB50_REMOTE_ROOT")]
    pub remote_root: Option<PathBuf>,

    /// Slug index JSON file, used with --remote-root.
    #[arg(long, value_name = "FILE", requires = "remote_root")]
    pub index_file: Option<PathBuf>,
}

fn parse_key_value(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))
}

pub fn execute(args: PushArgs) -> Result<()> {
    let settings = Settings::load().context("Failed to load lib50 settings")?;
    let vcs: Arc<dyn VersionControl> = Arc::new(SystemGit::new().with_timeout(settings.timeout()));
    let host: Arc<dyn RemoteHost> = match &args.remote_root {
        Some(root) => {
            let mut local = LocalHost::new(root);
            if let Some(index) = &args.index_file {
                local = local.with_index_file(index);
            }
            Arc::new(local)
        }
        None => {
            let mut http = HttpHost::new(&settings.api_url, &settings.git_url, settings.timeout())?;
            if let Some(url) = &settings.index_url {
                http = http.with_index_url(url)?;
            }
            Arc::new(http)
        }
    };

    let rules = if args.include.is_empty() && args.exclude.is_empty() && args.require.is_empty() {
        let loader = super::loader_for(&args.tool, &[], false)?;
        FilterRules::from_options(&super::load_options(&loader, &args.dir, &args.tool)?)
    } else {
        FilterRules {
            include: args.include.clone(),
            exclude: args.exclude.clone(),
            required: args.require.clone(),
        }
    };

    let mut request = PushRequest::new(&args.tool, &args.slug, args.dir.clone())
        .rules(rules)
        .credentials(Credentials::from_env());
    for (key, value) in &args.data {
        request = request.data(key, value);
    }

    let pusher = Pusher::from_host(vcs, host, settings)
        .map_err(|e| anyhow::anyhow!("{}", suggestions::with_hints(e.kind(), &e.to_string())))?;

    match pusher.push(&request) {
        Ok(result) => {
            println!("Pushed {} to {} ({})", result.commit, result.url, result.branch);
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NothingToPush => {
            println!("{}", e);
            Ok(())
        }
        Err(e) => Err(suggestions::push_failed(&e)),
    }
}
