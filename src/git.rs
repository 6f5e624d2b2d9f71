//! # Git Subprocess Boundary
//!
//! Everything the workflow needs from version control goes through the narrow
//! [`VersionControl`] trait. [`SystemGit`] is the one real adapter: it spawns
//! the `git` binary, which picks up the user's own SSH keys, credential
//! helpers and config. Tests substitute scripted implementations.
//!
//! Every invocation carries a timeout. Config values marked secret (such as
//! the `http.extraHeader` carrying credentials) are passed to git through its
//! environment, never on the command line where other local users could read
//! them, and are never logged.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use log::debug;
use secrecy::{ExposeSecret, SecretString};
use semver::Version;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{GitError, ProcessError};

/// Oldest git release whose plumbing behaves the way this crate expects.
pub const MIN_GIT_VERSION: Version = Version::new(2, 7, 0);

/// Default per-call timeout when an invocation does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// First release reading config from `GIT_CONFIG_COUNT`/`KEY_n`/`VALUE_n`.
const CONFIG_ENV_VERSION: Version = Version::new(2, 31, 0);

/// A single `git` command line plus its environment.
#[derive(Debug, Clone, Default)]
pub struct GitInvocation {
    pub args: Vec<String>,
    pub git_dir: Option<PathBuf>,
    pub work_tree: Option<PathBuf>,
    pub current_dir: Option<PathBuf>,
    /// Alternate index file (`GIT_INDEX_FILE`).
    pub index_file: Option<PathBuf>,
    pub stdin: Option<Vec<u8>>,
    pub env: Vec<(String, String)>,
    /// `-c key=value` pairs.
    pub config: Vec<(String, String)>,
    /// Config pairs whose values are never logged nor put on the command
    /// line.
    pub secret_config: Vec<(String, SecretString)>,
    pub timeout: Option<Duration>,
}

impl GitInvocation {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn git_dir(mut self, path: &Path) -> Self {
        self.git_dir = Some(path.to_path_buf());
        self
    }

    pub fn work_tree(mut self, path: &Path) -> Self {
        self.work_tree = Some(path.to_path_buf());
        self
    }

    pub fn current_dir(mut self, path: &Path) -> Self {
        self.current_dir = Some(path.to_path_buf());
        self
    }

    pub fn index_file(mut self, path: &Path) -> Self {
        self.index_file = Some(path.to_path_buf());
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    pub fn config(mut self, key: &str, value: &str) -> Self {
        self.config.push((key.to_string(), value.to_string()));
        self
    }

    pub fn secret_config(mut self, key: &str, value: SecretString) -> Self {
        self.secret_config.push((key.to_string(), value));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The git subcommand, e.g. `push`.
    pub fn subcommand(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or("")
    }

    /// The command line with secret values redacted, for logs and errors.
    pub fn describe(&self) -> String {
        let mut parts = vec!["git".to_string()];
        for (key, value) in &self.config {
            parts.push(format!("-c {}={}", key, value));
        }
        for (key, _) in &self.secret_config {
            parts.push(format!("-c {}=<redacted>", key));
        }
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Captured result of a git invocation that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GitOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    pub fn ok(stdout: &str) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: &str) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }
}

/// The version-control capability the workflow depends on.
pub trait VersionControl: Send + Sync {
    /// Run an invocation. A non-zero exit is a normal `GitOutput`; only
    /// failing to run at all (or timing out) is an error.
    fn run(&self, invocation: &GitInvocation) -> Result<GitOutput, ProcessError>;

    /// Run an invocation that must succeed, returning trimmed stdout.
    fn output(&self, invocation: &GitInvocation) -> Result<String, GitError> {
        let output = self.run(invocation)?;
        if !output.success {
            return Err(GitError::Command {
                command: invocation.args.join(" "),
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout.trim().to_string())
    }
}

/// Runs the system `git` binary.
///
/// `run` drives the child on a private current-thread runtime, so it must not
/// be called from inside an async context.
#[derive(Debug, Clone)]
pub struct SystemGit {
    program: PathBuf,
    default_timeout: Duration,
    version: OnceLock<Option<Version>>,
}

impl Default for SystemGit {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemGit {
    pub fn new() -> Self {
        Self::with_program("git")
    }

    /// Use a different executable, e.g. an absolute path to git.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            default_timeout: DEFAULT_TIMEOUT,
            version: OnceLock::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Skip version detection, e.g. after [`ensure_available`] already ran.
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = OnceLock::from(Some(version));
        self
    }

    /// The installed version, detected once. `None` if it could not be read.
    fn version(&self) -> Option<Version> {
        self.version
            .get_or_init(|| {
                let output = self.run(&GitInvocation::new(["--version"])).ok()?;
                parse_version(&output.stdout)
            })
            .clone()
    }

    fn command(&self, invocation: &GitInvocation, secret_env: &[(String, String)]) -> Command {
        let mut command = Command::new(&self.program);

        for (key, value) in &invocation.config {
            command.arg("-c").arg(format!("{}={}", key, value));
        }
        if let Some(git_dir) = &invocation.git_dir {
            command.arg(format!("--git-dir={}", git_dir.display()));
        }
        if let Some(work_tree) = &invocation.work_tree {
            command.arg(format!("--work-tree={}", work_tree.display()));
        }
        command.args(&invocation.args);

        if let Some(dir) = &invocation.current_dir {
            command.current_dir(dir);
        }
        if let Some(index) = &invocation.index_file {
            command.env("GIT_INDEX_FILE", index);
        }
        command.env("GIT_TERMINAL_PROMPT", "0");
        for (key, value) in invocation.env.iter().chain(secret_env) {
            command.env(key, value);
        }

        command
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    async fn run_child(
        &self,
        invocation: &GitInvocation,
        secret_env: &[(String, String)],
        description: &str,
        timeout: Duration,
    ) -> Result<GitOutput, ProcessError> {
        let io_error = |source: std::io::Error| ProcessError::Io {
            command: description.to_string(),
            source,
        };

        let mut child = self.command(invocation, secret_env).spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProcessError::NotFound {
                    program: self.program.display().to_string(),
                }
            } else {
                io_error(e)
            }
        })?;

        let pipe = child.stdin.take();
        let feed = async move {
            match (pipe, invocation.stdin.as_deref()) {
                (Some(mut pipe), Some(input)) => pipe.write_all(input).await,
                _ => Ok(()),
            }
        };
        let finished = tokio::time::timeout(timeout, async move {
            tokio::join!(feed, child.wait_with_output())
        })
        .await;

        // On timeout the child is dropped, and killed with it.
        let Ok((fed, output)) = finished else {
            debug!("{} timed out after {:?}", description, timeout);
            return Err(ProcessError::Timeout {
                command: description.to_string(),
                after: timeout,
            });
        };
        let output = output.map_err(io_error)?;

        // A child that fails before reading all of its input closes the pipe
        // early; its own exit status and stderr then tell the story.
        if let Err(e) = fed {
            if e.kind() != std::io::ErrorKind::BrokenPipe || output.status.success() {
                return Err(io_error(e));
            }
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            debug!("{} exited with {:?}: {}", description, output.status.code(), stderr.trim());
        }

        Ok(GitOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout,
            stderr,
        })
    }
}

/// Environment carrying secret config values to git.
///
/// Git 2.31 and later read `GIT_CONFIG_COUNT` with numbered key/value pairs.
/// Older releases only read `GIT_CONFIG_PARAMETERS`, a list of shell-quoted
/// `'key=value'` words; an existing value is kept in front.
pub fn secret_config_env(
    secrets: &[(String, SecretString)],
    version: Option<&Version>,
    inherited_parameters: Option<&str>,
) -> Vec<(String, String)> {
    if secrets.is_empty() {
        return Vec::new();
    }

    if version.is_some_and(|v| *v >= CONFIG_ENV_VERSION) {
        let mut env = vec![("GIT_CONFIG_COUNT".to_string(), secrets.len().to_string())];
        for (i, (key, value)) in secrets.iter().enumerate() {
            env.push((format!("GIT_CONFIG_KEY_{}", i), key.clone()));
            env.push((format!("GIT_CONFIG_VALUE_{}", i), value.expose_secret().to_string()));
        }
        return env;
    }

    let mut words: Vec<String> = inherited_parameters
        .filter(|p| !p.trim().is_empty())
        .map(|p| vec![p.trim().to_string()])
        .unwrap_or_default();
    for (key, value) in secrets {
        words.push(sq_quote(&format!("{}={}", key, value.expose_secret())));
    }
    vec![("GIT_CONFIG_PARAMETERS".to_string(), words.join(" "))]
}

/// Quote one word the way git's `sq_quote` does.
fn sq_quote(word: &str) -> String {
    let mut quoted = String::from("'");
    for c in word.chars() {
        match c {
            '\'' => quoted.push_str("'\\''"),
            '!' => quoted.push_str("'\\!'"),
            c => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}

impl VersionControl for SystemGit {
    fn run(&self, invocation: &GitInvocation) -> Result<GitOutput, ProcessError> {
        let description = invocation.describe();
        let timeout = invocation.timeout.unwrap_or(self.default_timeout);
        debug!("Running {}", description);

        let secret_env = if invocation.secret_config.is_empty() {
            Vec::new()
        } else {
            let inherited = std::env::var("GIT_CONFIG_PARAMETERS").ok();
            secret_config_env(
                &invocation.secret_config,
                self.version().as_ref(),
                inherited.as_deref(),
            )
        };

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .enable_time()
            .build()
            .map_err(|e| ProcessError::Io {
                command: description.clone(),
                source: e,
            })?;
        runtime.block_on(self.run_child(invocation, &secret_env, &description, timeout))
    }
}

/// Parse the output of `git --version`.
///
/// Handles vendor suffixes such as `2.39.2.windows.1` and
/// `2.37.1 (Apple Git-137.1)`, and two-component versions.
pub fn parse_version(output: &str) -> Option<Version> {
    let raw = output.trim().strip_prefix("git version ")?;
    let raw = raw.split_whitespace().next()?;

    let mut numbers = raw
        .split('.')
        .map_while(|part| part.parse::<u64>().ok());
    let major = numbers.next()?;
    let minor = numbers.next().unwrap_or(0);
    let patch = numbers.next().unwrap_or(0);
    Some(Version::new(major, minor, patch))
}

/// Verify git is installed and recent enough.
pub fn ensure_available(vcs: &dyn VersionControl) -> Result<Version, GitError> {
    let invocation = GitInvocation::new(["--version"]);
    let output = vcs.output(&invocation)?;
    let version = parse_version(&output).ok_or_else(|| GitError::UnexpectedOutput {
        command: "--version".to_string(),
        output: output.clone(),
    })?;

    if version < MIN_GIT_VERSION {
        return Err(GitError::Unsupported {
            found: version.to_string(),
            required: MIN_GIT_VERSION.to_string(),
        });
    }

    debug!("Using git {}", version);
    Ok(version)
}

/// A branch advertised by a remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHead {
    pub commit: String,
    pub branch: String,
}

/// Parse `git ls-remote --heads` output (`<hash>\t<ref>` per line).
pub fn parse_heads(output: &str) -> Vec<RemoteHead> {
    output
        .lines()
        .filter_map(|line| {
            let (commit, reference) = line.split_once('\t')?;
            let branch = reference.trim().strip_prefix("refs/heads/")?;
            Some(RemoteHead {
                commit: commit.trim().to_string(),
                branch: branch.to_string(),
            })
        })
        .collect()
}

/// List the branches of a remote. `invocation` is the base to extend (with
/// auth config and timeout already set); `ls-remote --heads <url>` is added.
pub fn list_branches(
    vcs: &dyn VersionControl,
    invocation: GitInvocation,
    url: &str,
) -> Result<Vec<RemoteHead>, GitError> {
    let mut invocation = invocation;
    invocation.args = vec!["ls-remote".to_string(), "--heads".to_string(), url.to_string()];
    let output = vcs.output(&invocation)?;
    Ok(parse_heads(&output))
}

/// Whether a `git` binary can be run at all. Used to skip tests.
pub fn git_on_path() -> bool {
    SystemGit::new()
        .run(&GitInvocation::new(["--version"]))
        .map(|o| o.success)
        .unwrap_or(false)
}
