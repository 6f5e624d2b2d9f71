//! # Error Handling
//!
//! This module defines the error taxonomy for every stage of the push workflow
//! and for the configuration loader. Each component owns a `thiserror` enum:
//!
//! - **`ConfigError`**: diagnostics produced while loading a `.cs50.yml` file.
//!   These accumulate; the loader returns all of them together.
//! - **`SchemaError`**: raised while composing option schemas from fragments.
//! - **`SlugError`**: slug grammar and lookup failures.
//! - **`SelectionError`**: file selection failures, all detected before any
//!   network activity.
//! - **`PrepareError`**: failures while staging the local commit.
//! - **`SyncError`**: authentication, reconciliation and push failures.
//! - **`PushError`**: one of the above, tagged with the stage that produced it.
//!
//! Every error maps to a stable [`ErrorKind`] so calling tools can branch on the
//! kind without parsing messages, while `Display` stays human-readable (which
//! file, which option, which host response).

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Stable, machine-readable classification of every failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MissingConfig,
    MalformedConfig,
    TypeMismatch,
    MissingRequiredOption,
    UnknownOption,
    ConstraintViolation,
    MissingTool,
    SchemaConflict,
    InvalidSlug,
    UnknownSlug,
    IndexUnavailable,
    MissingRequiredFile,
    FileTooLarge,
    SelectionTooLarge,
    UnsafePath,
    TooManyFiles,
    EmptySelection,
    InvalidPattern,
    Declined,
    NothingToPush,
    PrepareConflict,
    VcsUnavailable,
    AuthRequired,
    AuthRejected,
    DivergedHistory,
    Timeout,
    HostRejected,
    RetriesExhausted,
    Network,
    Git,
    Io,
    Settings,
}

impl ErrorKind {
    /// The kind as a stable snake_case identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MissingConfig => "missing_config",
            ErrorKind::MalformedConfig => "malformed_config",
            ErrorKind::TypeMismatch => "type_mismatch",
            ErrorKind::MissingRequiredOption => "missing_required_option",
            ErrorKind::UnknownOption => "unknown_option",
            ErrorKind::ConstraintViolation => "constraint_violation",
            ErrorKind::MissingTool => "missing_tool",
            ErrorKind::SchemaConflict => "schema_conflict",
            ErrorKind::InvalidSlug => "invalid_slug",
            ErrorKind::UnknownSlug => "unknown_slug",
            ErrorKind::IndexUnavailable => "index_unavailable",
            ErrorKind::MissingRequiredFile => "missing_required_file",
            ErrorKind::FileTooLarge => "file_too_large",
            ErrorKind::SelectionTooLarge => "selection_too_large",
            ErrorKind::UnsafePath => "unsafe_path",
            ErrorKind::TooManyFiles => "too_many_files",
            ErrorKind::EmptySelection => "empty_selection",
            ErrorKind::InvalidPattern => "invalid_pattern",
            ErrorKind::Declined => "declined",
            ErrorKind::NothingToPush => "nothing_to_push",
            ErrorKind::PrepareConflict => "prepare_conflict",
            ErrorKind::VcsUnavailable => "vcs_unavailable",
            ErrorKind::AuthRequired => "auth_required",
            ErrorKind::AuthRejected => "auth_rejected",
            ErrorKind::DivergedHistory => "diverged_history",
            ErrorKind::Timeout => "timeout",
            ErrorKind::HostRejected => "host_rejected",
            ErrorKind::RetriesExhausted => "retries_exhausted",
            ErrorKind::Network => "network",
            ErrorKind::Git => "git",
            ErrorKind::Io => "io",
            ErrorKind::Settings => "settings",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A line/column position inside a config document (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// A single problem found while loading a config document.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// No config file exists and the tool has required options.
    #[error("No config file (.cs50.yml or .cs50.yaml) found in {}", dir.display())]
    MissingConfig { dir: PathBuf },

    /// The document is not valid YAML, or is ambiguous.
    #[error("Malformed config {}: {message}{}", path.display(), location.map(|l| format!(" (at {})", l)).unwrap_or_default())]
    MalformedConfig {
        path: PathBuf,
        message: String,
        location: Option<Location>,
    },

    /// An option's value has the wrong type.
    #[error("Option '{key}' expects {expected}, found {actual}")]
    TypeMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    /// A required option is absent.
    #[error("Missing required option '{key}'")]
    MissingRequiredOption { key: String },

    /// A key under the tool's namespace that the schema does not define.
    #[error("Unknown option '{key}'")]
    UnknownOption { key: String },

    /// A value has the right type but fails a constraint.
    #[error("Option '{key}' is invalid: {message}")]
    ConstraintViolation { key: String, message: String },

    /// The document exists but does not enable the tool.
    #[error("{tool} is not enabled by this config file")]
    MissingTool { tool: String },
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConfigError::MissingConfig { .. } => ErrorKind::MissingConfig,
            ConfigError::MalformedConfig { .. } => ErrorKind::MalformedConfig,
            ConfigError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            ConfigError::MissingRequiredOption { .. } => ErrorKind::MissingRequiredOption,
            ConfigError::UnknownOption { .. } => ErrorKind::UnknownOption,
            ConfigError::ConstraintViolation { .. } => ErrorKind::ConstraintViolation,
            ConfigError::MissingTool { .. } => ErrorKind::MissingTool,
        }
    }
}

/// Raised while composing option schemas.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// Two fragments define the same option differently.
    #[error("Conflicting definitions for option '{key}' of tool '{tool}': {existing} vs {incoming}")]
    Conflict {
        tool: String,
        key: String,
        existing: String,
        incoming: String,
    },
}

impl SchemaError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::SchemaConflict
    }
}

/// Slug parsing and resolution failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SlugError {
    #[error("Invalid slug '{slug}': {reason}")]
    InvalidSlug { slug: String, reason: String },

    #[error("Unknown slug '{slug}'. Did you mean something else?")]
    UnknownSlug { slug: String },

    /// The remote-hosted slug index could not be retrieved or decoded.
    #[error("Could not load slug index from {url}: {message}")]
    IndexUnavailable { url: String, message: String },
}

impl SlugError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SlugError::InvalidSlug { .. } => ErrorKind::InvalidSlug,
            SlugError::UnknownSlug { .. } => ErrorKind::UnknownSlug,
            SlugError::IndexUnavailable { .. } => ErrorKind::IndexUnavailable,
        }
    }
}

/// File selection failures.
#[derive(Error, Debug)]
pub enum SelectionError {
    #[error("You seem to be missing these required files: {}\nYou are currently in: {}", rules.join(", "), root.display())]
    MissingRequiredFile { rules: Vec<String>, root: PathBuf },

    #[error("{} is too large to be submitted ({size} bytes, limit {limit} bytes)", path.display())]
    FileTooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("Selected files total {total} bytes, limit is {limit} bytes: {}", paths.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", "))]
    SelectionTooLarge {
        total: u64,
        limit: u64,
        paths: Vec<PathBuf>,
    },

    #[error("Refusing unsafe path {}: {reason}", path.display())]
    UnsafePath { path: PathBuf, reason: String },

    #[error("Looks like you are in a directory with too many (> {limit}) files ({count} selected in {})", root.display())]
    TooManyFiles {
        count: usize,
        limit: usize,
        root: PathBuf,
    },

    #[error("No files in {} are expected for submission", root.display())]
    EmptySelection { root: PathBuf },

    #[error("Invalid file pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// The caller's confirmation refused the selected files.
    #[error("Push from {} cancelled: the selected files were not confirmed", root.display())]
    Declined { root: PathBuf },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SelectionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SelectionError::MissingRequiredFile { .. } => ErrorKind::MissingRequiredFile,
            SelectionError::FileTooLarge { .. } => ErrorKind::FileTooLarge,
            SelectionError::SelectionTooLarge { .. } => ErrorKind::SelectionTooLarge,
            SelectionError::UnsafePath { .. } => ErrorKind::UnsafePath,
            SelectionError::TooManyFiles { .. } => ErrorKind::TooManyFiles,
            SelectionError::EmptySelection { .. } => ErrorKind::EmptySelection,
            SelectionError::InvalidPattern { .. } => ErrorKind::InvalidPattern,
            SelectionError::Declined { .. } => ErrorKind::Declined,
            SelectionError::Io { .. } => ErrorKind::Io,
        }
    }
}

/// Failure to run a subprocess at all, independent of its exit status.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("{program} is not installed or not on PATH")]
    NotFound { program: String },

    #[error("{command} timed out after {}s", after.as_secs_f64())]
    Timeout { command: String, after: Duration },

    #[error("Failed to run {command}: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// A git invocation that ran but did not do what was asked.
#[derive(Error, Debug)]
pub enum GitError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("git {command} failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("Unexpected output from git {command}: {output}")]
    UnexpectedOutput { command: String, output: String },

    #[error("git {found} is too old; version {required} or later is required")]
    Unsupported { found: String, required: String },
}

impl GitError {
    /// Whether git itself is missing or unusable, as opposed to a failed command.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            GitError::Process(ProcessError::NotFound { .. }) | GitError::Unsupported { .. }
        )
    }
}

/// Failures while staging the local commit.
#[derive(Error, Debug)]
pub enum PrepareError {
    /// The prepared tree is identical to the last synchronized state.
    #[error("Nothing to push: {branch} already contains these files")]
    NothingToPush { branch: String },

    #[error("Staging repository {} has pending state ({reason}); resolve it before pushing again", git_dir.display())]
    PrepareConflict { git_dir: PathBuf, reason: String },

    #[error("{message}")]
    VcsUnavailable { message: String },

    #[error(transparent)]
    Git(#[from] GitError),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PrepareError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PrepareError::NothingToPush { .. } => ErrorKind::NothingToPush,
            PrepareError::PrepareConflict { .. } => ErrorKind::PrepareConflict,
            PrepareError::VcsUnavailable { .. } => ErrorKind::VcsUnavailable,
            PrepareError::Git(_) => ErrorKind::Git,
            PrepareError::Io { .. } => ErrorKind::Io,
        }
    }
}

/// Failures while synchronizing with the remote host.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Authentication with {host} is required but no credentials were supplied")]
    AuthRequired { host: String },

    #[error("{host} rejected the supplied credentials: {message}")]
    AuthRejected { host: String, message: String },

    #[error("Remote branch {branch} has diverged; both sides changed: {}", paths.join(", "))]
    DivergedHistory { branch: String, paths: Vec<String> },

    #[error("{operation} timed out after {}s", after.as_secs_f64())]
    Timeout { operation: String, after: Duration },

    /// The host refused the push; `reason` is the host's own text.
    #[error("Remote rejected the push: {reason}")]
    HostRejected { reason: String },

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("Nothing to push: {branch} already contains this change")]
    NothingToPush { branch: String },

    #[error("{message}")]
    VcsUnavailable { message: String },

    #[error("Could not reach {url}: {message}")]
    Network { url: String, message: String },

    #[error(transparent)]
    Git(GitError),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::AuthRequired { .. } => ErrorKind::AuthRequired,
            SyncError::AuthRejected { .. } => ErrorKind::AuthRejected,
            SyncError::DivergedHistory { .. } => ErrorKind::DivergedHistory,
            SyncError::Timeout { .. } => ErrorKind::Timeout,
            SyncError::HostRejected { .. } => ErrorKind::HostRejected,
            SyncError::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
            SyncError::NothingToPush { .. } => ErrorKind::NothingToPush,
            SyncError::VcsUnavailable { .. } => ErrorKind::VcsUnavailable,
            SyncError::Network { .. } => ErrorKind::Network,
            SyncError::Git(_) => ErrorKind::Git,
        }
    }

    /// Whether the bounded retry loop may try again after this failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Timeout { .. } | SyncError::Network { .. })
    }
}

impl From<GitError> for SyncError {
    fn from(error: GitError) -> Self {
        match error {
            GitError::Process(ProcessError::Timeout { command, after }) => SyncError::Timeout {
                operation: command,
                after,
            },
            GitError::Process(ProcessError::NotFound { program }) => SyncError::VcsUnavailable {
                message: format!("{} is not installed or not on PATH", program),
            },
            unsupported @ GitError::Unsupported { .. } => SyncError::VcsUnavailable {
                message: unsupported.to_string(),
            },
            other => SyncError::Git(other),
        }
    }
}

/// The stage of the push workflow that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolve,
    Select,
    Prepare,
    Synchronize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Resolve => "resolve",
            Stage::Select => "select",
            Stage::Prepare => "prepare",
            Stage::Synchronize => "synchronize",
        };
        f.write_str(name)
    }
}

/// A push failure, tagged with the stage that produced it.
#[derive(Error, Debug)]
pub enum PushError {
    #[error("Resolving slug failed: {0}")]
    Resolve(#[from] SlugError),

    #[error("Selecting files failed: {0}")]
    Select(#[from] SelectionError),

    #[error("Preparing commit failed: {0}")]
    Prepare(#[from] PrepareError),

    #[error("Synchronizing with remote failed: {0}")]
    Synchronize(#[from] SyncError),
}

impl PushError {
    pub fn stage(&self) -> Stage {
        match self {
            PushError::Resolve(_) => Stage::Resolve,
            PushError::Select(_) => Stage::Select,
            PushError::Prepare(_) => Stage::Prepare,
            PushError::Synchronize(_) => Stage::Synchronize,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PushError::Resolve(e) => e.kind(),
            PushError::Select(e) => e.kind(),
            PushError::Prepare(e) => e.kind(),
            PushError::Synchronize(e) => e.kind(),
        }
    }
}

/// Failures while loading engine settings.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Could not read settings file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not parse settings file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid value '{value}' for {name}: {message}")]
    InvalidValue {
        name: String,
        value: String,
        message: String,
    },
}

impl SettingsError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_malformed_config_with_location() {
        let error = ConfigError::MalformedConfig {
            path: PathBuf::from(".cs50.yml"),
            message: "did not find expected key".to_string(),
            location: Some(Location { line: 3, column: 5 }),
        };
        let display = format!("{}", error);
        assert!(display.contains("Malformed config .cs50.yml"));
        assert!(display.contains("did not find expected key"));
        assert!(display.contains("(at line 3, column 5)"));
    }

    #[test]
    fn test_error_display_malformed_config_without_location() {
        let error = ConfigError::MalformedConfig {
            path: PathBuf::from(".cs50.yml"),
            message: "ambiguous".to_string(),
            location: None,
        };
        assert!(!format!("{}", error).contains("(at"));
    }

    #[test]
    fn test_error_display_type_mismatch() {
        let error = ConfigError::TypeMismatch {
            key: "language".to_string(),
            expected: "string".to_string(),
            actual: "integer".to_string(),
        };
        assert_eq!(
            format!("{}", error),
            "Option 'language' expects string, found integer"
        );
        assert_eq!(error.kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_error_display_missing_required_file() {
        let error = SelectionError::MissingRequiredFile {
            rules: vec!["hello.c".to_string(), "Makefile".to_string()],
            root: PathBuf::from("/home/student/hello"),
        };
        let display = format!("{}", error);
        assert!(display.contains("hello.c, Makefile"));
        assert!(display.contains("/home/student/hello"));
        assert_eq!(error.kind(), ErrorKind::MissingRequiredFile);
    }

    #[test]
    fn test_host_rejected_preserves_reason_verbatim() {
        let reason = "remote: Permission to me50/alice.git denied to bob.";
        let error = SyncError::HostRejected {
            reason: reason.to_string(),
        };
        assert!(format!("{}", error).ends_with(reason));
    }

    #[test]
    fn test_git_timeout_maps_to_sync_timeout() {
        let error: SyncError = GitError::Process(ProcessError::Timeout {
            command: "git push".to_string(),
            after: Duration::from_secs(30),
        })
        .into();
        assert_eq!(error.kind(), ErrorKind::Timeout);
        assert!(error.is_transient());
    }

    #[test]
    fn test_git_not_found_maps_to_vcs_unavailable() {
        let error: SyncError = GitError::Process(ProcessError::NotFound {
            program: "git".to_string(),
        })
        .into();
        assert_eq!(error.kind(), ErrorKind::VcsUnavailable);
        assert!(!error.is_transient());
    }

    #[test]
    fn test_push_error_keeps_stage_and_kind() {
        let error = PushError::from(SlugError::UnknownSlug {
            slug: "bogus/slug".to_string(),
        });
        assert_eq!(error.stage(), Stage::Resolve);
        assert_eq!(error.kind(), ErrorKind::UnknownSlug);
        assert!(format!("{}", error).contains("bogus/slug"));

        let error = PushError::from(SyncError::RetriesExhausted {
            attempts: 3,
            last: "remote moved".to_string(),
        });
        assert_eq!(error.stage(), Stage::Synchronize);
        assert_eq!(error.kind(), ErrorKind::RetriesExhausted);
    }

    #[test]
    fn test_error_kind_identifiers_are_snake_case() {
        assert_eq!(ErrorKind::MissingRequiredOption.as_str(), "missing_required_option");
        assert_eq!(ErrorKind::DivergedHistory.to_string(), "diverged_history");
    }
}
