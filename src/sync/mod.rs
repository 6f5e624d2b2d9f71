//! # Remote Synchronization
//!
//! Lands a [`PreparedChange`] on the remote branch without clobbering work
//! pushed there by someone else in the meantime.
//!
//! Synchronization is an explicit state machine:
//!
//! ```text
//! Authenticate ──► FetchRemote ──► Reconcile ──► Push ──► Success
//!      │                │              │           │
//!      │ (transient)    │ (transient)  │           │ (remote moved, transient)
//!      ▼                ▼              ▼           ▼
//!    Retry ◄────────────┴──────────────┴───────────┘
//!      │ resumes at Authenticate or FetchRemote
//!      ▼
//!    Fail  (RetriesExhausted once the policy allows no further attempt)
//! ```
//!
//! Every attempt re-fetches the remote state; nothing learned about the remote
//! in one attempt is reused in the next.

mod reconcile;
pub mod retry;

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use crate::error::{GitError, SyncError};
use crate::git::{self, GitInvocation, VersionControl, DEFAULT_TIMEOUT};
use crate::host::{Credentials, RemoteHost, Session};
use crate::prepare::{short, tracking_ref, PreparedChange};
use crate::slug::SlugTarget;

use reconcile::{reconcile, Reconciliation, Staging};
pub use retry::RetryPolicy;

/// The durable outcome of a successful push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushResult {
    pub commit: String,
    pub url: String,
    pub branch: String,
}

/// The remote branch as seen by one synchronization attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteState {
    /// The branch does not exist yet.
    Empty,
    Tip(String),
}

impl RemoteState {
    pub fn tip(&self) -> Option<&str> {
        match self {
            RemoteState::Empty => None,
            RemoteState::Tip(commit) => Some(commit),
        }
    }
}

/// Where a retried attempt picks up.
#[derive(Debug)]
enum Resume {
    Authenticate,
    FetchRemote(Session),
}

#[derive(Debug)]
enum SyncState {
    Authenticate,
    FetchRemote(Session),
    Reconcile(Session, RemoteState),
    Push(Session, String),
    Retry { resume: Resume, reason: String },
    Success(String),
    Fail(SyncError),
}

impl SyncState {
    fn name(&self) -> &'static str {
        match self {
            SyncState::Authenticate => "authenticate",
            SyncState::FetchRemote(_) => "fetch remote",
            SyncState::Reconcile(..) => "reconcile",
            SyncState::Push(..) => "push",
            SyncState::Retry { .. } => "retry",
            SyncState::Success(_) => "success",
            SyncState::Fail(_) => "fail",
        }
    }
}

/// What the host said to a push.
#[derive(Debug, PartialEq, Eq)]
enum PushOutcome {
    Accepted,
    /// The branch moved since it was fetched.
    RemoteMoved(String),
}

const REMOTE_MOVED: &[&str] = &["fetch first", "non-fast-forward"];

const AUTH_FAILED: &[&str] = &[
    "Authentication failed",
    "could not read Username",
    "Invalid username or password",
    "returned error: 401",
];

const UNREACHABLE: &[&str] = &[
    "Could not resolve host",
    "Failed to connect",
    "Connection refused",
    "Connection timed out",
    "Operation timed out",
    "Connection reset",
];

pub struct RemoteSynchronizer {
    vcs: Arc<dyn VersionControl>,
    host: Arc<dyn RemoteHost>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl RemoteSynchronizer {
    pub fn new(vcs: Arc<dyn VersionControl>, host: Arc<dyn RemoteHost>) -> Self {
        Self {
            vcs,
            host,
            policy: RetryPolicy::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Per-call timeout for git subprocesses.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn synchronize(
        &self,
        target: &SlugTarget,
        change: &PreparedChange,
        credentials: &Credentials,
    ) -> Result<PushResult, SyncError> {
        git::ensure_available(self.vcs.as_ref())?;

        let url = self.host.repository_url(&target.org, &target.repo);
        let branch = change.branch.as_str();
        let mut attempts: u32 = 1;
        let mut state = SyncState::Authenticate;

        loop {
            debug!("Synchronizing {} (attempt {}): {}", branch, attempts, state.name());
            state = match state {
                SyncState::Authenticate => match self.host.authenticate(credentials) {
                    Ok(session) => SyncState::FetchRemote(session),
                    Err(e) if e.is_transient() => SyncState::Retry {
                        resume: Resume::Authenticate,
                        reason: e.to_string(),
                    },
                    Err(e) => SyncState::Fail(e),
                },

                SyncState::FetchRemote(session) => {
                    match self.fetch_remote(&session, &change.git_dir, &url, branch) {
                        Ok(remote) => SyncState::Reconcile(session, remote),
                        Err(e) => retry_or_fail(e, Resume::FetchRemote(session)),
                    }
                }

                SyncState::Reconcile(session, remote) => {
                    let staging = Staging::new(self.vcs.as_ref(), &change.git_dir, self.timeout);
                    match reconcile(&staging, change, remote.tip()) {
                        Ok(Reconciliation::Push(commit)) => SyncState::Push(session, commit),
                        Ok(Reconciliation::UpToDate) => {
                            if let Some(tip) = remote.tip() {
                                self.keep_tracking(&change.git_dir, branch, tip);
                            }
                            SyncState::Fail(SyncError::NothingToPush {
                                branch: branch.to_string(),
                            })
                        }
                        Ok(Reconciliation::Diverged(paths)) => {
                            SyncState::Fail(SyncError::DivergedHistory {
                                branch: branch.to_string(),
                                paths,
                            })
                        }
                        Err(e) => retry_or_fail(e.into(), Resume::FetchRemote(session)),
                    }
                }

                SyncState::Push(session, commit) => {
                    match self.push(&session, &change.git_dir, &url, &commit, branch) {
                        Ok(PushOutcome::Accepted) => SyncState::Success(commit),
                        Ok(PushOutcome::RemoteMoved(reason)) => SyncState::Retry {
                            resume: Resume::FetchRemote(session),
                            reason,
                        },
                        Err(e) => retry_or_fail(e, Resume::FetchRemote(session)),
                    }
                }

                SyncState::Retry { resume, reason } => {
                    if !self.policy.allows_another(attempts) {
                        return Err(SyncError::RetriesExhausted {
                            attempts,
                            last: reason,
                        });
                    }
                    let delay = self.policy.delay_for(attempts);
                    warn!(
                        "Attempt {} of {} failed: {}; retrying in {:.1}s",
                        attempts,
                        self.policy.max_attempts,
                        reason,
                        delay.as_secs_f64()
                    );
                    thread::sleep(delay);
                    attempts += 1;
                    match resume {
                        Resume::Authenticate => SyncState::Authenticate,
                        Resume::FetchRemote(session) => SyncState::FetchRemote(session),
                    }
                }

                SyncState::Success(commit) => {
                    self.keep_tracking(&change.git_dir, branch, &commit);
                    info!("Pushed {} to {} ({})", short(&commit), url, branch);
                    return Ok(PushResult {
                        commit,
                        url,
                        branch: branch.to_string(),
                    });
                }

                SyncState::Fail(e) => return Err(e),
            };
        }
    }

    /// A network invocation carrying the session's credentials.
    fn remote_git(&self, session: &Session, git_dir: &Path) -> GitInvocation {
        session.authorize(GitInvocation::default().git_dir(git_dir).timeout(self.timeout))
    }

    fn fetch_remote(
        &self,
        session: &Session,
        git_dir: &Path,
        url: &str,
        branch: &str,
    ) -> Result<RemoteState, SyncError> {
        let heads = self
            .remote_git(session, git_dir)
            .arg("ls-remote")
            .arg("--heads")
            .arg(url)
            .arg(format!("refs/heads/{}", branch));
        let output = self.vcs.run(&heads).map_err(GitError::from)?;
        if !output.success {
            return Err(classify_remote_failure(&self.host_name(), "ls-remote", &output.stderr));
        }

        let Some(head) = git::parse_heads(&output.stdout)
            .into_iter()
            .find(|head| head.branch == branch)
        else {
            debug!("{} has no branch {}", url, branch);
            return Ok(RemoteState::Empty);
        };

        let fetch = self
            .remote_git(session, git_dir)
            .arg("fetch")
            .arg("-q")
            .arg("--no-tags")
            .arg(url)
            .arg(format!("+refs/heads/{}:{}", branch, fetched_ref(branch)));
        let output = self.vcs.run(&fetch).map_err(GitError::from)?;
        if !output.success {
            return Err(classify_remote_failure(&self.host_name(), "fetch", &output.stderr));
        }

        debug!("Remote {} is at {}", branch, short(&head.commit));
        Ok(RemoteState::Tip(head.commit))
    }

    fn push(
        &self,
        session: &Session,
        git_dir: &Path,
        url: &str,
        commit: &str,
        branch: &str,
    ) -> Result<PushOutcome, SyncError> {
        let invocation = self
            .remote_git(session, git_dir)
            .arg("push")
            .arg(url)
            .arg(format!("{}:refs/heads/{}", commit, branch));
        let output = self.vcs.run(&invocation).map_err(GitError::from)?;
        if output.success {
            return Ok(PushOutcome::Accepted);
        }

        if REMOTE_MOVED.iter().any(|marker| output.stderr.contains(marker)) {
            debug!("Push of {} rejected, remote moved", short(commit));
            return Ok(PushOutcome::RemoteMoved(format!(
                "remote branch {} moved during push",
                branch
            )));
        }
        Err(classify_remote_failure(&self.host_name(), "push", &output.stderr))
    }

    /// Move the tracking ref to a commit the remote holds. A failure is
    /// logged, not returned: the remote side is already settled.
    fn keep_tracking(&self, git_dir: &Path, branch: &str, commit: &str) {
        if let Err(e) = self.record_tracking(git_dir, branch, commit) {
            warn!(
                "Remote {} is at {} but the local tracking ref was not updated: {}",
                branch,
                short(commit),
                e
            );
        }
    }

    fn record_tracking(&self, git_dir: &Path, branch: &str, commit: &str) -> Result<(), SyncError> {
        self.vcs.output(
            &GitInvocation::default()
                .git_dir(git_dir)
                .timeout(self.timeout)
                .arg("update-ref")
                .arg(tracking_ref(branch))
                .arg(commit),
        )?;
        Ok(())
    }

    fn host_name(&self) -> String {
        self.host.name().to_string()
    }
}

/// Scratch ref a fetched remote tip lands in. The tracking ref, and with it
/// the base of the next prepared commit, only moves once the remote is known
/// to hold our content.
pub(crate) fn fetched_ref(branch: &str) -> String {
    format!("refs/lib50/fetched/{}", branch)
}

fn retry_or_fail(error: SyncError, resume: Resume) -> SyncState {
    if error.is_transient() {
        SyncState::Retry {
            resume,
            reason: error.to_string(),
        }
    } else {
        SyncState::Fail(error)
    }
}

/// Map a failed network git command to a sync error, keeping the host's text.
pub(crate) fn classify_remote_failure(host: &str, operation: &str, stderr: &str) -> SyncError {
    let reason = stderr.trim().to_string();
    if AUTH_FAILED.iter().any(|marker| reason.contains(marker)) {
        return SyncError::AuthRejected {
            host: host.to_string(),
            message: reason,
        };
    }
    if UNREACHABLE.iter().any(|marker| reason.contains(marker)) {
        return SyncError::Network {
            url: host.to_string(),
            message: reason,
        };
    }
    match operation {
        "push" => SyncError::HostRejected { reason },
        _ => SyncError::Git(GitError::Command {
            command: operation.to_string(),
            stderr: reason,
        }),
    }
}
