//! # Workspace Preparation
//!
//! Stages the selected files as a single commit in a dedicated git directory,
//! `<root>/.lib50.git`, so a workspace's own `.git` (if any) is never touched.
//!
//! The commit's tree holds exactly the selected files under the target
//! subpath. Anything outside the subpath is inherited from the base, the
//! remote-tracking ref left behind by the last successful push. Additions,
//! modifications and deletions relative to that base are all captured.
//!
//! Only git plumbing is used (`read-tree`, `hash-object`, `update-index`,
//! `write-tree`, `commit-tree`), against the staging directory's own index.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};

use crate::error::{GitError, PrepareError};
use crate::git::{self, GitInvocation, VersionControl, DEFAULT_TIMEOUT};
use crate::host::{noreply_email, Credentials};
use crate::selector::{FileSet, STAGING_DIR};
use crate::slug::SlugTarget;

/// The ref recording the remote branch tip after the last synchronization.
pub fn tracking_ref(branch: &str) -> String {
    format!("refs/remotes/origin/{}", branch)
}

/// `automated commit by <tool> [key=value] ...`
pub fn commit_message(tool: &str, data: &BTreeMap<String, String>) -> String {
    let mut message = format!("automated commit by {}", tool);
    for (key, value) in data {
        message.push_str(&format!(" [{}={}]", key, value));
    }
    message
}

/// Who a commit is attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Author {
    pub fn new(name: &str, email: &str) -> Self {
        Self {
            name: name.to_string(),
            email: email.to_string(),
        }
    }

    /// The credentials' username, else the user's git identity, else `lib50`.
    pub fn resolve(credentials: &Credentials, vcs: &dyn VersionControl) -> Self {
        if let Some(name) = credentials.username() {
            return Author::new(name, &noreply_email(name));
        }

        let lookup = |key: &str| -> Option<String> {
            vcs.output(&GitInvocation::new(["config", "--get", key]))
                .ok()
                .filter(|v| !v.is_empty())
        };
        match (lookup("user.name"), lookup("user.email")) {
            (Some(name), Some(email)) => Author::new(&name, &email),
            (Some(name), None) => Author::new(&name, &noreply_email(&name)),
            _ => Author::new("lib50", &noreply_email("lib50")),
        }
    }
}

/// A staged, not yet synchronized commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedChange {
    pub commit: String,
    pub tree: String,
    /// The tracking-ref commit this change was built on, if any.
    pub base: Option<String>,
    pub branch: String,
    pub subpath: String,
    pub git_dir: PathBuf,
    pub message: String,
    pub author: Author,
}

pub struct WorkspacePreparer {
    vcs: Arc<dyn VersionControl>,
    timeout: Duration,
}

impl WorkspacePreparer {
    pub fn new(vcs: Arc<dyn VersionControl>) -> Self {
        Self {
            vcs,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn git(&self, git_dir: &Path) -> GitInvocation {
        GitInvocation::default()
            .git_dir(git_dir)
            .index_file(&git_dir.join("index"))
            .timeout(self.timeout)
    }

    fn run(&self, invocation: GitInvocation) -> Result<String, GitError> {
        self.vcs.output(&invocation)
    }

    pub fn prepare(
        &self,
        root: &Path,
        target: &SlugTarget,
        files: &FileSet,
        author: &Author,
        message: &str,
    ) -> Result<PreparedChange, PrepareError> {
        git::ensure_available(self.vcs.as_ref()).map_err(|e| {
            if e.is_unavailable() {
                PrepareError::VcsUnavailable {
                    message: e.to_string(),
                }
            } else {
                PrepareError::Git(e)
            }
        })?;

        let git_dir = root.join(STAGING_DIR);
        if !git_dir.join("HEAD").is_file() {
            debug!("Initializing staging repository {}", git_dir.display());
            self.run(
                GitInvocation::new(["init", "--bare", "-q"])
                    .arg(git_dir.display().to_string())
                    .timeout(self.timeout),
            )?;
        }
        check_pending_state(&git_dir)?;

        let base = self.base_commit(&git_dir, &target.branch)?;
        let subpath = target.subpath.trim_matches('/').to_string();

        // Start from the base when only a subpath is ours, else from nothing.
        let mut records = String::new();
        match (&base, subpath.is_empty()) {
            (Some(base), false) => {
                self.run(self.git(&git_dir).arg("read-tree").arg(base.as_str()))?;
                let owned = self.run(
                    self.git(&git_dir)
                        .arg("ls-tree")
                        .arg("-r")
                        .arg("-z")
                        .arg("--name-only")
                        .arg(base.as_str())
                        .arg("--")
                        .arg(subpath.as_str()),
                )?;
                for path in owned.split('\0').filter(|p| !p.is_empty()) {
                    records.push_str(&format!("0 {}\t{}\0", zero_oid(base), path));
                }
            }
            _ => {
                self.run(self.git(&git_dir).arg("read-tree").arg("--empty"))?;
            }
        }

        let blobs = self.hash_files(&git_dir, root, files)?;
        for (path, blob) in files.iter().zip(&blobs) {
            let mode = file_mode(&root.join(path));
            let staged = if subpath.is_empty() {
                path.to_string()
            } else {
                format!("{}/{}", subpath, path)
            };
            records.push_str(&format!("{} {}\t{}\0", mode, blob, staged));
        }

        self.run(
            self.git(&git_dir)
                .arg("update-index")
                .arg("-z")
                .arg("--index-info")
                .stdin(records),
        )?;
        let tree = self.run(self.git(&git_dir).arg("write-tree"))?;

        if let Some(base) = &base {
            let base_tree = self.run(self.git(&git_dir).arg("rev-parse").arg(format!("{}^{{tree}}", base)))?;
            if base_tree == tree {
                info!("Nothing changed since the last push to {}", target.branch);
                return Err(PrepareError::NothingToPush {
                    branch: target.branch.clone(),
                });
            }
        }

        let mut commit = self
            .git(&git_dir)
            .arg("commit-tree")
            .arg(tree.as_str())
            .arg("-m")
            .arg(message);
        if let Some(base) = &base {
            commit = commit.arg("-p").arg(base.as_str());
        }
        let commit = self.run(with_identity(commit, author))?;

        info!(
            "Prepared commit {} ({} files) for {}",
            short(&commit),
            files.len(),
            target
        );

        Ok(PreparedChange {
            commit,
            tree,
            base,
            branch: target.branch.clone(),
            subpath,
            git_dir,
            message: message.to_string(),
            author: author.clone(),
        })
    }

    fn base_commit(&self, git_dir: &Path, branch: &str) -> Result<Option<String>, GitError> {
        let invocation = self
            .git(git_dir)
            .arg("rev-parse")
            .arg("--verify")
            .arg("-q")
            .arg(format!("{}^{{commit}}", tracking_ref(branch)));
        let output = self.vcs.run(&invocation)?;
        Ok(output
            .success
            .then(|| output.stdout.trim().to_string())
            .filter(|s| !s.is_empty()))
    }

    fn hash_files(&self, git_dir: &Path, root: &Path, files: &FileSet) -> Result<Vec<String>, GitError> {
        if files.is_empty() {
            return Ok(Vec::new());
        }
        let mut paths = files.paths().join("\n");
        paths.push('\n');

        let output = self.run(
            self.git(git_dir)
                .work_tree(root)
                .current_dir(root)
                .arg("hash-object")
                .arg("-w")
                .arg("--no-filters")
                .arg("--stdin-paths")
                .stdin(paths),
        )?;
        let blobs: Vec<String> = output.lines().map(|l| l.trim().to_string()).collect();
        if blobs.len() != files.len() {
            return Err(GitError::UnexpectedOutput {
                command: "hash-object --stdin-paths".to_string(),
                output,
            });
        }
        Ok(blobs)
    }
}

/// Attach author and committer identity.
pub(crate) fn with_identity(invocation: GitInvocation, author: &Author) -> GitInvocation {
    invocation
        .env("GIT_AUTHOR_NAME", &author.name)
        .env("GIT_AUTHOR_EMAIL", &author.email)
        .env("GIT_COMMITTER_NAME", &author.name)
        .env("GIT_COMMITTER_EMAIL", &author.email)
}

fn check_pending_state(git_dir: &Path) -> Result<(), PrepareError> {
    let pending = [
        ("index.lock", "another push appears to be in progress"),
        ("MERGE_HEAD", "a merge is in progress"),
        ("rebase-merge", "a rebase is in progress"),
        ("rebase-apply", "a rebase is in progress"),
    ];
    for (name, reason) in pending {
        if git_dir.join(name).exists() {
            return Err(PrepareError::PrepareConflict {
                git_dir: git_dir.to_path_buf(),
                reason: format!("{} ({})", reason, name),
            });
        }
    }
    Ok(())
}

/// An all-zero object id of the same length as `like` (SHA-1 or SHA-256).
pub(crate) fn zero_oid(like: &str) -> String {
    "0".repeat(like.len().max(40))
}

pub(crate) fn short(commit: &str) -> &str {
    &commit[..commit.len().min(10)]
}

#[cfg(unix)]
fn file_mode(path: &Path) -> &'static str {
    use std::os::unix::fs::PermissionsExt;
    match std::fs::metadata(path) {
        Ok(meta) if meta.permissions().mode() & 0o111 != 0 => "100755",
        _ => "100644",
    }
}

#[cfg(not(unix))]
fn file_mode(_path: &Path) -> &'static str {
    "100644"
}
