//! File-level reconciliation of a prepared change with a moved remote tip.
//!
//! Local changes are `base → prepared`; remote changes are
//! `merge-base → tip`. A path changed on both sides to different results is
//! a conflict. Otherwise the local changes are replayed onto the tip as a new
//! commit, the equivalent of a rebase without a work tree.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use log::debug;

use crate::error::GitError;
use crate::git::{GitInvocation, VersionControl};
use crate::prepare::{with_identity, zero_oid, PreparedChange};

/// The state of one path after a change: `None` means deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Entry {
    pub mode: String,
    pub oid: String,
}

pub(crate) type Changes = BTreeMap<String, Option<Entry>>;

/// What reconciling against a remote tip decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Reconciliation {
    /// The remote already holds this content.
    UpToDate,
    /// Push this commit.
    Push(String),
    /// Both sides changed these paths differently.
    Diverged(Vec<String>),
}

/// Plumbing against the staging git directory.
pub(crate) struct Staging<'a> {
    vcs: &'a dyn VersionControl,
    git_dir: &'a Path,
    timeout: Duration,
}

impl<'a> Staging<'a> {
    pub fn new(vcs: &'a dyn VersionControl, git_dir: &'a Path, timeout: Duration) -> Self {
        Self {
            vcs,
            git_dir,
            timeout,
        }
    }

    /// A local invocation using a scratch index, leaving the preparer's alone.
    fn git(&self) -> GitInvocation {
        GitInvocation::default()
            .git_dir(self.git_dir)
            .index_file(&self.git_dir.join("index.sync"))
            .timeout(self.timeout)
    }

    pub fn tree_of(&self, commit: &str) -> Result<String, GitError> {
        self.vcs
            .output(&self.git().arg("rev-parse").arg(format!("{}^{{tree}}", commit)))
    }

    pub fn empty_tree(&self) -> Result<String, GitError> {
        self.vcs.output(&self.git().arg("mktree").stdin(Vec::<u8>::new()))
    }

    /// `None` when the histories share no commit.
    pub fn merge_base(&self, a: &str, b: &str) -> Result<Option<String>, GitError> {
        let invocation = self.git().arg("merge-base").arg(a).arg(b);
        let output = self.vcs.run(&invocation)?;
        match (output.success, output.code) {
            (true, _) => Ok(Some(output.stdout.trim().to_string())),
            (false, Some(1)) => Ok(None),
            _ => Err(GitError::Command {
                command: format!("merge-base {} {}", a, b),
                stderr: output.stderr.trim().to_string(),
            }),
        }
    }

    pub fn changes(&self, from_tree: &str, to_tree: &str) -> Result<Changes, GitError> {
        let output = self.vcs.output(
            &self
                .git()
                .arg("diff-tree")
                .arg("-r")
                .arg("-z")
                .arg("--no-renames")
                .arg(from_tree)
                .arg(to_tree),
        )?;
        parse_diff_tree(&output).ok_or(GitError::UnexpectedOutput {
            command: "diff-tree".to_string(),
            output,
        })
    }

    /// Apply `changes` on top of `tip` and commit the result.
    pub fn replay(&self, tip: &str, changes: &Changes, change: &PreparedChange) -> Result<(String, String), GitError> {
        self.vcs.output(&self.git().arg("read-tree").arg(tip))?;

        let mut records = String::new();
        for (path, entry) in changes {
            match entry {
                Some(entry) => records.push_str(&format!("{} {}\t{}\0", entry.mode, entry.oid, path)),
                None => records.push_str(&format!("0 {}\t{}\0", zero_oid(tip), path)),
            }
        }
        self.vcs.output(
            &self
                .git()
                .arg("update-index")
                .arg("-z")
                .arg("--index-info")
                .stdin(records),
        )?;
        let tree = self.vcs.output(&self.git().arg("write-tree"))?;

        let commit = self.vcs.output(&with_identity(
            self.git()
                .arg("commit-tree")
                .arg(tree.as_str())
                .arg("-p")
                .arg(tip)
                .arg("-m")
                .arg(change.message.as_str()),
            &change.author,
        ))?;
        Ok((commit, tree))
    }
}

/// Parse `diff-tree -r -z` raw output:
/// `:<old mode> <new mode> <old oid> <new oid> <status>\0<path>\0` per record.
pub(crate) fn parse_diff_tree(output: &str) -> Option<Changes> {
    let mut changes = Changes::new();
    let mut tokens = output.split('\0').filter(|t| !t.is_empty());

    while let Some(meta) = tokens.next() {
        let fields: Vec<&str> = meta.trim_start_matches(':').split_whitespace().collect();
        let path = tokens.next()?;
        let [_, new_mode, _, new_oid, status] = fields.as_slice() else {
            return None;
        };
        let entry = (!status.starts_with('D')).then(|| Entry {
            mode: new_mode.to_string(),
            oid: new_oid.to_string(),
        });
        changes.insert(path.to_string(), entry);
    }
    Some(changes)
}

/// Paths changed on both sides with different results.
pub(crate) fn conflicts(local: &Changes, remote: &Changes) -> Vec<String> {
    local
        .iter()
        .filter(|(path, result)| remote.get(*path).is_some_and(|theirs| theirs != *result))
        .map(|(path, _)| path.clone())
        .collect()
}

/// Decide how `change` lands on a remote whose branch tip is `tip`.
pub(crate) fn reconcile(staging: &Staging<'_>, change: &PreparedChange, tip: Option<&str>) -> Result<Reconciliation, GitError> {
    let Some(tip) = tip else {
        return Ok(Reconciliation::Push(change.commit.clone()));
    };

    if tip == change.commit {
        return Ok(Reconciliation::UpToDate);
    }
    let tip_tree = staging.tree_of(tip)?;
    if tip_tree == change.tree {
        return Ok(Reconciliation::UpToDate);
    }
    if change.base.as_deref() == Some(tip) {
        debug!("Remote is at our base; fast-forward");
        return Ok(Reconciliation::Push(change.commit.clone()));
    }

    let empty = staging.empty_tree()?;
    let local_from = match &change.base {
        Some(base) => staging.tree_of(base)?,
        None => empty.clone(),
    };
    let remote_from = match staging.merge_base(tip, &change.commit)? {
        Some(base) => staging.tree_of(&base)?,
        None => empty,
    };

    let local = staging.changes(&local_from, &change.tree)?;
    let remote = staging.changes(&remote_from, &tip_tree)?;
    let conflicting = conflicts(&local, &remote);
    if !conflicting.is_empty() {
        return Ok(Reconciliation::Diverged(conflicting));
    }

    let (commit, tree) = staging.replay(tip, &local, change)?;
    if tree == tip_tree {
        return Ok(Reconciliation::UpToDate);
    }
    debug!("Replayed {} local changes onto {}", local.len(), tip);
    Ok(Reconciliation::Push(commit))
}
