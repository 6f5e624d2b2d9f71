//! # Push Orchestration
//!
//! [`Pusher::push`] is the public entry point of the push workflow:
//!
//! 1. **Resolve** the slug to `(org, repo, branch, subpath)`
//! 2. **Select** the workspace files
//! 3. **Prepare** a commit in the staging git directory
//! 4. **Synchronize** it with the remote
//!
//! The first failure stops the sequence and is returned unchanged, wrapped in
//! the [`PushError`] variant of its stage.
//!
//! When the slug index does not know a slug and branch discovery is enabled,
//! the repository's branches are listed with `git ls-remote` and resolution is
//! retried. Selection runs first in that case, so a bad file set is reported
//! before any network activity. A caller-supplied confirmation runs right
//! after selection; declining stops the push before anything is written.
//!
//! [`Pusher::local`] is the read side: it keeps a checkout of a slug's branch
//! under a local directory and returns the path of the slug's subpath in it.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::error::{ErrorKind, GitError, ProcessError, PushError, SelectionError, SlugError, SyncError};
use crate::git::{self, GitInvocation, VersionControl};
use crate::host::{Credentials, RemoteHost, Session};
use crate::prepare::{commit_message, tracking_ref, Author, WorkspacePreparer};
use crate::selector::{self, FileSet, FilterRules};
use crate::settings::Settings;
use crate::slug::{Slug, SlugResolver, SlugTarget};
use crate::sync::{classify_remote_failure, PushResult, RemoteSynchronizer};

/// Shown the selected files before anything is prepared; `false` cancels.
pub type Confirm = Arc<dyn Fn(&FileSet) -> bool + Send + Sync>;

/// Everything one push needs from the calling tool.
#[derive(Clone)]
pub struct PushRequest {
    pub slug: String,
    pub workspace_root: PathBuf,
    pub rules: FilterRules,
    pub credentials: Credentials,
    /// Name of the calling tool, recorded in the commit message.
    pub tool: String,
    /// Extra `[key=value]` pairs for the commit message.
    pub data: BTreeMap<String, String>,
    pub confirm: Option<Confirm>,
}

impl fmt::Debug for PushRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushRequest")
            .field("slug", &self.slug)
            .field("workspace_root", &self.workspace_root)
            .field("rules", &self.rules)
            .field("credentials", &self.credentials)
            .field("tool", &self.tool)
            .field("data", &self.data)
            .field("confirm", &self.confirm.is_some())
            .finish()
    }
}

impl PushRequest {
    pub fn new(tool: &str, slug: &str, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            slug: slug.to_string(),
            workspace_root: workspace_root.into(),
            rules: FilterRules::default(),
            credentials: Credentials::None,
            tool: tool.to_string(),
            data: BTreeMap::new(),
            confirm: None,
        }
    }

    pub fn rules(mut self, rules: FilterRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn data(mut self, key: &str, value: &str) -> Self {
        self.data.insert(key.to_string(), value.to_string());
        self
    }

    /// Ask `confirm` about the selected (and excluded) files before preparing.
    pub fn confirm(mut self, confirm: impl Fn(&FileSet) -> bool + Send + Sync + 'static) -> Self {
        self.confirm = Some(Arc::new(confirm));
        self
    }
}

pub struct Pusher {
    resolver: Arc<SlugResolver>,
    vcs: Arc<dyn VersionControl>,
    host: Arc<dyn RemoteHost>,
    settings: Settings,
}

impl Pusher {
    pub fn new(
        resolver: Arc<SlugResolver>,
        vcs: Arc<dyn VersionControl>,
        host: Arc<dyn RemoteHost>,
        settings: Settings,
    ) -> Self {
        Self {
            resolver,
            vcs,
            host,
            settings,
        }
    }

    /// Build a pusher whose resolver is loaded from the host's slug index.
    pub fn from_host(
        vcs: Arc<dyn VersionControl>,
        host: Arc<dyn RemoteHost>,
        settings: Settings,
    ) -> Result<Self, SlugError> {
        let index = host.fetch_index()?;
        let resolver = Arc::new(SlugResolver::new(index)?);
        Ok(Self::new(resolver, vcs, host, settings))
    }

    pub fn resolver(&self) -> &SlugResolver {
        &self.resolver
    }

    pub fn push(&self, request: &PushRequest) -> Result<PushResult, PushError> {
        info!(
            "Pushing {} from {}",
            request.slug,
            request.workspace_root.display()
        );

        let (target, files) = match self.resolver.resolve(&request.slug) {
            Ok(target) => {
                let files = self.select(request)?;
                (target, files)
            }
            Err(SlugError::UnknownSlug { .. }) if self.settings.discover_branches => {
                let files = self.select(request)?;
                let target = self.discover(&request.slug, &request.credentials)?;
                (target, files)
            }
            Err(e) => return Err(e.into()),
        };

        let author = Author::resolve(&request.credentials, self.vcs.as_ref());
        let message = commit_message(&request.tool, &request.data);
        let change = WorkspacePreparer::new(self.vcs.clone())
            .with_timeout(self.settings.timeout())
            .prepare(&request.workspace_root, &target, &files, &author, &message)?;

        let result = RemoteSynchronizer::new(self.vcs.clone(), self.host.clone())
            .with_policy(self.settings.retry_policy())
            .with_timeout(self.settings.timeout())
            .synchronize(&target, &change, &request.credentials)?;
        Ok(result)
    }

    fn select(&self, request: &PushRequest) -> Result<FileSet, PushError> {
        let files = selector::select(
            &request.workspace_root,
            &request.rules,
            &self.settings.limits(),
        )?;
        debug!(
            "Selected {} files ({} bytes), excluded {}",
            files.len(),
            files.total_size(),
            files.excluded().len()
        );
        if let Some(confirm) = &request.confirm {
            if !confirm(&files) {
                info!("Push of {} declined", request.slug);
                return Err(SelectionError::Declined {
                    root: request.workspace_root.clone(),
                }
                .into());
            }
        }
        Ok(files)
    }

    /// Keep a checkout of `slug`'s branch under `root/<org>/<repo>` and return
    /// the path of the slug's subpath inside it.
    ///
    /// An existing checkout is refreshed and reset to the remote tip; local
    /// edits in it are discarded.
    pub fn local(&self, slug: &str, credentials: &Credentials, root: &Path) -> Result<PathBuf, PushError> {
        let target = match self.resolver.resolve(slug) {
            Ok(target) => target,
            Err(SlugError::UnknownSlug { .. }) if self.settings.discover_branches => {
                self.discover(slug, credentials)?
            }
            Err(e) => return Err(e.into()),
        };
        git::ensure_available(self.vcs.as_ref()).map_err(SyncError::from)?;

        let checkout = root.join(&target.org).join(&target.repo);
        let url = self.host.repository_url(&target.org, &target.repo);
        if !checkout.join(".git").exists() {
            std::fs::create_dir_all(&checkout).map_err(|e| {
                SyncError::from(GitError::from(ProcessError::Io {
                    command: format!("mkdir {}", checkout.display()),
                    source: e,
                }))
            })?;
            self.vcs
                .output(&self.local_git(&checkout).arg("init").arg("-q"))
                .map_err(SyncError::from)?;
        }

        let session = self.host.authenticate(credentials)?;
        let tracking = tracking_ref(&target.branch);
        let fetch = self
            .remote_git(&session, &checkout)
            .arg("fetch")
            .arg("-q")
            .arg("--no-tags")
            .arg("--depth")
            .arg("1")
            .arg(&url)
            .arg(format!("+refs/heads/{}:{}", target.branch, tracking));
        let output = self.vcs.run(&fetch).map_err(|e| SyncError::from(GitError::from(e)))?;
        if !output.success {
            return Err(classify_remote_failure(self.host.name(), "fetch", &output.stderr).into());
        }

        let checkout_branch = self
            .local_git(&checkout)
            .arg("checkout")
            .arg("-q")
            .arg("-f")
            .arg("-B")
            .arg(&target.branch)
            .arg(&tracking);
        let reset = self.local_git(&checkout).arg("reset").arg("-q").arg("--hard").arg("HEAD");
        for invocation in [checkout_branch, reset] {
            self.vcs.output(&invocation).map_err(SyncError::from)?;
        }

        let path = checkout.join(&target.subpath);
        if !path.exists() {
            return Err(SlugError::InvalidSlug {
                slug: slug.to_string(),
                reason: format!(
                    "{} does not exist at {}/{}",
                    target.subpath, target.org, target.repo
                ),
            }
            .into());
        }
        info!("Checked out {} at {}", target, path.display());
        Ok(path)
    }

    fn local_git(&self, checkout: &Path) -> GitInvocation {
        GitInvocation::default()
            .current_dir(checkout)
            .timeout(self.settings.timeout())
    }

    fn remote_git(&self, session: &Session, checkout: &Path) -> GitInvocation {
        session.authorize(self.local_git(checkout))
    }

    /// Resolve `slug` again after learning its repository's branches.
    ///
    /// A repository that cannot be listed (missing, or private to someone
    /// else) leaves the slug unknown; authentication, network and timeout
    /// failures keep their own kind.
    fn discover(&self, slug: &str, credentials: &Credentials) -> Result<SlugTarget, PushError> {
        let parsed = Slug::parse(slug)?;
        let unknown = || SlugError::UnknownSlug {
            slug: slug.to_string(),
        };
        let Some(repository) = parsed.repository_key() else {
            return Err(unknown().into());
        };

        let segments = parsed.segments();
        let org = self
            .resolver
            .index()
            .orgs
            .get(&segments[0])
            .cloned()
            .unwrap_or_else(|| segments[0].clone());
        let url = self.host.repository_url(&org, &segments[1]);

        let session = self.host.authenticate(credentials)?;
        let base = session.authorize(GitInvocation::default().timeout(self.settings.timeout()));
        let heads = match git::list_branches(self.vcs.as_ref(), base, &url) {
            Ok(heads) => heads,
            Err(GitError::Command { stderr, .. }) => {
                let error = classify_remote_failure(self.host.name(), "ls-remote", &stderr);
                if error.kind() != ErrorKind::Git {
                    return Err(error.into());
                }
                warn!("Could not list branches of {}: {}", url, stderr);
                return Err(unknown().into());
            }
            Err(e) => return Err(SyncError::from(e).into()),
        };

        debug!("{} has {} branches", url, heads.len());
        let branches = heads.into_iter().map(|head| head.branch).collect();
        Ok(self.resolver.with_branches(&repository, branches)?.resolve(slug)?)
    }
}
