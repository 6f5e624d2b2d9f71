//! Shared test utilities for integration and E2E tests.
//!
//! Pushes go to bare repositories under a temporary "remote root" served by
//! [`LocalHost`], so no network access is needed. Tests that need git call
//! [`git_available`] first and return early when it is missing.
//!
//! ## Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::prelude::*;
//!
//! #[test]
//! fn test_example() {
//!     if !git_available() { return; }
//!     let fixture = TestFixture::new().with_file("hello.py", "print('hi')\n");
//!     fixture.bare_remote("me50", "alice");
//!     let result = fixture.pusher().push(&fixture.request("cs50/problems/hello")).unwrap();
//! }
//! ```

#![allow(dead_code)]

use assert_fs::prelude::*;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use lib50::git::{git_on_path, SystemGit};
use lib50::host::LocalHost;
use lib50::push::{PushRequest, Pusher};
use lib50::settings::Settings;
use lib50::slug::{SlugIndex, SlugResolver, SlugTarget};

/// Re-export commonly used test dependencies for convenience.
pub mod prelude {
    pub use assert_cmd::cargo::cargo_bin_cmd;
    pub use assert_fs::prelude::*;
    pub use assert_fs::TempDir;
    pub use predicates::prelude::*;

    pub use super::{git_available, index, TestFixture, BRANCH, SLUG};
}

/// The slug every fixture resolves, and the branch it maps to.
pub const SLUG: &str = "cs50/problems/hello";
pub const BRANCH: &str = "cs50/problems/2024/x/hello";

/// A slug index mapping [`SLUG`] to `me50/alice@BRANCH`, plus `SLUG/sub` to
/// the `hello` subdirectory of the same branch.
pub fn index() -> SlugIndex {
    SlugIndex::new()
        .entry(SLUG, SlugTarget::new("me50", "alice", BRANCH, ""))
        .entry(
            &format!("{}/sub", SLUG),
            SlugTarget::new("me50", "alice", BRANCH, "hello"),
        )
}

/// Whether the system git can be used; prints a skip notice when not.
pub fn git_available() -> bool {
    let available = git_on_path();
    if !available {
        eprintln!("git not available, skipping");
    }
    available
}

/// A workspace directory plus a remote root of bare repositories.
pub struct TestFixture {
    workspace: assert_fs::TempDir,
    remote: assert_fs::TempDir,
}

impl TestFixture {
    pub fn new() -> Self {
        Self {
            workspace: assert_fs::TempDir::new().expect("Failed to create temp directory"),
            remote: assert_fs::TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// A second workspace pushing to the same remote root.
    pub fn sibling(&self) -> Sibling<'_> {
        Sibling {
            workspace: assert_fs::TempDir::new().expect("Failed to create temp directory"),
            remote: self.remote.path(),
        }
    }

    /// Add a `.cs50.yml` with the given content.
    pub fn with_config(self, content: &str) -> Self {
        self.workspace
            .child(".cs50.yml")
            .write_str(content)
            .expect("Failed to write config file");
        self
    }

    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.write(path, content);
        self
    }

    pub fn write(&self, path: &str, content: &str) {
        self.workspace
            .child(path)
            .write_str(content)
            .expect("Failed to write file");
    }

    pub fn path(&self) -> &Path {
        self.workspace.path()
    }

    pub fn remote_root(&self) -> &Path {
        self.remote.path()
    }

    /// Create `<remote root>/<org>/<repo>.git`.
    pub fn bare_remote(&self, org: &str, repo: &str) -> PathBuf {
        let path = self.remote.path().join(org).join(format!("{}.git", repo));
        std::fs::create_dir_all(&path).expect("Failed to create remote directory");
        run_git(&["init", "--bare", "-q", &path.display().to_string()]);
        path
    }

    /// A pusher resolving [`index`] against this fixture's remote root.
    pub fn pusher(&self) -> Pusher {
        pusher_for(self.remote.path())
    }

    pub fn request(&self, slug: &str) -> PushRequest {
        PushRequest::new("submit50", slug, self.workspace.path())
    }

    /// The binary, run in the workspace with user settings isolated.
    pub fn command(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("lib50");
        cmd.current_dir(self.path())
            .env("XDG_CONFIG_HOME", self.remote.path().join(".config"))
            .env_remove("LIB50_TOKEN")
            .env_remove("LIB50_USERNAME")
            .env_remove("RUST_LOG");
        cmd
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Another workspace sharing a fixture's remote root.
pub struct Sibling<'a> {
    workspace: assert_fs::TempDir,
    remote: &'a Path,
}

impl Sibling<'_> {
    pub fn write(&self, path: &str, content: &str) {
        self.workspace
            .child(path)
            .write_str(content)
            .expect("Failed to write file");
    }

    pub fn path(&self) -> &Path {
        self.workspace.path()
    }

    pub fn pusher(&self) -> Pusher {
        pusher_for(self.remote)
    }

    pub fn request(&self, slug: &str) -> PushRequest {
        PushRequest::new("submit50", slug, self.workspace.path())
    }
}

fn pusher_for(remote_root: &Path) -> Pusher {
    let mut settings = Settings {
        discover_branches: false,
        ..Settings::default()
    };
    settings.retry.base_delay_ms = 0;
    settings.retry.jitter = false;

    Pusher::new(
        Arc::new(SlugResolver::new(index()).expect("index compiles")),
        Arc::new(SystemGit::new()),
        Arc::new(LocalHost::new(remote_root)),
        settings,
    )
}

fn run_git(args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .output()
        .expect("Failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// The tip of `branch` in a bare repository, if the branch exists.
pub fn remote_tip(bare: &Path, branch: &str) -> Option<String> {
    let output = Command::new("git")
        .arg(format!("--git-dir={}", bare.display()))
        .args(["rev-parse", "--verify", "-q"])
        .arg(format!("refs/heads/{}", branch))
        .output()
        .expect("Failed to run git");
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// A file's content on `branch`, if present.
pub fn remote_file(bare: &Path, branch: &str, path: &str) -> Option<String> {
    let output = Command::new("git")
        .arg(format!("--git-dir={}", bare.display()))
        .arg("show")
        .arg(format!("{}:{}", branch, path))
        .output()
        .expect("Failed to run git");
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Every path on `branch`, sorted.
pub fn remote_paths(bare: &Path, branch: &str) -> Vec<String> {
    let listing = run_git(&[
        &format!("--git-dir={}", bare.display()),
        "ls-tree",
        "-r",
        "--name-only",
        branch,
    ]);
    let mut paths: Vec<String> = listing.lines().map(str::to_string).collect();
    paths.sort();
    paths
}

/// The first parent of `commit`.
pub fn parent_of(bare: &Path, commit: &str) -> Option<String> {
    let output = Command::new("git")
        .arg(format!("--git-dir={}", bare.display()))
        .args(["rev-parse", "--verify", "-q"])
        .arg(format!("{}^", commit))
        .output()
        .expect("Failed to run git");
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_with_file() {
        let fixture = TestFixture::new().with_file("test.txt", "hello");
        assert!(fixture.path().join("test.txt").exists());
    }

    #[test]
    fn test_index_resolves_fixture_slugs() {
        let resolver = SlugResolver::new(index()).unwrap();
        assert_eq!(resolver.resolve(SLUG).unwrap().branch, BRANCH);
        assert_eq!(resolver.resolve(&format!("{}/sub", SLUG)).unwrap().subpath, "hello");
    }
}
