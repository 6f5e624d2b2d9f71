//! # File Selection
//!
//! Decides which files under a workspace root take part in a push.
//!
//! ## Pattern Semantics
//!
//! Rules are glob patterns relative to the workspace root:
//!
//! - `*` and `?` never cross a `/`; `**` spans directories.
//! - A pattern without `/` that starts with `*` is implicitly recursive, so
//!   `*.py` matches `a.py` and `src/b.py`.
//! - A leading `./` anchors a pattern at the root.
//! - A pattern that matches a directory selects everything beneath it except
//!   hidden entries; an exclude on a directory covers hidden entries too.
//! - Hidden files are only matched by patterns that spell out the leading dot.
//!
//! A file is selected iff it matches some include rule and no exclude rule.
//! Selected paths are ordered by full path, byte-wise.
//! An empty include list selects every non-hidden file. `.git` and the staging
//! directory are never walked.

use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use log::debug;
use walkdir::WalkDir;

use crate::config::ValidatedOptions;
use crate::error::SelectionError;
use crate::schema::{EXCLUDE_TAG, INCLUDE_TAG, REQUIRE_TAG};

/// Name of the staging git directory inside a workspace.
pub const STAGING_DIR: &str = ".lib50.git";

const SKIP_DIRS: &[&str] = &[".git", STAGING_DIR];

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

/// Include, exclude and required patterns for one push.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterRules {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// Each must match at least one selected file.
    pub required: Vec<String>,
}

impl FilterRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include(mut self, pattern: &str) -> Self {
        self.include.push(pattern.to_string());
        self
    }

    pub fn exclude(mut self, pattern: &str) -> Self {
        self.exclude.push(pattern.to_string());
        self
    }

    pub fn require(mut self, pattern: &str) -> Self {
        self.required.push(pattern.to_string());
        self
    }

    /// Build rules from a validated `files` option.
    ///
    /// `!require x` both includes and requires `x`. A catch-all exclude
    /// (`*`, `**`, `**/*`) followed by include or require entries is dropped:
    /// an explicit include list already leaves everything else out.
    pub fn from_options(options: &ValidatedOptions) -> Self {
        let mut rules = FilterRules::new();
        let Some(files) = options.get_list("files") else {
            return rules;
        };

        let entries: Vec<(&str, &str)> = files.iter().filter_map(|v| v.as_tagged()).collect();
        for (i, (tag, pattern)) in entries.iter().enumerate() {
            match *tag {
                INCLUDE_TAG => rules.include.push(pattern.to_string()),
                REQUIRE_TAG => {
                    rules.include.push(pattern.to_string());
                    rules.required.push(pattern.to_string());
                }
                EXCLUDE_TAG => {
                    let later_include = entries[i + 1..]
                        .iter()
                        .any(|(t, _)| *t == INCLUDE_TAG || *t == REQUIRE_TAG);
                    if later_include && is_catch_all(pattern) {
                        continue;
                    }
                    rules.exclude.push(pattern.to_string());
                }
                _ => {}
            }
        }
        rules
    }
}

fn is_catch_all(pattern: &str) -> bool {
    matches!(pattern.trim_start_matches("./"), "*" | "**" | "**/*")
}

/// Size and count limits. `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Limits {
    pub max_file_size: Option<u64>,
    pub max_total_size: Option<u64>,
    pub max_files: Option<usize>,
}

/// The ordered, deduplicated files of one push, relative to `root` and
/// `/`-separated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSet {
    root: PathBuf,
    paths: Vec<String>,
    /// Non-hidden files left out by the rules.
    excluded: Vec<String>,
    total_size: u64,
}

impl FileSet {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// Files that were walked but not selected, for showing the user what
    /// stays behind. Hidden files are not listed.
    pub fn excluded(&self) -> &[String] {
        &self.excluded
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }
}

/// A compiled rule: the glob, and the text it came from.
#[derive(Debug)]
struct Rule {
    source: String,
    pattern: Pattern,
}

impl Rule {
    fn compile(source: &str) -> Result<Self, SelectionError> {
        let unsafe_path = |reason: &str| SelectionError::UnsafePath {
            path: PathBuf::from(source),
            reason: reason.to_string(),
        };

        if source.starts_with('/') || Path::new(source).is_absolute() {
            return Err(unsafe_path("absolute paths are not allowed"));
        }
        if source.split('/').any(|part| part == "..") {
            return Err(unsafe_path("pattern escapes the workspace root"));
        }

        let mut text = source.trim_end_matches('/');
        while let Some(rest) = text.strip_prefix("./") {
            text = rest;
        }

        let text = if !source.contains('/') && text.starts_with('*') {
            format!("**/{}", text)
        } else {
            text.to_string()
        };

        let pattern = Pattern::new(&text).map_err(|e| SelectionError::InvalidPattern {
            pattern: source.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            source: source.to_string(),
            pattern,
        })
    }

    /// Whether the rule matches `path` or one of its ancestor directories.
    ///
    /// With `reveal_hidden` false, a directory match does not extend to
    /// hidden entries beneath it: `src` selects `src/a.c` but not `src/.env`.
    fn matches(&self, path: &str, reveal_hidden: bool) -> bool {
        if self.pattern.matches_with(path, MATCH_OPTIONS) {
            return true;
        }
        path.match_indices('/').any(|(i, _)| {
            self.pattern.matches_with(&path[..i], MATCH_OPTIONS)
                && (reveal_hidden || !is_hidden(&path[i + 1..]))
        })
    }

    fn selects(&self, path: &str) -> bool {
        self.matches(path, false)
    }

    /// Excludes reach everything beneath a matched directory, hidden or not.
    fn excludes(&self, path: &str) -> bool {
        self.matches(path, true)
    }
}

fn compile_all(patterns: &[String]) -> Result<Vec<Rule>, SelectionError> {
    patterns.iter().map(|p| Rule::compile(p)).collect()
}

fn is_hidden(path: &str) -> bool {
    path.split('/').any(|part| part.starts_with('.'))
}

/// Walk `root` and select files per `rules` and `limits`.
///
/// Every failure is detected here, before anything touches git or the network.
pub fn select(root: &Path, rules: &FilterRules, limits: &Limits) -> Result<FileSet, SelectionError> {
    let include = compile_all(&rules.include)?;
    let exclude = compile_all(&rules.exclude)?;
    let required = compile_all(&rules.required)?;

    let mut files: Vec<(String, u64)> = Vec::new();
    let mut excluded: Vec<String> = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !(e.file_type().is_dir()
                    && e.file_name().to_str().is_some_and(|name| SKIP_DIRS.contains(&name)))
        });

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
            SelectionError::Io {
                path,
                source: e.into(),
            }
        })?;

        if entry.file_type().is_dir() {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let Some(relative) = relative.to_str() else {
            debug!("Skipping non-UTF-8 file name {}", entry.path().display());
            continue;
        };
        let relative = relative.replace(std::path::MAIN_SEPARATOR, "/");

        let included = if include.is_empty() {
            !is_hidden(&relative)
        } else {
            include.iter().any(|r| r.selects(&relative))
        };
        if !included {
            if !is_hidden(&relative) {
                excluded.push(relative);
            }
            continue;
        }
        if let Some(rule) = exclude.iter().find(|r| r.excludes(&relative)) {
            debug!("Excluding {} (matches {})", relative, rule.source);
            excluded.push(relative);
            continue;
        }

        if entry.path_is_symlink() {
            return Err(SelectionError::UnsafePath {
                path: PathBuf::from(&relative),
                reason: "symbolic links cannot be submitted".to_string(),
            });
        }

        if let Some(limit) = limits.max_files {
            if files.len() >= limit {
                return Err(SelectionError::TooManyFiles {
                    count: files.len() + 1,
                    limit,
                    root: root.to_path_buf(),
                });
            }
        }

        let size = entry
            .metadata()
            .map_err(|e| SelectionError::Io {
                path: entry.path().to_path_buf(),
                source: e.into(),
            })?
            .len();

        files.push((relative, size));
    }

    // The walk orders siblings by name, which puts `a/b.py` before `a-c.py`;
    // a FileSet is ordered by full path.
    files.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));
    excluded.sort_unstable();
    let (paths, sizes): (Vec<String>, Vec<u64>) = files.into_iter().unzip();

    let unmet: Vec<String> = required
        .iter()
        .filter(|rule| !paths.iter().any(|p| rule.selects(p)))
        .map(|rule| rule.source.clone())
        .collect();
    if !unmet.is_empty() {
        return Err(SelectionError::MissingRequiredFile {
            rules: unmet,
            root: root.to_path_buf(),
        });
    }

    if paths.is_empty() {
        return Err(SelectionError::EmptySelection {
            root: root.to_path_buf(),
        });
    }

    if let Some(limit) = limits.max_file_size {
        if let Some((path, size)) = paths.iter().zip(&sizes).find(|(_, size)| **size > limit) {
            return Err(SelectionError::FileTooLarge {
                path: PathBuf::from(path),
                size: *size,
                limit,
            });
        }
    }

    let total_size: u64 = sizes.iter().sum();
    if let Some(limit) = limits.max_total_size {
        if total_size > limit {
            return Err(SelectionError::SelectionTooLarge {
                total: total_size,
                limit,
                paths: paths.iter().map(PathBuf::from).collect(),
            });
        }
    }

    debug!("Selected {} files ({} bytes) under {}", paths.len(), total_size, root.display());

    Ok(FileSet {
        root: root.to_path_buf(),
        paths,
        excluded,
        total_size,
    })
}
