//! # Slug Resolution
//!
//! A slug such as `cs50/problems/2024/x/hello` or `2023/fall/cs50/hello` names
//! an assignment. The [`SlugResolver`] maps it to the remote organization,
//! repository, branch and subpath that a push targets.
//!
//! ## Lookup Order
//!
//! 1. **Exact entries** in the [`SlugIndex`].
//! 2. **Alias rules**: patterns with `{name}` placeholders whose captures fill a
//!    target template.
//! 3. **Fallback**: `<org>/<repo>/<branch>/<subpath>`, when the index knows the
//!    branches of `<org>/<repo>`. The longest known branch that is a prefix of
//!    the remainder (on a segment boundary) wins.
//!
//! Organization renames from the index are applied to whatever target the
//! lookup produced. The resolver never changes after construction; picking up
//! a newer index means building a new resolver.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::SlugError;

/// A syntactically valid slug with its organization and repository segments
/// lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Slug {
    normalized: String,
    segments: Vec<String>,
}

impl Slug {
    pub fn parse(input: &str) -> Result<Self, SlugError> {
        let invalid = |reason: String| SlugError::InvalidSlug {
            slug: input.to_string(),
            reason,
        };

        if input.trim().is_empty() {
            return Err(invalid("slug is empty".to_string()));
        }

        let stripped = input.trim_matches('/');
        match (input.starts_with('/'), input.ends_with('/')) {
            (true, true) => {
                return Err(invalid(format!(
                    "did you mean {}, without the leading and trailing slashes?",
                    stripped
                )))
            }
            (true, false) => {
                return Err(invalid(format!(
                    "did you mean {}, without the leading slash?",
                    stripped
                )))
            }
            (false, true) => {
                return Err(invalid(format!(
                    "did you mean {}, without the trailing slash?",
                    stripped
                )))
            }
            (false, false) => {}
        }

        let mut segments = Vec::new();
        for segment in input.split('/') {
            if segment.is_empty() {
                return Err(invalid("empty segment".to_string()));
            }
            if segment == "." || segment == ".." {
                return Err(invalid(format!("'{}' is not allowed as a segment", segment)));
            }
            if !is_segment(segment) {
                return Err(invalid(format!(
                    "segment '{}' may only contain letters, digits, '.', '_' and '-'",
                    segment
                )));
            }
            segments.push(segment.to_string());
        }

        for segment in segments.iter_mut().take(2) {
            *segment = segment.to_lowercase();
        }

        Ok(Self {
            normalized: segments.join("/"),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.normalized
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// `org/repo` for slugs of at least three segments.
    pub fn repository_key(&self) -> Option<String> {
        (self.segments.len() >= 3).then(|| format!("{}/{}", self.segments[0], self.segments[1]))
    }
}

impl FromStr for Slug {
    type Err = SlugError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Slug::parse(s)
    }
}

impl fmt::Display for Slug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized)
    }
}

fn is_segment(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Where a slug's files live on the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlugTarget {
    pub org: String,
    pub repo: String,
    pub branch: String,
    /// Directory inside the branch; empty for the branch root.
    #[serde(default)]
    pub subpath: String,
}

impl SlugTarget {
    pub fn new(org: &str, repo: &str, branch: &str, subpath: &str) -> Self {
        Self {
            org: org.to_string(),
            repo: repo.to_string(),
            branch: branch.to_string(),
            subpath: subpath.trim_matches('/').to_string(),
        }
    }
}

impl fmt::Display for SlugTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.org, self.repo, self.branch)?;
        if !self.subpath.is_empty() {
            write!(f, ":{}", self.subpath)?;
        }
        Ok(())
    }
}

/// An alias: a slug pattern with `{name}` placeholders and the target it maps
/// to, whose fields may reference the same placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasRule {
    pub pattern: String,
    pub target: SlugTarget,
}

/// The lookup table a resolver is built from, as served by the host.
///
/// ```json
/// {
///   "entries": {"cs50/hello": {"org": "cs50", "repo": "problems", "branch": "2024/x", "subpath": "hello"}},
///   "aliases": [{"pattern": "{year}/{term}/{course}/{problem}",
///                "target": {"org": "{course}", "repo": "submissions", "branch": "{year}/{term}/{problem}"}}],
///   "orgs": {"cs50-old": "cs50"},
///   "branches": {"cs50/problems": ["2024/x", "main"]}
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlugIndex {
    #[serde(default)]
    pub entries: BTreeMap<String, SlugTarget>,
    #[serde(default)]
    pub aliases: Vec<AliasRule>,
    /// Organization renames applied after lookup.
    #[serde(default)]
    pub orgs: BTreeMap<String, String>,
    /// Known branches per `org/repo`, for fallback resolution.
    #[serde(default)]
    pub branches: BTreeMap<String, Vec<String>>,
}

impl SlugIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn entry(mut self, slug: &str, target: SlugTarget) -> Self {
        self.entries.insert(slug.to_string(), target);
        self
    }

    pub fn alias(mut self, pattern: &str, target: SlugTarget) -> Self {
        self.aliases.push(AliasRule {
            pattern: pattern.to_string(),
            target,
        });
        self
    }

    pub fn rename_org(mut self, from: &str, to: &str) -> Self {
        self.orgs.insert(from.to_lowercase(), to.to_string());
        self
    }

    pub fn branches<I, S>(mut self, repository: &str, branches: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.branches
            .entry(repository.to_lowercase())
            .or_default()
            .extend(branches.into_iter().map(Into::into));
        self
    }
}

#[derive(Debug)]
struct CompiledAlias {
    regex: Regex,
    target: SlugTarget,
}

impl CompiledAlias {
    fn compile(rule: &AliasRule) -> Result<Self, SlugError> {
        let invalid = |reason: String| SlugError::InvalidSlug {
            slug: rule.pattern.clone(),
            reason,
        };

        let placeholder = Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").map_err(|e| invalid(e.to_string()))?;

        let mut names = Vec::new();
        let mut source = String::from("^");
        let mut last = 0;
        for caps in placeholder.captures_iter(&rule.pattern) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            source.push_str(&regex::escape(&rule.pattern[last..whole.start()]));
            source.push_str(&format!("(?P<{}>[A-Za-z0-9._-]+)", name.as_str()));
            names.push(name.as_str().to_string());
            last = whole.end();
        }
        source.push_str(&regex::escape(&rule.pattern[last..]));
        source.push('$');

        let regex = Regex::new(&source).map_err(|e| invalid(format!("bad alias pattern: {}", e)))?;

        for field in [
            &rule.target.org,
            &rule.target.repo,
            &rule.target.branch,
            &rule.target.subpath,
        ] {
            for caps in placeholder.captures_iter(field) {
                if let Some(name) = caps.get(1) {
                    if !names.iter().any(|n| n == name.as_str()) {
                        return Err(invalid(format!(
                            "target references unknown placeholder {{{}}}",
                            name.as_str()
                        )));
                    }
                }
            }
        }

        Ok(Self {
            regex,
            target: rule.target.clone(),
        })
    }

    fn apply(&self, slug: &str) -> Option<SlugTarget> {
        let caps = self.regex.captures(slug)?;
        let fill = |template: &str| -> String {
            let mut out = template.to_string();
            for name in self.regex.capture_names().flatten() {
                if let Some(value) = caps.name(name) {
                    out = out.replace(&format!("{{{}}}", name), value.as_str());
                }
            }
            out
        };
        Some(SlugTarget::new(
            &fill(&self.target.org),
            &fill(&self.target.repo),
            &fill(&self.target.branch),
            &fill(&self.target.subpath),
        ))
    }
}

/// Immutable slug lookup. Share it behind an `Arc`.
#[derive(Debug)]
pub struct SlugResolver {
    index: SlugIndex,
    aliases: Vec<CompiledAlias>,
}

impl SlugResolver {
    /// Build a resolver, compiling alias patterns up front.
    pub fn new(index: SlugIndex) -> Result<Self, SlugError> {
        let aliases = index
            .aliases
            .iter()
            .map(CompiledAlias::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { index, aliases })
    }

    pub fn index(&self) -> &SlugIndex {
        &self.index
    }

    /// A new resolver that also knows `branches` of `repository` (`org/repo`).
    pub fn with_branches(&self, repository: &str, branches: Vec<String>) -> Result<Self, SlugError> {
        SlugResolver::new(self.index.clone().branches(repository, branches))
    }

    pub fn resolve(&self, input: &str) -> Result<SlugTarget, SlugError> {
        let slug = Slug::parse(input)?;
        let target = self.lookup(&slug).ok_or_else(|| SlugError::UnknownSlug {
            slug: input.to_string(),
        })?;
        let target = self.rename(target);
        debug!("Resolved slug {} to {}", slug, target);
        Ok(target)
    }

    fn lookup(&self, slug: &Slug) -> Option<SlugTarget> {
        if let Some(target) = self.index.entries.get(slug.as_str()) {
            return Some(target.clone());
        }

        if let Some(target) = self.aliases.iter().find_map(|alias| alias.apply(slug.as_str())) {
            return Some(target);
        }

        self.fallback(slug)
    }

    fn fallback(&self, slug: &Slug) -> Option<SlugTarget> {
        let key = slug.repository_key()?;
        let branches = self.index.branches.get(&key)?;
        let segments = slug.segments();
        let remainder = segments[2..].join("/");

        let branch = branches
            .iter()
            .filter(|b| remainder == **b || remainder.starts_with(&format!("{}/", b)))
            .max_by_key(|b| b.len())?;

        let subpath = remainder[branch.len()..].trim_start_matches('/');
        Some(SlugTarget::new(&segments[0], &segments[1], branch, subpath))
    }

    fn rename(&self, mut target: SlugTarget) -> SlugTarget {
        if let Some(renamed) = self.index.orgs.get(&target.org.to_lowercase()) {
            debug!("Organization {} is now {}", target.org, renamed);
            target.org = renamed.clone();
        }
        target
    }
}
