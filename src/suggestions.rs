//! # Error Suggestions
//!
//! Turns library errors into user-facing messages that say what went wrong
//! AND how to fix it. Hints are keyed by [`ErrorKind`], so every error with
//! the same kind gets the same advice regardless of where it came from.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use lib50::suggestions;
//!
//! match pusher.push(&request) {
//!     Ok(result) => println!("{}", result.commit),
//!     Err(e) => return Err(suggestions::push_failed(&e)),
//! }
//! ```

use crate::config::{Diagnostic, Diagnostics};
use crate::error::{ConfigError, ErrorKind, PushError};
use crate::schema::OptionSpec;

/// Advice for one kind of failure. Empty when there is nothing useful to add.
pub fn hints(kind: ErrorKind) -> &'static [&'static str] {
    match kind {
        ErrorKind::MissingConfig => &["Create a .cs50.yml file in the directory you are submitting"],
        ErrorKind::MalformedConfig => &[
            "Check the indentation of .cs50.yml; YAML does not allow tabs",
            "Keep only one of .cs50.yml and .cs50.yaml",
        ],
        ErrorKind::MissingTool => &["Add a top-level key for the tool, e.g. 'submit50: true'"],
        ErrorKind::InvalidSlug => &["Slugs look like org/repo/branch, without leading or trailing slashes"],
        ErrorKind::UnknownSlug => &[
            "Check the slug for typos",
            "Make sure the assignment has been published",
        ],
        ErrorKind::IndexUnavailable => &["Check your internet connection and try again"],
        ErrorKind::MissingRequiredFile => &["Make sure you are in the right directory"],
        ErrorKind::FileTooLarge | ErrorKind::SelectionTooLarge => {
            &["Remove large files such as data sets or build artifacts before pushing"]
        }
        ErrorKind::TooManyFiles => &["Are you in your home directory? Change into the assignment's directory first"],
        ErrorKind::EmptySelection => &["Check the files listed under 'files:' in .cs50.yml"],
        ErrorKind::NothingToPush => &["Your latest changes have already been pushed"],
        ErrorKind::PrepareConflict => &[
            "Wait for any other push from this directory to finish",
            "If none is running, remove the stale lock file inside .lib50.git",
        ],
        ErrorKind::VcsUnavailable => &["Install git 2.7 or later: https://git-scm.com/downloads"],
        ErrorKind::AuthRequired => &["Set LIB50_TOKEN to a personal access token"],
        ErrorKind::AuthRejected => &[
            "Your token may have expired or been revoked; create a new one",
            "Make sure the token has the 'repo' scope",
        ],
        ErrorKind::DivergedHistory => &[
            "Someone else changed the same files; merge their version into yours before pushing again",
        ],
        ErrorKind::Timeout | ErrorKind::Network | ErrorKind::RetriesExhausted => {
            &["Check your internet connection and try again"]
        }
        ErrorKind::HostRejected => &["The message above comes from the host; follow its advice"],
        _ => &[],
    }
}

/// Append the hints for `kind` to `message`.
pub fn with_hints(kind: ErrorKind, message: &str) -> String {
    let hints = hints(kind);
    if hints.is_empty() {
        return message.to_string();
    }
    let mut text = format!("{}\n", message);
    for hint in hints {
        text.push_str(&format!("\nhint: {}", hint));
    }
    text
}

/// A push failure with its stage and advice.
pub fn push_failed(error: &PushError) -> anyhow::Error {
    anyhow::anyhow!("{}", with_hints(error.kind(), &error.to_string()))
}

/// A failed config load: every diagnostic, each with a "did you mean" for
/// misspelt option names, then the hints for the first error.
pub fn config_invalid(diagnostics: &Diagnostics, spec: Option<&OptionSpec>) -> anyhow::Error {
    let names: Vec<&str> = spec
        .map(|spec| spec.options().map(|o| o.name.as_str()).collect())
        .unwrap_or_default();

    let lines: Vec<String> = diagnostics
        .iter()
        .map(|diagnostic| describe(diagnostic, &names))
        .collect();
    let message = lines.join("\n");

    match diagnostics.errors().next() {
        Some(first) => anyhow::anyhow!("{}", with_hints(first.kind(), &message)),
        None => anyhow::anyhow!("{}", message),
    }
}

fn describe(diagnostic: &Diagnostic, names: &[&str]) -> String {
    if let ConfigError::UnknownOption { key } = &diagnostic.error {
        if let Some(similar) = did_you_mean(key, names) {
            return format!("{} (did you mean '{}'?)", diagnostic, similar);
        }
    }
    diagnostic.to_string()
}

/// The closest candidate within edit distance 2, if any.
pub fn did_you_mean<'a>(input: &str, candidates: &[&'a str]) -> Option<&'a str> {
    candidates
        .iter()
        .filter_map(|&candidate| {
            let distance = edit_distance(input, candidate);
            if distance <= 2 && distance < input.len() {
                Some((candidate, distance))
            } else {
                None
            }
        })
        .min_by_key(|(_, distance)| *distance)
        .map(|(candidate, _)| candidate)
}

/// Levenshtein distance.
fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for i in 1..=a.len() {
        current[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            current[j] = (previous[j] + 1)
                .min(current[j - 1] + 1)
                .min(previous[j - 1] + cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}
