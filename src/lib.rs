//! # lib50
//!
//! A workflow engine for tools that submit a local workspace to a remote
//! code-hosting repository under a named **slug**, plus the validator for the
//! per-directory `.cs50.yml` configuration those tools read first.
//!
//! ## Quick Example
//!
//! ```
//! use lib50::config::ConfigLoader;
//! use lib50::schema::{files_fragment, OptionDef, OptionSpec, OptionType, SchemaBuilder};
//!
//! let schema = SchemaBuilder::new()
//!     .register("check50", files_fragment())
//!     .unwrap()
//!     .register(
//!         "check50",
//!         OptionSpec::new().option(OptionDef::new("language", OptionType::String).required()),
//!     )
//!     .unwrap()
//!     .build();
//!
//! let loader = ConfigLoader::new(schema);
//! let options = loader
//!     .load_str("check50:\n  language: python\n", "check50", std::path::Path::new(".cs50.yml"))
//!     .unwrap();
//! assert_eq!(options.get_str("language"), Some("python"));
//! ```
//!
//! ## Core Concepts
//!
//! - **Schema (`schema`)**: option definitions per tool, composed from
//!   fragments with collision detection.
//! - **Config loading (`config`)**: reads `.cs50.yml`, validates the tool's
//!   section and reports every problem at once.
//! - **Slugs (`slug`)**: map a slug such as `2023/fall/cs50/hello` to an
//!   organization, repository, branch and subpath.
//! - **File selection (`selector`)**: include, exclude and required patterns
//!   plus size limits, evaluated before anything touches the network.
//! - **Preparation (`prepare`)**: stages the selected files as one commit in a
//!   private git directory.
//! - **Synchronization (`sync`)**: authenticates, fetches, reconciles with
//!   concurrent pushes and pushes, under a bounded retry policy.
//!
//! ## Execution Flow
//!
//! [`push::Pusher::push`] runs the workflow:
//!
//! 1.  **Resolve** the slug.
//! 2.  **Select** the files.
//! 3.  **Prepare** the commit.
//! 4.  **Synchronize** with the remote.
//!
//! Failures carry the stage that produced them and a stable
//! [`error::ErrorKind`].

pub mod config;
pub mod error;
pub mod git;
pub mod host;
pub mod prepare;
pub mod push;
pub mod schema;
pub mod selector;
pub mod settings;
pub mod slug;
pub mod suggestions;
pub mod sync;

#[cfg(test)]
mod selector_proptest;
