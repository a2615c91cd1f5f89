//! repovault - Bulk mirror backup tool for GitHub repositories
//!
//! repovault takes one account (your own, another user's, or an
//! organization's), resolves the set of repositories the token can read,
//! and mirror-clones each of them onto local storage in a single run.
//!
//! ## Core Features
//!
//! - **Listing**: full paginated repository discovery via the GitHub API
//! - **Filtering**: visibility/affiliation flags plus exclude/match
//!   patterns over repository names
//! - **Pipeline**: bounded-concurrency clone, optional LFS object fetch,
//!   optional pull-ref cleanup, with per-repository failure isolation
//!
//! ## Modules
//!
//! - [`config`]: per-user defaults file and run parameters
//! - [`options`]: tri-state flag resolution into listing query options
//! - [`github`]: listing API client and authentication
//! - [`selection`]: exclude/match pattern filtering
//! - [`git`]: external git process operations
//! - [`pipeline`]: the parallel backup pipeline

pub mod config;
pub mod git;
pub mod github;
pub mod options;
pub mod pipeline;
pub mod selection;

pub use config::Config;
pub use git::{CloneFailure, GitBackend, GitClient};
pub use github::{GitHubClient, ListingOutcome, RepositoryRecord};
pub use options::{AccountType, FilterFlags, Flag, QueryOptions};
pub use pipeline::{BackupPipeline, PipelineEvent, RepositoryOutcome, RunReport};
pub use selection::Selection;
