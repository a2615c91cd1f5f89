//! Repository include/exclude pattern filtering
//!
//! Exclude patterns run first and drop a repository when any of them
//! matches its short name. Match patterns run second and keep a repository
//! only when every pattern matches. The asymmetry is deliberate: exclude is
//! "none must match", match is "all must match".

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, info};

use crate::github::RepositoryRecord;

/// Compiled exclude/match pattern chain
#[derive(Debug, Default)]
pub struct Selection {
    exclude: Vec<Regex>,
    matchers: Vec<Regex>,
}

/// What the filter removed, for user-facing messaging
#[derive(Debug, Default)]
pub struct SelectionReport {
    pub excluded: Vec<String>,
    pub unmatched: Vec<String>,
}

impl Selection {
    /// Compile pattern lists; a malformed pattern is a configuration error
    pub fn compile(exclude: &[String], matchers: &[String]) -> Result<Self> {
        let exclude = exclude
            .iter()
            .map(|p| Regex::new(p).with_context(|| format!("Invalid exclude pattern: {}", p)))
            .collect::<Result<Vec<_>>>()?;

        let matchers = matchers
            .iter()
            .map(|p| Regex::new(p).with_context(|| format!("Invalid match pattern: {}", p)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { exclude, matchers })
    }

    /// Apply both stages over a fetched collection
    ///
    /// Empty pattern lists pass everything through. Patterns test the
    /// repository short name, not the full `owner/name`.
    pub fn apply(
        &self,
        records: Vec<RepositoryRecord>,
    ) -> (Vec<RepositoryRecord>, SelectionReport) {
        let mut report = SelectionReport::default();
        let mut selected = Vec::with_capacity(records.len());

        for record in records {
            if self.exclude.iter().any(|re| re.is_match(&record.name)) {
                debug!("Excluding repository due to pattern match: {}", record.name);
                report.excluded.push(record.full_name);
                continue;
            }

            if !self.matchers.iter().all(|re| re.is_match(&record.name)) {
                debug!("Repository did not match all patterns: {}", record.name);
                report.unmatched.push(record.full_name);
                continue;
            }

            selected.push(record);
        }

        if !report.excluded.is_empty() {
            info!(
                "Excluded {} repositories: {}",
                report.excluded.len(),
                report.excluded.join(", ")
            );
        }
        if !report.unmatched.is_empty() {
            info!(
                "{} repositories did not match: {}",
                report.unmatched.len(),
                report.unmatched.join(", ")
            );
        }

        (selected, report)
    }
}
