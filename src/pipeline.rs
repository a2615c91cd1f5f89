//! Backup pipeline - orchestrates parallel per-repository mirror backups
//!
//! Each selected repository runs through an ordered stage sequence
//! (clone, optional LFS fetch, optional pull-ref cleanup) inside a worker
//! pool bounded by the configured parallelism. A clone failure is fatal for
//! that repository only; LFS and ref-cleanup failures downgrade to
//! warnings. Progress is emitted on an event channel consumed by the
//! presentation layer, keeping console state out of the core.

use anyhow::{Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::git::{mirror_path, CloneFailure, GitBackend};
use crate::github::RepositoryRecord;

/// Progress events emitted per repository as stages complete
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    CloneStarted { full_name: String },
    Cloned { full_name: String },
    CloneFailed { full_name: String, failure: CloneFailure },
    LfsFetched { full_name: String },
    LfsWarning { full_name: String, message: String },
    /// Ref cleanup finished; zero deletions is a success, not a failure
    RefsCleaned { full_name: String, deleted: usize },
    RefsWarning { full_name: String, message: String },
}

/// Terminal state for one repository
#[derive(Debug, Clone)]
pub struct RepositoryOutcome {
    pub full_name: String,
    pub cloned: bool,
    pub lfs_warning: bool,
    pub refs_warning: bool,
    pub fatal: Option<CloneFailure>,
}

impl RepositoryOutcome {
    pub fn has_warning(&self) -> bool {
        self.lfs_warning || self.refs_warning
    }
}

/// Aggregate result of one backup run
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub selected: usize,
    pub attempted: usize,
    pub warned: usize,
    pub failed: usize,
    pub interrupted: bool,
    pub outcomes: Vec<RepositoryOutcome>,
}

impl RunReport {
    /// Process exit code for a completed (non-interrupted) run:
    /// 0 all clean, 1 at least one warning or failure, 2 nothing selected.
    /// The binary maps interruption to 130 itself.
    pub fn exit_code(&self) -> i32 {
        if self.selected == 0 {
            2
        } else if self.failed > 0 || self.warned > 0 {
            1
        } else {
            0
        }
    }
}

/// Whether the destination root should be removed at interrupt shutdown
///
/// Only a directory this run created, and which is still empty, is safe to
/// remove; anything preexisting or since populated is left untouched.
pub fn should_remove_destination(preexisted: bool, currently_empty: bool) -> bool {
    !preexisted && currently_empty
}

/// Destination root directory with check-then-create semantics
#[derive(Debug)]
pub struct DestinationGuard {
    root: PathBuf,
    preexisted: bool,
}

impl DestinationGuard {
    /// Create the destination root, recording whether it already existed
    pub fn prepare(root: &Path) -> Result<Self> {
        let preexisted = root.exists();

        if preexisted {
            if !root.is_dir() {
                return Err(anyhow::anyhow!(
                    "Destination exists but is not a directory: {}",
                    root.display()
                ));
            }
            // Probe readability up front so permission problems abort the
            // run before any repository work starts.
            std::fs::read_dir(root).with_context(|| {
                format!("Cannot read destination directory: {}", root.display())
            })?;
        } else {
            std::fs::create_dir_all(root).with_context(|| {
                format!("Cannot create destination directory: {}", root.display())
            })?;
        }

        Ok(Self {
            root: root.to_path_buf(),
            preexisted,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn preexisted(&self) -> bool {
        self.preexisted
    }

    /// Apply the shutdown cleanup decision; returns true when the
    /// directory was removed
    pub fn cleanup_after_interrupt(&self) -> Result<bool> {
        let currently_empty = std::fs::read_dir(&self.root)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);

        if should_remove_destination(self.preexisted, currently_empty) {
            std::fs::remove_dir(&self.root).with_context(|| {
                format!("Failed to remove destination: {}", self.root.display())
            })?;
            info!("Removed empty destination {}", self.root.display());
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// The backup pipeline for one run
pub struct BackupPipeline<B: GitBackend> {
    backend: Arc<B>,
    destination: PathBuf,
    lfs: bool,
    clean_refs: bool,
    parallel: usize,
    cancelled: Arc<AtomicBool>,
}

impl<B: GitBackend + 'static> BackupPipeline<B> {
    pub fn new(
        backend: Arc<B>,
        destination: PathBuf,
        lfs: bool,
        clean_refs: bool,
        parallel: usize,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            backend,
            destination,
            lfs,
            clean_refs,
            parallel: parallel.max(1),
            cancelled,
        }
    }

    /// Back up every selected repository, at most `parallel` at a time
    ///
    /// Every repository is attempted exactly once; completion order is not
    /// defined. Cancellation stops new work from being issued while
    /// in-flight repositories run to completion.
    pub async fn run(
        &self,
        records: Vec<RepositoryRecord>,
        events: UnboundedSender<PipelineEvent>,
    ) -> RunReport {
        let selected = records.len();
        info!(
            "Backing up {} repositories with parallelism {}",
            selected, self.parallel
        );

        let semaphore = Arc::new(Semaphore::new(self.parallel));
        let mut futures = FuturesUnordered::new();

        for record in records {
            let semaphore = semaphore.clone();
            let backend = self.backend.clone();
            let events = events.clone();
            let cancelled = self.cancelled.clone();
            let destination = self.destination.clone();
            let lfs = self.lfs;
            let clean_refs = self.clean_refs;

            futures.push(async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return None,
                };

                if cancelled.load(Ordering::SeqCst) {
                    debug!("Skipping {} after interrupt", record.full_name);
                    return None;
                }

                Some(
                    backup_one(
                        backend.as_ref(),
                        &record,
                        &destination,
                        lfs,
                        clean_refs,
                        &events,
                    )
                    .await,
                )
            });
        }

        let mut report = RunReport {
            selected,
            interrupted: false,
            ..RunReport::default()
        };

        // Counters update serially here, so concurrent completions cannot
        // lose updates.
        while let Some(result) = futures.next().await {
            let Some(outcome) = result else { continue };
            report.attempted += 1;
            if outcome.fatal.is_some() {
                report.failed += 1;
            } else if outcome.has_warning() {
                report.warned += 1;
            }
            report.outcomes.push(outcome);
        }

        report.interrupted = self.cancelled.load(Ordering::SeqCst);
        report
    }
}

/// Run the stage sequence for a single repository
///
/// The clone stage is fatal on failure; the LFS and ref-cleanup stages are
/// independent of each other and only raise warning flags.
async fn backup_one<B: GitBackend + ?Sized>(
    backend: &B,
    record: &RepositoryRecord,
    destination: &Path,
    lfs: bool,
    clean_refs: bool,
    events: &UnboundedSender<PipelineEvent>,
) -> RepositoryOutcome {
    let full_name = record.full_name.clone();
    let dest = mirror_path(destination, &full_name);

    let mut outcome = RepositoryOutcome {
        full_name: full_name.clone(),
        cloned: false,
        lfs_warning: false,
        refs_warning: false,
        fatal: None,
    };

    let _ = events.send(PipelineEvent::CloneStarted {
        full_name: full_name.clone(),
    });

    match backend.clone_mirror(&record.urls.https, &dest).await {
        Ok(()) => {
            outcome.cloned = true;
            let _ = events.send(PipelineEvent::Cloned {
                full_name: full_name.clone(),
            });
        }
        Err(failure) => {
            warn!("Clone of {} failed: {}", full_name, failure);
            let _ = events.send(PipelineEvent::CloneFailed {
                full_name: full_name.clone(),
                failure: failure.clone(),
            });
            outcome.fatal = Some(failure);
            return outcome;
        }
    }

    if lfs {
        match backend.lfs_fetch_all(&dest).await {
            Ok(()) => {
                let _ = events.send(PipelineEvent::LfsFetched {
                    full_name: full_name.clone(),
                });
            }
            Err(e) => {
                warn!("LFS fetch for {} failed: {}", full_name, e);
                outcome.lfs_warning = true;
                let _ = events.send(PipelineEvent::LfsWarning {
                    full_name: full_name.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    if clean_refs {
        match clean_pull_refs(backend, &dest).await {
            Ok(deleted) => {
                let _ = events.send(PipelineEvent::RefsCleaned {
                    full_name: full_name.clone(),
                    deleted,
                });
            }
            Err(e) => {
                warn!("Ref cleanup for {} failed: {}", full_name, e);
                outcome.refs_warning = true;
                let _ = events.send(PipelineEvent::RefsWarning {
                    full_name: full_name.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    outcome
}

/// Delete hosting-service pull refs from a cloned mirror
///
/// Mirror clones inherit `refs/pull/...` tracking refs for proposed
/// changes; those are not part of the intended backup content. Returns the
/// number of refs deleted; zero is a normal outcome on a clean mirror.
pub async fn clean_pull_refs<B: GitBackend + ?Sized>(backend: &B, repo_path: &Path) -> Result<usize> {
    let refs = backend.list_refs(repo_path).await?;

    let pull_refs: Vec<&String> = refs
        .iter()
        .filter(|name| name.split('/').any(|segment| segment == "pull"))
        .collect();

    for ref_name in &pull_refs {
        backend.delete_ref(repo_path, ref_name).await?;
        debug!("Deleted pull ref {}", ref_name);
    }

    Ok(pull_refs.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::CloneUrls;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    /// Scripted backend: behavior keyed by repository name
    #[derive(Default)]
    struct StubBackend {
        clone_failures: HashMap<String, CloneFailure>,
        lfs_fails: bool,
        refs: Mutex<Vec<String>>,
        deleted: Mutex<Vec<String>>,
    }

    impl StubBackend {
        fn with_refs(refs: &[&str]) -> Self {
            Self {
                refs: Mutex::new(refs.iter().map(|s| s.to_string()).collect()),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl GitBackend for StubBackend {
        async fn clone_mirror(&self, url: &str, _dest: &Path) -> Result<(), CloneFailure> {
            for (name, failure) in &self.clone_failures {
                if url.contains(name.as_str()) {
                    return Err(failure.clone());
                }
            }
            Ok(())
        }

        async fn lfs_fetch_all(&self, _repo_path: &Path) -> Result<()> {
            if self.lfs_fails {
                Err(anyhow!("lfs exploded"))
            } else {
                Ok(())
            }
        }

        async fn list_refs(&self, _repo_path: &Path) -> Result<Vec<String>> {
            Ok(self.refs.lock().unwrap().clone())
        }

        async fn delete_ref(&self, _repo_path: &Path, ref_name: &str) -> Result<()> {
            self.refs.lock().unwrap().retain(|r| r != ref_name);
            self.deleted.lock().unwrap().push(ref_name.to_string());
            Ok(())
        }
    }

    fn record(name: &str) -> RepositoryRecord {
        RepositoryRecord {
            full_name: format!("octocat/{}", name),
            name: name.to_string(),
            private: false,
            fork: false,
            urls: CloneUrls {
                https: format!("https://tok@github.com/octocat/{}.git", name),
                ssh: None,
            },
        }
    }

    fn pipeline(backend: StubBackend, lfs: bool, clean_refs: bool) -> BackupPipeline<StubBackend> {
        BackupPipeline::new(
            Arc::new(backend),
            PathBuf::from("/tmp/backup-test"),
            lfs,
            clean_refs,
            4,
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[tokio::test]
    async fn test_clone_failure_isolated_to_one_repository() {
        let mut backend = StubBackend::default();
        backend
            .clone_failures
            .insert("broken".to_string(), CloneFailure::Other("boom".to_string()));

        let (tx, _rx) = mpsc::unbounded_channel();
        let report = pipeline(backend, false, false)
            .run(vec![record("broken"), record("fine"), record("also-fine")], tx)
            .await;

        assert_eq!(report.selected, 3);
        assert_eq!(report.attempted, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(report.warned, 0);

        let fine: Vec<_> = report
            .outcomes
            .iter()
            .filter(|o| o.fatal.is_none())
            .collect();
        assert_eq!(fine.len(), 2);
        assert!(fine.iter().all(|o| o.cloned));
    }

    #[tokio::test]
    async fn test_destination_not_empty_classified_distinctly() {
        let mut backend = StubBackend::default();
        backend
            .clone_failures
            .insert("stale".to_string(), CloneFailure::DestinationNotEmpty);

        let (tx, _rx) = mpsc::unbounded_channel();
        let report = pipeline(backend, false, false)
            .run(vec![record("stale")], tx)
            .await;

        assert_eq!(
            report.outcomes[0].fatal,
            Some(CloneFailure::DestinationNotEmpty)
        );
    }

    #[tokio::test]
    async fn test_lfs_failure_is_warning_and_refs_still_run() {
        let backend = StubBackend {
            lfs_fails: true,
            refs: Mutex::new(vec![
                "refs/heads/main".to_string(),
                "refs/pull/1/head".to_string(),
            ]),
            ..StubBackend::default()
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let report = pipeline(backend, true, true)
            .run(vec![record("repo")], tx)
            .await;

        let outcome = &report.outcomes[0];
        assert!(outcome.cloned);
        assert!(outcome.lfs_warning);
        assert!(!outcome.refs_warning);
        assert!(outcome.fatal.is_none());
        assert_eq!(report.warned, 1);
        assert_eq!(report.failed, 0);

        // The ref stage ran despite the LFS warning
        let mut saw_refs_cleaned = false;
        while let Ok(event) = rx.try_recv() {
            if let PipelineEvent::RefsCleaned { deleted, .. } = event {
                saw_refs_cleaned = true;
                assert_eq!(deleted, 1);
            }
        }
        assert!(saw_refs_cleaned);
    }

    #[tokio::test]
    async fn test_warned_repository_still_counts_as_backed_up() {
        let backend = StubBackend {
            lfs_fails: true,
            ..StubBackend::default()
        };

        let (tx, _rx) = mpsc::unbounded_channel();
        let report = pipeline(backend, true, false)
            .run(vec![record("repo")], tx)
            .await;

        assert!(report.outcomes[0].cloned);
        assert_eq!(report.failed, 0);
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_clean_pull_refs_idempotent() {
        let backend = StubBackend::with_refs(&[
            "refs/heads/main",
            "refs/pull/1/head",
            "refs/pull/2/merge",
            "refs/tags/v1.0",
        ]);

        let path = Path::new("/tmp/mirror.git");
        let deleted = clean_pull_refs(&backend, path).await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(
            *backend.deleted.lock().unwrap(),
            vec!["refs/pull/1/head", "refs/pull/2/merge"]
        );

        // Second run finds nothing to delete and still succeeds
        let deleted = clean_pull_refs(&backend, path).await.unwrap();
        assert_eq!(deleted, 0);
    }

    #[tokio::test]
    async fn test_pull_segment_matching_is_exact() {
        // "pulley" must not match; only a literal /pull/ path segment does
        let backend = StubBackend::with_refs(&[
            "refs/heads/pulley",
            "refs/heads/pull-requests",
            "refs/pull/7/head",
        ]);

        let deleted = clean_pull_refs(&backend, Path::new("/tmp/m.git"))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(*backend.deleted.lock().unwrap(), vec!["refs/pull/7/head"]);
    }

    #[tokio::test]
    async fn test_cancellation_stops_new_work() {
        let cancelled = Arc::new(AtomicBool::new(true));
        let pipeline = BackupPipeline::new(
            Arc::new(StubBackend::default()),
            PathBuf::from("/tmp/backup-test"),
            false,
            false,
            2,
            cancelled,
        );

        let (tx, _rx) = mpsc::unbounded_channel();
        let report = pipeline
            .run(vec![record("a"), record("b"), record("c")], tx)
            .await;

        assert_eq!(report.selected, 3);
        assert_eq!(report.attempted, 0);
        assert!(report.interrupted);
    }

    #[test]
    fn test_cleanup_decision() {
        assert!(should_remove_destination(false, true));
        assert!(!should_remove_destination(false, false));
        assert!(!should_remove_destination(true, true));
        assert!(!should_remove_destination(true, false));
    }

    #[test]
    fn test_destination_guard_fresh_and_preexisting() {
        let temp = TempDir::new().unwrap();

        let fresh = temp.path().join("fresh");
        let guard = DestinationGuard::prepare(&fresh).unwrap();
        assert!(!guard.preexisted());
        assert!(fresh.is_dir());

        // Still empty, so interrupt cleanup removes it
        assert!(guard.cleanup_after_interrupt().unwrap());
        assert!(!fresh.exists());

        let preexisting = temp.path().join("preexisting");
        std::fs::create_dir(&preexisting).unwrap();
        std::fs::write(preexisting.join("keep"), "data").unwrap();
        let guard = DestinationGuard::prepare(&preexisting).unwrap();
        assert!(guard.preexisted());
        assert!(!guard.cleanup_after_interrupt().unwrap());
        assert!(preexisting.join("keep").exists());

        // A preexisting directory is preserved even when empty
        let empty = temp.path().join("empty");
        std::fs::create_dir(&empty).unwrap();
        let guard = DestinationGuard::prepare(&empty).unwrap();
        assert!(guard.preexisted());
        assert!(!guard.cleanup_after_interrupt().unwrap());
        assert!(empty.exists());
    }

    #[test]
    fn test_destination_guard_keeps_populated_fresh_dir() {
        let temp = TempDir::new().unwrap();
        let fresh = temp.path().join("fresh");
        let guard = DestinationGuard::prepare(&fresh).unwrap();

        // A clone landed before the interrupt
        std::fs::create_dir(fresh.join("octocat")).unwrap();

        assert!(!guard.cleanup_after_interrupt().unwrap());
        assert!(fresh.exists());
    }

    #[test]
    fn test_run_report_exit_codes() {
        let mut report = RunReport::default();
        assert_eq!(report.exit_code(), 2); // nothing to back up

        report.selected = 3;
        report.attempted = 3;
        assert_eq!(report.exit_code(), 0);

        report.warned = 1;
        assert_eq!(report.exit_code(), 1);

        report.warned = 0;
        report.failed = 1;
        assert_eq!(report.exit_code(), 1);
    }
}
