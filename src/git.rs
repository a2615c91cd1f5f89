//! External git process operations used by the backup pipeline
//!
//! The pipeline treats git as a black box with four operations (mirror
//! clone, LFS fetch, ref listing, ref deletion) plus capability probes.
//! The [`GitBackend`] trait is the seam that lets pipeline tests run
//! without spawning processes.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command as AsyncCommand;
use tracing::debug;

/// Why a mirror clone failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloneFailure {
    /// The destination path already exists and is not empty; reported
    /// distinctly so the user can tell a stale tree from a network failure
    DestinationNotEmpty,
    Other(String),
}

impl std::fmt::Display for CloneFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloneFailure::DestinationNotEmpty => {
                write!(f, "destination exists and is not empty")
            }
            CloneFailure::Other(message) => write!(f, "{}", message),
        }
    }
}

/// Black-box git operations consumed by the pipeline
#[async_trait]
pub trait GitBackend: Send + Sync {
    /// Mirror-clone `url` into `dest`, creating parent directories
    async fn clone_mirror(&self, url: &str, dest: &Path) -> Result<(), CloneFailure>;

    /// Fetch all LFS objects for a cloned mirror
    async fn lfs_fetch_all(&self, repo_path: &Path) -> Result<()>;

    /// List every ref name in a cloned mirror
    async fn list_refs(&self, repo_path: &Path) -> Result<Vec<String>>;

    /// Delete a single ref from a cloned mirror
    async fn delete_ref(&self, repo_path: &Path, ref_name: &str) -> Result<()>;
}

/// Process-backed [`GitBackend`] implementation
#[derive(Debug, Clone, Default)]
pub struct GitClient;

impl GitClient {
    pub fn new() -> Self {
        Self
    }

    /// Check that the git executable is available
    pub async fn has_git() -> bool {
        run_probe("git", &["--version"]).await
    }

    /// Check that the git-lfs extension is available
    pub async fn has_lfs() -> bool {
        run_probe("git", &["lfs", "version"]).await
    }
}

async fn run_probe(program: &str, args: &[&str]) -> bool {
    AsyncCommand::new(program)
        .args(args)
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}

#[async_trait]
impl GitBackend for GitClient {
    async fn clone_mirror(&self, url: &str, dest: &Path) -> Result<(), CloneFailure> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CloneFailure::Other(format!("Failed to create parent directory: {}", e)))?;
        }

        debug!("Mirror cloning into {}", dest.display());

        let output = AsyncCommand::new("git")
            .args(["clone", "--mirror", url])
            .arg(dest)
            .output()
            .await
            .map_err(|e| CloneFailure::Other(format!("Failed to execute git clone: {}", e)))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("already exists and is not an empty directory") {
            Err(CloneFailure::DestinationNotEmpty)
        } else {
            Err(CloneFailure::Other(format!(
                "Git clone failed: {}",
                stderr.trim()
            )))
        }
    }

    async fn lfs_fetch_all(&self, repo_path: &Path) -> Result<()> {
        let output = AsyncCommand::new("git")
            .args(["lfs", "fetch", "--all"])
            .current_dir(repo_path)
            .output()
            .await
            .context("Failed to execute git lfs fetch")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("Git LFS fetch failed: {}", stderr.trim()));
        }

        Ok(())
    }

    async fn list_refs(&self, repo_path: &Path) -> Result<Vec<String>> {
        let output = AsyncCommand::new("git")
            .args(["for-each-ref", "--format=%(refname)"])
            .current_dir(repo_path)
            .output()
            .await
            .context("Failed to execute git for-each-ref")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("Listing refs failed: {}", stderr.trim()));
        }

        let refs = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect();

        Ok(refs)
    }

    async fn delete_ref(&self, repo_path: &Path, ref_name: &str) -> Result<()> {
        let output = AsyncCommand::new("git")
            .args(["update-ref", "-d", ref_name])
            .current_dir(repo_path)
            .output()
            .await
            .context("Failed to execute git update-ref")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "Deleting ref {} failed: {}",
                ref_name,
                stderr.trim()
            ));
        }

        Ok(())
    }
}

/// Destination directory for one repository mirror: `<root>/<full_name>.git`
pub fn mirror_path(destination_root: &Path, full_name: &str) -> PathBuf {
    destination_root.join(format!("{}.git", full_name))
}
