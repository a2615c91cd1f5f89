use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use repovault::config::{parse_parallel, Config};
use repovault::git::{CloneFailure, GitClient};
use repovault::github::{resolve_token, GitHubClient};
use repovault::options::{resolve, FilterFlags, Flag};
use repovault::pipeline::{BackupPipeline, DestinationGuard, PipelineEvent, RunReport};
use repovault::selection::Selection;

/// Exit code used when the run was interrupted (128 + SIGINT)
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(name = "repovault")]
#[command(about = "Bulk mirror backup tool for GitHub repositories")]
#[command(version)]
struct Cli {
    /// Account to back up (user or organization login)
    account: String,

    /// Destination directory for the mirror tree
    destination: Option<PathBuf>,

    /// Only include public repositories
    #[arg(long)]
    public: bool,

    /// Only include private repositories
    #[arg(long)]
    private: bool,

    /// Include repositories you own
    #[arg(long, overrides_with = "no_owner")]
    owner: bool,
    #[arg(long = "no-owner", hide = true)]
    no_owner: bool,

    /// Include repositories you collaborate on
    #[arg(long, overrides_with = "no_collaborator")]
    collaborator: bool,
    #[arg(long = "no-collaborator", hide = true)]
    no_collaborator: bool,

    /// Include organization-member repositories
    #[arg(long, overrides_with = "no_member")]
    member: bool,
    #[arg(long = "no-member", hide = true)]
    no_member: bool,

    /// Drop repositories whose name matches this pattern (repeatable)
    #[arg(long, value_name = "REGEX")]
    exclude: Vec<String>,

    /// Keep only repositories whose name matches every pattern (repeatable)
    #[arg(long = "match", value_name = "REGEX")]
    match_patterns: Vec<String>,

    /// Fetch LFS objects after each clone
    #[arg(long)]
    lfs: bool,

    /// Delete hosting-service pull refs after each clone
    #[arg(long)]
    clean_refs: bool,

    /// Suppress per-repository progress output
    #[arg(long, short)]
    quiet: bool,

    /// Number of repositories to back up in parallel (default 8)
    #[arg(long, value_name = "N")]
    parallel: Option<String>,

    /// GitHub token (falls back to config file, GITHUB_TOKEN, then gh)
    #[arg(long)]
    token: Option<String>,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let code = run(cli).await?;
    std::process::exit(code);
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}

async fn run(cli: Cli) -> Result<i32> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    // Every configuration error surfaces here, before any repository work.
    let selection = {
        let exclude = if cli.exclude.is_empty() {
            &config.exclude
        } else {
            &cli.exclude
        };
        let matchers = if cli.match_patterns.is_empty() {
            &config.match_patterns
        } else {
            &cli.match_patterns
        };
        Selection::compile(exclude, matchers)?
    };

    let destination = match cli.destination.clone() {
        Some(path) => path,
        None => config
            .expanded_destination()?
            .ok_or_else(|| anyhow!("No destination given. Pass one or set it in the config file"))?,
    };

    if !GitClient::has_git().await {
        return Err(anyhow!("git was not found in PATH"));
    }

    let lfs_requested = cli.lfs || config.lfs;
    let lfs_enabled = if lfs_requested && !GitClient::has_lfs().await {
        // One warning for the whole run, not one per repository
        eprintln!("⚠️  git-lfs is not installed, skipping LFS objects");
        false
    } else {
        lfs_requested
    };
    let clean_refs = cli.clean_refs || config.clean_refs;

    let token = resolve_token(cli.token.clone().or_else(|| config.token.clone()))?;
    let client = GitHubClient::new(token)?;

    let (login, account_type) = client
        .classify_account(&cli.account)
        .await
        .context("Failed to classify the target account")?;
    info!("Backing up account {} ({:?})", login, account_type);

    let flags = FilterFlags {
        public: Flag::from_pair(cli.public, false),
        private: Flag::from_pair(cli.private, false),
        owner: Flag::from_pair(cli.owner, cli.no_owner),
        collaborator: Flag::from_pair(cli.collaborator, cli.no_collaborator),
        member: Flag::from_pair(cli.member, cli.no_member),
    };
    let query = resolve(&flags, account_type)?;

    if !cli.quiet {
        println!("🔍 Listing repositories for {}...", login);
    }

    let listing = client.list_repositories(&login, &query).await?;
    if listing.truncated {
        eprintln!("⚠️  Listing ended early; the backup may be incomplete");
    }
    if listing.dropped_no_access > 0 {
        info!(
            "Skipped {} repositories without read access",
            listing.dropped_no_access
        );
    }

    let (selected, _report) = selection.apply(listing.records);

    if selected.is_empty() {
        println!("Nothing to back up");
        return Ok(RunReport::default().exit_code());
    }

    if !cli.quiet {
        println!("   Found {} repositories to back up", selected.len());
    }

    let guard = DestinationGuard::prepare(&destination)?;

    // Ctrl-C stops new work from being issued; in-flight clones finish.
    let cancelled = Arc::new(AtomicBool::new(false));
    {
        let cancelled = cancelled.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n⚠️  Interrupted, finishing in-flight work...");
                cancelled.store(true, Ordering::SeqCst);
            }
        });
    }

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_events(events_rx, cli.quiet));

    let parallel = match cli.parallel.as_deref() {
        Some(raw) => parse_parallel(Some(raw)),
        None => config
            .parallel
            .filter(|&n| n > 0)
            .unwrap_or(repovault::config::DEFAULT_PARALLEL),
    };

    let pipeline = BackupPipeline::new(
        Arc::new(GitClient::new()),
        destination.clone(),
        lfs_enabled,
        clean_refs,
        parallel,
        cancelled.clone(),
    );

    let report = pipeline.run(selected, events_tx).await;
    printer.await.ok();

    print_summary(&report);

    if report.interrupted {
        guard.cleanup_after_interrupt()?;
        return Ok(EXIT_INTERRUPTED);
    }

    Ok(report.exit_code())
}

/// Consume pipeline events and render them inline
async fn print_events(mut events: mpsc::UnboundedReceiver<PipelineEvent>, quiet: bool) {
    while let Some(event) = events.recv().await {
        if quiet {
            continue;
        }
        match event {
            PipelineEvent::CloneStarted { full_name } => {
                println!("📥 Cloning {}...", full_name);
            }
            PipelineEvent::Cloned { full_name } => {
                println!("✅ Cloned {}", full_name);
            }
            PipelineEvent::CloneFailed { full_name, failure } => match failure {
                CloneFailure::DestinationNotEmpty => {
                    println!("❌ {}: destination exists and is not empty", full_name);
                }
                CloneFailure::Other(message) => {
                    println!("❌ {}: {}", full_name, message);
                }
            },
            PipelineEvent::LfsFetched { full_name } => {
                println!("   📦 LFS objects fetched for {}", full_name);
            }
            PipelineEvent::LfsWarning { full_name, message } => {
                println!("   ⚠️  LFS fetch failed for {}: {}", full_name, message);
            }
            PipelineEvent::RefsCleaned { full_name, deleted } => {
                if deleted > 0 {
                    println!("   🧹 Removed {} pull refs from {}", deleted, full_name);
                } else {
                    println!("   🧹 No pull refs to remove from {}", full_name);
                }
            }
            PipelineEvent::RefsWarning { full_name, message } => {
                println!("   ⚠️  Ref cleanup failed for {}: {}", full_name, message);
            }
        }
    }
}

fn print_summary(report: &RunReport) {
    println!();
    println!("📊 Backup summary:");
    println!("   Selected:  {}", report.selected);
    println!("   Attempted: {}", report.attempted);
    println!("   Warnings:  {}", report.warned);
    println!("   Failed:    {}", report.failed);

    if report.failed > 0 {
        println!();
        for outcome in &report.outcomes {
            if let Some(failure) = &outcome.fatal {
                println!("   ❌ {}: {}", outcome.full_name, failure);
            }
        }
    }

    if report.interrupted {
        warn!("Run was interrupted before all repositories were attempted");
    }
}
