mod config;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use repomirror_ingest::{
    GitHubApi, Mirror, ReqwestClient, SyncOptions, DEFAULT_MAX_BRANCH_COMMITS,
};
use repomirror_store::SqliteStore;
use repomirror_types::{Store, SyncReport};

use crate::config::{resolve_db_path, Config};

#[derive(Parser)]
#[command(name = "repomirror", about = "Incremental GitHub repository mirror into SQLite")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and apply the schema
    Init {
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Mirror one repository
    Sync {
        owner: String,
        repo: String,
        #[arg(long)]
        db: Option<PathBuf>,
        /// Commits fetched per branch, newest first
        #[arg(long = "max-branch-commits", default_value_t = DEFAULT_MAX_BRANCH_COMMITS)]
        max_branch_commits: usize,
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show what has been mirrored so far
    Status {
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn open_store(db_path: &Path) -> Result<SqliteStore> {
    SqliteStore::open(db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))
}

/// Open the store, creating the database's parent directory first.
fn create_store(db_path: &Path) -> Result<SqliteStore> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    open_store(db_path)
}

fn format_timestamp(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string())
}

fn print_report(report: &SyncReport) {
    println!("Synced {}/{} (repo id {})", report.owner, report.name, report.repo_id);
    println!("  since          {}", format_timestamp(report.since));
    println!("  contributors   {:>8}", report.contributors);
    println!("  branches       {:>8}", report.branches);
    println!("  commits        {:>8}", report.commits);
    println!("  branch commits {:>8}", report.branch_commit_edges);
    println!("  pull requests  {:>8}", report.pull_requests);
    println!("  users          {:>8}", report.users);
}

fn init_tracing() {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("repomirror=info,repomirror_ingest=info"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db } => {
            let db_path = resolve_db_path(db, &env_lookup)?;
            create_store(&db_path)?;
            println!("Initialized repomirror database at {}", db_path.display());
        }

        Commands::Sync {
            owner,
            repo,
            db,
            max_branch_commits,
            json,
        } => {
            let config = Config::from_env(db)?;
            tracing::info!(
                owner = %owner,
                repo = %repo,
                db = %config.db_path.display(),
                "starting sync"
            );
            let store: Arc<dyn Store> = Arc::new(create_store(&config.db_path)?);
            let http = ReqwestClient::with_timeout(config.http_timeout)
                .context("Failed to build HTTP client")?;
            let api = Arc::new(GitHubApi::new(
                config.api_url.clone(),
                config.credentials.clone(),
                Arc::new(http),
            ));
            let options = SyncOptions {
                max_branch_commits,
                retry: config.retry.clone(),
            };

            let report = Mirror::new(api, store, options)
                .sync(&owner, &repo)
                .await
                .with_context(|| format!("Failed to sync {}/{}", owner, repo))?;

            if json {
                let out = serde_json::to_string_pretty(&report)
                    .context("Failed to serialize report to JSON")?;
                println!("{}", out);
            } else {
                print_report(&report);
            }
        }

        Commands::Status { db } => {
            let db_path = resolve_db_path(db, &env_lookup)?;
            let store = open_store(&db_path)?;
            let repos = store.list_repositories().context("Failed to list repositories")?;

            println!(
                "{:<32} {:>8} {:>8} {:>8}  WATERMARK",
                "REPO", "COMMITS", "BRANCHES", "PULLS"
            );
            for r in &repos {
                let label = format!("{}/{}", r.owner, r.name);
                match store
                    .repo_stats(r.repo_id)
                    .with_context(|| format!("Failed to get stats for '{}'", label))
                {
                    Ok(stats) => println!(
                        "{:<32} {:>8} {:>8} {:>8}  {}",
                        label,
                        stats.commit_count,
                        stats.branch_count,
                        stats.pull_request_count,
                        format_timestamp(stats.watermark)
                    ),
                    Err(e) => eprintln!("Error fetching stats for '{}': {:#}", label, e),
                }
            }
        }
    }

    Ok(())
}
