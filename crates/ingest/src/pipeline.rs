//! One sync run for one repository.
//!
//! Stages hand typed values to each other, so the order is fixed by the
//! types: repository upsert → watermark → concurrent extraction (with a
//! per-branch fan-out) → join → aggregate → load.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;

use repomirror_types::{
    Branch, BranchCommit, Commit, GithubUser, MirrorError, PullRequest, Result, Store, SyncReport,
};

use crate::api::GitHubApi;
use crate::extract::{RepoExtractor, DEFAULT_MAX_BRANCH_COMMITS};
use crate::retry::{with_retry, RetryPolicy};

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub max_branch_commits: usize,
    pub retry: RetryPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_branch_commits: DEFAULT_MAX_BRANCH_COMMITS,
            retry: RetryPolicy::default(),
        }
    }
}

/// Repository row written, id known.
#[derive(Debug, Clone)]
struct RegisteredRepo {
    repo_id: i64,
    owner: String,
    name: String,
}

/// Everything fetched in one run, fully materialized.
#[derive(Debug, Default)]
pub struct Extracted {
    pub contributors: Vec<GithubUser>,
    pub branches: Vec<Branch>,
    pub commits: Vec<Commit>,
    /// Per-branch commit lists, ordered by branch name.
    pub branch_commits: Vec<(String, Vec<Commit>)>,
    pub pull_requests: Vec<PullRequest>,
}

/// Rows ready for the store.
#[derive(Debug, Default)]
pub struct LoadBatch {
    pub users: Vec<GithubUser>,
    pub branches: Vec<Branch>,
    pub commits: Vec<Commit>,
    pub edges: Vec<BranchCommit>,
    pub pull_requests: Vec<PullRequest>,
}

enum Fetched {
    Contributors(Vec<GithubUser>),
    Branches(Vec<Branch>),
    Commits(Vec<Commit>),
    PullRequests(Vec<PullRequest>),
    BranchCommits { branch: String, commits: Vec<Commit> },
}

/// Merge the extracted sets into load rows.
///
/// Users are keyed by id across contributors, commit authors (default branch,
/// then each branch) and pull request authors; the last login seen wins.
/// Commits seen on several branches collapse to one row per sha.
pub fn aggregate(extracted: Extracted) -> LoadBatch {
    let Extracted {
        contributors,
        branches,
        commits,
        branch_commits,
        pull_requests,
    } = extracted;

    let mut users: BTreeMap<i64, String> = BTreeMap::new();
    for u in contributors {
        users.insert(u.user_id, u.login);
    }
    let all_commits = commits
        .iter()
        .chain(branch_commits.iter().flat_map(|(_, cs)| cs.iter()));
    for u in all_commits.clone().filter_map(Commit::author_user) {
        users.insert(u.user_id, u.login);
    }
    for u in pull_requests.iter().filter_map(PullRequest::author_user) {
        users.insert(u.user_id, u.login);
    }

    let mut by_sha: BTreeMap<&str, Commit> = BTreeMap::new();
    for c in all_commits {
        by_sha
            .entry(c.sha.as_str())
            .and_modify(|existing| {
                if c.committed_at > existing.committed_at {
                    existing.committed_at = c.committed_at;
                }
                if existing.author_id.is_none() {
                    existing.author_id = c.author_id;
                    existing.author_login = c.author_login.clone();
                }
            })
            .or_insert_with(|| c.clone());
    }
    let merged_commits: Vec<Commit> = by_sha.into_values().collect();

    let edges = branch_commits
        .iter()
        .flat_map(|(branch, cs)| {
            cs.iter().map(move |c| BranchCommit {
                branch_name: branch.clone(),
                sha: c.sha.clone(),
            })
        })
        .collect();

    LoadBatch {
        users: users
            .into_iter()
            .map(|(user_id, login)| GithubUser { user_id, login })
            .collect(),
        branches,
        commits: merged_commits,
        edges,
        pull_requests,
    }
}

pub struct Mirror {
    api: Arc<GitHubApi>,
    store: Arc<dyn Store>,
    options: SyncOptions,
}

impl Mirror {
    pub fn new(api: Arc<GitHubApi>, store: Arc<dyn Store>, options: SyncOptions) -> Self {
        Self {
            api,
            store,
            options,
        }
    }

    /// Mirror `owner/name` once. Any failed extraction fails the run.
    pub async fn sync(&self, owner: &str, name: &str) -> Result<SyncReport> {
        let extractor = Arc::new(RepoExtractor::new(Arc::clone(&self.api), owner, name));

        let repo = self.register_repository(&extractor).await?;
        let since = self.read_watermark(&repo).await?;
        let extracted = self.extract(&extractor, since).await?;

        let mut report = SyncReport {
            repo_id: repo.repo_id,
            owner: repo.owner.clone(),
            name: repo.name.clone(),
            contributors: extracted.contributors.len(),
            branches: extracted.branches.len(),
            commits: extracted.commits.len(),
            pull_requests: extracted.pull_requests.len(),
            since,
            ..SyncReport::default()
        };
        tracing::info!(
            repo_id = repo.repo_id,
            contributors = report.contributors,
            branches = report.branches,
            commits = report.commits,
            pull_requests = report.pull_requests,
            "extraction complete"
        );

        let batch = aggregate(extracted);
        report.branch_commit_edges = batch.edges.len();
        report.users = batch.users.len();

        self.load(&repo, batch).await?;
        tracing::info!(
            repo_id = repo.repo_id,
            users = report.users,
            branch_commit_edges = report.branch_commit_edges,
            "load complete"
        );
        Ok(report)
    }

    async fn register_repository(&self, extractor: &Arc<RepoExtractor>) -> Result<RegisteredRepo> {
        let repository =
            with_retry(&self.options.retry, "repository", || extractor.repository()).await?;
        let registered = RegisteredRepo {
            repo_id: repository.repo_id,
            owner: repository.owner.clone(),
            name: repository.name.clone(),
        };
        self.on_store(move |s| s.upsert_repository(&repository)).await?;
        tracing::info!(
            repo_id = registered.repo_id,
            owner = %registered.owner,
            name = %registered.name,
            "repository registered"
        );
        Ok(registered)
    }

    async fn read_watermark(&self, repo: &RegisteredRepo) -> Result<Option<DateTime<Utc>>> {
        let repo_id = repo.repo_id;
        let since = self.on_store(move |s| s.watermark(repo_id)).await?;
        tracing::info!(repo_id, since = ?since, "watermark");
        Ok(since)
    }

    async fn extract(
        &self,
        extractor: &Arc<RepoExtractor>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Extracted> {
        // Dropping the set on an early return aborts whatever is still running.
        let mut tasks: JoinSet<Result<Fetched>> = JoinSet::new();

        self.spawn(&mut tasks, "contributors", extractor, move |ex| async move {
            ex.contributors().await.map(Fetched::Contributors)
        });
        self.spawn(&mut tasks, "branches", extractor, move |ex| async move {
            ex.branches().await.map(Fetched::Branches)
        });
        self.spawn(&mut tasks, "commits", extractor, move |ex| async move {
            ex.commits(since).await.map(Fetched::Commits)
        });
        self.spawn(&mut tasks, "pull_requests", extractor, move |ex| async move {
            ex.pull_requests(since).await.map(Fetched::PullRequests)
        });

        let cap = self.options.max_branch_commits;
        let mut extracted = Extracted::default();
        while let Some(joined) = tasks.join_next().await {
            let fetched = joined.map_err(|e| MirrorError::Task(e.to_string()))??;
            match fetched {
                Fetched::Contributors(users) => extracted.contributors = users,
                Fetched::Commits(commits) => extracted.commits = commits,
                Fetched::PullRequests(prs) => extracted.pull_requests = prs,
                Fetched::Branches(branches) => {
                    for b in &branches {
                        let branch = b.name.clone();
                        let label = format!("branch_commits:{}", branch);
                        self.spawn(&mut tasks, &label, extractor, move |ex| {
                            let branch = branch.clone();
                            async move {
                                let commits = ex.branch_commits(&branch, since, cap).await?;
                                Ok(Fetched::BranchCommits { branch, commits })
                            }
                        });
                    }
                    extracted.branches = branches;
                }
                Fetched::BranchCommits { branch, commits } => {
                    extracted.branch_commits.push((branch, commits));
                }
            }
        }
        extracted.branch_commits.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(extracted)
    }

    /// Spawn one retried extraction task. `make` builds a fresh attempt.
    fn spawn<F, Fut>(
        &self,
        tasks: &mut JoinSet<Result<Fetched>>,
        label: &str,
        extractor: &Arc<RepoExtractor>,
        make: F,
    ) where
        F: Fn(Arc<RepoExtractor>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Fetched>> + Send + 'static,
    {
        let policy = self.options.retry.clone();
        let label = label.to_string();
        let ex = Arc::clone(extractor);
        tasks.spawn(async move { with_retry(&policy, &label, || make(Arc::clone(&ex))).await });
    }

    async fn load(&self, repo: &RegisteredRepo, batch: LoadBatch) -> Result<()> {
        let repo_id = repo.repo_id;
        let LoadBatch {
            users,
            branches,
            commits,
            edges,
            pull_requests,
        } = batch;
        let observed_at = Utc::now();

        self.on_store(move |s| s.upsert_users(&users)).await?;
        self.on_store(move |s| s.upsert_branches(repo_id, &branches, observed_at))
            .await?;
        self.on_store(move |s| s.upsert_commits(repo_id, &commits)).await?;
        self.on_store(move |s| s.upsert_branch_commits(repo_id, &edges))
            .await?;
        self.on_store(move |s| s.upsert_pull_requests(repo_id, &pull_requests))
            .await?;
        Ok(())
    }

    /// Run a store call on the blocking pool.
    async fn on_store<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn Store) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| MirrorError::Task(e.to_string()))?
    }
}
