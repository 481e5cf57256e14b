use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

// ── Error ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum MirrorError {
    #[cfg(feature = "rusqlite-errors")]
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),
    #[error("http {status} from {url}")]
    Http { status: u16, url: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("task error: {0}")]
    Task(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl MirrorError {
    /// Fetch failures that a retry may clear: non-2xx responses and
    /// connection/timeout errors.
    pub fn is_transient(&self) -> bool {
        matches!(self, MirrorError::Http { .. } | MirrorError::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, MirrorError>;

// ── Domain types ──────────────────────────────────────────────────────────

/// Owner used for repositories known only through a pull request pointer.
pub const UNKNOWN_OWNER: &str = "unknown";

/// Name used for repositories known only through a pull request pointer.
pub fn placeholder_repo_name(repo_id: i64) -> String {
    format!("repo_{}", repo_id)
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Repository {
    pub repo_id: i64,
    pub owner: String,
    pub name: String,
    pub default_branch: Option<String>,
}

/// A repository referenced from a pull request head/base pointer.
/// Owner and name are whatever the payload carried, if anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub repo_id: i64,
    pub owner: Option<String>,
    pub name: Option<String>,
}

impl RepoRef {
    pub fn bare(repo_id: i64) -> Self {
        Self {
            repo_id,
            owner: None,
            name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GithubUser {
    pub user_id: i64,
    pub login: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchRow {
    pub repo_id: i64,
    pub name: String,
    pub first_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub sha: String,
    pub committed_at: DateTime<Utc>,
    pub author_id: Option<i64>,
    pub author_login: Option<String>,
}

impl Commit {
    /// The linked platform account, when both id and login are present.
    pub fn author_user(&self) -> Option<GithubUser> {
        match (self.author_id, &self.author_login) {
            (Some(user_id), Some(login)) => Some(GithubUser {
                user_id,
                login: login.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRow {
    pub repo_id: i64,
    pub sha: String,
    pub committed_at: DateTime<Utc>,
    pub author_user_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BranchCommit {
    pub branch_name: String,
    pub sha: String,
}

/// One side (head or base) of a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RefPointer {
    pub repo: Option<RepoRef>,
    pub ref_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub number: i64,
    pub pr_id: i64,
    pub author_id: Option<i64>,
    pub author_login: Option<String>,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
    pub head: RefPointer,
    pub base: RefPointer,
}

impl PullRequest {
    pub fn author_user(&self) -> Option<GithubUser> {
        match (self.author_id, &self.author_login) {
            (Some(user_id), Some(login)) => Some(GithubUser {
                user_id,
                login: login.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestRow {
    pub repo_id: i64,
    pub pr_number: i64,
    pub pr_id: i64,
    pub author_user_id: Option<i64>,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
    pub head_repo_id: i64,
    pub head_ref: Option<String>,
    pub base_repo_id: i64,
    pub base_ref: Option<String>,
}

// ── Report types ──────────────────────────────────────────────────────────

/// Per-run counts returned by a sync.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub repo_id: i64,
    pub owner: String,
    pub name: String,
    pub contributors: usize,
    pub branches: usize,
    pub commits: usize,
    pub branch_commit_edges: usize,
    pub pull_requests: usize,
    pub users: usize,
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RepoStats {
    pub repository: Repository,
    pub commit_count: usize,
    pub branch_count: usize,
    pub branch_commit_count: usize,
    pub pull_request_count: usize,
    pub watermark: Option<DateTime<Utc>>,
}

// ── Core traits ───────────────────────────────────────────────────────────

/// Target store. Every upsert is idempotent and runs in its own transaction;
/// an empty batch is a no-op.
pub trait Store: Send + Sync {
    // Merge-load writes
    fn upsert_repository(&self, repo: &Repository) -> Result<i64>;
    fn upsert_users(&self, users: &[GithubUser]) -> Result<()>;
    fn upsert_branches(
        &self,
        repo_id: i64,
        branches: &[Branch],
        observed_at: DateTime<Utc>,
    ) -> Result<()>;
    fn upsert_commits(&self, repo_id: i64, commits: &[Commit]) -> Result<()>;
    fn upsert_branch_commits(&self, repo_id: i64, edges: &[BranchCommit]) -> Result<()>;
    /// Backfills stub rows for every referenced head/base repository first.
    fn upsert_pull_requests(&self, repo_id: i64, prs: &[PullRequest]) -> Result<()>;

    /// Newest `committed_at` among the repository's stored commits.
    fn watermark(&self, repo_id: i64) -> Result<Option<DateTime<Utc>>>;

    // Reads
    fn get_repository(&self, repo_id: i64) -> Result<Option<Repository>>;
    fn list_repositories(&self) -> Result<Vec<Repository>>;
    fn get_user(&self, user_id: i64) -> Result<Option<GithubUser>>;
    fn get_branch(&self, repo_id: i64, name: &str) -> Result<Option<BranchRow>>;
    fn get_commit(&self, repo_id: i64, sha: &str) -> Result<Option<CommitRow>>;
    fn get_pull_request(&self, repo_id: i64, number: i64) -> Result<Option<PullRequestRow>>;
    fn repo_stats(&self, repo_id: i64) -> Result<RepoStats>;
}

/// A GET request against the source API. Headers carry the credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
}

/// Transport boundary. Implementations return `MirrorError::Http` on any
/// non-2xx status and `MirrorError::Transport` on connection failures or
/// timeouts; they never retry.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, request: &GetRequest) -> Result<serde_json::Value>;
}

// ── Tests ─────────────────────────────────────────────────────────────────
