use std::sync::Arc;

use chrono::{DateTime, Utc};

use repomirror_types::{Branch, Commit, GithubUser, MirrorError, PullRequest, Repository, Result};

use crate::api::GitHubApi;
use crate::paginate::{ListParams, Paginator};
use crate::wire::{WireBranch, WireCommit, WirePullRequest, WireRepository, WireUser};

pub const DEFAULT_MAX_BRANCH_COMMITS: usize = 500;

/// Extraction procedures for one `owner/name` repository.
pub struct RepoExtractor {
    api: Arc<GitHubApi>,
    owner: String,
    name: String,
}

impl RepoExtractor {
    pub fn new(api: Arc<GitHubApi>, owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            api,
            owner: owner.into(),
            name: name.into(),
        }
    }

    fn repo_path(&self) -> String {
        format!("/repos/{}/{}", self.owner, self.name)
    }

    fn endpoint(&self, endpoint: &str) -> String {
        format!("{}/{}", self.repo_path(), endpoint)
    }

    fn list<T: serde::de::DeserializeOwned>(&self, endpoint: &str, params: ListParams) -> Paginator<'_, T> {
        Paginator::new(&self.api, self.endpoint(endpoint), params)
    }

    pub async fn repository(&self) -> Result<Repository> {
        let body = self.api.get(&self.repo_path(), Vec::new()).await?;
        let wire: WireRepository = serde_json::from_value(body)
            .map_err(|e| MirrorError::Decode(format!("{}: {}", self.repo_path(), e)))?;
        wire.into_repository(&self.owner, &self.name)
            .ok_or_else(|| MirrorError::Decode(format!("{}: repository has no id", self.repo_path())))
    }

    pub async fn contributors(&self) -> Result<Vec<GithubUser>> {
        let raw: Vec<WireUser> = self
            .list("contributors", ListParams::default())
            .collect_all()
            .await?;
        Ok(raw.into_iter().filter_map(WireUser::into_user).collect())
    }

    pub async fn branches(&self) -> Result<Vec<Branch>> {
        let raw: Vec<WireBranch> = self
            .list("branches", ListParams::default())
            .collect_all()
            .await?;
        Ok(raw.into_iter().filter_map(WireBranch::into_branch).collect())
    }

    /// Default-branch commits at or after `since`.
    pub async fn commits(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Commit>> {
        let raw: Vec<WireCommit> = self
            .list("commits", ListParams::default().since(since))
            .collect_all()
            .await?;
        Ok(raw.into_iter().filter_map(WireCommit::into_commit).collect())
    }

    /// Commits reachable from `branch`, at or after `since`, at most `cap`.
    pub async fn branch_commits(
        &self,
        branch: &str,
        since: Option<DateTime<Utc>>,
        cap: usize,
    ) -> Result<Vec<Commit>> {
        let raw: Vec<WireCommit> = self
            .list("commits", ListParams::default().branch(branch).since(since))
            .collect_capped(cap)
            .await?;
        Ok(raw.into_iter().filter_map(WireCommit::into_commit).collect())
    }

    /// Pull requests updated at or after `since`, newest update first.
    ///
    /// The endpoint has no time filter, so the scan runs in `updated_at`
    /// descending order and stops at the first pull request older than
    /// `since`. That is only exact if the server honors the sort.
    pub async fn pull_requests(&self, since: Option<DateTime<Utc>>) -> Result<Vec<PullRequest>> {
        let mut pages: Paginator<'_, WirePullRequest> =
            self.list("pulls", ListParams::default().all_by_recent_update());
        let mut out = Vec::new();
        while let Some(raw) = pages.next_item().await? {
            if let (Some(cutoff), Some(updated)) = (since, raw.updated_at()) {
                if updated < cutoff {
                    tracing::debug!(%updated, %cutoff, "pull request scan reached watermark");
                    break;
                }
            }
            if let Some(pr) = raw.into_pull_request() {
                out.push(pr);
            }
        }
        Ok(out)
    }
}
