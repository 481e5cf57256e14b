//! GitHub JSON payloads as they arrive on the wire.
//!
//! Every field is optional so a partial record still decodes; conversion to
//! the domain records decides what is required and drops the rest.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;

use repomirror_types::{
    Branch, Commit, GithubUser, PullRequest, RefPointer, RepoRef, Repository,
};

/// Parse an API timestamp. Timestamps without an offset are taken as UTC.
pub(crate) fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct WireOwner {
    #[serde(default)]
    pub login: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct WireRepository {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub owner: Option<WireOwner>,
    #[serde(default)]
    pub default_branch: Option<String>,
}

impl WireRepository {
    /// Full repository metadata. Owner/name fall back to what was requested.
    pub fn into_repository(self, owner: &str, name: &str) -> Option<Repository> {
        Some(Repository {
            repo_id: self.id?,
            owner: non_empty(self.owner.and_then(|o| o.login)).unwrap_or_else(|| owner.to_string()),
            name: non_empty(self.name).unwrap_or_else(|| name.to_string()),
            default_branch: Some(non_empty(self.default_branch).unwrap_or_else(|| "main".into())),
        })
    }

    pub fn into_repo_ref(self) -> Option<RepoRef> {
        Some(RepoRef {
            repo_id: self.id?,
            owner: non_empty(self.owner.and_then(|o| o.login)),
            name: non_empty(self.name),
        })
    }
}

/// Contributors, commit authors and PR authors all share this shape.
#[derive(Debug, Deserialize, Default)]
pub(crate) struct WireUser {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub login: Option<String>,
}

impl WireUser {
    pub fn into_user(self) -> Option<GithubUser> {
        Some(GithubUser {
            user_id: self.id?,
            login: non_empty(self.login)?,
        })
    }
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct WireBranch {
    #[serde(default)]
    pub name: Option<String>,
}

impl WireBranch {
    pub fn into_branch(self) -> Option<Branch> {
        Some(Branch {
            name: non_empty(self.name)?,
        })
    }
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct WireSignature {
    #[serde(default)]
    pub date: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct WireGitCommit {
    #[serde(default)]
    pub author: Option<WireSignature>,
    #[serde(default)]
    pub committer: Option<WireSignature>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct WireCommit {
    #[serde(default)]
    pub sha: Option<String>,
    #[serde(default)]
    pub commit: Option<WireGitCommit>,
    /// The linked platform account; null when the signature matches no user.
    #[serde(default)]
    pub author: Option<WireUser>,
}

impl WireCommit {
    pub fn into_commit(self) -> Option<Commit> {
        let sha = non_empty(self.sha)?;
        let git = self.commit.unwrap_or_default();
        let date_of = |sig: Option<WireSignature>| {
            sig.and_then(|s| s.date).as_deref().and_then(parse_timestamp)
        };
        let committed_at = date_of(git.committer).or_else(|| date_of(git.author))?;
        let author = self.author.unwrap_or_default();
        Some(Commit {
            sha,
            committed_at,
            author_id: author.id,
            author_login: non_empty(author.login),
        })
    }
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct WirePointer {
    #[serde(default, rename = "ref")]
    pub ref_name: Option<String>,
    #[serde(default)]
    pub repo: Option<WireRepository>,
}

impl WirePointer {
    fn into_pointer(self) -> RefPointer {
        RefPointer {
            repo: self.repo.and_then(WireRepository::into_repo_ref),
            ref_name: non_empty(self.ref_name),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct WirePullRequest {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub number: Option<i64>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub merged_at: Option<String>,
    #[serde(default)]
    pub user: Option<WireUser>,
    #[serde(default)]
    pub head: Option<WirePointer>,
    #[serde(default)]
    pub base: Option<WirePointer>,
}

impl WirePullRequest {
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at.as_deref().and_then(parse_timestamp)
    }

    pub fn into_pull_request(self) -> Option<PullRequest> {
        let updated_at = self.updated_at();
        let user = self.user.unwrap_or_default();
        Some(PullRequest {
            number: self.number?,
            pr_id: self.id?,
            author_id: user.id,
            author_login: non_empty(user.login),
            state: non_empty(self.state).unwrap_or_else(|| "unknown".into()),
            created_at: self.created_at.as_deref().and_then(parse_timestamp)?,
            updated_at,
            merged_at: self.merged_at.as_deref().and_then(parse_timestamp),
            head: self.head.unwrap_or_default().into_pointer(),
            base: self.base.unwrap_or_default().into_pointer(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn decode<T: serde::de::DeserializeOwned>(v: serde_json::Value) -> T {
        serde_json::from_value(v).expect("decode")
    }

    #[test]
    fn test_parse_timestamp_variants() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(parse_timestamp("2024-01-02T03:04:05Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-02T05:04:05+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-02T03:04:05"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_commit_prefers_committer_date_and_links_author() {
        let c: WireCommit = decode(json!({
            "sha": "abc",
            "commit": {
                "author": {"date": "2024-01-01T00:00:00Z"},
                "committer": {"date": "2024-01-03T00:00:00Z"}
            },
            "author": {"id": 42, "login": "octocat"}
        }));
        let commit = c.into_commit().expect("commit");
        assert_eq!(commit.committed_at, Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap());
        assert_eq!(commit.author_id, Some(42));
        assert_eq!(commit.author_login.as_deref(), Some("octocat"));
    }

    #[test]
    fn test_commit_falls_back_to_author_date_and_null_author() {
        let c: WireCommit = decode(json!({
            "sha": "abc",
            "commit": {"author": {"date": "2024-01-01T00:00:00Z"}},
            "author": null
        }));
        let commit = c.into_commit().expect("commit");
        assert_eq!(commit.committed_at, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert!(commit.author_id.is_none());
    }

    #[test]
    fn test_commit_unparseable_committer_date_uses_author_date() {
        let c: WireCommit = decode(json!({
            "sha": "abc",
            "commit": {
                "author": {"date": "2024-01-01T00:00:00Z"},
                "committer": {"date": ""}
            }
        }));
        let commit = c.into_commit().expect("commit");
        assert_eq!(commit.committed_at, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());

        let neither: WireCommit = decode(json!({
            "sha": "abc",
            "commit": {"author": {"date": "soon"}, "committer": {"date": "later"}}
        }));
        assert!(neither.into_commit().is_none());
    }

    #[test]
    fn test_commit_without_sha_or_date_is_dropped() {
        let no_sha: WireCommit = decode(json!({
            "commit": {"committer": {"date": "2024-01-01T00:00:00Z"}}
        }));
        assert!(no_sha.into_commit().is_none());

        let no_date: WireCommit = decode(json!({"sha": "abc", "commit": {}}));
        assert!(no_date.into_commit().is_none());
    }

    #[test]
    fn test_pull_request_requires_number_id_and_created_at() {
        let missing_id: WirePullRequest = decode(json!({
            "number": 1, "created_at": "2024-01-01T00:00:00Z"
        }));
        assert!(missing_id.into_pull_request().is_none());

        let missing_created: WirePullRequest = decode(json!({"number": 1, "id": 10}));
        assert!(missing_created.into_pull_request().is_none());
    }

    #[test]
    fn test_pull_request_pointers() {
        let pr: WirePullRequest = decode(json!({
            "id": 900,
            "number": 7,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-05T00:00:00Z",
            "merged_at": null,
            "user": {"id": 3, "login": "dev"},
            "head": {"ref": "topic", "repo": {"id": 55, "name": "fork", "owner": {"login": "forker"}}},
            "base": {"ref": "main", "repo": null}
        }));
        let pr = pr.into_pull_request().expect("pr");
        assert_eq!(pr.state, "unknown");
        assert_eq!(pr.author_id, Some(3));
        assert_eq!(
            pr.head.repo,
            Some(RepoRef {
                repo_id: 55,
                owner: Some("forker".into()),
                name: Some("fork".into()),
            })
        );
        assert_eq!(pr.head.ref_name.as_deref(), Some("topic"));
        assert!(pr.base.repo.is_none());
        assert!(pr.merged_at.is_none());
    }

    #[test]
    fn test_repository_defaults() {
        let r: WireRepository = decode(json!({"id": 1}));
        let repo = r.into_repository("octo", "hello").expect("repo");
        assert_eq!(repo.owner, "octo");
        assert_eq!(repo.name, "hello");
        assert_eq!(repo.default_branch.as_deref(), Some("main"));

        let missing: WireRepository = decode(json!({"name": "hello"}));
        assert!(missing.into_repository("octo", "hello").is_none());
    }

    #[test]
    fn test_user_requires_login() {
        let u: WireUser = decode(json!({"id": 5, "login": ""}));
        assert!(u.into_user().is_none());
    }
}
