mod schema;
mod queries;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use repomirror_types::{MirrorError, Result};

/// SQLite-backed implementation of the [`repomirror_types::Store`] trait.
pub struct SqliteStore {
    pub(crate) conn: Mutex<rusqlite::Connection>,
}

impl SqliteStore {
    /// Open a persistent on-disk database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = rusqlite::Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    /// Open an in-memory database (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    /// Run all pragmas and schema DDL.
    fn init(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(schema::SCHEMA_SQL)?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, rusqlite::Connection>> {
        self.conn
            .lock()
            .map_err(|_| MirrorError::Task("store connection lock poisoned".into()))
    }
}

/// Resolve a store location given as a plain path or a `sqlite:` URL.
pub fn db_path_from_url(url: &str) -> Result<PathBuf> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);
    if path.is_empty() {
        return Err(MirrorError::Config(format!(
            "store location '{}' does not name a file",
            url
        )));
    }
    if path.contains("://") {
        return Err(MirrorError::Config(format!(
            "unsupported store URL '{}': only sqlite paths are accepted",
            url
        )));
    }
    Ok(PathBuf::from(path))
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use repomirror_types::{
        Branch, BranchCommit, Commit, GithubUser, PullRequest, RefPointer, RepoRef, Repository,
        Store,
    };

    fn make_store() -> SqliteStore {
        SqliteStore::open_in_memory().expect("open in-memory store")
    }

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, d, 12, 0, 0).unwrap()
    }

    fn make_repo(store: &SqliteStore, repo_id: i64) -> i64 {
        store
            .upsert_repository(&Repository {
                repo_id,
                owner: "octo".into(),
                name: "hello".into(),
                default_branch: Some("main".into()),
            })
            .expect("upsert repo")
    }

    fn make_commit(sha: &str, at: DateTime<Utc>, author_id: Option<i64>) -> Commit {
        Commit {
            sha: sha.into(),
            committed_at: at,
            author_id,
            author_login: None,
        }
    }

    fn make_pr(number: i64, author_id: Option<i64>) -> PullRequest {
        PullRequest {
            number,
            pr_id: 1000 + number,
            author_id,
            author_login: None,
            state: "open".into(),
            created_at: day(1),
            updated_at: Some(day(2)),
            merged_at: None,
            head: RefPointer {
                repo: None,
                ref_name: Some("feature".into()),
            },
            base: RefPointer {
                repo: None,
                ref_name: Some("main".into()),
            },
        }
    }

    fn count_rows(store: &SqliteStore, table: &str) -> i64 {
        let conn = store.conn.lock().unwrap();
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
            .expect("count query")
    }

    #[test]
    fn test_upsert_repository_overwrites_metadata() {
        let store = make_store();
        make_repo(&store, 1);
        store
            .upsert_repository(&Repository {
                repo_id: 1,
                owner: "octo-renamed".into(),
                name: "hello".into(),
                default_branch: Some("trunk".into()),
            })
            .expect("second upsert");

        let repo = store.get_repository(1).expect("get").expect("some");
        assert_eq!(repo.owner, "octo-renamed");
        assert_eq!(repo.default_branch.as_deref(), Some("trunk"));
        assert_eq!(count_rows(&store, "repositories"), 1);
    }

    #[test]
    fn test_watermark_none_for_new_repo() {
        let store = make_store();
        let repo_id = make_repo(&store, 1);
        assert_eq!(store.watermark(repo_id).expect("watermark"), None);
    }

    #[test]
    fn test_watermark_is_max_committed_at() {
        let store = make_store();
        let repo_id = make_repo(&store, 1);
        store
            .upsert_commits(
                repo_id,
                &[
                    make_commit("a", day(3), None),
                    make_commit("b", day(7), None),
                    make_commit("c", day(5), None),
                ],
            )
            .expect("upsert");
        assert_eq!(store.watermark(repo_id).expect("watermark"), Some(day(7)));
        // Another repository's commits do not leak in.
        assert_eq!(store.watermark(2).expect("watermark"), None);
    }

    #[test]
    fn test_commit_author_coalesce() {
        let store = make_store();
        let repo_id = make_repo(&store, 1);
        store
            .upsert_commits(repo_id, &[make_commit("abc", day(1), Some(42))])
            .expect("first");
        store
            .upsert_commits(repo_id, &[make_commit("abc", day(1), None)])
            .expect("second");
        let row = store.get_commit(repo_id, "abc").expect("get").expect("some");
        assert_eq!(row.author_user_id, Some(42));

        // Once known, never overwritten either.
        store
            .upsert_commits(repo_id, &[make_commit("abc", day(1), Some(7))])
            .expect("third");
        let row = store.get_commit(repo_id, "abc").expect("get").expect("some");
        assert_eq!(row.author_user_id, Some(42));
    }

    #[test]
    fn test_commit_author_filled_when_previously_null() {
        let store = make_store();
        let repo_id = make_repo(&store, 1);
        store
            .upsert_commits(repo_id, &[make_commit("abc", day(1), None)])
            .expect("first");
        store
            .upsert_commits(repo_id, &[make_commit("abc", day(1), Some(9))])
            .expect("second");
        let row = store.get_commit(repo_id, "abc").expect("get").expect("some");
        assert_eq!(row.author_user_id, Some(9));
    }

    #[test]
    fn test_committed_at_monotone_merge() {
        let store = make_store();
        let repo_id = make_repo(&store, 1);
        store
            .upsert_commits(repo_id, &[make_commit("abc", day(9), None)])
            .expect("t1");
        store
            .upsert_commits(repo_id, &[make_commit("abc", day(4), None)])
            .expect("t0");
        let row = store.get_commit(repo_id, "abc").expect("get").expect("some");
        assert_eq!(row.committed_at, day(9));
        assert_eq!(count_rows(&store, "commits"), 1);
    }

    #[test]
    fn test_branch_first_seen_never_overwritten() {
        let store = make_store();
        let repo_id = make_repo(&store, 1);
        let branches = vec![Branch { name: "main".into() }];
        store.upsert_branches(repo_id, &branches, day(1)).expect("first");
        store.upsert_branches(repo_id, &branches, day(20)).expect("second");
        let row = store.get_branch(repo_id, "main").expect("get").expect("some");
        assert_eq!(row.first_seen_at, day(1));
        assert_eq!(count_rows(&store, "branches"), 1);
    }

    #[test]
    fn test_branch_commit_edges_are_append_only() {
        let store = make_store();
        let repo_id = make_repo(&store, 1);
        let edges = vec![
            BranchCommit {
                branch_name: "main".into(),
                sha: "a".into(),
            },
            BranchCommit {
                branch_name: "feature".into(),
                sha: "a".into(),
            },
        ];
        store.upsert_branch_commits(repo_id, &edges).expect("first");
        store.upsert_branch_commits(repo_id, &edges).expect("second");
        assert_eq!(count_rows(&store, "branch_commits"), 2);
    }

    #[test]
    fn test_users_last_login_wins() {
        let store = make_store();
        store
            .upsert_users(&[GithubUser {
                user_id: 5,
                login: "old-name".into(),
            }])
            .expect("first");
        store
            .upsert_users(&[GithubUser {
                user_id: 5,
                login: "new-name".into(),
            }])
            .expect("second");
        let user = store.get_user(5).expect("get").expect("some");
        assert_eq!(user.login, "new-name");
    }

    #[test]
    fn test_empty_batches_are_noops() {
        let store = make_store();
        store.upsert_users(&[]).expect("users");
        store.upsert_commits(1, &[]).expect("commits");
        store.upsert_branches(1, &[], day(1)).expect("branches");
        store.upsert_branch_commits(1, &[]).expect("edges");
        store.upsert_pull_requests(1, &[]).expect("prs");
        assert_eq!(count_rows(&store, "repositories"), 0);
    }

    #[test]
    fn test_commit_requires_repository_row() {
        let store = make_store();
        let err = store.upsert_commits(99, &[make_commit("abc", day(1), None)]);
        assert!(err.is_err(), "foreign key on repo_id should be enforced");
        assert_eq!(count_rows(&store, "commits"), 0);
    }

    fn pr_with_head(number: i64, head: RepoRef) -> PullRequest {
        let mut pr = make_pr(number, None);
        pr.head.repo = Some(head);
        pr
    }

    #[test]
    fn test_stub_does_not_overwrite_real_metadata() {
        let store = make_store();
        let repo_id = make_repo(&store, 1);
        store
            .upsert_pull_requests(repo_id, &[pr_with_head(1, RepoRef::bare(1))])
            .expect("upsert prs");
        let repo = store.get_repository(1).expect("get").expect("some");
        assert_eq!(repo.owner, "octo");
        assert_eq!(repo.name, "hello");
        assert_eq!(repo.default_branch.as_deref(), Some("main"));
    }

    #[test]
    fn test_stub_inserts_placeholders_then_accepts_real_values() {
        let store = make_store();
        let repo_id = make_repo(&store, 1);
        store
            .upsert_pull_requests(repo_id, &[pr_with_head(1, RepoRef::bare(55))])
            .expect("stub");
        let repo = store.get_repository(55).expect("get").expect("some");
        assert_eq!(repo.owner, "unknown");
        assert_eq!(repo.name, "repo_55");
        assert!(repo.default_branch.is_none());

        let named = RepoRef {
            repo_id: 55,
            owner: Some("forker".into()),
            name: Some("hello-fork".into()),
        };
        store
            .upsert_pull_requests(repo_id, &[pr_with_head(2, named)])
            .expect("real ref");
        let repo = store.get_repository(55).expect("get").expect("some");
        assert_eq!(repo.owner, "forker");
        assert_eq!(repo.name, "hello-fork");

        store
            .upsert_pull_requests(repo_id, &[pr_with_head(3, RepoRef::bare(55))])
            .expect("bare ref again");
        let repo = store.get_repository(55).expect("get").expect("some");
        assert_eq!(repo.owner, "forker");
        assert_eq!(repo.name, "hello-fork");
    }

    #[test]
    fn test_pull_request_backfills_fork_repository() {
        let store = make_store();
        let repo_id = make_repo(&store, 1);
        let mut pr = make_pr(3, Some(11));
        pr.head.repo = Some(RepoRef {
            repo_id: 200,
            owner: Some("forker".into()),
            name: Some("hello".into()),
        });
        pr.base.repo = Some(RepoRef {
            repo_id: 1,
            owner: None,
            name: None,
        });
        store.upsert_pull_requests(repo_id, &[pr]).expect("upsert prs");

        let fork = store.get_repository(200).expect("get").expect("fork stub");
        assert_eq!(fork.owner, "forker");
        let own = store.get_repository(1).expect("get").expect("own");
        assert_eq!(own.owner, "octo");
        assert_eq!(own.name, "hello");

        let row = store.get_pull_request(repo_id, 3).expect("get").expect("pr");
        assert_eq!(row.head_repo_id, 200);
        assert_eq!(row.base_repo_id, 1);
        assert_eq!(row.head_ref.as_deref(), Some("feature"));
    }

    #[test]
    fn test_pull_request_merge_rules() {
        let store = make_store();
        let repo_id = make_repo(&store, 1);
        store
            .upsert_pull_requests(repo_id, &[make_pr(8, Some(11))])
            .expect("first");

        let mut later = make_pr(8, None);
        later.state = "closed".into();
        later.merged_at = Some(day(6));
        later.created_at = day(5);
        later.head.ref_name = Some("feature-2".into());
        store.upsert_pull_requests(repo_id, &[later]).expect("second");

        let row = store.get_pull_request(repo_id, 8).expect("get").expect("pr");
        assert_eq!(row.author_user_id, Some(11));
        assert_eq!(row.state, "closed");
        assert_eq!(row.merged_at, Some(day(6)));
        assert_eq!(row.created_at, day(1));
        assert_eq!(row.head_ref.as_deref(), Some("feature-2"));
        assert_eq!(count_rows(&store, "pull_requests"), 1);
    }

    #[test]
    fn test_repo_stats_counts() {
        let store = make_store();
        let repo_id = make_repo(&store, 1);
        store
            .upsert_commits(
                repo_id,
                &[make_commit("a", day(1), None), make_commit("b", day(2), None)],
            )
            .expect("commits");
        store
            .upsert_branches(repo_id, &[Branch { name: "main".into() }], day(1))
            .expect("branches");
        store
            .upsert_pull_requests(repo_id, &[make_pr(1, None)])
            .expect("prs");

        let stats = store.repo_stats(repo_id).expect("stats");
        assert_eq!(stats.commit_count, 2);
        assert_eq!(stats.branch_count, 1);
        assert_eq!(stats.branch_commit_count, 0);
        assert_eq!(stats.pull_request_count, 1);
        assert_eq!(stats.watermark, Some(day(2)));

        assert!(matches!(
            store.repo_stats(404),
            Err(MirrorError::NotFound(_))
        ));
    }

    #[test]
    fn test_open_on_disk_persists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("mirror.sqlite3");
        {
            let store = SqliteStore::open(&path).expect("open");
            make_repo(&store, 1);
        }
        let store = SqliteStore::open(&path).expect("reopen");
        assert_eq!(store.list_repositories().expect("list").len(), 1);
    }

    #[test]
    fn test_db_path_from_url() {
        assert_eq!(
            db_path_from_url("sqlite:///var/lib/mirror.db").unwrap(),
            PathBuf::from("/var/lib/mirror.db")
        );
        assert_eq!(
            db_path_from_url("sqlite:mirror.db").unwrap(),
            PathBuf::from("mirror.db")
        );
        assert_eq!(
            db_path_from_url("./mirror.db").unwrap(),
            PathBuf::from("./mirror.db")
        );
        assert!(matches!(
            db_path_from_url("postgres://localhost/db"),
            Err(MirrorError::Config(_))
        ));
        assert!(db_path_from_url("sqlite://").is_err());
    }
}
