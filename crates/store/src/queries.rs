use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Transaction};

use repomirror_types::{
    placeholder_repo_name, Branch, BranchCommit, BranchRow, Commit, CommitRow, GithubUser,
    MirrorError, PullRequest, PullRequestRow, RepoRef, RepoStats, Repository, Result, Store,
    UNKNOWN_OWNER,
};

use crate::SqliteStore;

// ── Helpers ───────────────────────────────────────────────────────────────

fn to_ts(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp()
}

fn from_ts(idx: usize, ts: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ts))
}

fn from_opt_ts(idx: usize, ts: Option<i64>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    ts.map(|t| from_ts(idx, t)).transpose()
}

fn row_to_repository(row: &rusqlite::Row<'_>) -> rusqlite::Result<Repository> {
    Ok(Repository {
        repo_id: row.get(0)?,
        owner: row.get(1)?,
        name: row.get(2)?,
        default_branch: row.get(3)?,
    })
}

fn row_to_pull_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<PullRequestRow> {
    Ok(PullRequestRow {
        repo_id: row.get(0)?,
        pr_number: row.get(1)?,
        pr_id: row.get(2)?,
        author_user_id: row.get(3)?,
        state: row.get(4)?,
        created_at: from_ts(5, row.get(5)?)?,
        merged_at: from_opt_ts(6, row.get(6)?)?,
        head_repo_id: row.get(7)?,
        head_ref: row.get(8)?,
        base_repo_id: row.get(9)?,
        base_ref: row.get(10)?,
    })
}

/// Collapse references to the same repository into one, keeping any
/// owner/name that some reference actually carried.
fn merge_repo_refs<'a>(refs: impl IntoIterator<Item = &'a RepoRef>) -> Vec<RepoRef> {
    let mut merged: BTreeMap<i64, RepoRef> = BTreeMap::new();
    for r in refs {
        merged
            .entry(r.repo_id)
            .and_modify(|existing| {
                if r.owner.is_some() {
                    existing.owner = r.owner.clone();
                }
                if r.name.is_some() {
                    existing.name = r.name.clone();
                }
            })
            .or_insert_with(|| r.clone());
    }
    merged.into_values().collect()
}

/// Minimal repository upsert. Placeholders are only used on insert; on
/// conflict a column changes only when the reference carried a real value.
fn write_repo_stubs(tx: &Transaction<'_>, refs: &[RepoRef]) -> Result<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO repositories (repo_id, owner, name, default_branch)
         VALUES (?1, COALESCE(?2, ?4), COALESCE(?3, ?5), NULL)
         ON CONFLICT (repo_id) DO UPDATE SET
             owner = COALESCE(?2, repositories.owner),
             name = COALESCE(?3, repositories.name)",
    )?;
    for r in refs {
        stmt.execute(params![
            r.repo_id,
            r.owner,
            r.name,
            UNKNOWN_OWNER,
            placeholder_repo_name(r.repo_id),
        ])?;
    }
    Ok(())
}

fn count(conn: &rusqlite::Connection, sql: &str, repo_id: i64) -> Result<usize> {
    let n: i64 = conn.query_row(sql, params![repo_id], |r| r.get(0))?;
    Ok(n as usize)
}

// ── impl Store ────────────────────────────────────────────────────────────

impl Store for SqliteStore {
    // ── Merge-load writes ─────────────────────────────────────────────────

    fn upsert_repository(&self, repo: &Repository) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO repositories (repo_id, owner, name, default_branch)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (repo_id) DO UPDATE SET
                 owner = excluded.owner,
                 name = excluded.name,
                 default_branch = excluded.default_branch",
            params![repo.repo_id, repo.owner, repo.name, repo.default_branch],
        )?;
        Ok(repo.repo_id)
    }

    fn upsert_users(&self, users: &[GithubUser]) -> Result<()> {
        if users.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO github_users (user_id, login) VALUES (?1, ?2)
                 ON CONFLICT (user_id) DO UPDATE SET login = excluded.login",
            )?;
            for u in users {
                stmt.execute(params![u.user_id, u.login])?;
            }
        }
        tx.commit()?;
        tracing::debug!(rows = users.len(), "upserted users");
        Ok(())
    }

    fn upsert_branches(
        &self,
        repo_id: i64,
        branches: &[Branch],
        observed_at: DateTime<Utc>,
    ) -> Result<()> {
        if branches.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            // first_seen_at is written once, never refreshed.
            let mut stmt = tx.prepare(
                "INSERT INTO branches (repo_id, name, first_seen_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (repo_id, name) DO NOTHING",
            )?;
            for b in branches {
                stmt.execute(params![repo_id, b.name, to_ts(&observed_at)])?;
            }
        }
        tx.commit()?;
        tracing::debug!(repo_id, rows = branches.len(), "upserted branches");
        Ok(())
    }

    fn upsert_commits(&self, repo_id: i64, commits: &[Commit]) -> Result<()> {
        if commits.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO commits (repo_id, sha, committed_at, author_user_id)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (repo_id, sha) DO UPDATE SET
                     committed_at = MAX(commits.committed_at, excluded.committed_at),
                     author_user_id = COALESCE(commits.author_user_id, excluded.author_user_id)",
            )?;
            for c in commits {
                stmt.execute(params![repo_id, c.sha, to_ts(&c.committed_at), c.author_id])?;
            }
        }
        tx.commit()?;
        tracing::debug!(repo_id, rows = commits.len(), "upserted commits");
        Ok(())
    }

    fn upsert_branch_commits(&self, repo_id: i64, edges: &[BranchCommit]) -> Result<()> {
        if edges.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO branch_commits (repo_id, branch_name, sha) VALUES (?1, ?2, ?3)
                 ON CONFLICT (repo_id, branch_name, sha) DO NOTHING",
            )?;
            for e in edges {
                stmt.execute(params![repo_id, e.branch_name, e.sha])?;
            }
        }
        tx.commit()?;
        tracing::debug!(repo_id, rows = edges.len(), "upserted branch commits");
        Ok(())
    }

    fn upsert_pull_requests(&self, repo_id: i64, prs: &[PullRequest]) -> Result<()> {
        if prs.is_empty() {
            return Ok(());
        }

        // A pointer without a repository (deleted fork) falls back to our own.
        let own = RepoRef::bare(repo_id);
        let resolve = |r: &Option<RepoRef>| r.clone().unwrap_or_else(|| own.clone());

        let mut referenced = vec![own.clone()];
        for pr in prs {
            referenced.push(resolve(&pr.head.repo));
            referenced.push(resolve(&pr.base.repo));
        }
        let stubs = merge_repo_refs(&referenced);

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        write_repo_stubs(&tx, &stubs)?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO pull_requests
                     (repo_id, pr_number, pr_id, author_user_id, state, created_at, merged_at,
                      head_repo_id, head_ref, base_repo_id, base_ref)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT (repo_id, pr_number) DO UPDATE SET
                     pr_id = excluded.pr_id,
                     author_user_id = COALESCE(excluded.author_user_id, pull_requests.author_user_id),
                     state = excluded.state,
                     merged_at = excluded.merged_at,
                     head_repo_id = excluded.head_repo_id,
                     head_ref = excluded.head_ref,
                     base_repo_id = excluded.base_repo_id,
                     base_ref = excluded.base_ref",
            )?;
            for pr in prs {
                stmt.execute(params![
                    repo_id,
                    pr.number,
                    pr.pr_id,
                    pr.author_id,
                    pr.state,
                    to_ts(&pr.created_at),
                    pr.merged_at.as_ref().map(to_ts),
                    resolve(&pr.head.repo).repo_id,
                    pr.head.ref_name,
                    resolve(&pr.base.repo).repo_id,
                    pr.base.ref_name,
                ])?;
            }
        }
        tx.commit()?;
        tracing::debug!(
            repo_id,
            rows = prs.len(),
            stubs = stubs.len(),
            "upserted pull requests"
        );
        Ok(())
    }

    // ── Watermark ─────────────────────────────────────────────────────────

    fn watermark(&self, repo_id: i64) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let max_ts: Option<i64> = conn.query_row(
            "SELECT MAX(committed_at) FROM commits WHERE repo_id = ?1",
            params![repo_id],
            |r| r.get(0),
        )?;
        Ok(from_opt_ts(0, max_ts)?)
    }

    // ── Reads ─────────────────────────────────────────────────────────────

    fn get_repository(&self, repo_id: i64) -> Result<Option<Repository>> {
        let conn = self.conn()?;
        let result = conn
            .query_row(
                "SELECT repo_id, owner, name, default_branch FROM repositories WHERE repo_id = ?1",
                params![repo_id],
                row_to_repository,
            )
            .optional()?;
        Ok(result)
    }

    fn list_repositories(&self) -> Result<Vec<Repository>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT repo_id, owner, name, default_branch FROM repositories ORDER BY owner, name",
        )?;
        let repos: rusqlite::Result<Vec<Repository>> =
            stmt.query_map([], row_to_repository)?.collect();
        Ok(repos?)
    }

    fn get_user(&self, user_id: i64) -> Result<Option<GithubUser>> {
        let conn = self.conn()?;
        let result = conn
            .query_row(
                "SELECT user_id, login FROM github_users WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(GithubUser {
                        user_id: row.get(0)?,
                        login: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(result)
    }

    fn get_branch(&self, repo_id: i64, name: &str) -> Result<Option<BranchRow>> {
        let conn = self.conn()?;
        let result = conn
            .query_row(
                "SELECT repo_id, name, first_seen_at FROM branches WHERE repo_id = ?1 AND name = ?2",
                params![repo_id, name],
                |row| {
                    Ok(BranchRow {
                        repo_id: row.get(0)?,
                        name: row.get(1)?,
                        first_seen_at: from_ts(2, row.get(2)?)?,
                    })
                },
            )
            .optional()?;
        Ok(result)
    }

    fn get_commit(&self, repo_id: i64, sha: &str) -> Result<Option<CommitRow>> {
        let conn = self.conn()?;
        let result = conn
            .query_row(
                "SELECT repo_id, sha, committed_at, author_user_id
                 FROM commits WHERE repo_id = ?1 AND sha = ?2",
                params![repo_id, sha],
                |row| {
                    Ok(CommitRow {
                        repo_id: row.get(0)?,
                        sha: row.get(1)?,
                        committed_at: from_ts(2, row.get(2)?)?,
                        author_user_id: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(result)
    }

    fn get_pull_request(&self, repo_id: i64, number: i64) -> Result<Option<PullRequestRow>> {
        let conn = self.conn()?;
        let result = conn
            .query_row(
                "SELECT repo_id, pr_number, pr_id, author_user_id, state, created_at, merged_at,
                        head_repo_id, head_ref, base_repo_id, base_ref
                 FROM pull_requests WHERE repo_id = ?1 AND pr_number = ?2",
                params![repo_id, number],
                row_to_pull_request,
            )
            .optional()?;
        Ok(result)
    }

    fn repo_stats(&self, repo_id: i64) -> Result<RepoStats> {
        let repository = self
            .get_repository(repo_id)?
            .ok_or_else(|| MirrorError::NotFound(format!("repository {}", repo_id)))?;
        let watermark = self.watermark(repo_id)?;

        let conn = self.conn()?;
        Ok(RepoStats {
            repository,
            commit_count: count(&conn, "SELECT COUNT(*) FROM commits WHERE repo_id = ?1", repo_id)?,
            branch_count: count(&conn, "SELECT COUNT(*) FROM branches WHERE repo_id = ?1", repo_id)?,
            branch_commit_count: count(
                &conn,
                "SELECT COUNT(*) FROM branch_commits WHERE repo_id = ?1",
                repo_id,
            )?,
            pull_request_count: count(
                &conn,
                "SELECT COUNT(*) FROM pull_requests WHERE repo_id = ?1",
                repo_id,
            )?,
            watermark,
        })
    }
}
