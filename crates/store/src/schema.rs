/// All DDL for the repomirror SQLite schema.
/// Run in order; all statements are idempotent (IF NOT EXISTS).
/// Timestamps are INTEGER unix seconds, UTC.
pub const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode=WAL;
PRAGMA foreign_keys=ON;

CREATE TABLE IF NOT EXISTS repositories (
    repo_id        INTEGER PRIMARY KEY,
    owner          TEXT NOT NULL,
    name           TEXT NOT NULL,
    default_branch TEXT
);

CREATE TABLE IF NOT EXISTS github_users (
    user_id INTEGER PRIMARY KEY,
    login   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS branches (
    repo_id       INTEGER NOT NULL REFERENCES repositories (repo_id),
    name          TEXT NOT NULL,
    first_seen_at INTEGER NOT NULL,
    PRIMARY KEY (repo_id, name)
);

CREATE TABLE IF NOT EXISTS commits (
    repo_id        INTEGER NOT NULL REFERENCES repositories (repo_id),
    sha            TEXT NOT NULL,
    committed_at   INTEGER NOT NULL,
    author_user_id INTEGER,
    PRIMARY KEY (repo_id, sha)
);

CREATE INDEX IF NOT EXISTS idx_commits_repo_committed_at
    ON commits (repo_id, committed_at);

CREATE TABLE IF NOT EXISTS branch_commits (
    repo_id     INTEGER NOT NULL REFERENCES repositories (repo_id),
    branch_name TEXT NOT NULL,
    sha         TEXT NOT NULL,
    PRIMARY KEY (repo_id, branch_name, sha)
);

CREATE TABLE IF NOT EXISTS pull_requests (
    repo_id        INTEGER NOT NULL REFERENCES repositories (repo_id),
    pr_number      INTEGER NOT NULL,
    pr_id          INTEGER NOT NULL,
    author_user_id INTEGER,
    state          TEXT NOT NULL,
    created_at     INTEGER NOT NULL,
    merged_at      INTEGER,
    head_repo_id   INTEGER NOT NULL REFERENCES repositories (repo_id),
    head_ref       TEXT,
    base_repo_id   INTEGER NOT NULL REFERENCES repositories (repo_id),
    base_ref       TEXT,
    PRIMARY KEY (repo_id, pr_number)
);
"#;
