//! In-memory stand-in for the GitHub REST API, for tests.
//!
//! Serves one repository. Honors `per_page`/`page`, the `sha` branch selector
//! and the inclusive `since` filter on `/commits`, and serves `/pulls` sorted
//! by `updated_at` descending. No sockets are opened.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

use repomirror_types::{GetRequest, HttpClient, MirrorError, Result};

use crate::wire::parse_timestamp;

#[derive(Debug, Clone)]
struct FakeCommit {
    sha: String,
    date: DateTime<Utc>,
    author: Option<(i64, String)>,
}

impl FakeCommit {
    fn to_json(&self) -> Value {
        let date = self.date.to_rfc3339_opts(SecondsFormat::Secs, true);
        json!({
            "sha": self.sha,
            "commit": {
                "author": {"date": date},
                "committer": {"date": date},
            },
            "author": self.author.as_ref().map(|(id, login)| json!({"id": id, "login": login})),
        })
    }
}

#[derive(Default)]
struct FakeState {
    contributors: Vec<Value>,
    branches: BTreeMap<String, Vec<FakeCommit>>,
    pulls: Vec<Value>,
    raw_pages: HashMap<String, Vec<Vec<Value>>>,
    failures: HashMap<String, usize>,
    requests: Vec<GetRequest>,
}

pub struct FakeGitHub {
    owner: String,
    name: String,
    repo_id: i64,
    default_branch: String,
    state: Mutex<FakeState>,
}

impl FakeGitHub {
    pub const BASE_URL: &'static str = "http://github.fake";

    pub fn new(owner: &str, name: &str, repo_id: i64, default_branch: &str) -> Self {
        let mut state = FakeState::default();
        state.branches.insert(default_branch.to_string(), Vec::new());
        Self {
            owner: owner.to_string(),
            name: name.to_string(),
            repo_id,
            default_branch: default_branch.to_string(),
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake github lock should not be poisoned")
    }

    fn repo_path(&self) -> String {
        format!("/repos/{}/{}", self.owner, self.name)
    }

    pub fn add_contributor(&self, id: i64, login: &str) {
        self.state()
            .contributors
            .push(json!({"id": id, "login": login, "type": "User"}));
    }

    pub fn add_branch(&self, name: &str) {
        self.state().branches.entry(name.to_string()).or_default();
    }

    /// Add a commit reachable from each of `branches`.
    pub fn add_commit(
        &self,
        branches: &[&str],
        sha: &str,
        date: DateTime<Utc>,
        author: Option<(i64, &str)>,
    ) {
        let commit = FakeCommit {
            sha: sha.to_string(),
            date,
            author: author.map(|(id, login)| (id, login.to_string())),
        };
        let mut state = self.state();
        for b in branches {
            state
                .branches
                .entry(b.to_string())
                .or_default()
                .push(commit.clone());
        }
    }

    /// Insert or replace (by `number`) a pull request payload.
    pub fn put_pull(&self, pull: Value) {
        let mut state = self.state();
        let number = pull["number"].clone();
        state.pulls.retain(|p| p["number"] != number);
        state.pulls.push(pull);
    }

    /// Serve `path` from fixed pages instead of the simulated data.
    /// Pages past the end are empty.
    pub fn set_pages(&self, path: &str, pages: Vec<Vec<Value>>) {
        self.state().raw_pages.insert(path.to_string(), pages);
    }

    /// Answer the next `times` requests for `path` with a 502.
    pub fn fail_next(&self, path: &str, times: usize) {
        self.state().failures.insert(path.to_string(), times);
    }

    pub fn requests(&self) -> Vec<GetRequest> {
        self.state().requests.clone()
    }

    pub fn requests_for(&self, path: &str) -> Vec<GetRequest> {
        let url = format!("{}{}", Self::BASE_URL, path);
        self.requests().into_iter().filter(|r| r.url == url).collect()
    }

    pub fn clear_requests(&self) {
        self.state().requests.clear();
    }

    fn serve(&self, state: &FakeState, path: &str, query: &HashMap<String, String>) -> Option<Value> {
        if let Some(pages) = state.raw_pages.get(path) {
            let page = page_number(query);
            return Some(Value::Array(
                pages.get(page.saturating_sub(1)).cloned().unwrap_or_default(),
            ));
        }

        let base = self.repo_path();
        if path == base {
            return Some(json!({
                "id": self.repo_id,
                "name": self.name,
                "owner": {"login": self.owner},
                "default_branch": self.default_branch,
            }));
        }

        let endpoint = path.strip_prefix(&base)?.strip_prefix('/')?;
        let items: Vec<Value> = match endpoint {
            "contributors" => state.contributors.clone(),
            "branches" => state
                .branches
                .iter()
                .map(|(name, commits)| {
                    let head = commits.iter().max_by_key(|c| c.date).map(|c| c.sha.clone());
                    json!({"name": name, "commit": {"sha": head}})
                })
                .collect(),
            "commits" => {
                let branch = query
                    .get("sha")
                    .cloned()
                    .unwrap_or_else(|| self.default_branch.clone());
                let since = query.get("since").and_then(|s| parse_timestamp(s));
                let mut commits: Vec<&FakeCommit> = state
                    .branches
                    .get(&branch)?
                    .iter()
                    .filter(|c| since.map_or(true, |s| c.date >= s))
                    .collect();
                commits.sort_by(|a, b| b.date.cmp(&a.date));
                commits.into_iter().map(FakeCommit::to_json).collect()
            }
            "pulls" => {
                let mut pulls = state.pulls.clone();
                pulls.sort_by_key(|p| {
                    std::cmp::Reverse(p["updated_at"].as_str().and_then(parse_timestamp))
                });
                pulls
            }
            _ => return None,
        };
        Some(Value::Array(paginate(items, query)))
    }
}

fn page_number(query: &HashMap<String, String>) -> usize {
    query.get("page").and_then(|p| p.parse().ok()).unwrap_or(1)
}

fn paginate(items: Vec<Value>, query: &HashMap<String, String>) -> Vec<Value> {
    let per_page: usize = query
        .get("per_page")
        .and_then(|p| p.parse().ok())
        .unwrap_or(30);
    let page = page_number(query).max(1);
    items
        .into_iter()
        .skip((page - 1) * per_page)
        .take(per_page)
        .collect()
}

#[async_trait]
impl HttpClient for FakeGitHub {
    async fn get(&self, request: &GetRequest) -> Result<Value> {
        let mut state = self.state();
        state.requests.push(request.clone());

        let path = request
            .url
            .strip_prefix(Self::BASE_URL)
            .unwrap_or(&request.url)
            .to_string();

        if let Some(remaining) = state.failures.get_mut(&path) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(MirrorError::Http {
                    status: 502,
                    url: request.url.clone(),
                });
            }
        }

        let query: HashMap<String, String> = request.query.iter().cloned().collect();
        self.serve(&state, &path, &query).ok_or_else(|| MirrorError::Http {
            status: 404,
            url: request.url.clone(),
        })
    }
}
