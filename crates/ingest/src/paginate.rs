//! Lazy page walker over list endpoints.
//!
//! Pages are requested with `per_page=100&page=N` starting at 1. The walk ends
//! at the first empty page; no total-count header is consulted. Callers that
//! need a ceiling stop pulling items rather than telling the walker to stop.

use std::collections::VecDeque;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;

use repomirror_types::{MirrorError, Result};

use crate::api::GitHubApi;

pub const PAGE_SIZE: u32 = 100;

/// Filter parameters for one list request, before pagination fields are added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListParams {
    pub sha: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub state: Option<String>,
    pub sort: Option<String>,
    pub direction: Option<String>,
}

impl ListParams {
    pub fn since(mut self, since: Option<DateTime<Utc>>) -> Self {
        self.since = since;
        self
    }

    pub fn branch(mut self, name: impl Into<String>) -> Self {
        self.sha = Some(name.into());
        self
    }

    /// `state=all&sort=updated&direction=desc`
    pub fn all_by_recent_update(mut self) -> Self {
        self.state = Some("all".into());
        self.sort = Some("updated".into());
        self.direction = Some("desc".into());
        self
    }

    /// Filter fields followed by the pagination fields for `page`.
    pub fn to_query(&self, page: u32) -> Vec<(String, String)> {
        let mut query = Vec::new();
        if let Some(sha) = &self.sha {
            query.push(("sha".to_string(), sha.clone()));
        }
        if let Some(since) = &self.since {
            query.push((
                "since".to_string(),
                since.to_rfc3339_opts(SecondsFormat::Secs, true),
            ));
        }
        if let Some(state) = &self.state {
            query.push(("state".to_string(), state.clone()));
        }
        if let Some(sort) = &self.sort {
            query.push(("sort".to_string(), sort.clone()));
        }
        if let Some(direction) = &self.direction {
            query.push(("direction".to_string(), direction.clone()));
        }
        query.push(("per_page".to_string(), PAGE_SIZE.to_string()));
        query.push(("page".to_string(), page.to_string()));
        query
    }
}

pub struct Paginator<'a, T> {
    api: &'a GitHubApi,
    path: String,
    params: ListParams,
    next_page: u32,
    buffer: VecDeque<T>,
    exhausted: bool,
}

impl<'a, T: DeserializeOwned> Paginator<'a, T> {
    pub fn new(api: &'a GitHubApi, path: impl Into<String>, params: ListParams) -> Self {
        Self {
            api,
            path: path.into(),
            params,
            next_page: 1,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Next item, fetching the next page only once the current one is used up.
    pub async fn next_item(&mut self) -> Result<Option<T>> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Ok(Some(item));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.fetch_page().await?;
        }
    }

    async fn fetch_page(&mut self) -> Result<()> {
        let page = self.next_page;
        let body = self.api.get(&self.path, self.params.to_query(page)).await?;
        let items = match body {
            Value::Array(items) => items,
            other => {
                return Err(MirrorError::Decode(format!(
                    "{} page {}: expected a JSON array, got {}",
                    self.path,
                    page,
                    type_name(&other)
                )))
            }
        };

        if items.is_empty() {
            self.exhausted = true;
            return Ok(());
        }

        let raw_count = items.len();
        for raw in items {
            match serde_json::from_value::<T>(raw) {
                Ok(item) => self.buffer.push_back(item),
                Err(e) => tracing::debug!(path = %self.path, page, error = %e, "dropping undecodable record"),
            }
        }
        tracing::debug!(path = %self.path, page, items = raw_count, "fetched page");
        self.next_page += 1;
        Ok(())
    }

    pub async fn collect_all(mut self) -> Result<Vec<T>> {
        let mut out = Vec::new();
        while let Some(item) = self.next_item().await? {
            out.push(item);
        }
        Ok(out)
    }

    /// At most `cap` items; pages past the cap are never requested.
    pub async fn collect_capped(mut self, cap: usize) -> Result<Vec<T>> {
        let mut out = Vec::new();
        while out.len() < cap {
            match self.next_item().await? {
                Some(item) => out.push(item),
                None => break,
            }
        }
        Ok(out)
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
