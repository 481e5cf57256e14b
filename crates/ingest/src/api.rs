use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use repomirror_types::{GetRequest, HttpClient, MirrorError, Result};

pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const USER_AGENT: &str = "repomirror";

/// Access token for the source API.
#[derive(Clone)]
pub struct Credentials {
    token: String,
}

impl Credentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn headers(&self) -> Vec<(String, String)> {
        vec![
            ("Authorization".into(), format!("Bearer {}", self.token)),
            ("Accept".into(), "application/vnd.github+json".into()),
            ("User-Agent".into(), USER_AGENT.into()),
        ]
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials").field("token", &"<redacted>").finish()
    }
}

/// Authenticated access to one API host.
pub struct GitHubApi {
    base_url: String,
    credentials: Credentials,
    http: Arc<dyn HttpClient>,
}

impl GitHubApi {
    pub fn new(base_url: impl Into<String>, credentials: Credentials, http: Arc<dyn HttpClient>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            http,
        }
    }

    /// GET `path` (relative to the API root) with the given query pairs.
    pub async fn get(&self, path: &str, query: Vec<(String, String)>) -> Result<Value> {
        let request = GetRequest {
            url: format!("{}{}", self.base_url, path),
            headers: self.credentials.headers(),
            query,
        };
        tracing::debug!(url = %request.url, query = ?request.query, "GET");
        self.http.get(&request).await
    }
}

// ── reqwest transport ─────────────────────────────────────────────────────

pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Every request, body included, must finish within `timeout`.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MirrorError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

fn classify(e: reqwest::Error) -> MirrorError {
    if e.is_decode() {
        MirrorError::Decode(e.to_string())
    } else {
        MirrorError::Transport(e.to_string())
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, request: &GetRequest) -> Result<Value> {
        let mut builder = self.client.get(&request.url).query(&request.query);
        for (k, v) in &request.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }

        let resp = builder.send().await.map_err(classify)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(MirrorError::Http {
                status: status.as_u16(),
                url: request.url.clone(),
            });
        }
        resp.json::<Value>().await.map_err(classify)
    }
}
