pub mod api;
pub mod extract;
pub mod paginate;
pub mod pipeline;
pub mod retry;
mod wire;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use api::{Credentials, GitHubApi, ReqwestClient, DEFAULT_API_URL};
pub use extract::{RepoExtractor, DEFAULT_MAX_BRANCH_COMMITS};
pub use pipeline::{Mirror, SyncOptions};
pub use retry::RetryPolicy;
