//! Hosted-service layer.
//!
//! Two small seams separate the core from the network: [`RemoteIndex`]
//! answers batched branch-head queries for hosts that support them, and
//! [`HttpFetch`] downloads single resources such as the Gerrit
//! commit-msg hook. Both are traits so tests can answer from memory.

pub mod http;

pub use http::HttpClient;

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur talking to hosted services
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("host does not support batched status queries: {0}")]
    Unsupported(String),

    #[error("failed to parse response: {0}")]
    Parse(String),
}

/// Branch heads of one repository as reported by its host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RepoStatus {
    /// Branch name to revision hash.
    #[serde(default)]
    pub branches: HashMap<String, String>,
}

/// Batched branch-head queries, one request per host.
#[async_trait]
pub trait RemoteIndex: Send + Sync {
    /// Whether `host` exposes the batched status API.
    fn supports(&self, host: &str) -> bool;

    /// Heads of `branches` for every repository on `host`, keyed by
    /// repository name.
    async fn get_repo_statuses(
        &self,
        host: &str,
        branches: &[String],
    ) -> Result<HashMap<String, RepoStatus>, RemoteError>;
}

/// Single-resource HTTP download.
#[async_trait]
pub trait HttpFetch: Send + Sync {
    async fn get(&self, url: &str) -> Result<Vec<u8>, RemoteError>;
}
