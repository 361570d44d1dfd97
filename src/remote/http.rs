//! reqwest-backed implementations of the hosted-service traits.

use async_trait::async_trait;
use std::collections::HashMap;

use super::{HttpFetch, RemoteError, RemoteIndex, RepoStatus};
use crate::util::retry::{retry_with_backoff, RetryOptions};

/// Default host suffixes known to serve the batched status API.
const DEFAULT_BATCHED_HOST_SUFFIXES: [&str; 1] = [".googlesource.com"];

/// HTTP client for status queries and hook downloads.
pub struct HttpClient {
    client: reqwest::Client,
    retry: RetryOptions,
    batched_host_suffixes: Vec<String>,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            retry: RetryOptions::default(),
            batched_host_suffixes: DEFAULT_BATCHED_HOST_SUFFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Replace the set of host suffixes treated as batched-API capable.
    pub fn with_batched_hosts(mut self, suffixes: Vec<String>) -> Self {
        self.batched_host_suffixes = suffixes;
        self
    }

    fn base_url(host: &str) -> String {
        if host.contains("://") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", host)
        }
    }
}

#[async_trait]
impl RemoteIndex for HttpClient {
    fn supports(&self, host: &str) -> bool {
        let authority = host.rsplit("://").next().unwrap_or(host);
        let authority = authority.split('/').next().unwrap_or(authority);
        let name = match authority.rsplit_once(':') {
            Some((h, port)) if port.chars().all(|c| c.is_ascii_digit()) => h,
            _ => authority,
        };
        self.batched_host_suffixes
            .iter()
            .any(|suffix| name.ends_with(suffix.as_str()) || name == suffix.trim_start_matches('.'))
    }

    async fn get_repo_statuses(
        &self,
        host: &str,
        branches: &[String],
    ) -> Result<HashMap<String, RepoStatus>, RemoteError> {
        if !self.supports(host) {
            return Err(RemoteError::Unsupported(host.to_string()));
        }

        let mut url = format!("{}/repo-statuses?format=JSON", Self::base_url(host));
        for branch in branches {
            url.push_str("&b=");
            url.push_str(branch);
        }

        let client = &self.client;
        let response = retry_with_backoff(&self.retry, || async {
            let resp = client
                .get(&url)
                .send()
                .await
                .map_err(|e| RemoteError::Http(e.to_string()))?;
            if !resp.status().is_success() {
                return Err(RemoteError::Api(format!(
                    "{} returned HTTP {}",
                    host,
                    resp.status()
                )));
            }
            resp.bytes()
                .await
                .map_err(|e| RemoteError::Http(e.to_string()))
        })
        .await?;

        serde_json::from_slice(&response).map_err(|e| RemoteError::Parse(e.to_string()))
    }
}

#[async_trait]
impl HttpFetch for HttpClient {
    async fn get(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        let client = &self.client;
        let bytes = retry_with_backoff(&self.retry, || async {
            let resp = client
                .get(url)
                .send()
                .await
                .map_err(|e| RemoteError::Http(e.to_string()))?;
            if !resp.status().is_success() {
                return Err(RemoteError::Api(format!(
                    "{} returned HTTP {}",
                    url,
                    resp.status()
                )));
            }
            resp.bytes()
                .await
                .map_err(|e| RemoteError::Http(e.to_string()))
        })
        .await?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_supports_matches_suffixes() {
        let client = HttpClient::new();
        assert!(client.supports("fuchsia.googlesource.com"));
        assert!(!client.supports("github.com"));

        let client =
            HttpClient::new().with_batched_hosts(vec![".example.com".to_string()]);
        assert!(client.supports("git.example.com"));
        assert!(!client.supports("git.example.org"));
    }

    #[tokio::test]
    async fn test_get_repo_statuses_parses_payload() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "app": { "branches": { "master": "abc123" } },
            "lib": { "branches": { "master": "def456", "release": "aa11" } },
        });
        Mock::given(method("GET"))
            .and(path("/repo-statuses"))
            .and(query_param("b", "master"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&body))
            .mount(&server)
            .await;

        let client = HttpClient::new().with_batched_hosts(vec!["127.0.0.1".to_string()]);
        let statuses = client
            .get_repo_statuses(&server.uri(), &["master".to_string()])
            .await
            .unwrap();

        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses["app"].branches["master"], "abc123");
        assert_eq!(statuses["lib"].branches["release"], "aa11");
    }

    #[tokio::test]
    async fn test_unsupported_host_is_an_error() {
        let client = HttpClient::new();
        let err = client
            .get_repo_statuses("github.com", &["master".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_http_fetch_downloads_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tools/hooks/commit-msg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"#!/bin/sh\n".to_vec()))
            .mount(&server)
            .await;

        let client = HttpClient::new();
        let bytes = client
            .get(&format!("{}/tools/hooks/commit-msg", server.uri()))
            .await
            .unwrap();
        assert_eq!(bytes, b"#!/bin/sh\n");
    }

    #[tokio::test]
    async fn test_http_fetch_failure_surfaces_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = HttpClient::new();
        let err = client
            .get(&format!("{}/missing", server.uri()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("404"));
    }
}
