//! GitHub `contents` API backend for [`ContentStore`].
//!
//! Every file of every published site lives in a single repository, under
//! one folder per namespace. Requests go to
//! `{api_url}/repos/{owner}/{repo}/contents/{path}`:
//!
//! | Operation | Method | Body |
//! |-----------|--------|------|
//! | [`get`](ContentStore::get) | `GET` | none |
//! | [`put`](ContentStore::put) | `PUT` | `{ message, content, sha? }` |
//! | [`delete`](ContentStore::delete) | `DELETE` | `{ message, sha }` |
//! | [`list`](ContentStore::list) | `GET` | none |
//!
//! File content is sent base64-encoded. The token is read once when the
//! store is built and attached to every request as a bearer credential.
//!
//! # Retry Strategy
//!
//! With `publish.max_retries > 0`, HTTP 429, 5xx, and connection errors are
//! retried with exponential backoff (500ms, 1s, 2s, ... capped at 16s).
//! Timeouts and other 4xx responses are never retried.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use reqwest::{Method, StatusCode, Url};

use super::{ContentStore, DirEntry, PutOutcome, RemoteFile, StoreError};
use crate::config::Config;

const BACKOFF_BASE: Duration = Duration::from_millis(500);
const API_VERSION: &str = "2022-11-28";

/// Client for one `owner/repo` pair.
pub struct GithubStore {
    client: reqwest::Client,
    api_url: Url,
    owner: String,
    repo: String,
    token: String,
    max_retries: u32,
}

impl GithubStore {
    pub fn new(config: &Config, token: String) -> Result<Self, StoreError> {
        let api_url = Url::parse(&config.github.api_url)
            .map_err(|e| StoreError::InvalidApiUrl(format!("{}: {}", config.github.api_url, e)))?;
        if api_url.cannot_be_a_base() {
            return Err(StoreError::InvalidApiUrl(config.github.api_url.clone()));
        }

        let client = reqwest::Client::builder()
            .timeout(config.publish.timeout())
            .user_agent(concat!("page-relay/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            api_url,
            owner: config.github.owner.clone(),
            repo: config.github.repo.clone(),
            token,
            max_retries: config.publish.max_retries,
        })
    }

    /// Build a store with the token taken from `github.token_env`.
    pub fn from_env(config: &Config) -> anyhow::Result<Self> {
        let token = std::env::var(&config.github.token_env).with_context(|| {
            format!(
                "{} environment variable not set",
                config.github.token_env
            )
        })?;
        Ok(Self::new(config, token)?)
    }

    fn contents_url(&self, path: &str) -> Result<Url, StoreError> {
        let mut url = self.api_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| StoreError::InvalidApiUrl(self.api_url.to_string()))?;
            segments
                .pop_if_empty()
                .extend(["repos", self.owner.as_str(), self.repo.as_str(), "contents"]);
            let mut parts = path.split('/').filter(|s| !s.is_empty()).peekable();
            if parts.peek().is_none() {
                segments.push("");
            } else {
                segments.extend(parts);
            }
        }
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response, StoreError> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = BACKOFF_BASE * (1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut req = self
                .client
                .request(method.clone(), url.clone())
                .bearer_auth(&self.token)
                .header("Accept", "application/vnd.github+json")
                .header("X-GitHub-Api-Version", API_VERSION);
            if let Some(body) = body {
                req = req.json(body);
            }

            let err = match req.send().await {
                Ok(resp) if resp.status().is_success() || resp.status() == StatusCode::NOT_FOUND => {
                    return Ok(resp)
                }
                Ok(resp) => status_error(resp).await,
                Err(e) => StoreError::Http(e),
            };

            if !err.is_transient() {
                return Err(err);
            }
            tracing::debug!(%url, attempt, error = %err, "transient store error");
            last_err = Some(err);
        }

        Err(last_err.unwrap_or_else(|| StoreError::Decode("no attempt made".to_string())))
    }
}

async fn status_error(resp: reqwest::Response) -> StoreError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    StoreError::Status {
        status,
        body: body.chars().take(500).collect(),
    }
}

#[async_trait]
impl ContentStore for GithubStore {
    async fn get(&self, path: &str) -> Result<Option<RemoteFile>, StoreError> {
        let url = self.contents_url(path)?;
        let resp = self.send(Method::GET, url, None).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let json: serde_json::Value = resp.json().await?;
        if json.is_array() {
            return Err(StoreError::Decode(format!("{} is a directory", path)));
        }
        let file = serde_json::from_value(json).map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(Some(file))
    }

    async fn put(
        &self,
        path: &str,
        content: &[u8],
        message: &str,
        sha: Option<&str>,
    ) -> Result<PutOutcome, StoreError> {
        let url = self.contents_url(path)?;
        let mut body = serde_json::json!({
            "message": message,
            "content": base64::engine::general_purpose::STANDARD.encode(content),
        });
        if let Some(sha) = sha {
            body["sha"] = serde_json::Value::String(sha.to_string());
        }

        let resp = self.send(Method::PUT, url, Some(&body)).await?;
        match resp.status() {
            StatusCode::CREATED => Ok(PutOutcome::Created),
            StatusCode::NOT_FOUND => Err(status_error(resp).await),
            _ => Ok(PutOutcome::Updated),
        }
    }

    async fn delete(&self, path: &str, message: &str, sha: &str) -> Result<(), StoreError> {
        let url = self.contents_url(path)?;
        let body = serde_json::json!({
            "message": message,
            "sha": sha,
        });

        let resp = self.send(Method::DELETE, url, Some(&body)).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(status_error(resp).await);
        }
        Ok(())
    }

    async fn list(&self, dir: &str) -> Result<Vec<DirEntry>, StoreError> {
        let url = self.contents_url(dir)?;
        let resp = self.send(Method::GET, url, None).await?;
        // An empty repository answers 404 for its root.
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }

        let json: serde_json::Value = resp.json().await?;
        if !json.is_array() {
            return Err(StoreError::Decode(format!("{} is not a directory", dir)));
        }
        serde_json::from_value(json).map_err(|e| StoreError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(api_url: &str) -> GithubStore {
        let mut config = Config::new("octocat", "hosting");
        config.github.api_url = api_url.to_string();
        GithubStore::new(&config, "t0ken".to_string()).unwrap()
    }

    #[test]
    fn contents_url_for_nested_path() {
        let s = store("https://api.github.com");
        let url = s.contents_url("user_42/css/site.css").unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.github.com/repos/octocat/hosting/contents/user_42/css/site.css"
        );
    }

    #[test]
    fn contents_url_for_root_keeps_trailing_slash() {
        let s = store("https://api.github.com");
        let url = s.contents_url("").unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.github.com/repos/octocat/hosting/contents/"
        );
    }

    #[test]
    fn contents_url_keeps_enterprise_prefix_and_encodes() {
        let s = store("https://ghe.example.com/api/v3/");
        let url = s.contents_url("user_1/my page.html").unwrap();
        assert_eq!(
            url.as_str(),
            "https://ghe.example.com/api/v3/repos/octocat/hosting/contents/user_1/my%20page.html"
        );
    }

    #[test]
    fn unusable_api_url_rejected() {
        let mut config = Config::new("octocat", "hosting");
        config.github.api_url = "mailto:octocat@example.com".to_string();
        let err = GithubStore::new(&config, "t0ken".to_string()).err().unwrap();
        assert!(matches!(err, StoreError::InvalidApiUrl(_)));
    }

    #[test]
    fn from_env_requires_token() {
        let mut config = Config::new("octocat", "hosting");
        config.github.token_env = "PAGE_RELAY_TEST_TOKEN_THAT_IS_NOT_SET".to_string();
        let err = GithubStore::from_env(&config).err().unwrap();
        assert!(err.to_string().contains("PAGE_RELAY_TEST_TOKEN_THAT_IS_NOT_SET"));
    }
}
