use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub github: GithubConfig,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub access: AccessConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GithubConfig {
    pub owner: String,
    pub repo: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Name of the environment variable holding the API token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// Overrides the `https://{owner}.github.io/{repo}` site base.
    #[serde(default)]
    pub pages_url: Option<String>,
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

impl GithubConfig {
    /// Base URL under which every namespace folder is served.
    pub fn pages_base(&self) -> String {
        match &self.pages_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{}.github.io/{}", self.owner, self.repo),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PublishConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub max_retries: u32,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeout_secs: default_timeout_secs(),
            max_retries: 0,
        }
    }
}

impl PublishConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_concurrency() -> usize {
    4
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArchiveConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_max_total_bytes")]
    pub max_total_bytes: u64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            max_total_bytes: default_max_total_bytes(),
        }
    }
}

fn default_max_entries() -> usize {
    1000
}
fn default_max_total_bytes() -> u64 {
    50 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AccessConfig {
    #[serde(default)]
    pub owner_only: bool,
    #[serde(default)]
    pub owner_id: Option<i64>,
}

impl Config {
    /// Config with every optional section at its default.
    pub fn new(owner: &str, repo: &str) -> Self {
        Self {
            github: GithubConfig {
                owner: owner.to_string(),
                repo: repo.to_string(),
                api_url: default_api_url(),
                token_env: default_token_env(),
                pages_url: None,
            },
            publish: PublishConfig::default(),
            archive: ArchiveConfig::default(),
            access: AccessConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.github.owner.trim().is_empty() {
        anyhow::bail!("github.owner must not be empty");
    }
    if config.github.repo.trim().is_empty() {
        anyhow::bail!("github.repo must not be empty");
    }
    if config.github.token_env.trim().is_empty() {
        anyhow::bail!("github.token_env must not be empty");
    }
    let api_url = reqwest::Url::parse(&config.github.api_url)
        .with_context(|| format!("github.api_url is not a valid URL: {}", config.github.api_url))?;
    if !matches!(api_url.scheme(), "http" | "https") || api_url.cannot_be_a_base() {
        anyhow::bail!("github.api_url must be an http(s) URL, got {}", config.github.api_url);
    }

    if config.publish.concurrency == 0 {
        anyhow::bail!("publish.concurrency must be >= 1");
    }
    if config.publish.timeout_secs == 0 {
        anyhow::bail!("publish.timeout_secs must be >= 1");
    }

    if config.archive.max_entries == 0 {
        anyhow::bail!("archive.max_entries must be >= 1");
    }
    if config.archive.max_total_bytes == 0 {
        anyhow::bail!("archive.max_total_bytes must be > 0");
    }

    if config.access.owner_only && config.access.owner_id.is_none() {
        anyhow::bail!("access.owner_id must be set when access.owner_only = true");
    }

    Ok(config)
}
