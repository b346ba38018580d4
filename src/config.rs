//! TOML configuration.
//!
//! Every section is optional; a missing file or an empty file yields the
//! defaults below, which point at the public Mozilla pushlog and coverage
//! backend.
//!
//! ```toml
//! [repo]
//! name = "mozilla-central"
//! hg_base_url = "https://hg.mozilla.org"
//! push_count = 10
//!
//! [coverage]
//! backend_url = "https://uplift.shipit.staging.mozilla-releng.net"
//!
//! [cache]
//! path = "./data/pushcov.sqlite"
//! ttl_secs = 86400
//!
//! [polling]
//! interval_ms = 30000
//! hide_csets_with_no_coverage = true
//!
//! [filter]
//! bot_authors = ["ffxbld"]
//! bug_url_template = "http://bugzilla.mozilla.org/show_bug.cgi?id={id}"
//!
//! [server]
//! bind = "127.0.0.1:7332"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub repo: RepoConfig,
    #[serde(default)]
    pub coverage: CoverageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RepoConfig {
    #[serde(default = "default_repo_name")]
    pub name: String,
    #[serde(default = "default_hg_base_url")]
    pub hg_base_url: String,
    /// Number of most recent pushes requested from the pushlog.
    #[serde(default = "default_push_count")]
    pub push_count: u64,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            name: default_repo_name(),
            hg_base_url: default_hg_base_url(),
            push_count: default_push_count(),
            timeout_secs: None,
        }
    }
}

fn default_repo_name() -> String {
    "mozilla-central".to_string()
}
fn default_hg_base_url() -> String {
    "https://hg.mozilla.org".to_string()
}
fn default_push_count() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct CoverageConfig {
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            timeout_secs: None,
        }
    }
}

fn default_backend_url() -> String {
    "https://uplift.shipit.staging.mozilla-releng.net".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("./data/pushcov.sqlite")
}
fn default_ttl_secs() -> u64 {
    86_400
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_hide")]
    pub hide_csets_with_no_coverage: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            hide_csets_with_no_coverage: default_hide(),
        }
    }
}

fn default_interval_ms() -> u64 {
    30_000
}
fn default_hide() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilterConfig {
    /// Author substrings identifying automated pushers.
    #[serde(default = "default_bot_authors")]
    pub bot_authors: Vec<String>,
    #[serde(default = "default_bug_url_template")]
    pub bug_url_template: String,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            bot_authors: default_bot_authors(),
            bug_url_template: default_bug_url_template(),
        }
    }
}

fn default_bot_authors() -> Vec<String> {
    vec!["ffxbld".to_string()]
}
fn default_bug_url_template() -> String {
    "http://bugzilla.mozilla.org/show_bug.cgi?id={id}".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7332".to_string()
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Load and validate a config file. A missing file yields [`Config::default`].
pub fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        parse_config(&content)?
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Config::default()
    };
    validate(&config)?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

fn validate(config: &Config) -> Result<()> {
    if config.repo.name.trim().is_empty() {
        anyhow::bail!("repo.name must not be empty");
    }
    if config.repo.push_count == 0 {
        anyhow::bail!("repo.push_count must be > 0");
    }
    if config.polling.interval_ms == 0 {
        anyhow::bail!("polling.interval_ms must be > 0");
    }
    if config.cache.ttl_secs == 0 {
        anyhow::bail!("cache.ttl_secs must be > 0");
    }
    if !config.filter.bug_url_template.contains("{id}") {
        anyhow::bail!(
            "filter.bug_url_template must contain '{{id}}': '{}'",
            config.filter.bug_url_template
        );
    }
    Ok(())
}
