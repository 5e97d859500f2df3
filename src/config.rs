use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,
    #[serde(default = "default_user_token_url")]
    pub user_token_url: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default = "default_max_pool")]
    pub max_pool: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    #[serde(default = "default_retry_total")]
    pub total: u32,
    #[serde(default = "default_backoff_factor_secs")]
    pub backoff_factor_secs: f64,
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
    #[serde(default = "default_status_forcelist")]
    pub status_forcelist: Vec<u16>,
}

fn default_api_url() -> String {
    "https://api.twitter.com".into()
}

fn default_authorize_url() -> String {
    "https://twitter.com/i/oauth2/authorize".into()
}

fn default_user_token_url() -> String {
    "https://api.twitter.com/2/oauth2/token".into()
}

fn default_scopes() -> Vec<String> {
    [
        "tweet.read",
        "tweet.write",
        "users.read",
        "like.read",
        "like.write",
        "offline.access",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_max_pool() -> usize {
    10
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_retry_total() -> u32 {
    3
}

fn default_backoff_factor_secs() -> f64 {
    2.0
}

fn default_backoff_max_secs() -> u64 {
    120
}

fn default_status_forcelist() -> Vec<u16> {
    vec![500, 502, 503, 504]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            authorize_url: default_authorize_url(),
            user_token_url: default_user_token_url(),
            scopes: default_scopes(),
            max_pool: default_max_pool(),
            timeout_secs: default_timeout_secs(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            total: default_retry_total(),
            backoff_factor_secs: default_backoff_factor_secs(),
            backoff_max_secs: default_backoff_max_secs(),
            status_forcelist: default_status_forcelist(),
        }
    }
}

impl AppConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Application bearer endpoint, derived from `api_url`.
    pub fn app_token_url(&self) -> String {
        format!("{}/oauth2/token", self.api_url.trim_end_matches('/'))
    }
}

pub fn parse_config(contents: &str) -> Result<AppConfig, toml::de::Error> {
    toml::from_str(contents)
}

fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config/tweetkit/config.toml"))
}

pub fn load_config() -> AppConfig {
    match config_path() {
        Some(path) => load_config_from(&path),
        None => AppConfig::default(),
    }
}

pub fn load_config_from(path: &Path) -> AppConfig {
    let Ok(contents) = fs::read_to_string(path) else {
        return AppConfig::default();
    };

    parse_config(&contents).unwrap_or_else(|e| {
        tracing::warn!(path = %path.display(), "ignoring malformed config: {e}");
        AppConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        assert_eq!(parse_config("").unwrap(), AppConfig::default());
    }

    #[test]
    fn test_partial_retry_table() {
        let config = parse_config(
            r#"
            api_url = "http://localhost:9000/"
            [retry]
            total = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.retry.total, 5);
        assert_eq!(config.retry.status_forcelist, vec![500, 502, 503, 504]);
        assert_eq!(config.app_token_url(), "http://localhost:9000/oauth2/token");
    }

    #[test]
    fn test_malformed_file_falls_back() {
        let path = std::env::temp_dir().join(format!("tweetkit-config-{}.toml", std::process::id()));
        fs::write(&path, "max_pool = \"lots\"").unwrap();
        assert_eq!(load_config_from(&path), AppConfig::default());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_missing_file_is_default() {
        let path = Path::new("/nonexistent/tweetkit/config.toml");
        assert_eq!(load_config_from(path), AppConfig::default());
    }
}
