use std::collections::HashMap;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("failed to load .env file: {0}")]
    EnvFile(#[from] dotenvy::Error),
    #[error("missing credential variable {0}")]
    Missing(&'static str),
}

pub const CONSUMER_KEY: &str = "TW_CONSUMER_KEY";
pub const CONSUMER_SECRET: &str = "TW_CONSUMER_SECRET";
pub const BEARER_TOKEN: &str = "TW_BEARER_TOKEN";
pub const CLIENT_ID: &str = "TW_CLIENT_ID";
pub const CLIENT_SECRET: &str = "TW_CLIENT_SECRET";
pub const REDIRECT_URI: &str = "TW_REDIRECT_URI";
pub const ACCESS_TOKEN: &str = "TW_ACCESS_TOKEN";
pub const ACCESS_SECRET: &str = "TW_ACCESS_SECRET";

/// Source of named credential values. Empty values count as absent.
pub trait CredentialProvider {
    fn get(&self, name: &str) -> Option<String>;

    fn require(&self, name: &'static str) -> Result<String, CredentialError> {
        self.get(name).ok_or(CredentialError::Missing(name))
    }
}

impl CredentialProvider for HashMap<String, String> {
    fn get(&self, name: &str) -> Option<String> {
        HashMap::get(self, name).filter(|v| !v.is_empty()).cloned()
    }
}

/// Reads the process environment, after `.env` files have been loaded.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentials;

impl EnvCredentials {
    /// Load `.env` candidates, then read from the environment.
    pub fn load() -> Self {
        load_env_files();
        Self
    }
}

impl CredentialProvider for EnvCredentials {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }
}

/// Return candidate .env paths in priority order.
fn env_file_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/tweetkit/.env"));
    }
    paths.push(PathBuf::from(".env"));
    paths
}

/// Load .env files. Earlier files win because dotenvy does not overwrite
/// variables that are already set.
pub fn load_env_files() {
    for path in env_file_paths() {
        if path.exists()
            && let Err(e) = dotenvy::from_path(&path)
        {
            tracing::warn!(path = %path.display(), "skipping .env file: {e}");
        }
    }
}

/// Keys for application-only (client credentials) auth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationAuth {
    pub consumer_key: String,
    pub consumer_secret: String,
    /// Bearer granted for these keys. Reused until revoked.
    pub consumer_bearer: Option<String>,
}

impl ApplicationAuth {
    pub fn new(consumer_key: impl Into<String>, consumer_secret: impl Into<String>) -> Self {
        Self {
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
            consumer_bearer: None,
        }
    }

    pub fn from_provider(provider: &impl CredentialProvider) -> Result<Self, CredentialError> {
        Ok(Self {
            consumer_key: provider.require(CONSUMER_KEY)?,
            consumer_secret: provider.require(CONSUMER_SECRET)?,
            consumer_bearer: provider.get(BEARER_TOKEN),
        })
    }
}

/// OAuth 2.0 client registration for user-context auth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAuth {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
}

impl ClientAuth {
    pub fn from_provider(provider: &impl CredentialProvider) -> Result<Self, CredentialError> {
        Ok(Self {
            client_id: provider.require(CLIENT_ID)?,
            client_secret: provider.get(CLIENT_SECRET),
            redirect_uri: provider.require(REDIRECT_URI)?,
        })
    }
}

/// OAuth 1.0a credentials (user-context with full signing).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuth1Credentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_secret: String,
    pub bearer_token: Option<String>,
}

impl OAuth1Credentials {
    pub fn from_provider(provider: &impl CredentialProvider) -> Result<Self, CredentialError> {
        Ok(Self {
            consumer_key: provider.require(CONSUMER_KEY)?,
            consumer_secret: provider.require(CONSUMER_SECRET)?,
            access_token: provider.require(ACCESS_TOKEN)?,
            access_secret: provider.require(ACCESS_SECRET)?,
            bearer_token: provider.get(BEARER_TOKEN),
        })
    }
}
