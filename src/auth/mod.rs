//! Authentication for X API v2.
//!
//! Supports application-only bearer tokens (client credentials), OAuth 2.0
//! authorization code with PKCE, and OAuth 1.0a request signing.

pub mod app_auth;
pub mod credentials;
pub mod oauth1;
pub mod oauth2_pkce;

use std::future::Future;

use reqwest::Method;
use thiserror::Error;

pub use app_auth::AppAuthClient;
pub use oauth1::OAuth1Client;
pub use oauth2_pkce::{AuthorizationPrompt, StdinPrompt, UserAuthClient};

use crate::http::TransportError;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("credential error: {0}")]
    Credential(#[from] credentials::CredentialError),
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),
    #[error("unexpected authentication response: {0}")]
    InvalidAuthResponse(String),
    #[error("oauth2 error: {0}")]
    OAuth2(#[from] oauth2_pkce::OAuth2Error),
    #[error("signature error: {0}")]
    Signature(String),
    #[error("{0}")]
    Transport(#[from] TransportError),
}

/// Produces the `Authorization` header for API requests.
///
/// Implementors only need `get_bearer`; signing schemes that do not use a
/// bearer token override `authorization` instead.
pub trait AuthClient: Send {
    /// Return the cached token, acquiring one first if none is held.
    fn get_bearer(&mut self) -> impl Future<Output = Result<String, AuthError>> + Send;

    /// Forget the cached token. The next `get_bearer` acquires a new one.
    fn revoke_bearer(&mut self);

    /// Header value for a request to `url` carrying `params` as its query.
    fn authorization(
        &mut self,
        _method: &Method,
        _url: &str,
        _params: &[(String, String)],
    ) -> impl Future<Output = Result<String, AuthError>> + Send {
        async move { self.get_bearer().await.map(|token| format!("Bearer {token}")) }
    }
}

/// Which authentication strategy a provider uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// App-only bearer via client credentials (read-only).
    Application,
    /// OAuth 2.0 Authorization Code with PKCE.
    OAuth2Pkce,
    /// OAuth 1.0a HMAC-SHA1 (user-context).
    OAuth1,
}

/// Auth client chosen at runtime.
#[derive(Debug)]
pub enum AuthProvider {
    Application(AppAuthClient),
    User(UserAuthClient),
    OAuth1(OAuth1Client),
}

impl AuthProvider {
    pub fn method(&self) -> AuthMethod {
        match self {
            Self::Application(_) => AuthMethod::Application,
            Self::User(_) => AuthMethod::OAuth2Pkce,
            Self::OAuth1(_) => AuthMethod::OAuth1,
        }
    }
}

impl From<AppAuthClient> for AuthProvider {
    fn from(client: AppAuthClient) -> Self {
        Self::Application(client)
    }
}

impl From<UserAuthClient> for AuthProvider {
    fn from(client: UserAuthClient) -> Self {
        Self::User(client)
    }
}

impl From<OAuth1Client> for AuthProvider {
    fn from(client: OAuth1Client) -> Self {
        Self::OAuth1(client)
    }
}

impl AuthClient for AuthProvider {
    async fn get_bearer(&mut self) -> Result<String, AuthError> {
        match self {
            Self::Application(c) => c.get_bearer().await,
            Self::User(c) => c.get_bearer().await,
            Self::OAuth1(c) => c.get_bearer().await,
        }
    }

    fn revoke_bearer(&mut self) {
        match self {
            Self::Application(c) => c.revoke_bearer(),
            Self::User(c) => c.revoke_bearer(),
            Self::OAuth1(c) => c.revoke_bearer(),
        }
    }

    async fn authorization(
        &mut self,
        method: &Method,
        url: &str,
        params: &[(String, String)],
    ) -> Result<String, AuthError> {
        match self {
            Self::Application(c) => c.authorization(method, url, params).await,
            Self::User(c) => c.authorization(method, url, params).await,
            Self::OAuth1(c) => c.authorization(method, url, params).await,
        }
    }
}
