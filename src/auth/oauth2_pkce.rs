//! OAuth 2.0 Authorization Code flow with PKCE for X API v2.
//!
//! The authorization step is out-of-band: the user opens the authorize URL,
//! approves the app, and hands the redirect URI back through an
//! [`AuthorizationPrompt`]. The code in that URI is then exchanged for an
//! access token, which is held for the lifetime of the client.

use std::fmt;
use std::io::Write;

use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, RequestTokenError, Scope, TokenResponse, TokenUrl,
};
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

use crate::auth::credentials::ClientAuth;
use crate::auth::{AuthClient, AuthError};
use crate::config::AppConfig;

/// Shortest verifier RFC 7636 allows.
const MIN_VERIFIER_LEN: usize = 43;

#[derive(Debug, Error)]
pub enum OAuth2Error {
    #[error("oauth2 request error: {0}")]
    Request(String),
    #[error("invalid OAuth2 endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
    #[error("invalid redirect URI: {0}")]
    Redirect(String),
    #[error("CSRF state mismatch")]
    CsrfMismatch,
    #[error("callback missing authorization code")]
    MissingCode,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Obtains the redirect URI the platform sends the user to after approval.
pub trait AuthorizationPrompt: Send + Sync {
    fn authorize(&self, url: &Url) -> Result<String, OAuth2Error>;
}

impl<F> AuthorizationPrompt for F
where
    F: Fn(&Url) -> Result<String, OAuth2Error> + Send + Sync,
{
    fn authorize(&self, url: &Url) -> Result<String, OAuth2Error> {
        self(url)
    }
}

/// Opens the browser and reads the pasted redirect URI from stdin.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinPrompt;

impl AuthorizationPrompt for StdinPrompt {
    fn authorize(&self, url: &Url) -> Result<String, OAuth2Error> {
        tracing::info!("opening browser for authorization");
        if let Err(e) = open::that(url.as_str()) {
            tracing::warn!("failed to open browser: {e}");
        }
        eprintln!("Open this URL in your browser to authorize:\n{url}");
        eprint!("Enter the full redirect URI after accepting: ");
        std::io::stderr().flush()?;

        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        Ok(answer.trim().to_string())
    }
}

/// Random URL-safe verifier, alphanumerics only.
pub fn code_verifier() -> String {
    loop {
        let bytes: [u8; 48] = rand::random();
        let verifier: String = URL_SAFE
            .encode(bytes)
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .collect();
        if verifier.len() >= MIN_VERIFIER_LEN {
            return verifier;
        }
    }
}

/// `base64url(sha256(verifier))` without padding.
pub fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Pull the authorization code out of a redirect URI, checking `state`.
pub fn authorization_code(redirect: &str, expected_state: &str) -> Result<String, OAuth2Error> {
    let url = Url::parse(redirect).map_err(|e| OAuth2Error::Redirect(format!("{redirect}: {e}")))?;

    let mut code = None;
    let mut state = None;
    for (k, v) in url.query_pairs() {
        match k.as_ref() {
            "code" => code = Some(v.into_owned()),
            "state" => state = Some(v.into_owned()),
            _ => {}
        }
    }

    if state.as_deref() != Some(expected_state) {
        return Err(OAuth2Error::CsrfMismatch);
    }
    code.filter(|c| !c.is_empty()).ok_or(OAuth2Error::MissingCode)
}

pub struct UserAuthClient {
    keys: ClientAuth,
    scopes: Vec<String>,
    authorize_url: String,
    token_url: String,
    prompt: Box<dyn AuthorizationPrompt>,
    bearer: Option<String>,
}

impl fmt::Debug for UserAuthClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserAuthClient")
            .field("client_id", &self.keys.client_id)
            .field("scopes", &self.scopes)
            .field("authorize_url", &self.authorize_url)
            .field("token_url", &self.token_url)
            .field("has_bearer", &self.bearer.is_some())
            .finish_non_exhaustive()
    }
}

impl UserAuthClient {
    pub fn new(keys: ClientAuth, config: &AppConfig, prompt: impl AuthorizationPrompt + 'static) -> Self {
        Self {
            keys,
            scopes: config.scopes.clone(),
            authorize_url: config.authorize_url.clone(),
            token_url: config.user_token_url.clone(),
            prompt: Box::new(prompt),
            bearer: None,
        }
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Authorize URL and CSRF state for a given verifier.
    pub fn authorization_url(&self, verifier: &str) -> Result<(Url, CsrfToken), OAuth2Error> {
        let client = BasicClient::new(ClientId::new(self.keys.client_id.clone()))
            .set_auth_uri(AuthUrl::new(self.authorize_url.clone())?)
            .set_redirect_uri(RedirectUrl::new(self.keys.redirect_uri.clone())?);

        let challenge =
            PkceCodeChallenge::from_code_verifier_sha256(&PkceCodeVerifier::new(verifier.to_string()));

        let mut request = client.authorize_url(CsrfToken::new_random);
        for scope in &self.scopes {
            request = request.add_scope(Scope::new(scope.clone()));
        }
        Ok(request.set_pkce_challenge(challenge).url())
    }

    async fn request_bearer(&self) -> Result<String, AuthError> {
        let verifier = code_verifier();
        let (auth_url, csrf_state) = self.authorization_url(&verifier)?;
        tracing::debug!(challenge = %code_challenge(&verifier), "built authorization url");

        let redirect = self.prompt.authorize(&auth_url)?;
        let code = authorization_code(&redirect, csrf_state.secret())?;

        let mut client = BasicClient::new(ClientId::new(self.keys.client_id.clone()))
            .set_token_uri(TokenUrl::new(self.token_url.clone()).map_err(OAuth2Error::from)?)
            .set_redirect_uri(
                RedirectUrl::new(self.keys.redirect_uri.clone()).map_err(OAuth2Error::from)?,
            );
        if let Some(ref secret) = self.keys.client_secret {
            client = client.set_client_secret(ClientSecret::new(secret.clone()));
        }

        // Following redirects on the token endpoint would leak the code.
        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| OAuth2Error::Request(e.to_string()))?;

        let token = client
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(PkceCodeVerifier::new(verifier))
            .request_async(&http_client)
            .await
            .map_err(|e| match e {
                RequestTokenError::Parse(err, _) => AuthError::InvalidAuthResponse(err.to_string()),
                other => AuthError::OAuth2(OAuth2Error::Request(other.to_string())),
            })?;

        Ok(token.access_token().secret().clone())
    }
}

impl AuthClient for UserAuthClient {
    async fn get_bearer(&mut self) -> Result<String, AuthError> {
        if let Some(ref token) = self.bearer {
            return Ok(token.clone());
        }
        let token = self.request_bearer().await?;
        self.bearer = Some(token.clone());
        Ok(token)
    }

    fn revoke_bearer(&mut self) {
        self.bearer = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const REDIRECT: &str = "http://localhost:8080/callback";

    fn keys() -> ClientAuth {
        ClientAuth {
            client_id: "client-123".into(),
            client_secret: None,
            redirect_uri: REDIRECT.into(),
        }
    }

    fn config(server: &MockServer) -> AppConfig {
        AppConfig {
            user_token_url: format!("{}/2/oauth2/token", server.uri()),
            ..AppConfig::default()
        }
    }

    /// Stands in for the user pasting the redirect back.
    fn stub(
        f: impl Fn(&Url) -> Result<String, OAuth2Error> + Send + Sync + 'static,
    ) -> impl AuthorizationPrompt {
        f
    }

    fn state_of(url: &Url) -> String {
        url.query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    #[test]
    fn test_code_verifier_shape() {
        let verifier = code_verifier();
        assert!(verifier.len() >= MIN_VERIFIER_LEN);
        assert!(verifier.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(verifier, code_verifier());
    }

    #[test]
    fn test_code_challenge_rfc7636_vector() {
        assert_eq!(
            code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_authorization_url_carries_challenge() {
        let client = UserAuthClient::new(
            keys(),
            &AppConfig::default(),
            stub(|_| Err(OAuth2Error::MissingCode)),
        );
        let verifier = code_verifier();
        let (url, _) = client.authorization_url(&verifier).unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let get = |name: &str| {
            pairs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };

        assert!(url.as_str().starts_with("https://twitter.com/i/oauth2/authorize?"));
        assert_eq!(get("client_id"), Some("client-123"));
        assert_eq!(get("code_challenge_method"), Some("S256"));
        assert_eq!(get("code_challenge"), Some(code_challenge(&verifier).as_str()));
        assert_eq!(get("redirect_uri"), Some(REDIRECT));
        assert!(get("scope").unwrap().contains("tweet.read"));
    }

    #[test]
    fn test_authorization_code_checks_state() {
        let ok = authorization_code(&format!("{REDIRECT}?state=abc&code=xyz"), "abc").unwrap();
        assert_eq!(ok, "xyz");

        assert!(matches!(
            authorization_code(&format!("{REDIRECT}?state=other&code=xyz"), "abc"),
            Err(OAuth2Error::CsrfMismatch)
        ));
        assert!(matches!(
            authorization_code(&format!("{REDIRECT}?state=abc"), "abc"),
            Err(OAuth2Error::MissingCode)
        ));
        assert!(matches!(
            authorization_code("not a uri", "abc"),
            Err(OAuth2Error::Redirect(_))
        ));
    }

    #[tokio::test]
    async fn test_get_bearer_exchanges_code_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2/oauth2/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=the-code"))
            .and(body_string_contains("code_verifier="))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token_type": "bearer",
                "access_token": "user-token",
                "scope": "tweet.read users.read"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let prompts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&prompts);
        let prompt = stub(move |url| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{REDIRECT}?state={}&code=the-code", state_of(url)))
        });
        let mut client = UserAuthClient::new(keys(), &config(&server), prompt);

        assert_eq!(client.get_bearer().await.unwrap(), "user-token");
        assert_eq!(client.get_bearer().await.unwrap(), "user-token");
        assert_eq!(prompts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_state_mismatch_skips_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let prompt = stub(|_| Ok(format!("{REDIRECT}?state=forged&code=the-code")));
        let mut client = UserAuthClient::new(keys(), &config(&server), prompt);
        let err = client.get_bearer().await.unwrap_err();
        assert!(matches!(err, AuthError::OAuth2(OAuth2Error::CsrfMismatch)));
    }

    #[tokio::test]
    async fn test_token_without_access_token_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2/oauth2/token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"token_type": "bearer"})),
            )
            .mount(&server)
            .await;

        let prompt = stub(|url| Ok(format!("{REDIRECT}?state={}&code=c", state_of(url))));
        let mut client = UserAuthClient::new(keys(), &config(&server), prompt);
        let err = client.get_bearer().await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidAuthResponse(_)));
    }
}
