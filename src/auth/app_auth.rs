//! Application-only bearer tokens via the client-credentials grant.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use tracing::debug;

use crate::auth::credentials::ApplicationAuth;
use crate::auth::{AuthClient, AuthError};
use crate::config::AppConfig;
use crate::http::{Body, HttpClient, RetryPolicy};

/// Everything but RFC 3986 unreserved characters gets encoded.
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Form-style quoting: spaces become `+`.
fn quote_plus(s: &str) -> String {
    utf8_percent_encode(s, KEY_ENCODE_SET)
        .to_string()
        .replace("%20", "+")
}

/// `base64(quote_plus(key) + ":" + quote_plus(secret))`
pub fn encoded_credentials(key: &str, secret: &str) -> Result<String, AuthError> {
    if key.is_empty() {
        return Err(AuthError::MissingCredential("consumer key"));
    }
    if secret.is_empty() {
        return Err(AuthError::MissingCredential("consumer secret"));
    }
    let union = format!("{}:{}", quote_plus(key), quote_plus(secret));
    Ok(BASE64.encode(union))
}

#[derive(Clone)]
pub struct AppAuthClient {
    keys: ApplicationAuth,
    http: HttpClient,
    token_url: String,
}

impl std::fmt::Debug for AppAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppAuthClient")
            .field("consumer_key", &self.keys.consumer_key)
            .field("token_url", &self.token_url)
            .field("has_bearer", &self.keys.consumer_bearer.is_some())
            .finish_non_exhaustive()
    }
}

impl AppAuthClient {
    pub fn new(keys: ApplicationAuth, config: &AppConfig) -> Result<Self, AuthError> {
        let http = HttpClient::new(
            config.max_pool,
            config.timeout(),
            RetryPolicy::from(&config.retry),
        )?;
        Ok(Self::with_http(keys, http, config.app_token_url()))
    }

    pub fn with_http(keys: ApplicationAuth, http: HttpClient, token_url: impl Into<String>) -> Self {
        Self {
            keys,
            http,
            token_url: token_url.into(),
        }
    }

    pub fn consumer_key(&self) -> &str {
        &self.keys.consumer_key
    }

    /// The keys, including any bearer cached so far.
    pub fn credentials(&self) -> &ApplicationAuth {
        &self.keys
    }

    pub fn into_credentials(self) -> ApplicationAuth {
        self.keys
    }

    pub fn encoded_credentials(&self) -> Result<String, AuthError> {
        encoded_credentials(&self.keys.consumer_key, &self.keys.consumer_secret)
    }

    async fn request_bearer(&self) -> Result<String, AuthError> {
        debug!(url = %self.token_url, "requesting bearer token with consumer credentials");

        let basic = format!("Basic {}", self.encoded_credentials()?);
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&basic).map_err(|e| AuthError::Signature(e.to_string()))?,
        );
        let body = Body::Form(vec![(
            "grant_type".to_string(),
            "client_credentials".to_string(),
        )]);

        let resp = self.http.post(&self.token_url, &body, &headers).await?;
        if !resp.is_success() {
            return Err(AuthError::InvalidAuthResponse(format!(
                "status {}: {}",
                resp.status(),
                resp.body()
            )));
        }

        let json = resp.json().unwrap_or_default();
        let token_type = json.get("token_type").and_then(|v| v.as_str());
        if token_type != Some("bearer") {
            debug!(body = %resp.body(), "invalid token response");
            return Err(AuthError::InvalidAuthResponse(format!(
                "invalid token_type: {token_type:?}"
            )));
        }

        json.get("access_token")
            .and_then(|v| v.as_str())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .ok_or_else(|| AuthError::InvalidAuthResponse("no access_token returned".into()))
    }
}

impl AuthClient for AppAuthClient {
    async fn get_bearer(&mut self) -> Result<String, AuthError> {
        if let Some(ref token) = self.keys.consumer_bearer {
            return Ok(token.clone());
        }
        let token = self.request_bearer().await?;
        self.keys.consumer_bearer = Some(token.clone());
        Ok(token)
    }

    /// Only clears the local cache; the platform-side token stays valid.
    fn revoke_bearer(&mut self) {
        self.keys.consumer_bearer = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KEY: &str = "xvz1evFS4wEEPTGEFPHBog";
    const SECRET: &str = "L8qq9PZyRg6ieKGEKhZolGC0vJWLw8iEJ88DRdyOg";
    const ENCODED: &str =
        "eHZ6MWV2RlM0d0VFUFRHRUZQSEJvZzpMOHFxOVBaeVJnNmllS0dFS2hab2xHQzB2SldMdzhpRUo4OERSZHlPZw==";

    fn client(server: &MockServer) -> AppAuthClient {
        let http = HttpClient::new(2, Duration::from_secs(5), RetryPolicy::none()).unwrap();
        AppAuthClient::with_http(
            ApplicationAuth::new(KEY, SECRET),
            http,
            format!("{}/oauth2/token", server.uri()),
        )
    }

    #[test]
    fn test_encoded_credentials_known_value() {
        assert_eq!(encoded_credentials(KEY, SECRET).unwrap(), ENCODED);
    }

    #[test]
    fn test_encoded_credentials_quotes_each_part() {
        let encoded = encoded_credentials("a b", "c:d/e").unwrap();
        let decoded = String::from_utf8(BASE64.decode(encoded).unwrap()).unwrap();
        assert_eq!(decoded, "a+b:c%3Ad%2Fe");
    }

    #[test]
    fn test_encoded_credentials_requires_both() {
        assert!(matches!(
            encoded_credentials("", SECRET),
            Err(AuthError::MissingCredential(_))
        ));
        assert!(matches!(
            encoded_credentials(KEY, ""),
            Err(AuthError::MissingCredential(_))
        ));
    }

    #[test]
    fn test_debug_hides_secret_and_bearer() {
        let mut keys = ApplicationAuth::new(KEY, SECRET);
        keys.consumer_bearer = Some("AAAA-cached".into());
        let http = HttpClient::new(2, Duration::from_secs(5), RetryPolicy::none()).unwrap();
        let out = format!("{:?}", AppAuthClient::with_http(keys, http, "http://localhost/token"));
        assert!(out.contains(KEY));
        assert!(out.contains("has_bearer: true"));
        assert!(!out.contains(SECRET));
        assert!(!out.contains("AAAA-cached"));
    }

    #[tokio::test]
    async fn test_get_bearer_requests_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .and(header("authorization", format!("Basic {ENCODED}").as_str()))
            .and(body_string("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token_type": "bearer",
                "access_token": "AAAA%2FAAA%3DAAAAAAAA"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut auth = client(&server);
        let first = auth.get_bearer().await.unwrap();
        let second = auth.get_bearer().await.unwrap();
        assert_eq!(first, "AAAA%2FAAA%3DAAAAAAAA");
        assert_eq!(first, second);
        assert_eq!(
            auth.credentials().consumer_bearer.as_deref(),
            Some("AAAA%2FAAA%3DAAAAAAAA")
        );
    }

    #[tokio::test]
    async fn test_revoke_forces_new_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token_type": "bearer",
                "access_token": "fresh"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let mut auth = client(&server);
        auth.get_bearer().await.unwrap();
        auth.revoke_bearer();
        assert!(auth.credentials().consumer_bearer.is_none());
        auth.get_bearer().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_access_token_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"token_type": "bearer"})),
            )
            .mount(&server)
            .await;

        let err = client(&server).get_bearer().await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidAuthResponse(_)));
    }

    #[tokio::test]
    async fn test_wrong_token_type_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token_type": "mac",
                "access_token": "x"
            })))
            .mount(&server)
            .await;

        let err = client(&server).get_bearer().await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidAuthResponse(_)));
    }

    #[tokio::test]
    async fn test_error_status_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let err = client(&server).get_bearer().await.unwrap_err();
        assert!(err.to_string().contains("403"));
    }

    #[tokio::test]
    async fn test_missing_keys_fail_before_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let http = HttpClient::new(2, Duration::from_secs(5), RetryPolicy::none()).unwrap();
        let mut auth = AppAuthClient::with_http(
            ApplicationAuth::new(KEY, ""),
            http,
            format!("{}/oauth2/token", server.uri()),
        );
        let err = auth.get_bearer().await.unwrap_err();
        assert!(matches!(err, AuthError::MissingCredential(_)));
    }
}
