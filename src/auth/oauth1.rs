//! OAuth 1.0a HMAC-SHA1 request signing.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::Method;
use sha1::Sha1;
use url::Url;

use crate::auth::credentials::OAuth1Credentials;
use crate::auth::{AuthClient, AuthError};

/// RFC 3986 unreserved characters (ALPHA / DIGIT / "-" / "." / "_" / "~")
/// must NOT be encoded, everything else must be.
const ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

pub fn percent_encode(s: &str) -> String {
    utf8_percent_encode(s, ENCODE_SET).to_string()
}

fn generate_nonce() -> String {
    let bytes: [u8; 16] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn generate_timestamp() -> String {
    chrono::Utc::now().timestamp().to_string()
}

/// Encode every pair, sort, and join as `k=v&k=v`.
pub fn parameter_string(params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (percent_encode(k), percent_encode(v)))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// `METHOD&encoded(url)&encoded(parameter_string)`
pub fn base_string(method: &str, url: &str, parameter_string: &str) -> String {
    format!(
        "{}&{}&{}",
        method.to_uppercase(),
        percent_encode(url),
        percent_encode(parameter_string),
    )
}

/// Base64 HMAC-SHA1 of `base_string`, keyed by both encoded secrets.
pub fn signature(
    base_string: &str,
    consumer_secret: &str,
    access_secret: &str,
) -> Result<String, AuthError> {
    let signing_key = format!(
        "{}&{}",
        percent_encode(consumer_secret),
        percent_encode(access_secret),
    );
    let mut mac = Hmac::<Sha1>::new_from_slice(signing_key.as_bytes())
        .map_err(|e| AuthError::Signature(e.to_string()))?;
    mac.update(base_string.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// `OAuth k="v", ...` with every key and value quoted individually.
pub fn header_value(values: &[(String, String)]) -> String {
    let parts = values
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("OAuth {parts}")
}

#[derive(Clone)]
pub struct OAuth1Client {
    creds: OAuth1Credentials,
}

impl std::fmt::Debug for OAuth1Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth1Client")
            .field("consumer_key", &self.creds.consumer_key)
            .field("access_token", &self.creds.access_token)
            .field("has_bearer", &self.creds.bearer_token.is_some())
            .finish_non_exhaustive()
    }
}

impl OAuth1Client {
    pub fn new(creds: OAuth1Credentials) -> Self {
        Self { creds }
    }

    fn check_credentials(&self) -> Result<(), AuthError> {
        let required = [
            (&self.creds.consumer_key, "consumer key"),
            (&self.creds.consumer_secret, "consumer secret"),
            (&self.creds.access_token, "access token"),
            (&self.creds.access_secret, "access secret"),
        ];
        match required.iter().find(|(value, _)| value.is_empty()) {
            Some((_, name)) => Err(AuthError::MissingCredential(*name)),
            None => Ok(()),
        }
    }

    /// Authorization header for a request.
    ///
    /// Query parameters already present on `url` are folded into the
    /// signature along with `params`.
    pub fn sign(
        &self,
        method: &str,
        url: &str,
        params: &[(String, String)],
    ) -> Result<String, AuthError> {
        self.sign_with(method, url, params, &generate_nonce(), &generate_timestamp())
    }

    pub fn sign_with(
        &self,
        method: &str,
        url: &str,
        params: &[(String, String)],
        nonce: &str,
        timestamp: &str,
    ) -> Result<String, AuthError> {
        self.check_credentials()?;

        let parsed = Url::parse(url).map_err(|e| AuthError::Signature(format!("{url}: {e}")))?;
        // `port()` is None for the scheme's default port
        let authority = match parsed.port() {
            Some(port) => format!("{}:{port}", parsed.host_str().unwrap_or_default()),
            None => parsed.host_str().unwrap_or_default().to_string(),
        };
        let base_url = format!("{}://{authority}{}", parsed.scheme(), parsed.path());

        let mut oauth_params: Vec<(String, String)> = vec![
            ("oauth_consumer_key".into(), self.creds.consumer_key.clone()),
            ("oauth_nonce".into(), nonce.to_string()),
            ("oauth_signature_method".into(), "HMAC-SHA1".into()),
            ("oauth_timestamp".into(), timestamp.to_string()),
            ("oauth_token".into(), self.creds.access_token.clone()),
            ("oauth_version".into(), "1.0".into()),
        ];

        let mut all_params = oauth_params.clone();
        all_params.extend(params.iter().cloned());
        all_params.extend(
            parsed
                .query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned())),
        );

        let base = base_string(method, &base_url, &parameter_string(&all_params));
        let sig = signature(&base, &self.creds.consumer_secret, &self.creds.access_secret)?;

        oauth_params.push(("oauth_signature".into(), sig));
        oauth_params.sort();
        Ok(header_value(&oauth_params))
    }
}

impl AuthClient for OAuth1Client {
    /// A pre-issued application bearer, if one was configured.
    async fn get_bearer(&mut self) -> Result<String, AuthError> {
        self.creds
            .bearer_token
            .clone()
            .ok_or(AuthError::MissingCredential("bearer token"))
    }

    fn revoke_bearer(&mut self) {
        self.creds.bearer_token = None;
    }

    async fn authorization(
        &mut self,
        method: &Method,
        url: &str,
        params: &[(String, String)],
    ) -> Result<String, AuthError> {
        self.sign(method.as_str(), url, params)
    }
}
