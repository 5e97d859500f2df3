pub mod draft;
pub mod engagement;
pub mod fields;
pub mod tweets;
pub mod types;

use chrono::{NaiveDateTime, Utc};
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::api::fields::{Fields, ValidationError};
use crate::api::types::ApiResponse;
use crate::auth::{AuthClient, AuthError, AuthProvider};
use crate::config::AppConfig;
use crate::http::{Body, HttpClient, HttpResponse, ResponseHeaders, RetryPolicy, TransportError};

pub use draft::{ReplySettings, TweetDraft};
pub use fields::Granularity;
pub use tweets::CountsEndpoint;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ApiClientError {
    #[error("throttled until '{reset}'")]
    Throttled { reset: String },
    #[error("{status}: {url} - '{body}'")]
    InvalidResponse {
        status: u16,
        url: String,
        body: String,
    },
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),
    #[error("invalid field: {0}")]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    Transport(#[from] TransportError),
    #[error("deserialization error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Fail before any request is made when `name` has not been set.
pub(crate) fn require(fields: &Fields, name: &'static str) -> Result<(), ValidationError> {
    if fields.contains(name) {
        Ok(())
    } else {
        Err(ValidationError::Required(name))
    }
}

pub(crate) fn decode<T: DeserializeOwned>(body: Option<Value>) -> Result<ApiResponse<T>, ApiClientError> {
    Ok(ApiResponse::from_body(body)?)
}

// ---------------------------------------------------------------------------
// API client
// ---------------------------------------------------------------------------

/// Pagination cursor together with the endpoint that issued it.
#[derive(Debug, Clone)]
struct Cursor {
    url: String,
    token: String,
}

pub struct XApiClient<A: AuthClient = AuthProvider> {
    http: HttpClient,
    auth: A,
    base_url: String,
    last_headers: Option<ResponseHeaders>,
    cursor: Option<Cursor>,
    user_id: Option<String>,
}

impl<A: AuthClient> XApiClient<A> {
    pub fn new(auth: A, config: &AppConfig) -> Result<Self, ApiClientError> {
        let http = HttpClient::new(
            config.max_pool,
            config.timeout(),
            RetryPolicy::from(&config.retry),
        )?;
        Ok(Self::with_http(auth, http, &config.api_url))
    }

    pub fn with_http(auth: A, http: HttpClient, base_url: &str) -> Self {
        Self {
            http,
            auth,
            base_url: base_url.trim_end_matches('/').to_string(),
            last_headers: None,
            cursor: None,
            user_id: None,
        }
    }

    pub fn auth(&self) -> &A {
        &self.auth
    }

    pub fn auth_mut(&mut self) -> &mut A {
        &mut self.auth
    }

    pub fn into_auth(self) -> A {
        self.auth
    }

    /// Build a full API URL from a path (e.g. "/2/tweets/123").
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Calls left in the current window, `-1` before the first response.
    pub fn limit_remaining(&self) -> i64 {
        self.last_headers
            .as_ref()
            .and_then(ResponseHeaders::rate_limit_remaining)
            .unwrap_or(-1)
    }

    /// Next window reset as naive UTC, now before the first response.
    pub fn limit_reset(&self) -> NaiveDateTime {
        self.last_headers
            .as_ref()
            .and_then(ResponseHeaders::reset_at)
            .unwrap_or_else(Utc::now)
            .naive_utc()
    }

    pub fn last_headers(&self) -> Option<&ResponseHeaders> {
        self.last_headers.as_ref()
    }

    /// True while the last GET left a cursor behind.
    pub fn more(&self) -> bool {
        self.cursor.is_some()
    }

    pub fn next_token(&self) -> Option<&str> {
        self.cursor.as_ref().map(|c| c.token.as_str())
    }

    /// Query for a GET to `url`: the set fields plus the cursor, if it was
    /// issued by the same endpoint.
    pub fn query_fields(&self, url: &str, fields: &Fields) -> Vec<(String, String)> {
        let mut pairs = fields.pairs();
        if let Some(ref cursor) = self.cursor
            && cursor.url == url
        {
            pairs.push(("next_token".to_string(), cursor.token.clone()));
        }
        pairs
    }

    async fn auth_headers(
        &mut self,
        method: &Method,
        url: &str,
        params: &[(String, String)],
    ) -> Result<HeaderMap, ApiClientError> {
        let value = self.auth.authorization(method, url, params).await?;
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&value).map_err(|e| AuthError::Signature(e.to_string()))?,
        );
        Ok(headers)
    }

    /// Record telemetry, then turn non-2xx statuses into errors.
    fn handle_response(&mut self, url: &str, resp: HttpResponse) -> Result<Option<Value>, ApiClientError> {
        self.last_headers = Some(resp.headers().clone());

        if resp.status() == 429 {
            return Err(ApiClientError::Throttled {
                reset: resp.headers().x_rate_limit_reset.clone(),
            });
        }
        if !resp.is_success() {
            return Err(ApiClientError::InvalidResponse {
                status: resp.status(),
                url: url.to_string(),
                body: resp.body().to_string(),
            });
        }
        Ok(resp.json())
    }

    /// GET `url` with `fields` and the cursor as query, then move the
    /// cursor to `meta.next_token` of the response.
    #[instrument(skip(self, fields))]
    pub async fn get(&mut self, url: &str, fields: &Fields) -> Result<Option<Value>, ApiClientError> {
        let params = self.query_fields(url, fields);
        let body = self.fetch(url, &params).await?;

        self.cursor = body
            .as_ref()
            .and_then(|b| b.get("meta"))
            .and_then(|m| m.get("next_token"))
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(|token| Cursor {
                url: url.to_string(),
                token: token.to_string(),
            });
        debug!(next_token = ?self.next_token(), "cursor updated");

        Ok(body)
    }

    /// GET that leaves the cursor alone, for lookups made in the middle
    /// of someone else's pagination.
    pub(crate) async fn fetch(
        &mut self,
        url: &str,
        params: &[(String, String)],
    ) -> Result<Option<Value>, ApiClientError> {
        let headers = self.auth_headers(&Method::GET, url, params).await?;
        let resp = self.http.get(url, params, &headers).await?;
        self.handle_response(url, resp)
    }

    #[instrument(skip(self, json))]
    pub async fn post(&mut self, url: &str, json: &Value) -> Result<Option<Value>, ApiClientError> {
        let headers = self.auth_headers(&Method::POST, url, &[]).await?;
        let resp = self
            .http
            .post(url, &Body::Json(json.clone()), &headers)
            .await?;
        self.handle_response(url, resp)
    }

    #[instrument(skip(self))]
    pub async fn delete(&mut self, url: &str) -> Result<Option<Value>, ApiClientError> {
        let headers = self.auth_headers(&Method::DELETE, url, &[]).await?;
        let resp = self.http.delete(url, &[], &headers).await?;
        self.handle_response(url, resp)
    }
}
