//! Pooled HTTP transport with bounded retry on transient server errors.
//!
//! The transport never classifies responses. Whatever the server answers
//! last (after retries are spent) is handed back as an [`HttpResponse`] and
//! the caller decides what a status code means.

use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, HeaderMap, RETRY_AFTER};
use reqwest::{Client, Method};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::RetryConfig;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded;charset=UTF-8";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid URL {url}: {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub total: u32,
    pub backoff_factor: Duration,
    pub backoff_max: Duration,
    pub status_forcelist: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            total: config.total,
            backoff_factor: Duration::try_from_secs_f64(config.backoff_factor_secs)
                .unwrap_or(Duration::from_secs(2)),
            backoff_max: Duration::from_secs(config.backoff_max_secs),
            status_forcelist: config.status_forcelist.clone(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            total: 0,
            ..Self::default()
        }
    }

    pub fn retries_status(&self, status: u16) -> bool {
        self.status_forcelist.contains(&status)
    }

    /// Sleep before retry number `retry` (1-based): `factor * 2^(retry-1)`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        self.backoff_factor
            .saturating_mul(1 << exp)
            .min(self.backoff_max)
    }
}

// ---------------------------------------------------------------------------
// Request body
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub enum Body {
    #[default]
    Empty,
    Json(Value),
    /// Sent as `application/x-www-form-urlencoded`.
    Form(Vec<(String, String)>),
}

fn encode_form(pairs: &[(String, String)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

/// Append `fields` to `url` as query parameters.
pub fn build_url(url: &str, fields: &[(String, String)]) -> Result<Url, TransportError> {
    let mut parsed = Url::parse(url).map_err(|source| TransportError::Url {
        url: url.to_string(),
        source,
    })?;
    if !fields.is_empty() {
        parsed.query_pairs_mut().extend_pairs(fields);
    }
    Ok(parsed)
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// Raw header values of interest; missing headers are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeaders {
    pub date: String,
    pub content_type: String,
    pub api_version: String,
    pub x_access_level: String,
    pub x_response_time: String,
    pub x_rate_limit_limit: String,
    pub x_rate_limit_remaining: String,
    pub x_rate_limit_reset: String,
}

impl ResponseHeaders {
    pub fn from_map(headers: &HeaderMap) -> Self {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        Self {
            date: get("date"),
            content_type: get("content-type"),
            api_version: get("api-version"),
            x_access_level: get("x-access-level"),
            x_response_time: get("x-response-time"),
            x_rate_limit_limit: get("x-rate-limit-limit"),
            x_rate_limit_remaining: get("x-rate-limit-remaining"),
            x_rate_limit_reset: get("x-rate-limit-reset"),
        }
    }

    pub fn rate_limit_limit(&self) -> Option<i64> {
        self.x_rate_limit_limit.trim().parse().ok()
    }

    pub fn rate_limit_remaining(&self) -> Option<i64> {
        self.x_rate_limit_remaining.trim().parse().ok()
    }

    /// Unix epoch seconds of the next window reset.
    pub fn rate_limit_reset(&self) -> Option<i64> {
        self.x_rate_limit_reset.trim().parse().ok()
    }

    pub fn reset_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.rate_limit_reset()
            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: u16,
    headers: ResponseHeaders,
    body: String,
}

impl HttpResponse {
    pub fn new(status: u16, headers: ResponseHeaders, body: impl Into<String>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    async fn read(resp: reqwest::Response) -> Result<Self, TransportError> {
        let status = resp.status().as_u16();
        let headers = ResponseHeaders::from_map(resp.headers());
        let body = resp.text().await?;
        Ok(Self::new(status, headers, body))
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn headers(&self) -> &ResponseHeaders {
        &self.headers
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Decoded body, or `None` when the body is not JSON.
    pub fn json(&self) -> Option<Value> {
        match serde_json::from_str(&self.body) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(status = self.status, "response body is not JSON: {e}");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    retry: RetryPolicy,
}

impl HttpClient {
    pub fn new(max_pool: usize, timeout: Duration, retry: RetryPolicy) -> Result<Self, TransportError> {
        let inner = Client::builder()
            .pool_max_idle_per_host(max_pool)
            .timeout(timeout)
            .user_agent(format!("tweetkit/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { inner, retry })
    }

    /// Wrap an existing `reqwest::Client`.
    pub fn with_client(inner: Client, retry: RetryPolicy) -> Self {
        Self { inner, retry }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub async fn get(
        &self,
        url: &str,
        fields: &[(String, String)],
        headers: &HeaderMap,
    ) -> Result<HttpResponse, TransportError> {
        let url = build_url(url, fields)?;
        self.execute(Method::GET, url, &Body::Empty, headers).await
    }

    pub async fn delete(
        &self,
        url: &str,
        fields: &[(String, String)],
        headers: &HeaderMap,
    ) -> Result<HttpResponse, TransportError> {
        let url = build_url(url, fields)?;
        self.execute(Method::DELETE, url, &Body::Empty, headers).await
    }

    pub async fn post(
        &self,
        url: &str,
        body: &Body,
        headers: &HeaderMap,
    ) -> Result<HttpResponse, TransportError> {
        self.execute(Method::POST, build_url(url, &[])?, body, headers)
            .await
    }

    pub async fn put(
        &self,
        url: &str,
        body: &Body,
        headers: &HeaderMap,
    ) -> Result<HttpResponse, TransportError> {
        self.execute(Method::PUT, build_url(url, &[])?, body, headers)
            .await
    }

    pub async fn patch(
        &self,
        url: &str,
        body: &Body,
        headers: &HeaderMap,
    ) -> Result<HttpResponse, TransportError> {
        self.execute(Method::PATCH, build_url(url, &[])?, body, headers)
            .await
    }

    #[instrument(skip(self, url, body, headers), fields(url = %url))]
    async fn execute(
        &self,
        method: Method,
        url: Url,
        body: &Body,
        headers: &HeaderMap,
    ) -> Result<HttpResponse, TransportError> {
        let mut retries = 0;

        loop {
            debug!(attempt = retries + 1, %method, "sending request");

            let mut req = self
                .inner
                .request(method.clone(), url.clone())
                .headers(headers.clone());
            req = match body {
                Body::Empty => req,
                Body::Json(value) => req.json(value),
                Body::Form(pairs) => req
                    .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
                    .body(encode_form(pairs)),
            };

            match req.send().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if self.retry.retries_status(status) && retries < self.retry.total {
                        retries += 1;
                        let delay = retry_after(status, resp.headers())
                            .unwrap_or_else(|| self.retry.backoff(retries));
                        warn!(
                            status,
                            retry = retries,
                            delay_ms = delay.as_millis() as u64,
                            "retrying after server error"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return HttpResponse::read(resp).await;
                }
                Err(e) if (e.is_connect() || e.is_timeout()) && retries < self.retry.total => {
                    retries += 1;
                    let delay = self.retry.backoff(retries);
                    warn!(
                        retry = retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after connection error"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(TransportError::Request(e)),
            }
        }
    }
}

/// Server-provided delay for 503 responses, in whole seconds.
fn retry_after(status: u16, headers: &HeaderMap) -> Option<Duration> {
    if status != 503 {
        return None;
    }
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_retry(total: u32) -> RetryPolicy {
        RetryPolicy {
            total,
            backoff_factor: Duration::ZERO,
            ..RetryPolicy::default()
        }
    }

    fn client(total: u32) -> HttpClient {
        HttpClient::new(10, Duration::from_secs(5), fast_retry(total)).unwrap()
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
        assert_eq!(policy.backoff(12), Duration::from_secs(120));
    }

    #[test]
    fn test_default_policy_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.total, 3);
        assert_eq!(policy.status_forcelist, vec![500, 502, 503, 504]);
        assert!(!policy.retries_status(429));
    }

    #[test]
    fn test_build_url_appends_fields() {
        let url = build_url(
            "https://api.twitter.com/2/tweets",
            &[("ids".into(), "1,2".into()), ("tweet.fields".into(), "lang".into())],
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.twitter.com/2/tweets?ids=1%2C2&tweet.fields=lang"
        );
    }

    #[test]
    fn test_build_url_rejects_garbage() {
        assert!(matches!(
            build_url("not a url", &[]),
            Err(TransportError::Url { .. })
        ));
    }

    #[test]
    fn test_json_none_on_invalid_body() {
        let resp = HttpResponse::new(200, ResponseHeaders::default(), "<html>");
        assert!(resp.json().is_none());
        let resp = HttpResponse::new(200, ResponseHeaders::default(), r#"{"a":1}"#);
        assert_eq!(resp.json().unwrap()["a"], 1);
    }

    #[test]
    fn test_header_accessors() {
        let mut map = HeaderMap::new();
        map.insert("x-rate-limit-remaining", "297".parse().unwrap());
        map.insert("x-rate-limit-reset", "1637917876".parse().unwrap());
        let headers = ResponseHeaders::from_map(&map);
        assert_eq!(headers.rate_limit_remaining(), Some(297));
        assert_eq!(headers.rate_limit_reset(), Some(1_637_917_876));
        assert_eq!(headers.rate_limit_limit(), None);
        assert_eq!(headers.reset_at().unwrap().timestamp(), 1_637_917_876);
    }

    #[tokio::test]
    async fn test_get_sends_fields_as_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/2/tweets"))
            .and(query_param("ids", "1,2"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let resp = client(0)
            .get(
                &format!("{}/2/tweets", server.uri()),
                &[("ids".into(), "1,2".into())],
                &HeaderMap::new(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn test_post_form_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .and(header("content-type", FORM_CONTENT_TYPE))
            .and(body_string("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let body = Body::Form(vec![("grant_type".into(), "client_credentials".into())]);
        let resp = client(0)
            .post(&format!("{}/oauth2/token", server.uri()), &body, &HeaderMap::new())
            .await
            .unwrap();
        assert!(resp.is_success());
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":true}"#))
            .expect(1)
            .mount(&server)
            .await;

        let resp = client(3)
            .get(&format!("{}/flaky", server.uri()), &[], &HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.json().unwrap()["ok"], true);
    }

    #[tokio::test]
    async fn test_exhausted_retries_return_last_response() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(3)
            .mount(&server)
            .await;

        let resp = client(2)
            .delete(&format!("{}/down", server.uri()), &[], &HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(resp.status(), 500);
        assert_eq!(resp.body(), "boom");
    }

    #[tokio::test]
    async fn test_unlisted_status_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/limited"))
            .respond_with(ResponseTemplate::new(429))
            .expect(1)
            .mount(&server)
            .await;

        let body = Body::Json(serde_json::json!({"text": "hi"}));
        let resp = client(3)
            .post(&format!("{}/limited", server.uri()), &body, &HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(resp.status(), 429);
    }

    #[test]
    fn test_retry_after_only_on_503() {
        let mut map = HeaderMap::new();
        map.insert(RETRY_AFTER, "7".parse().unwrap());
        assert_eq!(retry_after(503, &map), Some(Duration::from_secs(7)));
        assert_eq!(retry_after(502, &map), None);

        map.insert(RETRY_AFTER, "Wed, 21 Oct 2026 07:28:00 GMT".parse().unwrap());
        assert_eq!(retry_after(503, &map), None);
    }

    #[tokio::test]
    async fn test_retry_after_overrides_backoff() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(503).insert_header("retry-after", "0"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        // a minute of backoff would blow the timeout below
        let slow = RetryPolicy {
            total: 1,
            backoff_factor: Duration::from_secs(60),
            ..RetryPolicy::default()
        };
        let http = HttpClient::new(10, Duration::from_secs(5), slow).unwrap();
        let resp = tokio::time::timeout(
            Duration::from_secs(10),
            http.get(&format!("{}/busy", server.uri()), &[], &HeaderMap::new()),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn test_connect_errors_are_retried() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let policy = RetryPolicy {
            total: 2,
            backoff_factor: Duration::from_millis(50),
            ..RetryPolicy::default()
        };
        let http = HttpClient::new(1, Duration::from_secs(5), policy).unwrap();

        let started = std::time::Instant::now();
        let err = http
            .get(&format!("http://127.0.0.1:{port}/gone"), &[], &HeaderMap::new())
            .await
            .unwrap_err();
        // 50ms + 100ms of backoff means both retries ran
        assert!(started.elapsed() >= Duration::from_millis(150));
        match err {
            TransportError::Request(e) => assert!(e.is_connect()),
            other => panic!("unexpected error: {other}"),
        }
    }
}
