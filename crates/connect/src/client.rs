//! Authenticated, rate-limited, retrying client for the remote LMS REST API.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Method, Url};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use lmsbridge_core::lms::{backoff_delay, RETRYABLE_STATUSES};

use crate::error::{ConnectError, Result};
use crate::pagination::has_next_page;
use crate::rate_limiter::RateLimiter;
use crate::token_service::AccessTokenProvider;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_LOG_BODY_CHARS: usize = 512;
pub const DEFAULT_PAGE_SIZE: u32 = 100;
/// Upper bound on pages followed for one collection.
const MAX_PAGES: u32 = 10_000;
pub const UPDATED_SINCE_PARAM: &str = "updated_since";

pub(crate) fn truncate_for_log(body: &str) -> String {
    let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
    if body.chars().count() > MAX_LOG_BODY_CHARS {
        preview.push_str("...");
    }
    preview
}

fn is_cancelled(cancel_flag: Option<&AtomicBool>) -> bool {
    cancel_flag
        .map(|flag| flag.load(Ordering::Relaxed))
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each failure.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HeaderMap,
    /// Parsed JSON body; `Null` for an empty body.
    pub body: Value,
}

/// Paginated collection reads used by the sync orchestrator.
#[async_trait]
pub trait RemoteCollectionSource: Send + Sync {
    async fn list_all(
        &self,
        path: &str,
        user_id: &str,
        params: Vec<(String, String)>,
        cancel_flag: Option<&AtomicBool>,
    ) -> Result<Vec<Value>>;

    async fn list_updated_since(
        &self,
        path: &str,
        user_id: &str,
        since: DateTime<Utc>,
        cancel_flag: Option<&AtomicBool>,
    ) -> Result<Vec<Value>>;
}

pub struct LmsApiClient {
    client: reqwest::Client,
    base_url: String,
    limiter: Arc<RateLimiter>,
    tokens: Arc<dyn AccessTokenProvider>,
    retry: RetryPolicy,
}

impl LmsApiClient {
    pub fn new(
        base_url: &str,
        limiter: Arc<RateLimiter>,
        tokens: Arc<dyn AccessTokenProvider>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            limiter,
            tokens,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("[LmsApi] Response status: {}", status);
            return;
        }
        debug!(
            "[LmsApi] Response error ({}): {}",
            status,
            truncate_for_log(body)
        );
    }

    fn build_url(&self, path: &str, params: &[(String, String)]) -> Result<Url> {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        let mut url = Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| ConnectError::invalid_request(format!("Invalid URL for {}: {}", path, e)))?;
        if !params.is_empty() {
            let mut query = url.query_pairs_mut();
            for (key, value) in params {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn headers(token: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| ConnectError::invalid_request("Invalid access token format"))?;
        headers.insert(AUTHORIZATION, auth_value);
        Ok(headers)
    }

    /// Issue one logical request. Each attempt takes a limiter token; 429,
    /// 5xx gateway statuses and transport errors are retried with doubling
    /// backoff up to `max_attempts`.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        user_id: &str,
        params: &[(String, String)],
    ) -> Result<ApiResponse> {
        let token = self
            .tokens
            .get_valid_access_token(user_id)
            .await?
            .ok_or_else(|| ConnectError::not_authorized(user_id))?;
        let url = self.build_url(path, params)?;
        let headers = Self::headers(&token)?;
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt = attempt.saturating_add(1);
            self.limiter.acquire().await;

            let send_result = self
                .client
                .request(method.clone(), url.clone())
                .headers(headers.clone())
                .send()
                .await;

            let received = match send_result {
                Ok(response) => {
                    let status = response.status();
                    let response_headers = response.headers().clone();
                    response
                        .text()
                        .await
                        .map(|body| (status, response_headers, body))
                }
                Err(err) => Err(err),
            };

            // A body that fails mid-read is a transport error like a failed send.
            let last_error = match received {
                Ok((status, response_headers, body)) => {
                    Self::log_response(status, &body);

                    if status.is_success() {
                        let body = if body.trim().is_empty() {
                            Value::Null
                        } else {
                            serde_json::from_str(&body)?
                        };
                        return Ok(ApiResponse {
                            status: status.as_u16(),
                            headers: response_headers,
                            body,
                        });
                    }
                    if !RETRYABLE_STATUSES.contains(&status.as_u16()) {
                        return Err(ConnectError::api(
                            status.as_u16(),
                            format!("{} {}: {}", method, path, truncate_for_log(&body)),
                        ));
                    }
                    format!("HTTP {}", status.as_u16())
                }
                Err(err) => err.to_string(),
            };

            if attempt >= max_attempts {
                log::warn!(
                    "[LmsApi] {} {} gave up after {} attempt(s): {}",
                    method,
                    path,
                    attempt,
                    last_error
                );
                return Err(ConnectError::RetriesExhausted {
                    method: method.to_string(),
                    path: path.to_string(),
                    attempts: attempt,
                    last_error,
                });
            }

            let backoff = backoff_delay(self.retry.base_delay, attempt);
            debug!(
                "[LmsApi] Retry attempt {}/{} for {} {} after {} (backoff {:?})",
                attempt + 1,
                max_attempts,
                method,
                path,
                last_error,
                backoff
            );
            sleep(backoff).await;
        }
    }

    /// GET every page of a collection, incrementing `page` until the
    /// response stops announcing a next page.
    pub async fn list_paginated(
        &self,
        path: &str,
        user_id: &str,
        params: &[(String, String)],
    ) -> Result<Vec<Value>> {
        self.list_paginated_with_cancel_flag(path, user_id, params, None)
            .await
    }

    pub async fn list_paginated_with_cancel_flag(
        &self,
        path: &str,
        user_id: &str,
        params: &[(String, String)],
        cancel_flag: Option<&AtomicBool>,
    ) -> Result<Vec<Value>> {
        let has_page_size = params.iter().any(|(key, _)| key == "per_page");
        let mut items = Vec::new();
        let mut page = 1u32;

        loop {
            if is_cancelled(cancel_flag) {
                return Err(ConnectError::Cancelled(format!(
                    "listing {} stopped before page {}",
                    path, page
                )));
            }

            let mut page_params: Vec<(String, String)> = params
                .iter()
                .filter(|(key, _)| key != "page")
                .cloned()
                .collect();
            page_params.push(("page".to_string(), page.to_string()));
            if !has_page_size {
                page_params.push(("per_page".to_string(), DEFAULT_PAGE_SIZE.to_string()));
            }

            let response = self
                .request(Method::GET, path, user_id, &page_params)
                .await?;
            match response.body {
                Value::Array(page_items) => items.extend(page_items),
                Value::Null => {}
                other => items.push(other),
            }

            if !has_next_page(&response.headers) {
                break;
            }
            if page >= MAX_PAGES {
                log::warn!(
                    "[LmsApi] {} still announces more pages after {}; stopping",
                    path,
                    page
                );
                break;
            }
            page += 1;
        }

        debug!(
            "[LmsApi] Listed {} item(s) from {} over {} page(s)",
            items.len(),
            path,
            page
        );
        Ok(items)
    }

    /// Incremental listing: everything updated at or after `since`.
    pub async fn list_since(
        &self,
        path: &str,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Value>> {
        self.list_since_with_cancel_flag(path, user_id, since, None)
            .await
    }

    pub async fn list_since_with_cancel_flag(
        &self,
        path: &str,
        user_id: &str,
        since: DateTime<Utc>,
        cancel_flag: Option<&AtomicBool>,
    ) -> Result<Vec<Value>> {
        let params = vec![(
            UPDATED_SINCE_PARAM.to_string(),
            since.to_rfc3339_opts(SecondsFormat::Secs, true),
        )];
        self.list_paginated_with_cancel_flag(path, user_id, &params, cancel_flag)
            .await
    }
}

#[async_trait]
impl RemoteCollectionSource for LmsApiClient {
    async fn list_all(
        &self,
        path: &str,
        user_id: &str,
        params: Vec<(String, String)>,
        cancel_flag: Option<&AtomicBool>,
    ) -> Result<Vec<Value>> {
        self.list_paginated_with_cancel_flag(path, user_id, &params, cancel_flag)
            .await
    }

    async fn list_updated_since(
        &self,
        path: &str,
        user_id: &str,
        since: DateTime<Utc>,
        cancel_flag: Option<&AtomicBool>,
    ) -> Result<Vec<Value>> {
        self.list_since_with_cancel_flag(path, user_id, since, cancel_flag)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockOutcome, MockServer};
    use chrono::TimeZone;

    struct StaticTokens(Option<&'static str>);

    #[async_trait]
    impl AccessTokenProvider for StaticTokens {
        async fn get_valid_access_token(&self, _user_id: &str) -> Result<Option<String>> {
            Ok(self.0.map(str::to_string))
        }
    }

    fn client(base_url: &str, token: Option<&'static str>, base_delay_ms: u64) -> LmsApiClient {
        LmsApiClient::new(
            base_url,
            Arc::new(RateLimiter::new(6_000)),
            Arc::new(StaticTokens(token)),
        )
        .expect("client")
        .with_retry_policy(RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(base_delay_ms),
        })
    }

    fn page_of(size: usize, offset: usize) -> String {
        let items = (0..size)
            .map(|i| format!(r#"{{"id":{}}}"#, offset + i))
            .collect::<Vec<_>>();
        format!("[{}]", items.join(","))
    }

    #[tokio::test]
    async fn retries_transient_status_then_succeeds() {
        let server = MockServer::start(vec![
            MockOutcome::json(503, r#"{"errors":"busy"}"#),
            MockOutcome::json(429, r#"{"errors":"slow down"}"#),
            MockOutcome::json(200, r#"{"id":1}"#),
        ])
        .await;

        let response = client(&server.base_url, Some("tok"), 5)
            .request(Method::GET, "/api/v1/courses/1", "u-1", &[])
            .await
            .expect("request");
        assert_eq!(response.status, 200);
        assert_eq!(response.body["id"], 1);

        let requests = server.requests().await;
        assert_eq!(requests.len(), 3);
        assert_eq!(
            requests[0].headers.get("authorization").map(String::as_str),
            Some("Bearer tok")
        );
    }

    #[tokio::test]
    async fn retries_transport_errors() {
        let server = MockServer::start(vec![
            MockOutcome::DropConnection,
            MockOutcome::json(200, "[]"),
        ])
        .await;

        let response = client(&server.base_url, Some("tok"), 5)
            .request(Method::GET, "/api/v1/courses", "u-1", &[])
            .await
            .expect("request");
        assert_eq!(response.body, Value::Array(vec![]));
        assert_eq!(server.requests().await.len(), 2);
    }

    #[tokio::test]
    async fn retries_body_cut_short_by_remote() {
        let server = MockServer::start(vec![
            MockOutcome::Truncated {
                status: 200,
                body: "[{\"id".to_string(),
                declared_length: 100,
            },
            MockOutcome::json(200, "[]"),
        ])
        .await;

        let response = client(&server.base_url, Some("tok"), 5)
            .request(Method::GET, "/api/v1/courses", "u-1", &[])
            .await
            .expect("request");
        assert_eq!(response.body, Value::Array(vec![]));
        assert_eq!(server.requests().await.len(), 2);
    }

    #[tokio::test]
    async fn truncated_bodies_exhaust_retries_with_context() {
        let truncated = || MockOutcome::Truncated {
            status: 200,
            body: "[1,2".to_string(),
            declared_length: 100,
        };
        let server =
            MockServer::start(vec![truncated(), truncated(), truncated(), truncated()]).await;

        let err = client(&server.base_url, Some("tok"), 5)
            .request(Method::GET, "/api/v1/courses", "u-1", &[])
            .await
            .expect_err("exhausted");
        match err {
            ConnectError::RetriesExhausted {
                method,
                path,
                attempts,
                ..
            } => {
                assert_eq!(method, "GET");
                assert_eq!(path, "/api/v1/courses");
                assert_eq!(attempts, 4);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(server.requests().await.len(), 4);
    }

    #[tokio::test]
    async fn does_not_retry_other_client_errors() {
        let server = MockServer::start(vec![
            MockOutcome::json(404, r#"{"errors":"not found"}"#),
            MockOutcome::json(200, "{}"),
        ])
        .await;

        let err = client(&server.base_url, Some("tok"), 5)
            .request(Method::GET, "/api/v1/courses/9", "u-1", &[])
            .await
            .expect_err("404");
        assert_eq!(err.status_code(), Some(404));
        assert_eq!(server.requests().await.len(), 1);
    }

    #[tokio::test]
    async fn gives_up_after_four_attempts_with_doubling_backoff() {
        let server = MockServer::start(vec![
            MockOutcome::json(500, "{}"),
            MockOutcome::json(502, "{}"),
            MockOutcome::json(503, "{}"),
            MockOutcome::json(504, "{}"),
            MockOutcome::json(200, "{}"),
        ])
        .await;

        let err = client(&server.base_url, Some("tok"), 40)
            .request(Method::GET, "/api/v1/courses", "u-1", &[])
            .await
            .expect_err("exhausted");
        match err {
            ConnectError::RetriesExhausted {
                method,
                path,
                attempts,
                last_error,
            } => {
                assert_eq!(method, "GET");
                assert_eq!(path, "/api/v1/courses");
                assert_eq!(attempts, 4);
                assert_eq!(last_error, "HTTP 504");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let requests = server.requests().await;
        assert_eq!(requests.len(), 4);
        let gaps: Vec<Duration> = requests
            .windows(2)
            .map(|pair| pair[1].received_at.duration_since(pair[0].received_at))
            .collect();
        assert!(gaps[0] >= Duration::from_millis(40), "gaps {gaps:?}");
        assert!(gaps[1] >= Duration::from_millis(80), "gaps {gaps:?}");
        assert!(gaps[2] >= Duration::from_millis(160), "gaps {gaps:?}");
    }

    #[tokio::test]
    async fn missing_token_fails_fast_without_calling_remote() {
        let server = MockServer::start(vec![MockOutcome::json(200, "{}")]).await;

        let err = client(&server.base_url, None, 5)
            .request(Method::GET, "/api/v1/courses", "u-9", &[])
            .await
            .expect_err("unauthorized");
        assert!(matches!(err, ConnectError::NotAuthorized { ref user_id } if user_id == "u-9"));
        assert!(server.requests().await.is_empty());
    }

    #[tokio::test]
    async fn follows_link_header_across_pages() {
        let next = |page: u32| format!("<http://lms.test/api/v1/courses?page={page}>; rel=\"next\"");
        let server = MockServer::start(vec![
            MockOutcome::json_with_header(200, page_of(100, 0), "Link", next(2)),
            MockOutcome::json_with_header(200, page_of(100, 100), "Link", next(3)),
            MockOutcome::json_with_header(
                200,
                page_of(37, 200),
                "Link",
                "<http://lms.test/api/v1/courses?page=1>; rel=\"first\"",
            ),
        ])
        .await;

        let items = client(&server.base_url, Some("tok"), 5)
            .list_paginated("/api/v1/courses", "u-1", &[])
            .await
            .expect("list");
        assert_eq!(items.len(), 237);
        assert_eq!(items[236]["id"], 236);

        let requests = server.requests().await;
        assert_eq!(requests.len(), 3);
        for (index, request) in requests.iter().enumerate() {
            assert_eq!(request.query_param("page"), Some((index + 1).to_string()));
            assert_eq!(request.query_param("per_page").as_deref(), Some("100"));
        }
    }

    #[tokio::test]
    async fn list_since_adds_updated_since_filter() {
        let server = MockServer::start(vec![MockOutcome::json(200, "[]")]).await;
        let since = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();

        let items = client(&server.base_url, Some("tok"), 5)
            .list_since("/api/v1/courses/5/assignments", "u-1", since)
            .await
            .expect("list");
        assert!(items.is_empty());

        let requests = server.requests().await;
        assert_eq!(
            requests[0].query_param(UPDATED_SINCE_PARAM).as_deref(),
            Some("2026-01-02T03%3A04%3A05Z")
        );
        assert!(requests[0].target.starts_with("/api/v1/courses/5/assignments?"));
    }

    #[tokio::test]
    async fn cancelled_listing_stops_before_fetching() {
        let server = MockServer::start(vec![MockOutcome::json(200, "[]")]).await;
        let cancel = AtomicBool::new(true);

        let err = client(&server.base_url, Some("tok"), 5)
            .list_paginated_with_cancel_flag("/api/v1/courses", "u-1", &[], Some(&cancel))
            .await
            .expect_err("cancelled");
        assert!(matches!(err, ConnectError::Cancelled(_)));
        assert!(server.requests().await.is_empty());
    }
}
