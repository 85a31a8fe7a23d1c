//! Retrying transport with bounded exponential backoff.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Method, Request, Response, StatusCode};
use std::collections::HashSet;
use std::time::Duration;

use super::Transport;
use crate::error::SimbaError;

/// Largest jitter ratio accepted by [`RetryPolicy::validate`].
pub const MAX_JITTER_RATIO: f64 = 0.5;

/// When and how long to wait before resending a request.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total sends, including the first
    pub max_attempts: u32,
    pub backoff_factor: Duration,
    pub max_backoff_wait: Duration,
    /// Relative spread of the random jitter, within `0..=0.5`
    pub jitter_ratio: f64,
    pub respect_retry_after_header: bool,
    pub retryable_methods: HashSet<Method>,
    pub retry_status_codes: HashSet<StatusCode>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_factor: Duration::from_millis(500),
            max_backoff_wait: Duration::from_secs(10),
            jitter_ratio: 0.1,
            respect_retry_after_header: true,
            retryable_methods: [
                Method::HEAD,
                Method::GET,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
                Method::TRACE,
            ]
            .into_iter()
            .collect(),
            retry_status_codes: [
                StatusCode::REQUEST_TIMEOUT,
                StatusCode::PAYLOAD_TOO_LARGE,
                StatusCode::TOO_MANY_REQUESTS,
                StatusCode::INTERNAL_SERVER_ERROR,
                StatusCode::BAD_GATEWAY,
                StatusCode::SERVICE_UNAVAILABLE,
                StatusCode::GATEWAY_TIMEOUT,
            ]
            .into_iter()
            .collect(),
        }
    }
}

impl RetryPolicy {
    /// Default policy with `max_attempts` sends.
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Also retry `method` on a retryable status.
    pub fn retry_method(mut self, method: Method) -> Self {
        self.retryable_methods.insert(method);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            anyhow::bail!(SimbaError::Config(
                "max_attempts must be at least 1".to_string()
            ));
        }
        if !(0.0..=MAX_JITTER_RATIO).contains(&self.jitter_ratio) {
            anyhow::bail!(SimbaError::Config(format!(
                "jitter_ratio must be between 0 and {}, got {}",
                MAX_JITTER_RATIO, self.jitter_ratio
            )));
        }
        Ok(())
    }

    pub fn is_retryable_method(&self, method: &Method) -> bool {
        self.retryable_methods.contains(method)
    }

    pub fn is_retryable_status(&self, status: StatusCode) -> bool {
        self.retry_status_codes.contains(&status)
    }

    /// Exponential backoff for the zero-based `attempt`, jittered and capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let max = self.max_backoff_wait.as_secs_f64();
        let base = (self.backoff_factor.as_secs_f64() * 2f64.powi(attempt.min(64) as i32)).min(max);
        let jitter = if self.jitter_ratio > 0.0 {
            rand::thread_rng().gen_range(-self.jitter_ratio..=self.jitter_ratio)
        } else {
            0.0
        };
        let secs = (base * (1.0 + jitter)).clamp(0.0, max);
        Duration::try_from_secs_f64(secs).unwrap_or(self.max_backoff_wait)
    }

    /// Delay requested by a `Retry-After` header, capped at `max_backoff_wait`.
    ///
    /// Accepts delta-seconds or an HTTP date; a date in the past yields `None`.
    pub fn retry_after(&self, headers: &HeaderMap) -> Option<Duration> {
        let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
        let wait = if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
            Duration::from_secs(value.parse().ok()?)
        } else {
            let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
            (at - Utc::now()).to_std().ok()?
        };
        Some(wait.min(self.max_backoff_wait))
    }

    /// Delay before the send following the zero-based `attempt`.
    pub fn delay_for(&self, attempt: u32, headers: Option<&HeaderMap>) -> Duration {
        headers
            .filter(|_| self.respect_retry_after_header)
            .and_then(|h| self.retry_after(h))
            .unwrap_or_else(|| self.backoff(attempt))
    }
}

/// Resends requests through the wrapped transport according to a [`RetryPolicy`].
///
/// The returned outcome is always that of the last attempt; an exhausted
/// budget hands back the last retryable response unchanged.
pub struct RetryTransport<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T: Transport> RetryTransport<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Result<Self> {
        policy.validate()?;
        Ok(Self { inner, policy })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: Transport> Transport for RetryTransport<T> {
    #[tracing::instrument(skip(self, request))]
    async fn send(&self, request: Request) -> Result<Response> {
        let retryable_method = self.policy.is_retryable_method(request.method());
        let label = format!("{} {}", request.method(), request.url());
        let max_attempts = self.policy.max_attempts;

        let mut request = request;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let spare = if attempt < max_attempts {
                request.try_clone()
            } else {
                None
            };
            if spare.is_none() && attempt < max_attempts {
                debug!("{}: body cannot be replayed, sending once", label);
            }

            let outcome = self.inner.send(request).await;
            let retry = match &outcome {
                Ok(response) => retryable_method && self.policy.is_retryable_status(response.status()),
                Err(_) => true,
            };
            let Some(next) = spare.filter(|_| retry) else {
                return outcome;
            };

            let delay = match &outcome {
                Ok(response) => {
                    let delay = self.policy.delay_for(attempt - 1, Some(response.headers()));
                    warn!(
                        "{}: attempt {}/{} returned HTTP {}, retrying in {}ms...",
                        label,
                        attempt,
                        max_attempts,
                        response.status().as_u16(),
                        delay.as_millis()
                    );
                    delay
                }
                Err(e) => {
                    let delay = self.policy.delay_for(attempt - 1, None);
                    warn!(
                        "{}: attempt {}/{} failed ({}), retrying in {}ms...",
                        label,
                        attempt,
                        max_attempts,
                        e,
                        delay.as_millis()
                    );
                    delay
                }
            };
            // Release the connection before sleeping.
            drop(outcome);
            tokio::time::sleep(delay).await;
            request = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::MockTransport;
    use reqwest::header::HeaderValue;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn response(status: u16) -> Response {
        Response::from(
            http::Response::builder()
                .status(status)
                .body("")
                .unwrap(),
        )
    }

    fn request(method: Method) -> Request {
        Request::new(method, "http://localhost/v2/apps/".parse().unwrap())
    }

    fn no_jitter(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            jitter_ratio: 0.0,
            ..RetryPolicy::with_max_attempts(max_attempts)
        }
    }

    /// Mock transport replying with `statuses` in order, counting sends.
    fn scripted(statuses: &'static [u16]) -> (MockTransport, Arc<AtomicUsize>) {
        let sends = Arc::new(AtomicUsize::new(0));
        let counter = sends.clone();
        let mut transport = MockTransport::new();
        transport.expect_send().returning(move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(response(statuses[n.min(statuses.len() - 1)]))
        });
        (transport, sends)
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert!(policy.is_retryable_method(&Method::GET));
        assert!(!policy.is_retryable_method(&Method::POST));
        for status in [408, 413, 429, 500, 502, 503, 504] {
            assert!(policy.is_retryable_status(StatusCode::from_u16(status).unwrap()));
        }
        assert!(!policy.is_retryable_status(StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_validate_rejects_bad_policy() {
        let policy = RetryPolicy {
            jitter_ratio: 0.6,
            ..RetryPolicy::default()
        };
        let err = policy.validate().unwrap_err();
        assert!(matches!(err.downcast_ref::<SimbaError>(), Some(SimbaError::Config(_))));

        assert!(RetryPolicy::with_max_attempts(0).validate().is_err());
        assert!(RetryPolicy::default().validate().is_ok());
    }

    #[test]
    fn test_backoff_grows_and_is_capped() {
        let policy = no_jitter(5);
        assert_eq!(policy.backoff(0), Duration::from_millis(500));
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(10), Duration::from_secs(10));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_backoff_jitter_stays_in_range() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let delay = policy.backoff(2);
            assert!(delay >= Duration::from_millis(1800), "{:?}", delay);
            assert!(delay <= Duration::from_millis(2200), "{:?}", delay);
        }
    }

    #[test]
    fn test_retry_after_seconds_is_capped() {
        let policy = RetryPolicy::default();
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("2"));
        assert_eq!(policy.retry_after(&headers), Some(Duration::from_secs(2)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("120"));
        assert_eq!(policy.delay_for(0, Some(&headers)), Duration::from_secs(10));
    }

    #[test]
    fn test_retry_after_date() {
        let policy = RetryPolicy::default();
        let mut headers = HeaderMap::new();

        let future = (Utc::now() + chrono::Duration::seconds(60)).to_rfc2822();
        headers.insert(RETRY_AFTER, HeaderValue::from_str(&future).unwrap());
        assert_eq!(policy.retry_after(&headers), Some(Duration::from_secs(10)));

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(policy.retry_after(&headers), None);
    }

    #[test]
    fn test_retry_after_ignored_when_disabled() {
        let policy = RetryPolicy {
            respect_retry_after_header: false,
            ..no_jitter(3)
        };
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(policy.delay_for(0, Some(&headers)), Duration::from_millis(500));
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_retries_until_success() {
        let (transport, sends) = scripted(&[503, 502, 200]);
        let retry = RetryTransport::new(transport, no_jitter(3)).unwrap();

        let start = tokio::time::Instant::now();
        let response = retry.send(request(Method::GET)).await.unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(sends.load(Ordering::SeqCst), 3);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1500), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(1600), "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_response() {
        let (transport, sends) = scripted(&[503, 503, 504]);
        let retry = RetryTransport::new(transport, no_jitter(3)).unwrap();

        let response = retry.send(request(Method::GET)).await.unwrap();

        assert_eq!(response.status(), 504);
        assert_eq!(sends.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_is_not_retried_by_default() {
        let (transport, sends) = scripted(&[503, 200]);
        let retry = RetryTransport::new(transport, RetryPolicy::default()).unwrap();

        let response = retry.send(request(Method::POST)).await.unwrap();

        assert_eq!(response.status(), 503);
        assert_eq!(sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_retried_when_configured() {
        let (transport, sends) = scripted(&[503, 200]);
        let policy = RetryPolicy::default().retry_method(Method::POST);
        let retry = RetryTransport::new(transport, policy).unwrap();

        let response = retry.send(request(Method::POST)).await.unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(sends.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_status_returned_immediately() {
        let (transport, sends) = scripted(&[404, 200]);
        let retry = RetryTransport::new(transport, RetryPolicy::default()).unwrap();

        let response = retry.send(request(Method::GET)).await.unwrap();

        assert_eq!(response.status(), 404);
        assert_eq!(sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_errors_retried_for_any_method() {
        let sends = Arc::new(AtomicUsize::new(0));
        let counter = sends.clone();
        let mut transport = MockTransport::new();
        transport.expect_send().returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(anyhow::anyhow!("connection reset by peer"))
            } else {
                Ok(response(201))
            }
        });
        let retry = RetryTransport::new(transport, RetryPolicy::default()).unwrap();

        let response = retry.send(request(Method::POST)).await.unwrap();

        assert_eq!(response.status(), 201);
        assert_eq!(sends.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_error_surfaces_after_budget() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .times(2)
            .returning(|_| Err(anyhow::anyhow!("operation timed out")));
        let retry = RetryTransport::new(transport, no_jitter(2)).unwrap();

        let err = retry.send(request(Method::GET)).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_streamed_body_sent_once() {
        let (transport, sends) = scripted(&[503, 200]);
        let policy = RetryPolicy::default().retry_method(Method::POST);
        let retry = RetryTransport::new(transport, policy).unwrap();

        let form = reqwest::multipart::Form::new().text("name", "value");
        let request = reqwest::Client::new()
            .post("http://localhost/v2/apps/")
            .multipart(form)
            .build()
            .unwrap();
        assert!(request.try_clone().is_none());

        let response = retry.send(request).await.unwrap();
        assert_eq!(response.status(), 503);
        assert_eq!(sends.load(Ordering::SeqCst), 1);
    }
}
