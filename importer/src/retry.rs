//! Bounded retries on top of a [`Transport`].
//!
//! Two kinds of failure are retried, each with its own budget:
//! - 429 responses always wait (the server's `Retry-After` if usable, capped at
//!   `max_retry_after`, the base delay otherwise) and are counted against
//!   `max_rate_limit_waits`.
//! - Network errors and 5xx responses wait the base delay and are counted
//!   against `max_attempts`.
//!
//! Every other status is returned immediately, as is a body that fails to parse.

use crate::counter;
use crate::metrics_defs::{RATE_LIMITED, TRANSIENT_RETRIES};
use crate::transport::{Fetched, Transport, TransportError};
use http::StatusCode;
use http::header::{HeaderMap, RETRY_AFTER};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use url::Url;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_rate_limit_waits: u32,
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(2000),
            max_rate_limit_waits: 20,
            max_retry_after: Duration::from_secs(60),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("gave up after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: TransportError,
    },
    #[error("still rate limited after waiting {waits} times")]
    Throttled { waits: u32 },
    #[error("request rejected: {0}")]
    Rejected(TransportError),
    #[error("could not parse response: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Per-call retry bookkeeping.
#[derive(Debug, Default)]
struct RetryState {
    failures: u32,
    rate_limit_waits: u32,
}

enum Next {
    Wait(Duration),
    GiveUp(FetchError),
}

impl RetryState {
    fn on_failure(&mut self, err: TransportError, policy: &RetryPolicy) -> Next {
        match err.status() {
            Some(StatusCode::TOO_MANY_REQUESTS) => {
                if self.rate_limit_waits >= policy.max_rate_limit_waits {
                    return Next::GiveUp(FetchError::Throttled {
                        waits: self.rate_limit_waits,
                    });
                }
                self.rate_limit_waits += 1;
                let hint = match &err {
                    TransportError::Http { headers, .. } => retry_hint(headers),
                    TransportError::Network(_) => None,
                };
                Next::Wait(match hint {
                    Some(hint) => hint.min(policy.max_retry_after),
                    None => policy.base_delay,
                })
            }
            None => self.on_transient(err, policy),
            Some(status) if status.is_server_error() => self.on_transient(err, policy),
            Some(_) => Next::GiveUp(FetchError::Rejected(err)),
        }
    }

    fn on_transient(&mut self, err: TransportError, policy: &RetryPolicy) -> Next {
        self.failures += 1;
        if self.failures >= policy.max_attempts {
            Next::GiveUp(FetchError::Exhausted {
                attempts: self.failures,
                source: err,
            })
        } else {
            Next::Wait(policy.base_delay)
        }
    }
}

/// Parses `Retry-After` as a non-negative number of seconds, fractions allowed.
pub fn retry_hint(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?;
    let secs: f64 = value.trim().parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(secs).ok()
}

#[derive(Clone)]
pub struct RetryingFetcher {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl RetryingFetcher {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        RetryingFetcher { transport, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn fetch(&self, url: &Url) -> Result<Fetched, FetchError> {
        let mut state = RetryState::default();

        loop {
            let err = match self.transport.get(url).await {
                Ok(fetched) => return Ok(fetched),
                Err(err) => err,
            };

            let rate_limited = err.status() == Some(StatusCode::TOO_MANY_REQUESTS);
            match state.on_failure(err, &self.policy) {
                Next::GiveUp(err) => return Err(err),
                Next::Wait(delay) => {
                    if rate_limited {
                        counter!(RATE_LIMITED).increment(1);
                        tracing::warn!(
                            %url,
                            delay_ms = delay.as_millis() as u64,
                            wait = state.rate_limit_waits,
                            "Rate limit reached, retrying after {} ms",
                            delay.as_millis()
                        );
                    } else {
                        counter!(TRANSIENT_RETRIES).increment(1);
                        tracing::warn!(
                            %url,
                            delay_ms = delay.as_millis() as u64,
                            attempt = state.failures,
                            "Request failed, retrying after {} ms",
                            delay.as_millis()
                        );
                    }
                    sleep(delay).await;
                }
            }
        }
    }

    /// Fetches `url` and decodes the body. Response headers are returned alongside.
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        url: &Url,
    ) -> Result<(T, HeaderMap), FetchError> {
        let fetched = self.fetch(url).await?;
        let data = serde_json::from_slice(&fetched.body)?;
        Ok((data, fetched.headers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{ScriptedTransport, ok_json, rate_limited, status};
    use http::HeaderValue;
    use tokio::time::Instant;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(2000),
            max_rate_limit_waits: 3,
            max_retry_after: Duration::from_secs(60),
        }
    }

    fn url() -> Url {
        Url::parse("https://shop.example.com/admin/api/2021-01/products.json").unwrap()
    }

    fn headers(retry_after: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_str(retry_after).unwrap());
        headers
    }

    #[test]
    fn test_retry_hint() {
        assert_eq!(retry_hint(&headers("2")), Some(Duration::from_secs(2)));
        assert_eq!(retry_hint(&headers("0.5")), Some(Duration::from_millis(500)));
        assert_eq!(retry_hint(&headers(" 1.25 ")), Some(Duration::from_millis(1250)));
        assert_eq!(retry_hint(&headers("0")), Some(Duration::ZERO));
        assert_eq!(retry_hint(&headers("-1")), None);
        assert_eq!(retry_hint(&headers("NaN")), None);
        assert_eq!(retry_hint(&headers("inf")), None);
        assert_eq!(retry_hint(&headers("Wed, 21 Oct 2015 07:28:00 GMT")), None);
        assert_eq!(retry_hint(&HeaderMap::new()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_honors_hint() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(&url(), rate_limited(Some("2")));
        transport.push(&url(), ok_json(r#"{"ok":true}"#));

        let fetcher = RetryingFetcher::new(transport.clone(), policy());
        let start = Instant::now();
        let fetched = fetcher.fetch(&url()).await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(2000));
        assert_eq!(&fetched.body[..], br#"{"ok":true}"#);
        assert_eq!(transport.calls(&url()), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_hint_is_capped() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(&url(), rate_limited(Some("1e9")));
        transport.push(&url(), ok_json("{}"));

        let policy = RetryPolicy {
            max_retry_after: Duration::from_secs(30),
            ..policy()
        };
        let fetcher = RetryingFetcher::new(transport.clone(), policy);
        let start = Instant::now();
        fetcher.fetch(&url()).await.unwrap();

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(30));
        assert!(elapsed < Duration::from_secs(31));
        assert_eq!(transport.calls(&url()), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_without_hint_uses_base_delay() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(&url(), rate_limited(None));
        transport.push(&url(), rate_limited(Some("soon")));
        transport.push(&url(), ok_json("{}"));

        let fetcher = RetryingFetcher::new(transport.clone(), policy());
        let start = Instant::now();
        fetcher.fetch(&url()).await.unwrap();

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(4000));
        assert!(elapsed < Duration::from_millis(4100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_does_not_consume_attempts() {
        let transport = Arc::new(ScriptedTransport::new());
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(10),
            max_rate_limit_waits: 5,
            max_retry_after: Duration::from_secs(60),
        };
        // One network failure plus several 429s still fits in two attempts
        transport.push(&url(), Err(TransportError::Network("reset".into())));
        for _ in 0..4 {
            transport.push(&url(), rate_limited(Some("0")));
        }
        transport.push(&url(), ok_json("{}"));

        let fetcher = RetryingFetcher::new(transport.clone(), policy);
        assert!(fetcher.fetch(&url()).await.is_ok());
        assert_eq!(transport.calls(&url()), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_waits_are_bounded() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.set_fallback(rate_limited(Some("1")));

        let fetcher = RetryingFetcher::new(transport.clone(), policy());
        let err = fetcher.fetch(&url()).await.unwrap_err();

        assert!(matches!(err, FetchError::Throttled { waits: 3 }));
        assert_eq!(transport.calls(&url()), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_errors_exhaust() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.set_fallback(Err(TransportError::Network("connection refused".into())));

        let fetcher = RetryingFetcher::new(transport.clone(), policy());
        let start = Instant::now();
        let err = fetcher.fetch(&url()).await.unwrap_err();

        assert!(matches!(
            err,
            FetchError::Exhausted {
                attempts: 5,
                source: TransportError::Network(_)
            }
        ));
        assert_eq!(transport.calls(&url()), 5);
        // Four constant waits between five attempts
        assert_eq!(start.elapsed().as_millis() / 1000, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_is_transient() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(&url(), status(502));
        transport.push(&url(), ok_json("{}"));

        let fetcher = RetryingFetcher::new(transport.clone(), policy());
        assert!(fetcher.fetch(&url()).await.is_ok());
        assert_eq!(transport.calls(&url()), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_not_retried() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.set_fallback(status(404));

        let fetcher = RetryingFetcher::new(transport.clone(), policy());
        let err = fetcher.fetch(&url()).await.unwrap_err();

        assert!(matches!(err, FetchError::Rejected(_)));
        assert_eq!(transport.calls(&url()), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parse_error_not_retried() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.set_fallback(ok_json("<html>maintenance</html>"));

        let fetcher = RetryingFetcher::new(transport.clone(), policy());
        let result = fetcher.fetch_json::<serde_json::Value>(&url()).await;

        assert!(matches!(result, Err(FetchError::Parse(_))));
        assert_eq!(transport.calls(&url()), 1);
    }
}
