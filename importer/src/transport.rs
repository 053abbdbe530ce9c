//! Single-shot HTTP access to the shop API.
//!
//! A transport performs exactly one request per call. It reports the status
//! and headers of unsuccessful responses but never decides whether to retry;
//! that policy lives in [`crate::retry`].

use crate::counter;
use crate::credentials::Credentials;
use crate::metrics_defs::HTTP_REQUESTS;
use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use http::header::{CONTENT_TYPE, HeaderMap, HeaderValue, InvalidHeaderValue};
use std::time::Duration;
use url::Url;

pub const ACCESS_TOKEN_HEADER: &str = "X-Shopify-Access-Token";

/// A successful (2xx) response.
#[derive(Clone, Debug)]
pub struct Fetched {
    pub body: Bytes,
    pub headers: HeaderMap,
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum TransportError {
    /// Connection failures, timeouts and interrupted bodies.
    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected status {status}")]
    Http {
        status: StatusCode,
        headers: HeaderMap,
    },
}

impl TransportError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            TransportError::Network(_) => None,
            TransportError::Http { status, .. } => Some(*status),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &Url) -> Result<Fetched, TransportError>;
}

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("access token is not a valid header value")]
    InvalidAccessToken(#[from] InvalidHeaderValue),
    #[error("HTTP client error: {0}")]
    ReqwestError(#[from] reqwest::Error),
}

/// Transport backed by a shared reqwest client. Every request carries the
/// access token and a JSON content type.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(credentials: &Credentials, timeout: Duration) -> Result<Self, ClientError> {
        let mut token = HeaderValue::from_str(&credentials.access_token)?;
        token.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(ACCESS_TOKEN_HEADER, token);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(HttpTransport { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &Url) -> Result<Fetched, TransportError> {
        let response = match self.client.get(url.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                counter!(HTTP_REQUESTS, "outcome" => "network_error").increment(1);
                return Err(TransportError::Network(e.to_string()));
            }
        };

        let status = response.status();
        let headers = response.headers().clone();

        if !status.is_success() {
            counter!(HTTP_REQUESTS, "outcome" => status.as_u16().to_string()).increment(1);
            return Err(TransportError::Http { status, headers });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        counter!(HTTP_REQUESTS, "outcome" => "ok").increment(1);
        Ok(Fetched { body, headers })
    }
}
