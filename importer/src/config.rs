use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::retry::RetryPolicy;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("shop url must be an absolute http(s) url: {0}")]
    InvalidShopUrl(String),

    #[error("api version cannot be empty")]
    EmptyApiVersion,

    #[error("max_attempts must be at least 1")]
    InvalidMaxAttempts,

    #[error("max_rate_limit_waits must be at least 1")]
    InvalidMaxRateLimitWaits,

    #[error("pool_size must be at least 1")]
    InvalidPoolSize,

    #[error("max_pages must be at least 1")]
    InvalidMaxPages,

    #[error("page_limit must be at least 1")]
    InvalidPageLimit,
}

/// The remote shop the catalog is pulled from.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Shop {
    /// Storefront base, e.g. `https://example.myshopify.com/`.
    /// Product links and admin API urls are both built relative to it.
    pub url: Url,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Sent as the `limit` query parameter of the listing call when set.
    #[serde(default)]
    pub page_limit: Option<u32>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Retry {
    /// Attempts allowed for transient failures (network errors, 5xx), including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Wait between transient failures, and for a 429 without a usable Retry-After.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Rate limit waits are counted separately from `max_attempts`.
    #[serde(default = "default_max_rate_limit_waits")]
    pub max_rate_limit_waits: u32,
    /// Longest `Retry-After` honored. Larger hints are clamped to it.
    #[serde(default = "default_max_retry_after_ms")]
    pub max_retry_after_ms: u64,
}

impl Default for Retry {
    fn default() -> Self {
        Retry {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_rate_limit_waits: default_max_rate_limit_waits(),
            max_retry_after_ms: default_max_retry_after_ms(),
        }
    }
}

impl Retry {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_rate_limit_waits: self.max_rate_limit_waits,
            max_retry_after: Duration::from_millis(self.max_retry_after_ms),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Output {
    pub path: PathBuf,
}

impl Default for Output {
    fn default() -> Self {
        Output {
            path: PathBuf::from("products.json"),
        }
    }
}

/// Importer configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    pub shop: Shop,
    #[serde(default)]
    pub retry: Retry,
    /// Maximum number of enrichment calls in flight
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Upper bound on listing pages followed. 1 reads only the first page.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub output: Output,
}

impl Config {
    /// Configuration with every default applied for the given shop.
    pub fn new(shop_url: Url) -> Self {
        Config {
            shop: Shop {
                url: shop_url,
                api_version: default_api_version(),
                page_limit: None,
            },
            retry: Retry::default(),
            pool_size: default_pool_size(),
            max_pages: default_max_pages(),
            request_timeout_secs: default_request_timeout_secs(),
            output: Output::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let url = &self.shop.url;
        if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
            return Err(ValidationError::InvalidShopUrl(url.to_string()));
        }

        if self.shop.api_version.trim().is_empty() {
            return Err(ValidationError::EmptyApiVersion);
        }

        if self.shop.page_limit == Some(0) {
            return Err(ValidationError::InvalidPageLimit);
        }

        if self.retry.max_attempts == 0 {
            return Err(ValidationError::InvalidMaxAttempts);
        }

        // A 429 must always be waited out and retried at least once.
        if self.retry.max_rate_limit_waits == 0 {
            return Err(ValidationError::InvalidMaxRateLimitWaits);
        }

        if self.pool_size == 0 {
            return Err(ValidationError::InvalidPoolSize);
        }

        if self.max_pages == 0 {
            return Err(ValidationError::InvalidMaxPages);
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_api_version() -> String {
    "2021-01".into()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    2000
}

fn default_max_rate_limit_waits() -> u32 {
    20
}

fn default_max_retry_after_ms() -> u64 {
    60_000
}

fn default_pool_size() -> usize {
    10
}

fn default_max_pages() -> usize {
    1
}

fn default_request_timeout_secs() -> u64 {
    30
}
