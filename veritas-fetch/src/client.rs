//! HTTP client for page retrieval
//!
//! Builds reqwest clients with browser user agents and an optional proxy,
//! behind the [`HttpFetch`] trait so extraction can run against any source.

use async_trait::async_trait;
use reqwest::{Client, Proxy};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Fetch configuration
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Optional proxy URL (http or https)
    pub proxy: Option<String>,
    /// Per-attempt timeout in seconds
    pub timeout_secs: u64,
    /// Total attempts per URL, including the first
    pub max_attempts: u32,
    /// Backoff unit; attempt `n` waits `n` units before retrying
    pub backoff_base: Duration,
    /// A content region must exceed this many characters to be chosen
    pub min_region_chars: usize,
    /// Maximum characters kept from a page
    pub max_content_chars: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            timeout_secs: 10,
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            min_region_chars: 100,
            max_content_chars: 8000,
        }
    }
}

impl FetchConfig {
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_backoff(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_proxy(mut self, proxy: &str) -> Self {
        self.proxy = Some(proxy.to_string());
        self
    }
}

/// Errors from page retrieval
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(e) => !e.is_builder() && !e.is_redirect() && !e.is_decode(),
            Self::Timeout(_) => true,
            Self::Status(code) => matches!(code, 408 | 429 | 500..=599),
            Self::ClientBuild(_) | Self::InvalidUrl(_) => false,
        }
    }
}

/// Raw page returned by a fetcher
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL after redirects
    pub url: String,
    /// Decoded response body
    pub body: String,
}

/// Generic HTTP GET capability
#[async_trait]
pub trait HttpFetch: Send + Sync {
    /// Fetch a URL; non-success statuses are errors
    async fn get(&self, url: &str) -> Result<FetchedPage, FetchError>;
}

/// Thread-safe reference to a fetcher
pub type SharedFetcher = Arc<dyn HttpFetch>;

/// User agents for rotation
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:137.0) Gecko/20100101 Firefox/137.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.7; rv:137.0) Gecko/20100101 Firefox/137.0",
];

/// Get a random user agent
pub fn random_user_agent() -> &'static str {
    use rand::Rng;
    let idx = rand::thread_rng().gen_range(0..USER_AGENTS.len());
    USER_AGENTS[idx]
}

/// Create an HTTP client for page retrieval
pub fn create_client(config: &FetchConfig) -> Result<Client, FetchError> {
    let mut builder = Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent(random_user_agent());

    if let Some(proxy) = &config.proxy {
        let proxy = Proxy::all(proxy).map_err(|e| FetchError::ClientBuild(e.to_string()))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| FetchError::ClientBuild(e.to_string()))
}

/// reqwest-backed fetcher
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: Client,
    timeout_secs: u64,
}

impl ReqwestFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        Ok(Self {
            client: create_client(config)?,
            timeout_secs: config.timeout_secs,
        })
    }

    /// Wrap as a shared fetcher
    pub fn shared(config: &FetchConfig) -> Result<SharedFetcher, FetchError> {
        Ok(Arc::new(Self::new(config)?))
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetcher {
    async fn get(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(self.timeout_secs)
            } else {
                FetchError::Request(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let final_url = response.url().to_string();
        // text() honors the charset from Content-Type
        let body = response.text().await?;

        Ok(FetchedPage {
            url: final_url,
            body,
        })
    }
}
