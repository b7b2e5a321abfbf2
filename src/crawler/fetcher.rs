//! HTTP fetcher implementation
//!
//! This module handles all network requests for the crawler, including:
//! - The `Fetcher` seam the orchestrator and asset worker call through
//! - Building HTTP clients with the configured user agent
//! - Applying book headers and the per-host limiter
//! - Error classification (transient vs permanent)

use crate::crawler::limiter::{HostLimit, HostLimiter, QueueWatch};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Why a single request failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Connection, DNS, TLS or timeout failure
    #[error("network error for {url}: {message}")]
    Network {
        url: String,
        message: String,
        timeout: bool,
    },

    /// The server answered with a non-2xx status
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    /// The body could not be read
    #[error("failed to read body of {url}: {message}")]
    Body { url: String, message: String },

    /// The crawl was cancelled while the request was pending
    #[error("request for {url} cancelled")]
    Cancelled { url: String },
}

impl FetchError {
    /// Returns true if re-issuing the identical request may succeed
    ///
    /// | Condition | Transient |
    /// |-----------|-----------|
    /// | Network error / timeout | yes |
    /// | Body read error | yes |
    /// | HTTP 408, 429, 5xx | yes |
    /// | Other HTTP status | no |
    /// | Cancelled | no |
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Body { .. } => true,
            Self::Status { status, .. } => {
                *status == 408 || *status == 429 || (500..600).contains(status)
            }
            Self::Cancelled { .. } => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// The URL the failed request targeted
    pub fn url(&self) -> &str {
        match self {
            Self::Network { url, .. }
            | Self::Status { url, .. }
            | Self::Body { url, .. }
            | Self::Cancelled { url } => url,
        }
    }
}

/// One request as issued by the crawler
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    /// Opaque headers from book configuration
    pub headers: Arc<HashMap<String, String>>,
    pub limit: HostLimit,
    /// Notified while the request waits for its host slot
    pub watch: Option<QueueWatch>,
}

impl FetchRequest {
    /// A GET request for `url` carrying the given headers and host limit
    pub fn get(url: Url, headers: Arc<HashMap<String, String>>, limit: HostLimit) -> Self {
        Self {
            method: Method::GET,
            url,
            headers,
            limit,
            watch: None,
        }
    }

    pub fn with_watch(mut self, watch: QueueWatch) -> Self {
        self.watch = Some(watch);
        self
    }

    /// The same request pointed at another URL
    pub fn for_url(&self, url: Url) -> Self {
        Self {
            url,
            ..self.clone()
        }
    }
}

/// A successful response
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// Final URL after redirects
    pub url: Url,
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl FetchResponse {
    /// Body decoded as UTF-8, replacing invalid sequences
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Content-Type header value, if present
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}

/// The network seam: issue one request, get a body or a failure
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn request(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError>;
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `user_agent` - User agent string sent with every request
///
/// # Example
///
/// ```no_run
/// use shiori::crawler::build_http_client;
///
/// let client = build_http_client("shiori/0.1").unwrap();
/// ```
pub fn build_http_client(user_agent: &str) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent)
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// reqwest-backed `Fetcher` honoring the per-host limiter
pub struct HttpFetcher {
    client: Client,
    limiter: HostLimiter,
}

impl HttpFetcher {
    /// Builds a fetcher with its own client and limiter
    pub fn with_user_agent(user_agent: &str) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(user_agent)?,
            limiter: HostLimiter::new(),
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn request(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let url_str = request.url.to_string();

        let ticket = request.watch.as_ref().map(QueueWatch::enter);
        let _permit = self
            .limiter
            .acquire(&request.url, request.limit)
            .await
            .ok_or_else(|| FetchError::Cancelled {
                url: url_str.clone(),
            })?;
        drop(ticket);

        tracing::trace!("{} {}", request.method, url_str);

        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(build_header_map(&request.headers))
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&url_str, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url_str,
                status: status.as_u16(),
            });
        }

        let final_url = response.url().clone();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| FetchError::Body {
            url: url_str.clone(),
            message: e.to_string(),
        })?;

        Ok(FetchResponse {
            url: final_url,
            status: status.as_u16(),
            headers,
            body: body.to_vec(),
        })
    }
}

/// Converts configured headers, skipping names or values reqwest rejects
fn build_header_map(headers: &HashMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => tracing::warn!("Skipping invalid header '{}'", name),
        }
    }
    map
}

fn classify_reqwest_error(url: &str, error: reqwest::Error) -> FetchError {
    if let Some(status) = error.status() {
        return FetchError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        };
    }

    let message = if error.is_timeout() {
        "Request timeout".to_string()
    } else if error.is_connect() {
        format!("Connection failed: {}", error)
    } else {
        error.to_string()
    };

    FetchError::Network {
        url: url.to_string(),
        message,
        timeout: error.is_timeout(),
    }
}
