use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, Response, Url};
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{IntakeError, NetworkError, Result};

/// Media types accepted as XML
pub const XML_MEDIA_TYPES: [&str; 2] = ["text/xml", "application/xml"];

/// Browser-like user agent; some hosts refuse obvious crawlers
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.11 (KHTML, like Gecko) Chrome/23.0.1271.64 Safari/537.11";

/// Check whether a declared media type counts as XML
pub fn is_acceptable_xml(media_type: &str) -> bool {
    let media_type = media_type.trim();
    XML_MEDIA_TYPES
        .iter()
        .any(|accepted| media_type.eq_ignore_ascii_case(accepted))
}

/// Primary media type of a `Content-Type` header value: text before the first `;`, lowercased
pub fn primary_media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Remote side of a URL submission
///
/// The pipeline only talks to the network through this trait, so tests can
/// observe which calls were made.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Issue a header-only request and return the primary media type
    ///
    /// A missing `Content-Type` header yields an empty string.
    async fn probe_content_type(&self, url: &str) -> Result<String>;

    /// Download the body of `url` into `dest`, returning the number of bytes written
    async fn fetch_into(&self, url: &str, dest: &mut tokio::fs::File) -> Result<u64>;
}

/// Configuration for the HTTP client
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout in seconds, applied to the probe and to the whole fetch
    pub timeout_seconds: u64,
    /// User agent string
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            user_agent: BROWSER_USER_AGENT.to_string(),
        }
    }
}

/// reqwest-backed [`RemoteSource`]
///
/// No retries: a failed probe or fetch ends the submission.
pub struct AsyncHttpClient {
    client: Client,
    config: HttpClientConfig,
}

impl AsyncHttpClient {
    /// Create a new async HTTP client with the given configuration
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(&config.user_agent)
            .default_headers(browser_headers())
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|source| NetworkError::Transport {
                url: String::new(),
                source,
            })?;

        Ok(Self { client, config })
    }

    fn parse_url(url: &str) -> Result<Url> {
        let parsed = Url::parse(url).map_err(|e| NetworkError::InvalidUrl {
            url: url.to_string(),
            details: e.to_string(),
        })?;

        match parsed.scheme() {
            "http" | "https" => Ok(parsed),
            other => Err(NetworkError::InvalidUrl {
                url: url.to_string(),
                details: format!("unsupported scheme '{}'", other),
            }
            .into()),
        }
    }

    /// Send a request with timeout and turn non-success statuses into errors
    async fn send(&self, request: reqwest::RequestBuilder, url: &str) -> Result<Response> {
        let response = timeout(self.timeout(), request.send())
            .await
            .map_err(|_| self.timeout_error(url))?
            .map_err(|source| self.transport_error(url, source))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            }
            .into());
        }

        Ok(response)
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_seconds)
    }

    fn timeout_error(&self, url: &str) -> NetworkError {
        NetworkError::Timeout {
            url: url.to_string(),
            timeout_ms: self.config.timeout_seconds * 1000,
        }
    }

    fn transport_error(&self, url: &str, source: reqwest::Error) -> NetworkError {
        if source.is_timeout() {
            self.timeout_error(url)
        } else {
            NetworkError::Transport {
                url: url.to_string(),
                source,
            }
        }
    }

    /// Get the client configuration
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }
}

#[async_trait]
impl RemoteSource for AsyncHttpClient {
    async fn probe_content_type(&self, url: &str) -> Result<String> {
        let parsed = Self::parse_url(url)?;
        debug!(%url, "Probing content type");

        let response = self.send(self.client.head(parsed), url).await?;
        let media_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(primary_media_type)
            .unwrap_or_default();

        debug!(%url, %media_type, "Probe finished");
        Ok(media_type)
    }

    async fn fetch_into(&self, url: &str, dest: &mut tokio::fs::File) -> Result<u64> {
        let parsed = Self::parse_url(url)?;
        let response = self.send(self.client.get(parsed), url).await?;

        let mut written = 0u64;
        let mut stream = std::pin::pin!(response.bytes_stream());
        loop {
            let chunk = match timeout(self.timeout(), stream.try_next()).await {
                Ok(Ok(Some(chunk))) => chunk,
                Ok(Ok(None)) => break,
                Ok(Err(source)) => return Err(self.transport_error(url, source).into()),
                Err(_) => return Err(self.timeout_error(url).into()),
            };
            dest.write_all(&chunk).await.map_err(IntakeError::Io)?;
            written += chunk.len() as u64;
        }
        dest.flush().await?;

        debug!(%url, bytes = written, "Fetch finished");
        Ok(written)
    }
}

/// Header set sent with every request; some hosts block requests without them
fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(
        header::ACCEPT_CHARSET,
        HeaderValue::from_static("ISO-8859-1,utf-8;q=0.7,*;q=0.3"),
    );
    headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("none"));
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.8"),
    );
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers
}
