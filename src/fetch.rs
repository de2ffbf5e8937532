//! Network fetch abstraction.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE, PRAGMA};

use crate::config::FetchConfig;
use crate::error::{Error, Result};
use crate::response::Response;

/// How a fetch may interact with intermediate HTTP caches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheMode {
    /// Normal request.
    #[default]
    Default,
    /// Bypass intermediate caches and revalidate with the origin.
    Reload,
}

/// A read request, either intercepted from a client or issued by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// HTTP method, upper case.
    pub method: String,
    /// Absolute request URL.
    pub url: String,
    /// Cache interaction mode.
    pub cache_mode: CacheMode,
}

impl Request {
    /// Creates a `GET` request.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            cache_mode: CacheMode::Default,
        }
    }

    /// Creates a request with an arbitrary method.
    #[must_use]
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            ..Self::get(url)
        }
    }

    /// Switches the request to [`CacheMode::Reload`].
    #[must_use]
    pub fn reload(mut self) -> Self {
        self.cache_mode = CacheMode::Reload;
        self
    }

    /// Returns true for `GET` requests.
    #[must_use]
    pub fn is_get(&self) -> bool {
        self.method == "GET"
    }
}

/// Abstraction over the network for testability.
///
/// Implementations return `Err` only when no response was obtained at all.
/// Non-success statuses are returned as `Ok` responses.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Performs the request.
    async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// Default fetcher backed by a `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Wraps an existing client.
    #[must_use]
    pub const fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Builds a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn from_config(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs))
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .tcp_keepalive(Duration::from_secs(30))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| Error::InvalidMethod(request.method.clone()))?;
        let mut builder = self.client.request(method, &request.url);
        if request.cache_mode == CacheMode::Reload {
            builder = builder.header(CACHE_CONTROL, "no-cache").header(PRAGMA, "no-cache");
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?;

        log::debug!("Fetched {} -> {status} ({} bytes)", request.url, body.len());
        Ok(Response {
            status,
            content_type,
            body,
        })
    }
}
