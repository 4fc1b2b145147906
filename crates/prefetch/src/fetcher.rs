//! # Resource Fetcher
//!
//! The fetch primitive behind the orchestrator, and its HTTP implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use rustls::{ClientConfig, crypto::ring};
use rustls_platform_verifier::BuilderVerifierExt;
use tracing::debug;
use url::Url;

use crate::error::CacheError;

const DEFAULT_USER_AGENT: &str = concat!("prefetch-cache/", env!("CARGO_PKG_VERSION"));

/// Fetches the payload behind a resource key.
///
/// Cancellation is done by dropping the returned future, so implementations
/// must not leave shared state half-updated across an `.await`.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(&self, key: &str) -> Result<Bytes, CacheError>;
}

#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    /// Overall timeout for a single request, zero disables it
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
    pub follow_redirects: bool,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            follow_redirects: true,
        }
    }
}

/// Create a reqwest Client with the provided configuration
pub fn create_client(config: &HttpFetcherConfig) -> Result<Client, CacheError> {
    let provider = Arc::new(ring::default_provider());

    let tls_config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| CacheError::Configuration(format!("TLS protocol versions: {e}")))?
        .with_platform_verifier()
        .map_err(|e| CacheError::Configuration(format!("Platform verifier: {e}")))?
        .with_no_client_auth();

    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(5)
        .user_agent(&config.user_agent)
        .use_preconfigured_tls(tls_config)
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.timeout.is_zero() {
        client_builder = client_builder.timeout(config.timeout);
    }

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    client_builder
        .build()
        .map_err(|e| CacheError::Configuration(format!("HTTP client: {e}")))
}

/// [`ResourceFetcher`] that treats keys as URLs and GETs them
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &HttpFetcherConfig) -> Result<Self, CacheError> {
        Ok(Self {
            client: create_client(config)?,
        })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResourceFetcher for HttpFetcher {
    async fn fetch(&self, key: &str) -> Result<Bytes, CacheError> {
        let url = Url::parse(key)
            .map_err(|e| CacheError::FetchFailed(format!("Invalid URL {key}: {e}")))?;

        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CacheError::FetchFailed(format!(
                "Server returned status code {status} for {url}"
            )));
        }

        let bytes = response.bytes().await?;
        debug!(url = %url, size = bytes.len(), "Fetched resource");
        Ok(bytes)
    }
}
