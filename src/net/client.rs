//! Generic HTTP client shared by the provider adapters.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, ClientBuilder};

/// Default user agent for outbound provider calls.
pub const USER_AGENT: &str = concat!("aigate/", env!("CARGO_PKG_VERSION"));

/// Default connection timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default transport timeout for one provider call, including streaming.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// HTTP client wrapper.
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
}

impl HttpClient {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    pub fn inner(&self) -> &Client {
        &self.inner
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`HttpClient`].
pub struct HttpClientBuilder {
    builder: ClientBuilder,
    headers: HeaderMap,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            builder: Client::builder()
                .user_agent(USER_AGENT)
                .connect_timeout(CONNECT_TIMEOUT)
                .timeout(REQUEST_TIMEOUT),
            headers: HeaderMap::new(),
        }
    }
}

impl HttpClientBuilder {
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.builder = self.builder.connect_timeout(timeout);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.builder = self.builder.timeout(timeout);
        self
    }

    /// Send `name: value` on every request. Invalid header values are
    /// ignored with a warning.
    pub fn default_header(mut self, name: &'static str, value: &str) -> Self {
        match HeaderValue::from_str(value) {
            Ok(v) => {
                self.headers.insert(HeaderName::from_static(name), v);
            }
            Err(e) => tracing::warn!(header = name, error = %e, "Ignoring invalid header value"),
        }
        self
    }

    /// Build the client, falling back to reqwest defaults if the TLS backend
    /// rejects the configuration.
    pub fn build(self) -> HttpClient {
        let inner = match self.builder.default_headers(self.headers).build() {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("Failed to build HTTP client with custom config: {}; using defaults", e);
                Client::default()
            }
        };
        HttpClient { inner }
    }
}
