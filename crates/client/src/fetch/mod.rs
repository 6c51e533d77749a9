//! HTTP fetch pipeline for the worker and the sync coordinator.
//!
//! ### Requests
//! - Absolute, canonical URLs (see [`url`]); fragments never reach the cache key.
//! - `reload` requests bypass intermediate HTTP caches (`Cache-Control: no-cache`).
//!
//! ### Failure model
//! - Only a missing response is an error. 404/500 responses are returned as
//!   values; callers decide whether they are cacheable.
//! - Every fetch is bounded: reqwest's own timeout plus [`fetch_with_timeout`]
//!   around any [`Network`] implementation.
//! - Max body bytes: 5MB (configurable)

pub mod classify;
pub mod url;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Url;
use reqwest::{Client, Method, StatusCode, header};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

pub use classify::{ResourceClass, classify};
pub use url::{Interception, PassReason, SiteScope, UrlError, canonicalize};

use swcache_core::{AppConfig, CachedResponse, Error, RequestKey};

/// An outgoing request as seen by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    /// The `Accept` header, when the page sent one.
    pub accept: Option<String>,
    /// Bypass HTTP caches between us and the origin.
    pub reload: bool,
}

impl Request {
    pub fn get(url: Url) -> Self {
        Self { method: Method::GET, url, accept: None, reload: false }
    }

    pub fn head(url: Url) -> Self {
        Self { method: Method::HEAD, ..Self::get(url) }
    }

    /// Replace the method with one given by name (case-insensitive).
    pub fn with_method(mut self, method: &str) -> Result<Self, Error> {
        self.method = Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|e| Error::InvalidInput(format!("invalid method {method:?}: {e}")))?;
        Ok(self)
    }

    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }

    pub fn reload(mut self) -> Self {
        self.reload = true;
        self
    }

    /// Whether the page asked for an HTML document.
    pub fn accepts_html(&self) -> bool {
        self.accept.as_deref().is_some_and(|a| a.contains("text/html"))
    }

    /// The cache key for this request.
    pub fn cache_key(&self) -> RequestKey {
        RequestKey::get(self.url.as_str())
    }
}

/// The network primitive: issue a request, get a response or a network error.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<FetchResponse, Error>;
}

/// Run `network.fetch` with an overall deadline.
///
/// An elapsed deadline is reported as `Error::FetchTimeout`, same as any other
/// network failure.
pub async fn fetch_with_timeout(network: &dyn Network, request: &Request, limit: Duration) -> Result<FetchResponse, Error> {
    match tokio::time::timeout(limit, network.fetch(request)).await {
        Ok(result) => result,
        Err(_) => Err(Error::FetchTimeout(format!("{} after {}ms", request.url, limit.as_millis()))),
    }
}

/// Configuration for the fetch client.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "swcache/0.1")
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 5MB)
    pub max_bytes: usize,

    /// Request timeout (default: 10s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "swcache/0.1".to_string(),
            max_bytes: 5 * 1024 * 1024,
            timeout: Duration::from_millis(10_000),
            max_redirects: 5,
        }
    }
}

impl FetchConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            max_bytes: config.max_bytes,
            timeout: config.fetch_timeout(),
            ..Default::default()
        }
    }
}

/// Response from a fetch operation.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// The original URL requested
    pub url: Url,
    /// The final URL after redirects
    pub final_url: Url,
    /// HTTP status code
    pub status: StatusCode,
    /// Content-Type header
    pub content_type: Option<String>,
    /// Response body bytes
    pub bytes: Bytes,
    /// Response headers
    pub headers: header::HeaderMap,
    /// Time taken to fetch in milliseconds
    pub fetch_ms: u64,
}

impl FetchResponse {
    /// Build a response without touching the network.
    pub fn synthetic(url: Url, status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> Self {
        let mut headers = header::HeaderMap::new();
        if let Ok(value) = header::HeaderValue::from_str(content_type) {
            headers.insert(header::CONTENT_TYPE, value);
        }
        Self {
            final_url: url.clone(),
            url,
            status,
            content_type: Some(content_type.to_string()),
            bytes: body.into(),
            headers,
            fetch_ms: 0,
        }
    }

    /// Exactly `200 OK`, the only status the strategies write into a bucket.
    pub fn is_cacheable(&self) -> bool {
        self.status == StatusCode::OK
    }

    /// Capture this response for storage. Headers that are not valid UTF-8 are dropped.
    pub fn to_cached(&self) -> CachedResponse {
        let headers: BTreeMap<String, String> = self
            .headers
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
            .collect();
        let reason = self.status.canonical_reason().unwrap_or("");
        CachedResponse::new(self.status.as_u16(), reason, headers, self.bytes.to_vec())
    }
}

/// HTTP fetch client backed by reqwest.
pub struct FetchClient {
    http: Client,
    config: FetchConfig,
}

impl FetchClient {
    /// Create a new fetch client with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }
}

fn map_reqwest_error(url: &Url, err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::FetchTimeout(format!("{}: {}", url, err))
    } else {
        Error::Network(format!("{}: {}", url, err))
    }
}

#[async_trait]
impl Network for FetchClient {
    /// Fetch a URL, returning raw bytes and metadata.
    ///
    /// Respects redirect/byte limits. Non-2xx statuses are not errors here.
    async fn fetch(&self, request: &Request) -> Result<FetchResponse, Error> {
        let start = Instant::now();
        let url = request.url.clone();

        let mut builder = self.http.request(request.method.clone(), url.as_str());
        if let Some(accept) = &request.accept {
            builder = builder.header(header::ACCEPT, accept);
        }
        if request.reload {
            builder = builder
                .header(header::CACHE_CONTROL, "no-cache")
                .header(header::PRAGMA, "no-cache");
        }

        let response = builder.send().await.map_err(|e| map_reqwest_error(&url, e))?;

        let status = response.status();

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_bytes
        {
            return Err(Error::FetchTooLarge(format!("{} bytes exceeds {}", len, self.config.max_bytes)));
        }

        let final_url = response.url().clone();
        let headers = response.headers().clone();

        let bytes = response.bytes().await.map_err(|e| map_reqwest_error(&url, e))?;

        if bytes.len() > self.config.max_bytes {
            return Err(Error::FetchTooLarge(format!(
                "{} bytes exceeds {}",
                bytes.len(),
                self.config.max_bytes
            )));
        }

        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let fetch_ms = start.elapsed().as_millis() as u64;

        tracing::debug!(
            url = %url,
            status = status.as_u16(),
            fetch_ms,
            bytes = bytes.len(),
            "fetched"
        );

        Ok(FetchResponse { url, final_url, status, content_type, bytes, headers, fetch_ms })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedNetwork;

    fn url(path: &str) -> Url {
        Url::parse("http://localhost:8080").unwrap().join(path).unwrap()
    }

    #[test]
    fn test_fetch_config_default() {
        let config = FetchConfig::default();
        assert_eq!(config.user_agent, "swcache/0.1");
        assert_eq!(config.max_bytes, 5 * 1024 * 1024);
        assert_eq!(config.timeout, Duration::from_millis(10_000));
        assert_eq!(config.max_redirects, 5);
    }

    #[test]
    fn test_fetch_config_from_app() {
        let app = AppConfig { fetch_timeout_ms: 2_500, user_agent: "council/2".into(), ..Default::default() };
        let config = FetchConfig::from_app(&app);
        assert_eq!(config.timeout, Duration::from_millis(2_500));
        assert_eq!(config.user_agent, "council/2");
    }

    #[test]
    fn test_request_accepts_html() {
        let req = Request::get(url("/about")).with_accept("text/html,application/xhtml+xml");
        assert!(req.accepts_html());
        assert!(!Request::get(url("/about")).accepts_html());
        assert_eq!(Request::head(url("/")).method, Method::HEAD);
    }

    #[test]
    fn test_request_with_method() {
        let req = Request::get(url("/contact")).with_method("post").unwrap();
        assert_eq!(req.method, Method::POST);
        assert!(Request::get(url("/")).with_method("BAD METHOD").is_err());
    }

    #[test]
    fn test_to_cached_keeps_status_and_headers() {
        let response = FetchResponse::synthetic(url("/css/style.css"), StatusCode::OK, "text/css", "body{}");
        let cached = response.to_cached();
        assert_eq!(cached.status, 200);
        assert_eq!(cached.status_text, "OK");
        assert_eq!(cached.content_type(), Some("text/css"));
        assert_eq!(cached.body, b"body{}");
    }

    #[test]
    fn test_only_200_is_cacheable() {
        let ok = FetchResponse::synthetic(url("/"), StatusCode::OK, "text/html", "");
        let partial = FetchResponse::synthetic(url("/"), StatusCode::PARTIAL_CONTENT, "text/html", "");
        let missing = FetchResponse::synthetic(url("/"), StatusCode::NOT_FOUND, "text/html", "");
        assert!(ok.is_cacheable());
        assert!(!partial.is_cacheable());
        assert!(!missing.is_cacheable());
    }

    #[tokio::test]
    async fn test_fetch_with_timeout_elapses() {
        let network = ScriptedNetwork::new();
        network.respond_after("/slow.css", Duration::from_millis(200), 200, "text/css", "late");

        let result = fetch_with_timeout(&network, &Request::get(url("/slow.css")), Duration::from_millis(20)).await;
        assert!(matches!(result, Err(Error::FetchTimeout(_))));
    }

    #[tokio::test]
    async fn test_fetch_client_new() {
        let client = FetchClient::new(FetchConfig::default());
        assert!(client.is_ok());
    }
}
