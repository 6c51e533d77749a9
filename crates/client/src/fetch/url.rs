//! URL canonicalization and the worker's interception scope.

use reqwest::Method;
use swcache_core::{AppConfig, Error};

use super::Request;

/// Error type for URL canonicalization failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<UrlError> for Error {
    fn from(err: UrlError) -> Self {
        Error::InvalidUrl(err.to_string())
    }
}

/// Canonicalize an absolute URL string for consistent cache keys.
///
/// Normalization steps:
/// 1. Trim leading/trailing whitespace
/// 2. Lowercase the host
/// 3. Remove fragment (#...)
/// 4. Keep query string intact (do not reorder)
pub fn canonicalize(input: &str) -> Result<url::Url, UrlError> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let mut parsed = url::Url::parse(trimmed).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlError::UnsupportedScheme(scheme.to_string())),
    }

    if let Some(host) = parsed.host_str() {
        let host = host.to_lowercase();
        parsed
            .set_host(Some(&host))
            .map_err(|e| UrlError::InvalidUrl(e.to_string()))?;
    }

    parsed.set_fragment(None);

    Ok(parsed)
}

/// Why a request was left to the browser instead of being intercepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassReason {
    /// The worker is not active or has not claimed the page yet.
    NotControlling,
    NonHttp,
    NonGet,
    CrossOrigin,
}

/// Whether the worker handles a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interception {
    Intercept,
    Passthrough(PassReason),
}

/// The site the worker serves: its origin, deployment prefix and the
/// external hosts it still intercepts.
#[derive(Debug, Clone)]
pub struct SiteScope {
    origin: url::Url,
    base_path: String,
    allowed_external: Vec<String>,
}

impl SiteScope {
    pub fn new(origin: &str, base_path: &str, allowed_external: Vec<String>) -> Result<Self, UrlError> {
        let mut origin = canonicalize(origin)?;
        origin.set_path("/");
        origin.set_query(None);
        let allowed_external = allowed_external.into_iter().map(|d| d.to_lowercase()).collect();
        Ok(Self { origin, base_path: base_path.trim_end_matches('/').to_string(), allowed_external })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, Error> {
        Ok(Self::new(&config.origin, &config.base_path, config.allowed_external_domains.clone())?)
    }

    pub fn origin(&self) -> &url::Url {
        &self.origin
    }

    /// Resolve a site path (`/css/style.css`) or an absolute URL.
    ///
    /// Site paths are placed under the deployment base path; absolute URLs
    /// are only canonicalized.
    pub fn resolve(&self, input: &str) -> Result<url::Url, UrlError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(UrlError::Empty);
        }
        if trimmed.contains("://") {
            return canonicalize(trimmed);
        }

        let clean = trimmed.strip_prefix('/').unwrap_or(trimmed);
        let path = format!("{}/{}", self.base_path, clean);
        let mut joined = self.origin.join(&path).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;
        joined.set_fragment(None);
        Ok(joined)
    }

    /// The page path with the deployment base path removed (`/site/pages/a.html` -> `/pages/a.html`).
    pub fn site_relative<'a>(&self, path: &'a str) -> &'a str {
        if self.base_path.is_empty() {
            return path;
        }
        match path.strip_prefix(self.base_path.as_str()) {
            Some("") => "/",
            Some(rest) if rest.starts_with('/') => rest,
            _ => path,
        }
    }

    pub fn is_same_origin(&self, url: &url::Url) -> bool {
        url.origin() == self.origin.origin()
    }

    /// Hosts on the allow-list match exactly or as a parent domain.
    pub fn is_allowed_external(&self, url: &url::Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_lowercase();
        self.allowed_external
            .iter()
            .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")))
    }

    /// Decide whether the worker handles `request`.
    pub fn intercept(&self, request: &Request) -> Interception {
        if !matches!(request.url.scheme(), "http" | "https") {
            return Interception::Passthrough(PassReason::NonHttp);
        }
        if request.method != Method::GET {
            return Interception::Passthrough(PassReason::NonGet);
        }
        if !self.is_same_origin(&request.url) && !self.is_allowed_external(&request.url) {
            return Interception::Passthrough(PassReason::CrossOrigin);
        }
        Interception::Intercept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> SiteScope {
        SiteScope::new(
            "http://localhost:8080",
            "",
            vec!["fonts.googleapis.com".into(), "cdnjs.cloudflare.com".into()],
        )
        .unwrap()
    }

    #[test]
    fn test_canonicalize_lowercase_host() {
        let url = canonicalize("https://EXAMPLE.COM").unwrap();
        assert_eq!(url.host_str(), Some("example.com"));
    }

    #[test]
    fn test_canonicalize_remove_fragment_keep_query() {
        let url = canonicalize("https://example.com/gallery.html?year=2024#top").unwrap();
        assert_eq!(url.fragment(), None);
        assert_eq!(url.query(), Some("year=2024"));
    }

    #[test]
    fn test_canonicalize_rejects() {
        assert!(matches!(canonicalize("   "), Err(UrlError::Empty)));
        assert!(matches!(canonicalize("file:///etc/passwd"), Err(UrlError::UnsupportedScheme(_))));
        assert!(matches!(canonicalize("not a url"), Err(UrlError::InvalidUrl(_))));
    }

    #[test]
    fn test_resolve_site_paths() {
        let scope = scope();
        assert_eq!(scope.resolve("/").unwrap().as_str(), "http://localhost:8080/");
        assert_eq!(scope.resolve("/css/style.css").unwrap().as_str(), "http://localhost:8080/css/style.css");
        assert_eq!(scope.resolve("pages/faq.html#q3").unwrap().as_str(), "http://localhost:8080/pages/faq.html");
    }

    #[test]
    fn test_resolve_under_base_path() {
        let scope = SiteScope::new("https://user.github.io", "/council", Vec::new()).unwrap();
        assert_eq!(scope.resolve("/").unwrap().as_str(), "https://user.github.io/council/");
        assert_eq!(
            scope.resolve("/offline.html").unwrap().as_str(),
            "https://user.github.io/council/offline.html"
        );
        assert_eq!(scope.site_relative("/council/pages/about.html"), "/pages/about.html");
        assert_eq!(scope.site_relative("/council"), "/");
        assert_eq!(scope.site_relative("/councilor.html"), "/councilor.html");
    }

    #[test]
    fn test_resolve_absolute_urls_untouched_except_canonical() {
        let scope = scope();
        let url = scope.resolve("https://Fonts.GoogleAPIs.com/css2?family=Poppins").unwrap();
        assert_eq!(url.as_str(), "https://fonts.googleapis.com/css2?family=Poppins");
    }

    #[test]
    fn test_intercept_same_origin_get() {
        let scope = scope();
        let req = Request::get(scope.resolve("/pages/about.html").unwrap());
        assert_eq!(scope.intercept(&req), Interception::Intercept);
    }

    #[test]
    fn test_intercept_allowed_external() {
        let scope = scope();
        let req = Request::get(url::Url::parse("https://fonts.googleapis.com/css2").unwrap());
        assert_eq!(scope.intercept(&req), Interception::Intercept);

        let req = Request::get(url::Url::parse("https://fonts.googleapis.com.evil.test/x").unwrap());
        assert_eq!(scope.intercept(&req), Interception::Passthrough(PassReason::CrossOrigin));
    }

    #[test]
    fn test_passthrough_reasons() {
        let scope = scope();

        let other = Request::get(url::Url::parse("https://analytics.example.com/t.js").unwrap());
        assert_eq!(scope.intercept(&other), Interception::Passthrough(PassReason::CrossOrigin));

        let mut post = Request::get(scope.resolve("/contact").unwrap());
        post.method = Method::POST;
        assert_eq!(scope.intercept(&post), Interception::Passthrough(PassReason::NonGet));

        let ext = Request::get(url::Url::parse("chrome-extension://abc/script.js").unwrap());
        assert_eq!(scope.intercept(&ext), Interception::Passthrough(PassReason::NonHttp));
    }

    #[test]
    fn test_different_port_is_cross_origin() {
        let scope = scope();
        let req = Request::get(url::Url::parse("http://localhost:9090/css/style.css").unwrap());
        assert_eq!(scope.intercept(&req), Interception::Passthrough(PassReason::CrossOrigin));
    }
}
