//! Best-effort answers once a strategy has run out of network and cache.
//!
//! Navigations walk the chain below, first hit wins:
//!
//! 1. the same request in the dynamic bucket
//! 2. a homepage in the dynamic bucket
//! 3. a homepage in the static bucket
//! 4. the offline document from the static bucket, pointed back at the request
//! 5. a built-in offline page (status 200)
//!
//! Anything else gets `503` with a plain-text body.

use std::collections::BTreeMap;

use swcache_core::{AppConfig, BucketSet, CacheDb, CachedResponse, Error, RequestKey};

use super::response::{FallbackStep, PageResponse};
use crate::fetch::{Request, ResourceClass, SiteScope};

const UNAVAILABLE_BODY: &str = "Offline - Content not available";

#[derive(Debug, Clone)]
pub struct FallbackResolver {
    db: CacheDb,
    buckets: BucketSet,
    homepages: Vec<RequestKey>,
    offline_document: RequestKey,
    return_default: String,
    home_href: String,
}

impl FallbackResolver {
    pub fn new(db: CacheDb, config: &AppConfig, scope: &SiteScope) -> Result<Self, Error> {
        let homepages = config
            .homepage_paths
            .iter()
            .map(|path| scope.resolve(path).map(|url| RequestKey::get(url.as_str())))
            .collect::<Result<Vec<_>, _>>()?;
        let offline_document = RequestKey::get(scope.resolve(&config.offline_document)?.as_str());

        Ok(Self {
            db,
            buckets: config.buckets(),
            homepages,
            offline_document,
            return_default: config.offline_return_default.clone(),
            home_href: config.site_path("/"),
        })
    }

    pub async fn resolve(&self, request: &Request, class: ResourceClass) -> PageResponse {
        let navigation = class == ResourceClass::HtmlPage || request.accepts_html();
        if !navigation {
            return unavailable();
        }

        let dynamic = self.buckets.dynamic_name();
        let stat = self.buckets.static_name();

        if let Some(hit) = self.lookup(dynamic, &request.cache_key()).await {
            return PageResponse::fallback(hit, FallbackStep::SameRequest);
        }
        if let Some(hit) = self.homepage(dynamic).await {
            return PageResponse::fallback(hit, FallbackStep::DynamicHomepage);
        }
        if let Some(hit) = self.homepage(stat).await {
            return PageResponse::fallback(hit, FallbackStep::StaticHomepage);
        }

        let requested = requested_path(request);
        if let Some(document) = self.lookup(stat, &self.offline_document).await {
            tracing::info!(url = %request.url, "serving offline document");
            let body = self.point_back(&document.text(), &requested);
            return PageResponse::fallback(html(body), FallbackStep::OfflineDocument);
        }

        tracing::info!(url = %request.url, "no offline document cached, serving built-in page");
        PageResponse::fallback(html(inline_offline_page(&requested, &self.home_href)), FallbackStep::InlineOffline)
    }

    async fn homepage(&self, bucket: &str) -> Option<CachedResponse> {
        for key in &self.homepages {
            if let Some(hit) = self.lookup(bucket, key).await {
                return Some(hit);
            }
        }
        None
    }

    async fn lookup(&self, bucket: &str, key: &RequestKey) -> Option<CachedResponse> {
        match self.db.match_entry(bucket, key).await {
            Ok(hit) => hit,
            Err(e) => {
                tracing::error!(bucket, url = key.url(), error = %e, "fallback lookup failed");
                None
            }
        }
    }

    /// Rewrite the document's default return target to `requested`.
    ///
    /// Documents without the expected default are served unchanged.
    fn point_back(&self, document: &str, requested: &str) -> String {
        let Some(at) = self.return_default.rfind("'/'") else {
            return document.to_string();
        };
        let replacement = format!(
            "{}'{}'{}",
            &self.return_default[..at],
            js_string_escape(requested),
            &self.return_default[at + 3..]
        );
        document.replace(&self.return_default, &replacement)
    }
}

fn requested_path(request: &Request) -> String {
    match request.url.query() {
        Some(query) => format!("{}?{}", request.url.path(), query),
        None => request.url.path().to_string(),
    }
}

fn html(body: String) -> CachedResponse {
    CachedResponse::ok(body.into_bytes(), "text/html; charset=utf-8")
}

fn unavailable() -> PageResponse {
    let headers = BTreeMap::from([("content-type".to_string(), "text/plain; charset=utf-8".to_string())]);
    let response = CachedResponse::new(503, "Service Unavailable", headers, UNAVAILABLE_BODY.as_bytes().to_vec());
    PageResponse::fallback(response, FallbackStep::Unavailable)
}

fn js_string_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn inline_offline_page(requested: &str, home: &str) -> String {
    let requested = html_escape(requested);
    let home = html_escape(home);
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Offline</title>
<style>
body {{ font-family: system-ui, sans-serif; max-width: 32rem; margin: 4rem auto; padding: 0 1rem; text-align: center; color: #222; }}
a {{ display: inline-block; margin: 0.5rem; padding: 0.6rem 1.2rem; border-radius: 6px; background: #1a4d8f; color: #fff; text-decoration: none; }}
</style>
</head>
<body>
<h1>You are offline</h1>
<p>This page has not been saved for offline use yet.</p>
<p><a href="{requested}">Try again</a><a href="{home}">Go home</a></p>
</body>
</html>
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::response::ResponseSource;

    const OFFLINE_DOC: &str = "<script>const returnUrl = urlParams.get('return') || '/';</script>";

    struct Fixture {
        db: CacheDb,
        scope: SiteScope,
        buckets: BucketSet,
        resolver: FallbackResolver,
    }

    async fn fixture() -> Fixture {
        let config = AppConfig::default();
        let db = CacheDb::open_in_memory().await.unwrap();
        let scope = SiteScope::from_config(&config).unwrap();
        let resolver = FallbackResolver::new(db.clone(), &config, &scope).unwrap();
        Fixture { db, scope, buckets: config.buckets(), resolver }
    }

    impl Fixture {
        fn request(&self, path: &str) -> Request {
            Request::get(self.scope.resolve(path).unwrap())
        }

        async fn seed(&self, bucket: &str, path: &str, body: &str) {
            let key = self.request(path).cache_key();
            self.db
                .put_entry(bucket, &key, &CachedResponse::ok(body.as_bytes().to_vec(), "text/html"))
                .await
                .unwrap();
        }

        async fn resolve(&self, path: &str) -> PageResponse {
            let request = self.request(path);
            let class = crate::fetch::classify(request.url.path());
            self.resolver.resolve(&request, class).await
        }
    }

    #[tokio::test]
    async fn test_same_request_comes_first() {
        let f = fixture().await;
        f.seed(f.buckets.dynamic_name(), "/pages/about.html", "about").await;
        f.seed(f.buckets.dynamic_name(), "/", "home").await;

        let response = f.resolve("/pages/about.html").await;
        assert_eq!(response.text(), "about");
        assert_eq!(response.source, ResponseSource::Fallback { step: FallbackStep::SameRequest });
    }

    #[tokio::test]
    async fn test_dynamic_homepage_beats_static_homepage() {
        let f = fixture().await;
        f.seed(f.buckets.dynamic_name(), "/", "dynamic home").await;
        f.seed(f.buckets.static_name(), "/", "static home").await;
        f.seed(f.buckets.static_name(), "/offline.html", OFFLINE_DOC).await;

        let response = f.resolve("/pages/events.html").await;
        assert_eq!(response.text(), "dynamic home");
    }

    #[tokio::test]
    async fn test_index_document_counts_as_homepage() {
        let f = fixture().await;
        f.seed(f.buckets.static_name(), "/index.html", "static index").await;

        let response = f.resolve("/pages/events.html").await;
        assert_eq!(response.text(), "static index");
        assert_eq!(response.source, ResponseSource::Fallback { step: FallbackStep::StaticHomepage });
    }

    #[tokio::test]
    async fn test_offline_document_points_back_at_request() {
        let f = fixture().await;
        f.seed(f.buckets.static_name(), "/offline.html", OFFLINE_DOC).await;

        let response = f.resolve("/pages/events.html?week=2").await;
        assert_eq!(response.status(), 200);
        assert_eq!(response.response.content_type(), Some("text/html; charset=utf-8"));
        assert_eq!(
            response.text(),
            "<script>const returnUrl = urlParams.get('return') || '/pages/events.html?week=2';</script>"
        );
    }

    #[tokio::test]
    async fn test_offline_document_path_cannot_break_out_of_string() {
        let f = fixture().await;
        f.seed(f.buckets.static_name(), "/offline.html", OFFLINE_DOC).await;

        let request = Request::get(f.scope.resolve("/pages/it's.html").unwrap());
        let response = f.resolver.resolve(&request, ResourceClass::HtmlPage).await;
        assert!(!response.text().contains("it's"));
    }

    #[tokio::test]
    async fn test_inline_page_when_nothing_cached() {
        let f = fixture().await;
        let response = f.resolve("/pages/gallery.html").await;
        assert_eq!(response.status(), 200);
        assert!(response.text().contains("You are offline"));
        assert!(response.text().contains("href=\"/pages/gallery.html\""));
        assert_eq!(response.source, ResponseSource::Fallback { step: FallbackStep::InlineOffline });
    }

    #[tokio::test]
    async fn test_accept_header_marks_navigation() {
        let f = fixture().await;
        f.seed(f.buckets.dynamic_name(), "/", "home").await;

        let request = f.request("/api/news").with_accept("text/html,application/xhtml+xml");
        let response = f.resolver.resolve(&request, ResourceClass::Other).await;
        assert_eq!(response.text(), "home");
    }

    #[tokio::test]
    async fn test_non_navigation_gets_503() {
        let f = fixture().await;
        f.seed(f.buckets.dynamic_name(), "/", "home").await;

        let response = f.resolve("/images/missing.png").await;
        assert_eq!(response.status(), 503);
        assert_eq!(response.text(), UNAVAILABLE_BODY);
        assert_eq!(response.response.content_type(), Some("text/plain; charset=utf-8"));
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("<a href=\"x\">&'"), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }
}
