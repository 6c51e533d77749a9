//! Resource classification by URL path shape.
//!
//! A pure function of the path; the strategy engine recomputes it for every
//! request and nothing else decides which strategy runs.

use std::sync::LazyLock;

use regex::Regex;
use swcache_core::BucketPurpose;

static IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.(png|jpe?g|gif|svg|webp|ico|avif)$").expect("valid image pattern"));

static STATIC_ASSET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.(css|js|mjs|woff2?|ttf|otf|eot|webmanifest)$").expect("valid asset pattern"));

static HTML_PAGE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\.html?$").expect("valid page pattern"));

/// What kind of resource a request path names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    StaticAsset,
    Image,
    HtmlPage,
    Other,
}

impl ResourceClass {
    /// The bucket this class of resource is cached in.
    pub fn purpose(self) -> BucketPurpose {
        match self {
            ResourceClass::StaticAsset => BucketPurpose::Static,
            ResourceClass::Image => BucketPurpose::Image,
            ResourceClass::HtmlPage | ResourceClass::Other => BucketPurpose::Dynamic,
        }
    }
}

/// Classify a URL path.
///
/// Images are checked before other static assets, so icons and photos are
/// revalidated in the background instead of being pinned cache-first.
/// Directory-style paths (`/`, `/pages/`) are HTML pages.
pub fn classify(path: &str) -> ResourceClass {
    if IMAGE.is_match(path) {
        ResourceClass::Image
    } else if STATIC_ASSET.is_match(path) {
        ResourceClass::StaticAsset
    } else if HTML_PAGE.is_match(path) || path.ends_with('/') {
        ResourceClass::HtmlPage
    } else {
        ResourceClass::Other
    }
}
