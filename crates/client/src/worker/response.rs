//! What the worker hands back to the page.

use serde::Serialize;
use swcache_core::CachedResponse;

use crate::fetch::FetchResponse;

/// Which link of the fallback chain produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStep {
    /// The same page from the dynamic bucket.
    SameRequest,
    /// The homepage from the dynamic bucket.
    DynamicHomepage,
    /// The homepage from the static bucket.
    StaticHomepage,
    /// The offline document, rewritten to return to the requested path.
    OfflineDocument,
    /// The built-in offline page.
    InlineOffline,
    /// `503` for anything that is not a page.
    Unavailable,
}

/// Where a response came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseSource {
    Network,
    Cache { bucket: String },
    Fallback { step: FallbackStep },
}

/// A response served to the page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageResponse {
    pub response: CachedResponse,
    pub source: ResponseSource,
}

impl PageResponse {
    pub fn network(response: &FetchResponse) -> Self {
        Self { response: response.to_cached(), source: ResponseSource::Network }
    }

    pub fn cached(response: CachedResponse, bucket: &str) -> Self {
        Self { response, source: ResponseSource::Cache { bucket: bucket.to_string() } }
    }

    pub fn fallback(response: CachedResponse, step: FallbackStep) -> Self {
        Self { response, source: ResponseSource::Fallback { step } }
    }

    pub fn status(&self) -> u16 {
        self.response.status
    }

    pub fn body(&self) -> &[u8] {
        &self.response.body
    }

    pub fn text(&self) -> String {
        self.response.text()
    }

    pub fn is_from_network(&self) -> bool {
        self.source == ResponseSource::Network
    }
}
