//! The three caching strategies and the engine that picks between them.
//!
//! | Class        | Strategy               | Bucket  |
//! |--------------|------------------------|---------|
//! | StaticAsset  | cache-first            | static  |
//! | Image        | stale-while-revalidate | images  |
//! | HtmlPage     | network-first          | dynamic |
//! | Other        | network-first          | dynamic |
//!
//! Each strategy has one failure boundary: it either produces a response or
//! returns the error that sends the request to the fallback chain. Cache
//! writes happen behind the response (see [`Background`]) and only for
//! exact `200 OK` network responses.

use std::sync::Arc;
use std::time::Duration;

use swcache_core::{BucketSet, CacheDb, CachedResponse, Error, RequestKey};

use super::background::Background;
use super::fallback::FallbackResolver;
use super::response::PageResponse;
use crate::fetch::{FetchResponse, Network, Request, ResourceClass, classify, fetch_with_timeout};

/// How a request is satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    CacheFirst,
    StaleWhileRevalidate,
    NetworkFirst,
}

impl Strategy {
    pub fn for_class(class: ResourceClass) -> Self {
        match class {
            ResourceClass::StaticAsset => Strategy::CacheFirst,
            ResourceClass::Image => Strategy::StaleWhileRevalidate,
            ResourceClass::HtmlPage | ResourceClass::Other => Strategy::NetworkFirst,
        }
    }
}

/// Fetch Strategy Engine.
///
/// Cheap to clone; background work holds its own clone.
#[derive(Clone)]
pub struct FetchEngine {
    db: CacheDb,
    network: Arc<dyn Network>,
    buckets: BucketSet,
    fetch_timeout: Duration,
    refresh_on_hit: bool,
    background: Background,
    fallback: Arc<FallbackResolver>,
}

impl FetchEngine {
    pub fn new(
        db: CacheDb, network: Arc<dyn Network>, buckets: BucketSet, fetch_timeout: Duration, refresh_on_hit: bool,
        background: Background, fallback: FallbackResolver,
    ) -> Self {
        Self { db, network, buckets, fetch_timeout, refresh_on_hit, background, fallback: Arc::new(fallback) }
    }

    /// Answer an intercepted request. Never fails: a request no strategy can
    /// satisfy is answered by the fallback chain.
    pub async fn respond(&self, request: &Request) -> PageResponse {
        let class = classify(request.url.path());
        let strategy = Strategy::for_class(class);
        let bucket = self.buckets.name_for(class.purpose());
        tracing::debug!(url = %request.url, ?class, ?strategy, bucket, "handling fetch");

        let result = match strategy {
            Strategy::CacheFirst => self.cache_first(bucket, request).await,
            Strategy::StaleWhileRevalidate => self.stale_while_revalidate(bucket, request).await,
            Strategy::NetworkFirst => self.network_first(bucket, request).await,
        };

        match result {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(url = %request.url, error = %e, "strategy exhausted, falling back");
                self.fallback.resolve(request, class).await
            }
        }
    }

    /// Serve from `bucket`; go to the network only on a miss.
    ///
    /// A hit is refreshed in the background when `refresh_on_hit` is set; the
    /// page gets the cached copy either way.
    async fn cache_first(&self, bucket: &str, request: &Request) -> Result<PageResponse, Error> {
        let key = request.cache_key();

        if let Some(hit) = self.lookup(bucket, &key).await {
            tracing::debug!(url = %request.url, bucket, "cache hit");
            if self.refresh_on_hit {
                self.revalidate(bucket, request.clone());
            }
            return Ok(PageResponse::cached(hit, bucket));
        }

        let response = self.fetch(request).await?;
        self.store_behind(bucket, key, &response);
        Ok(PageResponse::network(&response))
    }

    /// Serve the cached image immediately and refresh it for next time.
    /// Without a cached copy, wait for the network.
    async fn stale_while_revalidate(&self, bucket: &str, request: &Request) -> Result<PageResponse, Error> {
        let key = request.cache_key();

        if let Some(hit) = self.lookup(bucket, &key).await {
            tracing::debug!(url = %request.url, bucket, "serving stale, revalidating");
            self.revalidate(bucket, request.clone());
            return Ok(PageResponse::cached(hit, bucket));
        }

        let response = self.fetch(request).await?;
        self.store_behind(bucket, key, &response);
        Ok(PageResponse::network(&response))
    }

    /// Prefer the live page; fall back to `bucket` when the network fails.
    async fn network_first(&self, bucket: &str, request: &Request) -> Result<PageResponse, Error> {
        let key = request.cache_key();

        match self.fetch(request).await {
            Ok(response) => {
                self.store_behind(bucket, key, &response);
                Ok(PageResponse::network(&response))
            }
            Err(e) => match self.lookup(bucket, &key).await {
                Some(hit) => {
                    tracing::debug!(url = %request.url, error = %e, "network failed, serving cached page");
                    Ok(PageResponse::cached(hit, bucket))
                }
                None => Err(e),
            },
        }
    }

    /// Wait for all write-behind puts and background refreshes.
    pub async fn settle(&self) {
        self.background.settle().await;
    }

    async fn fetch(&self, request: &Request) -> Result<FetchResponse, Error> {
        fetch_with_timeout(self.network.as_ref(), request, self.fetch_timeout).await
    }

    /// A broken store reads as a miss; the request still gets an answer.
    async fn lookup(&self, bucket: &str, key: &RequestKey) -> Option<CachedResponse> {
        match self.db.match_entry(bucket, key).await {
            Ok(hit) => hit,
            Err(e) => {
                tracing::error!(bucket, url = key.url(), error = %e, "cache lookup failed");
                None
            }
        }
    }

    fn store_behind(&self, bucket: &str, key: RequestKey, response: &FetchResponse) {
        if !response.is_cacheable() {
            return;
        }
        let db = self.db.clone();
        let bucket = bucket.to_string();
        let cached = response.to_cached();
        self.background.spawn(async move {
            if let Err(e) = db.put_entry(&bucket, &key, &cached).await {
                tracing::error!(bucket, url = key.url(), error = %e, "cache write failed");
            }
        });
    }

    fn revalidate(&self, bucket: &str, request: Request) {
        let engine = self.clone();
        let bucket = bucket.to_string();
        self.background.spawn(async move {
            match engine.fetch(&request).await {
                Ok(response) if response.is_cacheable() => {
                    let cached = response.to_cached();
                    if let Err(e) = engine.db.put_entry(&bucket, &request.cache_key(), &cached).await {
                        tracing::error!(bucket, url = %request.url, error = %e, "cache refresh write failed");
                    }
                }
                Ok(response) => {
                    tracing::debug!(url = %request.url, status = response.status.as_u16(), "refresh not cacheable");
                }
                Err(e) => tracing::debug!(url = %request.url, error = %e, "background refresh failed"),
            }
        });
    }
}
