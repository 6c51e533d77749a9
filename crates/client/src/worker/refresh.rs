//! Bulk loading into buckets: install-time pre-caching, image pre-caching
//! and the worker-side `SYNC_CACHE` refresh.
//!
//! Every item is independent. A failed or non-cacheable item is logged and
//! skipped; it never aborts the batch.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use swcache_core::{CacheDb, Error};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::fetch::{FetchResponse, Network, Request, fetch_with_timeout};

/// Default number of concurrent pre-cache fetches.
pub const PRECACHE_CONCURRENCY: usize = 4;

/// Which responses a load writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorePolicy {
    /// Exactly `200 OK`.
    ExactOk,
    /// Any 2xx.
    Success,
}

impl StorePolicy {
    fn accepts(self, response: &FetchResponse) -> bool {
        match self {
            StorePolicy::ExactOk => response.is_cacheable(),
            StorePolicy::Success => response.status.is_success(),
        }
    }
}

/// Outcome of a batch load, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub stored: Vec<String>,
    pub skipped: Vec<String>,
}

impl LoadReport {
    pub fn total(&self) -> usize {
        self.stored.len() + self.skipped.len()
    }
}

/// Fetches URLs and writes them into a bucket.
#[derive(Clone)]
pub struct Loader {
    db: CacheDb,
    network: Arc<dyn Network>,
    fetch_timeout: Duration,
}

impl Loader {
    pub fn new(db: CacheDb, network: Arc<dyn Network>, fetch_timeout: Duration) -> Self {
        Self { db, network, fetch_timeout }
    }

    /// Fetch and store one request. `Ok(false)` means the response was not storable.
    pub async fn load(&self, bucket: &str, request: &Request, policy: StorePolicy) -> Result<bool, Error> {
        let response = fetch_with_timeout(self.network.as_ref(), request, self.fetch_timeout).await?;
        if !policy.accepts(&response) {
            tracing::warn!(url = %request.url, status = response.status.as_u16(), bucket, "not cached");
            return Ok(false);
        }
        self.db.put_entry(bucket, &request.cache_key(), &response.to_cached()).await?;
        Ok(true)
    }

    /// Load `urls` into `bucket` with bounded concurrency.
    pub async fn load_all(&self, bucket: &str, urls: Vec<Url>, concurrency: usize) -> LoadReport {
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut join_set = JoinSet::new();

        for (index, url) in urls.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let loader = self.clone();
            let bucket = bucket.to_string();
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let request = Request::get(url);
                let outcome = loader.load(&bucket, &request, StorePolicy::ExactOk).await;
                if let Err(e) = &outcome {
                    tracing::warn!(url = %request.url, bucket, error = %e, "pre-cache failed");
                }
                (index, request.url.to_string(), matches!(outcome, Ok(true)))
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => tracing::error!(error = %e, "pre-cache task panicked"),
            }
        }
        results.sort_by_key(|(index, _, _)| *index);

        let mut report = LoadReport::default();
        for (_, url, stored) in results {
            if stored {
                report.stored.push(url);
            } else {
                report.skipped.push(url);
            }
        }
        report
    }

    /// Reload `items` one after another, bypassing HTTP caches, calling
    /// `progress` with the completed percentage after each item.
    pub async fn refresh_sequential<F>(&self, items: &[(String, Url)], mut progress: F) -> LoadReport
    where
        F: FnMut(f64),
    {
        let mut report = LoadReport::default();
        for (done, (bucket, url)) in items.iter().enumerate() {
            let request = Request::get(url.clone()).reload();
            match self.load(bucket, &request, StorePolicy::Success).await {
                Ok(true) => report.stored.push(url.to_string()),
                Ok(false) => report.skipped.push(url.to_string()),
                Err(e) => {
                    tracing::warn!(url = %url, bucket = %bucket, error = %e, "refresh failed");
                    report.skipped.push(url.to_string());
                }
            }
            progress((done + 1) as f64 / items.len() as f64 * 100.0);
        }
        report
    }
}
