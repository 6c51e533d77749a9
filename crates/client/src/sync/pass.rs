//! One sync pass: verify connectivity, refresh pages by priority into the
//! dynamic bucket, refresh critical resources into the static bucket, then
//! stamp the last-sync time.
//!
//! Writes go straight to the cache store, not through the worker's
//! interception. A failed page is logged and the pass moves on.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use swcache_core::{AppConfig, BucketSet, CacheDb, Error, SyncConfig};

use super::priority::priority_for;
use crate::fetch::{Network, Request, SiteScope, fetch_with_timeout};
use crate::worker::{Loader, StorePolicy};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PassReport {
    pub synced: Vec<String>,
    pub failed: Vec<String>,
    /// Milliseconds since the Unix epoch, as stored in `contentLastSync`.
    pub completed_at: i64,
}

#[derive(Clone)]
pub struct SyncPassRunner {
    db: CacheDb,
    network: Arc<dyn Network>,
    scope: SiteScope,
    buckets: BucketSet,
    sync: SyncConfig,
    probe_timeout: Duration,
    loader: Loader,
}

impl SyncPassRunner {
    pub fn new(db: CacheDb, network: Arc<dyn Network>, config: &AppConfig) -> Result<Self, Error> {
        let scope = SiteScope::from_config(config)?;
        let loader = Loader::new(db.clone(), network.clone(), config.fetch_timeout());
        Ok(Self {
            db,
            network,
            scope,
            buckets: config.buckets(),
            sync: config.sync.clone(),
            probe_timeout: config.probe_timeout(),
            loader,
        })
    }

    pub fn scope(&self) -> &SiteScope {
        &self.scope
    }

    /// Check that the origin actually answers.
    ///
    /// Any response to the probe resource counts. If the probe fails, a
    /// `HEAD` of the site root has to come back 2xx.
    pub async fn probe(&self) -> Result<(), Error> {
        let probe = Request::get(self.scope.resolve(&self.sync.probe_path)?).reload();
        let probe_err = match fetch_with_timeout(self.network.as_ref(), &probe, self.probe_timeout).await {
            Ok(_) => return Ok(()),
            Err(e) => e,
        };

        let root = Request::head(self.scope.resolve("/")?).reload();
        match fetch_with_timeout(self.network.as_ref(), &root, self.probe_timeout).await {
            Ok(response) if response.status.is_success() => Ok(()),
            Ok(response) => {
                tracing::warn!(status = response.status.as_u16(), "connectivity check failed");
                Err(Error::HttpError(format!("site root answered {}", response.status)))
            }
            Err(_) => {
                tracing::warn!(error = %probe_err, "connectivity check failed");
                Err(probe_err)
            }
        }
    }

    /// Run a full pass for someone viewing `page` (site-relative path).
    ///
    /// `progress` gets the completed percentage of the page list after each page.
    pub async fn run<F>(&self, page: &str, mut progress: F) -> Result<PassReport, Error>
    where
        F: FnMut(f64) + Send,
    {
        self.probe().await?;

        let mut report = PassReport::default();
        let pages = priority_for(&self.sync, page);
        for (i, path) in pages.iter().enumerate() {
            self.sync_one(self.buckets.dynamic_name(), path, &mut report).await;
            progress((i + 1) as f64 / pages.len() as f64 * 100.0);
        }
        for path in &self.sync.critical_resources {
            self.sync_one(self.buckets.static_name(), path, &mut report).await;
        }

        let now = chrono::Utc::now().timestamp_millis();
        self.db.set_last_sync_millis(now).await?;
        report.completed_at = now;

        tracing::info!(page, synced = report.synced.len(), failed = report.failed.len(), "sync completed");
        Ok(report)
    }

    async fn sync_one(&self, bucket: &str, path: &str, report: &mut PassReport) {
        let url = match self.scope.resolve(path) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(path, error = %e, "cannot sync unresolvable path");
                report.failed.push(path.to_string());
                return;
            }
        };
        let request = Request::get(url).reload();
        match self.loader.load(bucket, &request, StorePolicy::Success).await {
            Ok(true) => {
                tracing::debug!(path, bucket, "synced");
                report.synced.push(path.to_string());
            }
            Ok(false) => report.failed.push(path.to_string()),
            Err(e) => {
                tracing::warn!(path, error = %e, "failed to sync");
                report.failed.push(path.to_string());
            }
        }
    }
}
