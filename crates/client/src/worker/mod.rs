//! The background worker: lifecycle, fetch interception and worker messages.
//!
//! ### Install
//! - Opens the static and dynamic buckets, then pre-caches `core_assets`
//!   (static) and the first `precache_page_count` pages (dynamic) concurrently.
//! - A missing asset is logged and skipped; install still completes.
//! - Calls skip-waiting, so [`ServiceWorker::run_lifecycle`] activates at once.
//!
//! ### Activate
//! - Deletes every bucket whose name is not in the current set, then claims clients.
//!
//! ### Messages
//! - `SKIP_WAITING`, `SYNC_CACHE`, `CACHE_IMAGES` (see [`ClientMessage`]).
//! - Results go out on a broadcast channel ([`ServiceWorker::subscribe`]).

mod background;
mod fallback;
mod lifecycle;
mod refresh;
mod response;
mod strategy;

use std::sync::{Arc, Mutex};

use reqwest::Url;
use serde::Serialize;
use swcache_core::{AppConfig, BucketSet, CacheDb, ClientMessage, Error, WorkerMessage};
use tokio::sync::broadcast;

pub use background::Background;
pub use fallback::FallbackResolver;
pub use lifecycle::{Lifecycle, LifecycleState};
pub use refresh::{LoadReport, Loader, PRECACHE_CONCURRENCY, StorePolicy};
pub use response::{FallbackStep, PageResponse, ResponseSource};
pub use strategy::{FetchEngine, Strategy};

use crate::fetch::{Interception, Network, PassReason, Request, SiteScope};

const BROADCAST_CAPACITY: usize = 64;

/// What the worker does with an outgoing request.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchDecision {
    /// Not ours; the page goes to the network directly.
    Passthrough(PassReason),
    Respond(PageResponse),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub static_assets: LoadReport,
    pub pages: LoadReport,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivateReport {
    pub deleted: Vec<String>,
}

pub struct ServiceWorker {
    db: CacheDb,
    config: Arc<AppConfig>,
    scope: SiteScope,
    buckets: BucketSet,
    lifecycle: Mutex<Lifecycle>,
    engine: FetchEngine,
    loader: Loader,
    background: Background,
    broadcast: broadcast::Sender<WorkerMessage>,
}

impl ServiceWorker {
    pub fn new(db: CacheDb, network: Arc<dyn Network>, config: AppConfig) -> Result<Self, Error> {
        let scope = SiteScope::from_config(&config)?;
        let buckets = config.buckets();
        let background = Background::new();
        let fallback = FallbackResolver::new(db.clone(), &config, &scope)?;
        let engine = FetchEngine::new(
            db.clone(),
            network.clone(),
            buckets.clone(),
            config.fetch_timeout(),
            config.refresh_static_on_hit,
            background.clone(),
            fallback,
        );
        let loader = Loader::new(db.clone(), network, config.fetch_timeout());
        let (broadcast, _) = broadcast::channel(BROADCAST_CAPACITY);

        Ok(Self {
            db,
            config: Arc::new(config),
            scope,
            buckets,
            lifecycle: Mutex::new(Lifecycle::default()),
            engine,
            loader,
            background,
            broadcast,
        })
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle().state()
    }

    pub fn buckets(&self) -> &BucketSet {
        &self.buckets
    }

    pub fn scope(&self) -> &SiteScope {
        &self.scope
    }

    pub fn db(&self) -> &CacheDb {
        &self.db
    }

    /// Messages the worker posts to every connected client.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerMessage> {
        self.broadcast.subscribe()
    }

    /// Wait for write-behind puts and background refreshes to finish.
    pub async fn settle(&self) {
        self.background.settle().await;
    }

    /// Install, then activate if the install asked to skip waiting.
    pub async fn run_lifecycle(&self) -> Result<LifecycleState, Error> {
        self.install().await?;
        if self.lifecycle().is_waiting_skipped() {
            self.activate().await?;
        }
        Ok(self.state())
    }

    pub async fn install(&self) -> Result<InstallReport, Error> {
        self.lifecycle().begin_install()?;
        tracing::info!("installing worker");

        let opened = async {
            self.db.open_bucket(self.buckets.static_name()).await?;
            self.db.open_bucket(self.buckets.dynamic_name()).await
        }
        .await;
        if let Err(e) = opened {
            tracing::error!(error = %e, "install failed: cannot open buckets");
            self.lifecycle().finish_install(false)?;
            return Err(e);
        }

        let assets = self.resolve_all(&self.config.core_assets);
        let pages = self.resolve_all(self.config.precache_pages());
        let (static_assets, pages) = tokio::join!(
            self.loader.load_all(self.buckets.static_name(), assets, PRECACHE_CONCURRENCY),
            self.loader.load_all(self.buckets.dynamic_name(), pages, PRECACHE_CONCURRENCY),
        );

        tracing::info!(
            assets = static_assets.stored.len(),
            assets_skipped = static_assets.skipped.len(),
            pages = pages.stored.len(),
            pages_skipped = pages.skipped.len(),
            "core assets cached"
        );

        let mut lifecycle = self.lifecycle();
        lifecycle.finish_install(true)?;
        lifecycle.skip_waiting();
        Ok(InstallReport { static_assets, pages })
    }

    pub async fn activate(&self) -> Result<ActivateReport, Error> {
        self.lifecycle().begin_activate()?;
        tracing::info!("activating worker");

        let deleted = match self.evict_old_buckets().await {
            Ok(deleted) => deleted,
            Err(e) => {
                tracing::error!(error = %e, "activate failed: cannot evict old buckets");
                self.lifecycle().fail_activate()?;
                return Err(e);
            }
        };

        let mut lifecycle = self.lifecycle();
        lifecycle.finish_activate()?;
        lifecycle.claim()?;
        tracing::info!(deleted = deleted.len(), "worker activated and controlling");
        Ok(ActivateReport { deleted })
    }

    async fn evict_old_buckets(&self) -> Result<Vec<String>, Error> {
        let mut deleted = Vec::new();
        for name in self.db.list_bucket_names().await? {
            if !self.buckets.is_current(&name) && self.db.delete_bucket(&name).await? {
                tracing::info!(bucket = %name, "deleted old bucket");
                deleted.push(name);
            }
        }
        Ok(deleted)
    }

    /// Decide on and, when intercepted, answer a page request.
    pub async fn handle_fetch(&self, request: Request) -> FetchDecision {
        if !self.lifecycle().can_intercept() {
            return FetchDecision::Passthrough(PassReason::NotControlling);
        }
        match self.scope.intercept(&request) {
            Interception::Passthrough(reason) => {
                tracing::trace!(url = %request.url, ?reason, "passthrough");
                FetchDecision::Passthrough(reason)
            }
            Interception::Intercept => FetchDecision::Respond(self.engine.respond(&request).await),
        }
    }

    pub async fn handle_message(&self, message: ClientMessage) -> Result<(), Error> {
        match message {
            ClientMessage::SkipWaiting => {
                let installed = {
                    let mut lifecycle = self.lifecycle();
                    lifecycle.skip_waiting();
                    lifecycle.state() == LifecycleState::Installed
                };
                if installed {
                    self.activate().await?;
                }
                Ok(())
            }
            ClientMessage::SyncCache { .. } => {
                self.sync_cache().await;
                Ok(())
            }
            ClientMessage::CacheImages { images } => {
                let urls = self.resolve_all(&images);
                let report = self
                    .loader
                    .load_all(self.buckets.image_name(), urls, PRECACHE_CONCURRENCY)
                    .await;
                tracing::info!(cached = report.stored.len(), skipped = report.skipped.len(), "images pre-cached");
                Ok(())
            }
        }
    }

    /// Reload the worker's sync list, reporting progress, then announce the update.
    pub async fn sync_cache(&self) -> LoadReport {
        tracing::info!("worker cache sync started");
        let dynamic = self.buckets.dynamic_name().to_string();
        let stat = self.buckets.static_name().to_string();

        let items: Vec<(String, Url)> = self
            .resolve_all(&self.config.worker_sync_pages)
            .into_iter()
            .map(|url| (dynamic.clone(), url))
            .chain(
                self.resolve_all(&self.config.worker_sync_resources)
                    .into_iter()
                    .map(|url| (stat.clone(), url)),
            )
            .collect();

        let report = self
            .loader
            .refresh_sequential(&items, |progress| self.post(WorkerMessage::SyncProgress { progress }))
            .await;

        tracing::info!(updated = report.stored.len(), failed = report.skipped.len(), "worker cache sync completed");
        self.post(WorkerMessage::CacheUpdated { timestamp: chrono::Utc::now().timestamp_millis() });
        report
    }

    fn post(&self, message: WorkerMessage) {
        // No receivers just means no page is listening.
        let _ = self.broadcast.send(message);
    }

    fn resolve_all(&self, paths: &[String]) -> Vec<Url> {
        paths
            .iter()
            .filter_map(|path| match self.scope.resolve(path) {
                Ok(url) => Some(url),
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "skipping unresolvable path");
                    None
                }
            })
            .collect()
    }

    fn lifecycle(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedNetwork;
    use swcache_core::CachedResponse;

    fn small_config() -> AppConfig {
        AppConfig {
            core_assets: vec!["/".into(), "/offline.html".into(), "/css/style.css".into()],
            pages_to_cache: vec!["/pages/about.html".into(), "/pages/clubs.html".into()],
            precache_page_count: 1,
            fetch_timeout_ms: 500,
            probe_timeout_ms: 200,
            ..AppConfig::default()
        }
    }

    async fn worker(config: AppConfig) -> (ServiceWorker, Arc<ScriptedNetwork>) {
        let db = CacheDb::open_in_memory().await.unwrap();
        let network = Arc::new(ScriptedNetwork::new());
        (ServiceWorker::new(db, network.clone(), config).unwrap(), network)
    }

    fn script_site(network: &ScriptedNetwork) {
        network.respond("/", 200, "text/html", "home");
        network.respond("/offline.html", 200, "text/html", "offline");
        network.respond("/css/style.css", 200, "text/css", "css");
        network.respond("/pages/about.html", 200, "text/html", "about");
    }

    #[tokio::test]
    async fn test_run_lifecycle_reaches_activated() {
        let (worker, network) = worker(small_config()).await;
        script_site(&network);

        assert_eq!(worker.run_lifecycle().await.unwrap(), LifecycleState::Activated);
        assert_eq!(network.calls_to("/pages/clubs.html"), 0);

        let statics = worker.db().entry_urls(worker.buckets().static_name()).await.unwrap();
        assert_eq!(statics.len(), 3);
        let pages = worker.db().entry_urls(worker.buckets().dynamic_name()).await.unwrap();
        assert_eq!(pages, vec!["http://localhost:8080/pages/about.html".to_string()]);
    }

    #[tokio::test]
    async fn test_activate_evicts_old_buckets() {
        let (worker, network) = worker(small_config()).await;
        script_site(&network);
        worker.db().open_bucket("stc-static-v0").await.unwrap();
        worker.db().open_bucket("stc-pwa-v1").await.unwrap();

        worker.install().await.unwrap();
        let report = worker.activate().await.unwrap();

        assert_eq!(report.deleted, vec!["stc-pwa-v1".to_string(), "stc-static-v0".to_string()]);
        let names = worker.db().list_bucket_names().await.unwrap();
        assert!(names.iter().all(|n| worker.buckets().is_current(n)));
    }

    #[tokio::test]
    async fn test_failed_activation_is_redundant() {
        let (worker, network) = worker(small_config()).await;
        script_site(&network);
        worker.install().await.unwrap();

        worker.db().clone().close().await.unwrap();
        assert!(worker.activate().await.is_err());
        assert_eq!(worker.state(), LifecycleState::Redundant);
        assert!(worker.activate().await.is_err());
    }

    #[tokio::test]
    async fn test_requests_pass_through_until_controlling() {
        let (worker, network) = worker(small_config()).await;
        script_site(&network);
        let request = Request::get(worker.scope().resolve("/css/style.css").unwrap());

        assert_eq!(
            worker.handle_fetch(request.clone()).await,
            FetchDecision::Passthrough(PassReason::NotControlling)
        );

        worker.run_lifecycle().await.unwrap();
        assert!(matches!(worker.handle_fetch(request).await, FetchDecision::Respond(_)));
    }

    #[tokio::test]
    async fn test_cross_origin_and_non_get_pass_through() {
        let (worker, network) = worker(small_config()).await;
        script_site(&network);
        worker.run_lifecycle().await.unwrap();

        let foreign = Request::get(Url::parse("https://tracker.example.com/pixel.gif").unwrap());
        assert_eq!(worker.handle_fetch(foreign).await, FetchDecision::Passthrough(PassReason::CrossOrigin));

        let mut post = Request::get(worker.scope().resolve("/pages/contact.html").unwrap());
        post.method = reqwest::Method::POST;
        assert_eq!(worker.handle_fetch(post).await, FetchDecision::Passthrough(PassReason::NonGet));
    }

    #[tokio::test]
    async fn test_sync_cache_reports_progress_then_update() {
        let config = AppConfig {
            worker_sync_pages: vec!["/".into()],
            worker_sync_resources: vec!["/css/style.css".into()],
            ..small_config()
        };
        let (worker, network) = worker(config).await;
        script_site(&network);
        let mut rx = worker.subscribe();

        worker.handle_message(ClientMessage::SyncCache { timestamp: 0 }).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), WorkerMessage::SyncProgress { progress: 50.0 });
        assert_eq!(rx.recv().await.unwrap(), WorkerMessage::SyncProgress { progress: 100.0 });
        assert!(matches!(rx.recv().await.unwrap(), WorkerMessage::CacheUpdated { .. }));
        assert_eq!(network.calls(), vec!["GET /".to_string(), "GET /css/style.css".to_string()]);
    }

    #[tokio::test]
    async fn test_cache_images_message() {
        let (worker, network) = worker(small_config()).await;
        network.respond("/images/a.jpg", 200, "image/jpeg", "a");

        worker
            .handle_message(ClientMessage::CacheImages { images: vec!["/images/a.jpg".into(), "/images/b.jpg".into()] })
            .await
            .unwrap();

        let images = worker.db().entry_urls(worker.buckets().image_name()).await.unwrap();
        assert_eq!(images, vec!["http://localhost:8080/images/a.jpg".to_string()]);
    }

    #[tokio::test]
    async fn test_skip_waiting_message_activates_installed_worker() {
        let (worker, network) = worker(small_config()).await;
        script_site(&network);
        worker.install().await.unwrap();
        assert_eq!(worker.state(), LifecycleState::Installed);

        worker.handle_message(ClientMessage::SkipWaiting).await.unwrap();
        assert_eq!(worker.state(), LifecycleState::Activated);
    }

    #[tokio::test]
    async fn test_base_path_deployment() {
        let config = AppConfig { base_path: "/stc".into(), ..small_config() };
        let (worker, network) = worker(config).await;
        network.respond("/stc/css/style.css", 200, "text/css", "css");
        worker.run_lifecycle().await.unwrap();

        let url = Url::parse("http://localhost:8080/stc/css/style.css").unwrap();
        worker
            .db()
            .put_entry(
                worker.buckets().static_name(),
                &swcache_core::RequestKey::get(url.as_str()),
                &CachedResponse::ok(b"seeded".to_vec(), "text/css"),
            )
            .await
            .unwrap();
        let FetchDecision::Respond(response) = worker.handle_fetch(Request::get(url)).await else {
            panic!("expected a response");
        };
        assert_eq!(response.text(), "seeded");

        worker.settle().await;
        assert_eq!(network.calls_to("/stc/css/style.css"), 2);
    }
}
