//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (SWCACHE_*)
//! 2. TOML config file (if SWCACHE_CONFIG_FILE set)
//! 3. Built-in defaults
//!
//! Besides runtime knobs it carries the install-time manifests (`core_assets`,
//! `pages_to_cache`) and the bucket version constants. Bumping
//! `cache_version` is how a deploy invalidates every previously cached bucket.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::cache::BucketSet;

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (SWCACHE_*, nested keys split on `__`)
/// 2. TOML config file (if SWCACHE_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to SQLite cache database.
    ///
    /// Set via SWCACHE_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Origin of the site the worker serves, e.g. `https://council.example.org`.
    ///
    /// Set via SWCACHE_ORIGIN environment variable.
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Path prefix for sub-path deployments (`""` for root deployments, `/site` otherwise).
    ///
    /// Set via SWCACHE_BASE_PATH environment variable.
    #[serde(default)]
    pub base_path: String,

    /// User-Agent string for HTTP requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Maximum bytes to fetch per request.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Prefix shared by every bucket name.
    #[serde(default = "default_bucket_prefix")]
    pub bucket_prefix: String,

    /// Version suffix shared by every bucket name.
    #[serde(default = "default_cache_version")]
    pub cache_version: String,

    /// Static files pre-cached on install.
    #[serde(default = "default_core_assets")]
    pub core_assets: Vec<String>,

    /// HTML documents eligible for pre-caching on install.
    #[serde(default = "default_pages_to_cache")]
    pub pages_to_cache: Vec<String>,

    /// How many of `pages_to_cache` (from the front) are pre-cached on install.
    #[serde(default = "default_precache_page_count")]
    pub precache_page_count: usize,

    /// Cross-origin hosts whose requests are still intercepted (fonts, CDN).
    #[serde(default = "default_allowed_external_domains")]
    pub allowed_external_domains: Vec<String>,

    /// Upper bound for any single fetch issued by the worker, in milliseconds.
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// Upper bound for the connectivity probe, in milliseconds.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Paths that count as "the homepage" for fallback lookups, in priority order.
    #[serde(default = "default_homepage_paths")]
    pub homepage_paths: Vec<String>,

    /// Path of the dedicated offline document in the static bucket.
    #[serde(default = "default_offline_document")]
    pub offline_document: String,

    /// Literal default return-URL expression inside the offline document.
    ///
    /// When the offline document is served, its trailing `'/'` is rewritten
    /// to the path that was originally requested.
    #[serde(default = "default_offline_return_default")]
    pub offline_return_default: String,

    /// Refresh cache-first hits in the background.
    #[serde(default = "default_true")]
    pub refresh_static_on_hit: bool,

    /// Pages refreshed into the dynamic bucket by a `SYNC_CACHE` message.
    #[serde(default = "default_worker_sync_pages")]
    pub worker_sync_pages: Vec<String>,

    /// Resources refreshed into the static bucket by a `SYNC_CACHE` message.
    #[serde(default = "default_critical_resources")]
    pub worker_sync_resources: Vec<String>,

    /// Foreground sync coordinator settings.
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Settings for the foreground sync coordinator.
///
/// The interval and threshold values have no deeper rationale than "worked
/// for the site"; they are tunables, not invariants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Quiet period that coalesces bursts of triggers into one pass.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Interval of the periodic trigger.
    #[serde(default = "default_periodic_interval_secs")]
    pub periodic_interval_secs: u64,

    /// Content older than this is stale on load.
    #[serde(default = "default_stale_threshold_secs")]
    pub stale_threshold_secs: u64,

    /// Minimum time since the last sync before user activity triggers another one.
    #[serde(default = "default_activity_min_interval_secs")]
    pub activity_min_interval_secs: u64,

    /// Delay before the load-time staleness trigger fires.
    #[serde(default = "default_initial_check_delay_ms")]
    pub initial_check_delay_ms: u64,

    /// How long the "content updated" indicator stays visible.
    #[serde(default = "default_indicator_dismiss_ms")]
    pub indicator_dismiss_ms: u64,

    /// Small same-origin resource used to verify connectivity.
    #[serde(default = "default_probe_path")]
    pub probe_path: String,

    /// Static resources refreshed at the end of every pass.
    #[serde(default = "default_critical_resources")]
    pub critical_resources: Vec<String>,

    /// Pages synced when the current page has no entry in `priorities`.
    #[serde(default = "default_priority")]
    pub default_priority: Vec<String>,

    /// Current page -> pages to sync, most important first.
    #[serde(default = "default_priorities")]
    pub priorities: BTreeMap<String, Vec<String>>,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./swcache.sqlite")
}

fn default_origin() -> String {
    "http://localhost:8080".into()
}

fn default_user_agent() -> String {
    "swcache/0.1".into()
}

fn default_max_bytes() -> usize {
    5_242_880 // 5MB
}

fn default_bucket_prefix() -> String {
    "stc".into()
}

fn default_cache_version() -> String {
    "v1".into()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_core_assets() -> Vec<String> {
    strings(&[
        "/",
        "/index.html",
        "/offline.html",
        "/css/style.css",
        "/css/home.css",
        "/css/main.css",
        "/css/mobile.css",
        "/pages/navbar.css",
        "/js/script.js",
        "/js/home.js",
        "/js/main.js",
        "/js/mobile-enhancements.js",
        "/js/pwa-installer.js",
        "/js/smart-sync.js",
        "/pages/navbar.html",
        "/header.html",
        "/footer.html",
        "/android-chrome-192x192.png",
        "/android-chrome-512x512.png",
        "/apple-touch-icon.png",
        "/favicon-32x32.png",
        "/favicon-16x16.png",
        "/site.webmanifest",
    ])
}

fn default_pages_to_cache() -> Vec<String> {
    strings(&[
        "/pages/about.html",
        "/pages/clubs.html",
        "/pages/events.html",
        "/pages/gallery.html",
        "/pages/contact.html",
        "/pages/leadership.html",
        "/pages/credits.html",
        "/pages/faq.html",
        "/pages/anvesha.html",
    ])
}

fn default_precache_page_count() -> usize {
    3
}

fn default_allowed_external_domains() -> Vec<String> {
    strings(&["fonts.googleapis.com", "fonts.gstatic.com", "cdnjs.cloudflare.com"])
}

fn default_fetch_timeout_ms() -> u64 {
    10_000
}

fn default_probe_timeout_ms() -> u64 {
    3_000
}

fn default_homepage_paths() -> Vec<String> {
    strings(&["/", "/index.html"])
}

fn default_offline_document() -> String {
    "/offline.html".into()
}

fn default_offline_return_default() -> String {
    "urlParams.get('return') || '/'".into()
}

fn default_true() -> bool {
    true
}

fn default_worker_sync_pages() -> Vec<String> {
    strings(&[
        "/",
        "/index.html",
        "/pages/about.html",
        "/pages/clubs.html",
        "/pages/events.html",
        "/pages/gallery.html",
    ])
}

fn default_critical_resources() -> Vec<String> {
    strings(&["/css/style.css", "/js/script.js", "/js/pwa-installer.js"])
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_periodic_interval_secs() -> u64 {
    10 * 60
}

fn default_stale_threshold_secs() -> u64 {
    30 * 60
}

fn default_activity_min_interval_secs() -> u64 {
    2 * 60
}

fn default_initial_check_delay_ms() -> u64 {
    2_000
}

fn default_indicator_dismiss_ms() -> u64 {
    1_500
}

fn default_probe_path() -> String {
    "/favicon-16x16.png".into()
}

fn default_priority() -> Vec<String> {
    strings(&["/", "/pages/clubs.html", "/pages/events.html"])
}

fn default_priorities() -> BTreeMap<String, Vec<String>> {
    BTreeMap::from([
        ("/".to_string(), default_priority()),
        (
            "/pages/clubs.html".to_string(),
            strings(&["/pages/clubs.html", "/", "/pages/about.html"]),
        ),
        (
            "/pages/events.html".to_string(),
            strings(&["/pages/events.html", "/", "/pages/gallery.html"]),
        ),
        (
            "/pages/gallery.html".to_string(),
            strings(&["/pages/gallery.html", "/pages/events.html"]),
        ),
        (
            "/pages/about.html".to_string(),
            strings(&["/pages/about.html", "/", "/pages/leadership.html"]),
        ),
    ])
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            periodic_interval_secs: default_periodic_interval_secs(),
            stale_threshold_secs: default_stale_threshold_secs(),
            activity_min_interval_secs: default_activity_min_interval_secs(),
            initial_check_delay_ms: default_initial_check_delay_ms(),
            indicator_dismiss_ms: default_indicator_dismiss_ms(),
            probe_path: default_probe_path(),
            critical_resources: default_critical_resources(),
            default_priority: default_priority(),
            priorities: default_priorities(),
        }
    }
}

impl SyncConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn periodic_interval(&self) -> Duration {
        Duration::from_secs(self.periodic_interval_secs)
    }

    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold_secs)
    }

    pub fn activity_min_interval(&self) -> Duration {
        Duration::from_secs(self.activity_min_interval_secs)
    }

    pub fn initial_check_delay(&self) -> Duration {
        Duration::from_millis(self.initial_check_delay_ms)
    }

    pub fn indicator_dismiss(&self) -> Duration {
        Duration::from_millis(self.indicator_dismiss_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            origin: default_origin(),
            base_path: String::new(),
            user_agent: default_user_agent(),
            max_bytes: default_max_bytes(),
            bucket_prefix: default_bucket_prefix(),
            cache_version: default_cache_version(),
            core_assets: default_core_assets(),
            pages_to_cache: default_pages_to_cache(),
            precache_page_count: default_precache_page_count(),
            allowed_external_domains: default_allowed_external_domains(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            homepage_paths: default_homepage_paths(),
            offline_document: default_offline_document(),
            offline_return_default: default_offline_return_default(),
            refresh_static_on_hit: true,
            worker_sync_pages: default_worker_sync_pages(),
            worker_sync_resources: default_critical_resources(),
            sync: SyncConfig::default(),
        }
    }
}

impl AppConfig {
    /// Fetch timeout as Duration for use with reqwest/tokio.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Probe timeout as Duration.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// The current bucket names derived from prefix and version.
    pub fn buckets(&self) -> BucketSet {
        BucketSet::new(&self.bucket_prefix, &self.cache_version)
    }

    /// Pages pre-cached on install: the first `precache_page_count` of `pages_to_cache`.
    pub fn precache_pages(&self) -> &[String] {
        let n = self.precache_page_count.min(self.pages_to_cache.len());
        &self.pages_to_cache[..n]
    }

    /// Prefix a site-relative path with `base_path`.
    ///
    /// `"/"` under base path `/site` becomes `/site/`.
    pub fn site_path(&self, path: &str) -> String {
        let clean = path.strip_prefix('/').unwrap_or(path);
        format!("{}/{}", self.base_path, clean)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `SWCACHE_`
    /// 2. TOML file from `SWCACHE_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("SWCACHE_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("SWCACHE_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
