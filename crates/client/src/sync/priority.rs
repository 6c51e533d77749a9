//! Which pages a sync pass refreshes first, depending on the page being viewed.

use swcache_core::SyncConfig;

/// The pages to refresh, most relevant first. Unknown pages get the default list.
pub fn priority_for<'a>(config: &'a SyncConfig, page: &str) -> &'a [String] {
    config
        .priorities
        .get(page)
        .map(Vec::as_slice)
        .unwrap_or(config.default_priority.as_slice())
}
