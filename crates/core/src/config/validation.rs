//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `max_bytes` is 0 or exceeds 50MB
    /// - `fetch_timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `probe_timeout_ms` is less than 100ms or exceeds `fetch_timeout_ms`
    /// - `origin` is not an absolute http(s) URL
    /// - `base_path` is non-empty and does not start with `/`, or ends with `/`
    /// - `bucket_prefix`, `cache_version` or `user_agent` is empty
    /// - `precache_page_count` exceeds `pages_to_cache`
    /// - `sync.debounce_ms` or `sync.periodic_interval_secs` is 0
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_bytes == 0 {
            return Err(invalid("max_bytes", "must be greater than 0"));
        }
        if self.max_bytes > 50 * 1024 * 1024 {
            return Err(invalid("max_bytes", "must not exceed 50MB"));
        }

        if self.fetch_timeout_ms < 100 {
            return Err(invalid("fetch_timeout_ms", "must be at least 100ms"));
        }
        if self.fetch_timeout_ms > 300_000 {
            return Err(invalid("fetch_timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }
        if self.probe_timeout_ms < 100 {
            return Err(invalid("probe_timeout_ms", "must be at least 100ms"));
        }
        if self.probe_timeout_ms > self.fetch_timeout_ms {
            return Err(invalid("probe_timeout_ms", "must not exceed fetch_timeout_ms"));
        }

        match self.origin.split_once("://") {
            Some(("http" | "https", rest)) if !rest.is_empty() => {}
            _ => return Err(invalid("origin", "must be an absolute http(s) URL")),
        }

        if !self.base_path.is_empty() {
            if !self.base_path.starts_with('/') {
                return Err(invalid("base_path", "must start with '/'"));
            }
            if self.base_path.ends_with('/') {
                return Err(invalid("base_path", "must not end with '/'"));
            }
        }

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }
        if self.bucket_prefix.is_empty() {
            return Err(invalid("bucket_prefix", "must not be empty"));
        }
        if self.cache_version.is_empty() {
            return Err(invalid("cache_version", "must not be empty"));
        }

        if self.precache_page_count > self.pages_to_cache.len() {
            return Err(invalid("precache_page_count", "must not exceed the number of pages_to_cache"));
        }

        if self.sync.debounce_ms == 0 {
            return Err(invalid("sync.debounce_ms", "must be greater than 0"));
        }
        if self.sync.periodic_interval_secs == 0 {
            return Err(invalid("sync.periodic_interval_secs", "must be greater than 0"));
        }

        if self.homepage_paths.is_empty() {
            tracing::warn!("homepage_paths is empty; navigation fallback skips straight to the offline document");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_of(result: Result<(), ConfigError>) -> String {
        match result {
            Err(ConfigError::Invalid { field, .. }) => field,
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_max_bytes_zero() {
        let config = AppConfig { max_bytes: 0, ..Default::default() };
        assert_eq!(field_of(config.validate()), "max_bytes");
    }

    #[test]
    fn test_validate_timeout_too_small() {
        let config = AppConfig { fetch_timeout_ms: 50, ..Default::default() };
        assert_eq!(field_of(config.validate()), "fetch_timeout_ms");
    }

    #[test]
    fn test_validate_probe_longer_than_fetch() {
        let config = AppConfig { fetch_timeout_ms: 1_000, probe_timeout_ms: 2_000, ..Default::default() };
        assert_eq!(field_of(config.validate()), "probe_timeout_ms");
    }

    #[test]
    fn test_validate_origin() {
        let config = AppConfig { origin: "localhost:8080".into(), ..Default::default() };
        assert_eq!(field_of(config.validate()), "origin");

        let config = AppConfig { origin: "ftp://example.com".into(), ..Default::default() };
        assert_eq!(field_of(config.validate()), "origin");

        let config = AppConfig { origin: "https://example.com".into(), ..Default::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_base_path() {
        let config = AppConfig { base_path: "council".into(), ..Default::default() };
        assert_eq!(field_of(config.validate()), "base_path");

        let config = AppConfig { base_path: "/council/".into(), ..Default::default() };
        assert_eq!(field_of(config.validate()), "base_path");

        let config = AppConfig { base_path: "/council".into(), ..Default::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_version() {
        let config = AppConfig { cache_version: String::new(), ..Default::default() };
        assert_eq!(field_of(config.validate()), "cache_version");
    }

    #[test]
    fn test_validate_precache_count() {
        let config = AppConfig { precache_page_count: 10, ..Default::default() };
        assert_eq!(field_of(config.validate()), "precache_page_count");
    }

    #[test]
    fn test_validate_zero_debounce() {
        let mut config = AppConfig::default();
        config.sync.debounce_ms = 0;
        assert_eq!(field_of(config.validate()), "sync.debounce_ms");
    }

    #[test]
    fn test_validate_edge_case_values() {
        let config = AppConfig { max_bytes: 1, fetch_timeout_ms: 100, probe_timeout_ms: 100, ..Default::default() };
        assert!(config.validate().is_ok());
    }
}
