//! Core types and shared functionality for swcache.
//!
//! This crate provides:
//! - Cache Store implementation with SQLite backend (named buckets of request/response entries)
//! - Durable client state (last sync time)
//! - Unified error types
//! - Configuration structures
//! - Messages exchanged between the foreground page and the background worker

pub mod cache;
pub mod config;
pub mod error;
pub mod messages;

pub use cache::{BucketPurpose, BucketSet, CacheDb, CachedResponse, RequestKey};
pub use config::{AppConfig, ConfigError, SyncConfig};
pub use error::Error;
pub use messages::{ClientMessage, WorkerMessage};
