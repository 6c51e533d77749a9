//! SQLite-backed Cache Store of named buckets.
//!
//! This module provides persistent request -> response storage using SQLite
//! with async access via tokio-rusqlite. It supports:
//!
//! - Named, versioned buckets (static, dynamic, image) that can be listed and dropped as a unit
//! - Entries keyed by a SHA-256 of the normalized request; writes replace ("last write wins")
//! - Automatic schema migrations
//! - WAL mode for concurrent access
//! - A small key/value table for durable client state

pub mod buckets;
pub mod connection;
pub mod entries;
pub mod hash;
pub mod migrations;
pub mod state;

pub use crate::Error;

pub use buckets::{BucketPurpose, BucketSet, BucketStats};
pub use connection::CacheDb;
pub use entries::{CachedResponse, RequestKey};
