//! Client code for swcache.
//!
//! This crate provides the network fetch pipeline, the background worker
//! (fetch strategies, fallback chain, install/activate lifecycle) and the
//! foreground sync coordinator that keeps the cache warm.

pub mod fetch;
pub mod sync;
pub mod worker;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use fetch::{FetchClient, FetchConfig, FetchResponse, Network, Request, ResourceClass, SiteScope, classify};
pub use sync::{PageEvent, PageSignal, SyncCoordinator, SyncEvent, SyncHandle, SyncStatus, SyncTrigger};
pub use worker::{FetchDecision, LifecycleState, PageResponse, ResponseSource, ServiceWorker};
