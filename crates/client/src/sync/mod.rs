//! Foreground sync coordinator.
//!
//! Decides when cached content is likely stale and refreshes it without the
//! user navigating:
//!
//! - triggers ([`SyncTrigger`]) come from page signals, a periodic timer and a
//!   staleness check at start-up
//! - triggers are debounced; at most one pass runs at a time and triggers
//!   arriving mid-pass wait for the next window ([`SyncMachine`])
//! - a pass probes connectivity, then refreshes pages in an order that
//!   depends on the current page ([`SyncPassRunner`])

mod coordinator;
mod machine;
mod pass;
mod priority;
mod trigger;

pub use coordinator::{PageEvent, SyncCoordinator, SyncEvent, SyncHandle, SyncStatus};
pub use machine::{Phase, SyncAction, SyncMachine};
pub use pass::{PassReport, SyncPassRunner};
pub use priority::priority_for;
pub use trigger::{PageContext, PageSignal, SyncTrigger, is_content_stale};
