//! Messages exchanged between the foreground page and the background worker.
//!
//! Both directions are JSON objects tagged by a `type` field, e.g.
//! `{"type":"SYNC_CACHE","timestamp":1700000000000}`.

use serde::{Deserialize, Serialize};

use crate::Error;

/// Foreground -> worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Activate a waiting worker now.
    SkipWaiting,
    /// Refresh the critical pages and resources.
    SyncCache {
        #[serde(default)]
        timestamp: i64,
    },
    /// Pre-cache these image paths into the image bucket.
    CacheImages {
        #[serde(default)]
        images: Vec<String>,
    },
}

/// Worker -> every connected foreground page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    /// A refresh pass finished.
    CacheUpdated { timestamp: i64 },
    /// Percentage of the current refresh pass completed.
    SyncProgress { progress: f64 },
}

impl ClientMessage {
    /// Parse a message from its JSON form.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(|e| Error::InvalidMessage(e.to_string()))
    }
}
