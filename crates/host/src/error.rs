//! Errors reported back over the host protocol.
//!
//! Every error becomes one `{"error": {"code", "message"}}` line on stdout;
//! the host keeps reading.

use serde_json::{Value, json};

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// The line is not valid JSON or not a known event.
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Core(#[from] swcache_core::Error),
}

impl HostError {
    pub fn code(&self) -> &'static str {
        match self {
            HostError::InvalidInput(_) => "INVALID_INPUT",
            HostError::Core(e) => e.code(),
        }
    }

    pub fn to_json(&self) -> Value {
        json!({ "error": { "code": self.code(), "message": self.to_string() } })
    }
}
