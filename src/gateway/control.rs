//! Control messages posted from pages to the gateway.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
  /// Activate the new gateway version immediately
  SkipWaiting,
  /// Fetch the URLs and store them in the dynamic bucket
  CacheUrls(Vec<String>),
}

/// What handling a control message did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlOutcome {
  SkipWaiting,
  Cached { stored: usize, failed: usize },
  /// Unknown or malformed message
  Ignored,
}
