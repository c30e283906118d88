//! Core types for the response cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::http::{Headers, Response};

/// Snapshot of a prior network response.
///
/// Entries are only ever replaced wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
  /// URL the response was fetched from
  pub url: String,
  pub status: u16,
  pub headers: Headers,
  pub body: Vec<u8>,
  /// When the snapshot was taken
  pub cached_at: DateTime<Utc>,
}

impl CachedResponse {
  /// Take a snapshot of a network response.
  pub fn snapshot(url: &Url, response: &Response) -> Self {
    Self {
      url: request_key(url),
      status: response.status,
      headers: response.headers.clone(),
      body: response.body.clone(),
      cached_at: Utc::now(),
    }
  }

  /// Rebuild a response from the snapshot.
  pub fn to_response(&self) -> Response {
    Response {
      status: self.status,
      headers: self.headers.clone(),
      body: self.body.clone(),
      source: ResponseSource::Cache,
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh data from network
  Network,
  /// Served from a cache bucket
  Cache,
  /// Network unavailable; cached data annotated as offline, or a synthesized fallback
  Offline,
}

/// Normalized cache key for a request URL.
///
/// Fragments never reach the server, so they do not distinguish entries.
pub fn request_key(url: &Url) -> String {
  let mut url = url.clone();
  url.set_fragment(None);
  url.to_string()
}

/// SHA256 hash of a request key, for stable fixed-length storage keys.
pub fn key_hash(key: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(key.as_bytes());
  hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_request_key_drops_fragment() {
    let a = Url::parse("http://localhost:3000/index.html#top").unwrap();
    let b = Url::parse("http://LOCALHOST:3000/index.html").unwrap();
    assert_eq!(request_key(&a), request_key(&b));
  }

  #[test]
  fn test_request_key_keeps_query() {
    let a = Url::parse("http://localhost:3000/api/products?page=1").unwrap();
    let b = Url::parse("http://localhost:3000/api/products?page=2").unwrap();
    assert_ne!(request_key(&a), request_key(&b));
  }

  #[test]
  fn test_key_hash_is_stable_hex() {
    let hash = key_hash("http://localhost:3000/");
    assert_eq!(hash.len(), 64);
    assert_eq!(hash, key_hash("http://localhost:3000/"));
  }

  #[test]
  fn test_snapshot_round_trips_to_cache_response() {
    let url = Url::parse("http://localhost:3000/app.js").unwrap();
    let response = Response::text(200, "console.log(1)");
    let cached = CachedResponse::snapshot(&url, &response).to_response();
    assert_eq!(cached.status, 200);
    assert_eq!(cached.body, response.body);
    assert_eq!(cached.source, ResponseSource::Cache);
  }
}
