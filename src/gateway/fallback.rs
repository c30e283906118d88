//! Responses synthesized when the network is unavailable.

use serde_json::{json, Map, Value};

use crate::cache::{CachedResponse, ResponseSource};
use crate::http::Response;

/// Header marking responses served without the network.
pub const OFFLINE_HEADER: &str = "x-omnix-offline";

pub const OFFLINE_NAVIGATION_BODY: &str = "Offline - App not available";
pub const OFFLINE_ASSET_BODY: &str = "Asset not available offline";
pub const OFFLINE_GENERIC_BODY: &str = "Service unavailable offline";
pub const NO_CACHED_DATA: &str = "No cached data available";

pub fn offline_navigation() -> Response {
  Response::text(503, OFFLINE_NAVIGATION_BODY).with_source(ResponseSource::Offline)
}

pub fn offline_asset() -> Response {
  Response::text(503, OFFLINE_ASSET_BODY).with_source(ResponseSource::Offline)
}

pub fn offline_generic() -> Response {
  Response::text(503, OFFLINE_GENERIC_BODY).with_source(ResponseSource::Offline)
}

/// API request with neither network nor cache.
pub fn offline_api() -> Response {
  Response::json(503, &json!({ "error": NO_CACHED_DATA, "offline": true }))
    .with_header(OFFLINE_HEADER, "true")
    .with_source(ResponseSource::Offline)
}

/// Cached API data re-served offline, annotated with `_offline` and `_cached`.
///
/// Object bodies get the markers merged in; any other JSON is wrapped under
/// `data`. A non-JSON body is returned unchanged apart from the header.
pub fn cached_api(cached: &CachedResponse) -> Response {
  let mut response = cached.to_response();
  response.status = 200;
  response.source = ResponseSource::Offline;

  if let Ok(value) = serde_json::from_slice::<Value>(&cached.body) {
    let mut body = match value {
      Value::Object(map) => map,
      other => {
        let mut map = Map::new();
        map.insert("data".to_string(), other);
        map
      }
    };
    body.insert("_offline".to_string(), Value::Bool(true));
    body.insert("_cached".to_string(), Value::Bool(true));
    response.body = Value::Object(body).to_string().into_bytes();
    let length = response.body.len().to_string();
    response = response
      .with_header("content-type", "application/json")
      .with_header("content-length", length);
  }

  response.with_header(OFFLINE_HEADER, "true")
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn cached(body: &Value) -> CachedResponse {
    let url = Url::parse("http://localhost:3001/api/products").unwrap();
    CachedResponse::snapshot(&url, &Response::json(200, body))
  }

  #[test]
  fn test_offline_api_shape() {
    let response = offline_api();
    assert_eq!(response.status, 503);
    assert_eq!(response.header(OFFLINE_HEADER), Some("true"));
    let body = response.json_body().unwrap();
    assert_eq!(body["offline"], json!(true));
    assert_eq!(body["error"], json!(NO_CACHED_DATA));
  }

  #[test]
  fn test_cached_object_gets_markers() {
    let response = cached_api(&cached(&json!({ "total": 12 })));
    assert_eq!(response.status, 200);
    assert_eq!(response.source, ResponseSource::Offline);
    assert_eq!(
      response.json_body().unwrap(),
      json!({ "total": 12, "_offline": true, "_cached": true })
    );
  }

  #[test]
  fn test_cached_array_is_wrapped() {
    let response = cached_api(&cached(&json!([1, 2])));
    assert_eq!(
      response.json_body().unwrap(),
      json!({ "data": [1, 2], "_offline": true, "_cached": true })
    );
  }

  #[test]
  fn test_plain_text_fallbacks() {
    assert_eq!(offline_navigation().body_text(), OFFLINE_NAVIGATION_BODY);
    assert_eq!(offline_asset().status, 503);
    assert_eq!(offline_generic().header("content-type"), Some("text/plain"));
  }
}
