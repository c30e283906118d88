//! Request classification for the cache gateway.

use crate::http::{Request, RequestMode};

/// Extensions served cache-first: scripts, stylesheets, images, fonts.
pub const DEFAULT_STATIC_EXTENSIONS: &[&str] = &[
  "js", "css", "png", "jpg", "jpeg", "gif", "svg", "ico", "webp", "woff", "woff2", "ttf", "eot",
];

/// Path fragments identifying dashboard API endpoints.
pub const DEFAULT_API_PATTERNS: &[&str] = &[
  "/api/products",
  "/api/dashboard",
  "/api/alerts",
  "/api/analytics",
  "/api/inventory",
  "/api/orders",
  "/api/recommendations",
  "/api/ab-tests",
  "/api/settings",
];

/// Caching policy class of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Root document or any `.html` page
  Navigation,
  StaticAsset,
  Api,
  Other,
}

#[derive(Debug, Clone)]
pub struct Classifier {
  static_extensions: Vec<String>,
  api_patterns: Vec<String>,
}

impl Default for Classifier {
  fn default() -> Self {
    Self::new(
      DEFAULT_STATIC_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
      DEFAULT_API_PATTERNS.iter().map(|s| s.to_string()).collect(),
    )
  }
}

impl Classifier {
  pub fn new(static_extensions: Vec<String>, api_patterns: Vec<String>) -> Self {
    Self {
      static_extensions: static_extensions
        .into_iter()
        .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
        .collect(),
      api_patterns,
    }
  }

  /// Classify a request. Precedence: navigation, static asset, API, other.
  pub fn classify(&self, request: &Request) -> RequestClass {
    let path = request.url.path();

    if request.mode == RequestMode::Navigate || path == "/" || path.ends_with(".html") {
      return RequestClass::Navigation;
    }

    if let Some(ext) = extension(path) {
      if self.static_extensions.iter().any(|e| *e == ext) {
        return RequestClass::StaticAsset;
      }
    }

    if self.api_patterns.iter().any(|p| path.contains(p.as_str())) {
      return RequestClass::Api;
    }

    RequestClass::Other
  }
}

/// Lowercased extension of the last path segment.
fn extension(path: &str) -> Option<String> {
  let segment = path.rsplit('/').next()?;
  let (stem, ext) = segment.rsplit_once('.')?;
  if stem.is_empty() || ext.is_empty() {
    return None;
  }
  Some(ext.to_ascii_lowercase())
}
