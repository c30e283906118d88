//! Offline cache gateway.
//!
//! Intercepts the page's requests and serves each class from the network,
//! the cache buckets, or a synthesized fallback:
//! - Navigation: network-first, falling back to the cached root document
//! - Static assets: cache-first with background revalidation
//! - API GETs: network-first, cached JSON annotated as offline
//! - Everything else: network-first with dynamic caching
//!
//! Lifecycle, control messages, background sync and push notifications are
//! one method per event kind on `Gateway`.

mod classify;
mod clients;
mod control;
mod fallback;
mod push;
mod sync;

pub use classify::{Classifier, RequestClass, DEFAULT_API_PATTERNS, DEFAULT_STATIC_EXTENSIONS};
pub use clients::{ClientInfo, Clients, LogClients, LogNotifier, Notifier};
pub use control::{ControlMessage, ControlOutcome};
pub use fallback::OFFLINE_HEADER;
pub use push::{route_click, ClickRoute, Notification, NotificationAction, NotificationClick};
pub use sync::{flush, MemorySyncQueue, Pending, QueuedRequest, SyncQueue, SyncReport, SYNC_TAG};

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{request_key, CacheLayer, CacheStorage};
use crate::config::CacheConfig;
use crate::http::{FetchError, Method, Network, Request, Response};

/// Lifecycle state of the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Parsed,
  Installing,
  Installed,
  Activating,
  Activated,
}

/// Result of intercepting a request.
#[derive(Debug)]
pub enum Intercept {
  /// Not handled; the caller performs the request unmodified
  Passthrough(Request),
  Respond(Response),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
  pub cached: Vec<String>,
  pub failed: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateReport {
  pub deleted: Vec<String>,
  pub kept: Vec<String>,
}

struct Lifecycle {
  state: WorkerState,
  skip_waiting: bool,
}

/// The offline request interceptor.
pub struct Gateway {
  layer: CacheLayer,
  classifier: Classifier,
  origin: Url,
  static_bucket: String,
  dynamic_bucket: String,
  legacy_bucket: String,
  precache: Vec<String>,
  clients: Arc<dyn Clients>,
  notifier: Arc<dyn Notifier>,
  sync_queue: Arc<dyn SyncQueue>,
  lifecycle: Mutex<Lifecycle>,
}

impl Gateway {
  /// Create a gateway with headless clients, a log notifier and an in-memory sync queue.
  pub fn new(
    config: &CacheConfig,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
  ) -> Self {
    Self {
      layer: CacheLayer::new(storage, network),
      classifier: Classifier::new(config.static_extensions.clone(), config.api_patterns.clone()),
      origin: config.origin.clone(),
      static_bucket: config.static_bucket(),
      dynamic_bucket: config.dynamic_bucket(),
      legacy_bucket: config.legacy_bucket.clone(),
      precache: config.precache.clone(),
      clients: Arc::new(LogClients),
      notifier: Arc::new(LogNotifier),
      sync_queue: Arc::new(MemorySyncQueue::default()),
      lifecycle: Mutex::new(Lifecycle {
        state: WorkerState::Parsed,
        skip_waiting: false,
      }),
    }
  }

  pub fn with_clients(mut self, clients: Arc<dyn Clients>) -> Self {
    self.clients = clients;
    self
  }

  pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
    self.notifier = notifier;
    self
  }

  pub fn with_sync_queue(mut self, queue: Arc<dyn SyncQueue>) -> Self {
    self.sync_queue = queue;
    self
  }

  pub fn static_bucket(&self) -> &str {
    &self.static_bucket
  }

  pub fn dynamic_bucket(&self) -> &str {
    &self.dynamic_bucket
  }

  /// Buckets that survive activation.
  pub fn allow_list(&self) -> [&str; 3] {
    [&self.static_bucket, &self.dynamic_bucket, &self.legacy_bucket]
  }

  pub fn origin(&self) -> &Url {
    &self.origin
  }

  pub fn sync_queue(&self) -> &Arc<dyn SyncQueue> {
    &self.sync_queue
  }

  pub fn state(&self) -> WorkerState {
    self.lifecycle().state
  }

  /// Whether the gateway asked to activate without waiting for older versions.
  pub fn skip_waiting_requested(&self) -> bool {
    self.lifecycle().skip_waiting
  }

  /// Resolve a possibly relative URL against the page origin.
  pub fn resolve(&self, url: &str) -> Result<Url> {
    self
      .origin
      .join(url)
      .map_err(|e| eyre!("Invalid URL {}: {}", url, e))
  }

  fn lifecycle(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
    self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn set_state(&self, state: WorkerState) {
    let mut lifecycle = self.lifecycle();
    debug!(from = ?lifecycle.state, to = ?state, "gateway state");
    lifecycle.state = state;
  }

  /// Install: precache the root assets and create the dynamic bucket.
  ///
  /// A precache URL that cannot be fetched is logged and skipped. The
  /// gateway then requests activation without waiting.
  pub async fn on_install(&self) -> Result<InstallReport> {
    self.set_state(WorkerState::Installing);

    let storage = self.layer.storage();
    storage.open_bucket(&self.static_bucket)?;
    storage.open_bucket(&self.dynamic_bucket)?;

    let mut report = InstallReport::default();
    let fetches = self.precache.iter().map(|path| async move {
      let outcome = match self.resolve(path) {
        Ok(url) => self
          .layer
          .fetch_and_store(Request::get(url), &self.static_bucket)
          .await
          .map_err(|e| e.to_string())
          .and_then(|r| {
            if r.is_success() {
              Ok(())
            } else {
              Err(format!("HTTP {}", r.status))
            }
          }),
        Err(e) => Err(e.to_string()),
      };
      (path, outcome)
    });

    for (path, outcome) in join_all(fetches).await {
      match outcome {
        Ok(()) => report.cached.push(path.clone()),
        Err(e) => {
          warn!(path = %path, error = %e, "precache failed");
          report.failed.push(path.clone());
        }
      }
    }

    {
      let mut lifecycle = self.lifecycle();
      lifecycle.state = WorkerState::Installed;
      lifecycle.skip_waiting = true;
    }
    info!(cached = report.cached.len(), failed = report.failed.len(), "gateway installed");
    Ok(report)
  }

  /// Activate: delete every bucket outside the allow-list, then claim clients.
  ///
  /// All deletions settle before the claim so no page reads a bucket mid-delete.
  pub async fn on_activate(&self) -> Result<ActivateReport> {
    self.set_state(WorkerState::Activating);

    let allowed = self.allow_list();
    let mut report = ActivateReport::default();
    for name in self.layer.storage().bucket_names()? {
      if allowed.contains(&name.as_str()) {
        report.kept.push(name);
        continue;
      }
      match self.layer.storage().delete_bucket(&name) {
        Ok(_) => {
          info!(bucket = %name, "deleted stale cache bucket");
          report.deleted.push(name);
        }
        Err(e) => warn!(bucket = %name, error = %e, "failed to delete stale cache bucket"),
      }
    }

    if let Err(e) = self.clients.claim() {
      warn!(error = %e, "failed to claim clients");
    }
    self.set_state(WorkerState::Activated);
    Ok(report)
  }

  /// Intercept a request from the page.
  ///
  /// Non-GET requests and non-http(s) URLs are never touched. Every
  /// intercepted request resolves to a response; failures become cache hits
  /// or synthesized offline responses.
  pub async fn on_fetch(&self, request: Request) -> Intercept {
    if request.method != Method::Get || !matches!(request.url.scheme(), "http" | "https") {
      return Intercept::Passthrough(request);
    }

    let class = self.classifier.classify(&request);
    debug!(url = %request.url, ?class, "intercepted request");

    let response = match class {
      RequestClass::Navigation => self.navigation(request).await,
      RequestClass::StaticAsset => self.static_asset(request).await,
      RequestClass::Api => self.api(request).await,
      RequestClass::Other => self.other(request).await,
    };
    Intercept::Respond(response)
  }

  /// Fetch through the gateway, performing passthrough requests on the network.
  pub async fn fetch(&self, request: Request) -> Result<Response, FetchError> {
    match self.on_fetch(request).await {
      Intercept::Respond(response) => Ok(response),
      Intercept::Passthrough(request) => self.layer.network().fetch(request).await,
    }
  }

  async fn navigation(&self, request: Request) -> Response {
    let key = request_key(&request.url);
    match self.layer.fetch_and_store(request, &self.static_bucket).await {
      Ok(response) => response,
      Err(e) => {
        debug!(error = %e, "navigation offline, trying cached document");
        let root = request_key(&self.origin.join("/").unwrap_or_else(|_| self.origin.clone()));
        self
          .layer
          .cached(None, &key)
          .or_else(|| self.layer.cached(None, &root))
          .map(|cached| cached.to_response())
          .unwrap_or_else(fallback::offline_navigation)
      }
    }
  }

  async fn static_asset(&self, request: Request) -> Response {
    let url = request.url.clone();
    self
      .layer
      .cache_first(request, &self.static_bucket)
      .await
      .unwrap_or_else(|e| {
        debug!(%url, error = %e, "asset unavailable offline");
        fallback::offline_asset()
      })
  }

  async fn api(&self, request: Request) -> Response {
    let key = request_key(&request.url);
    match self.layer.fetch_and_store(request, &self.dynamic_bucket).await {
      Ok(response) => response,
      Err(e) => {
        debug!(%key, error = %e, "API offline, trying cache");
        match self.layer.cached(None, &key) {
          Some(cached) => fallback::cached_api(&cached),
          None => fallback::offline_api(),
        }
      }
    }
  }

  async fn other(&self, request: Request) -> Response {
    let key = request_key(&request.url);
    match self.layer.fetch_and_store(request, &self.dynamic_bucket).await {
      Ok(response) => response,
      Err(e) => {
        debug!(%key, error = %e, "request offline, trying cache");
        self
          .layer
          .cached(None, &key)
          .map(|cached| cached.to_response())
          .unwrap_or_else(fallback::offline_generic)
      }
    }
  }

  /// Handle a control message posted by a page.
  pub async fn on_control_message(&self, message: &Value) -> ControlOutcome {
    let message = match serde_json::from_value::<ControlMessage>(message.clone()) {
      Ok(message) => message,
      Err(e) => {
        debug!(%message, error = %e, "ignoring unknown control message");
        return ControlOutcome::Ignored;
      }
    };

    match message {
      ControlMessage::SkipWaiting => {
        self.lifecycle().skip_waiting = true;
        info!("skip waiting requested by page");
        ControlOutcome::SkipWaiting
      }
      ControlMessage::CacheUrls(urls) => self.cache_urls(&urls).await,
    }
  }

  /// Fetch each URL into the dynamic bucket; failures are independent.
  pub async fn cache_urls(&self, urls: &[String]) -> ControlOutcome {
    let fetches = urls.iter().map(|url| async move {
      let url = match self.resolve(url) {
        Ok(url) => url,
        Err(e) => {
          warn!(error = %e, "skipping prefetch");
          return false;
        }
      };
      match self
        .layer
        .fetch_and_store(Request::get(url.clone()), &self.dynamic_bucket)
        .await
      {
        Ok(response) if response.is_success() => true,
        Ok(response) => {
          warn!(%url, status = response.status, "prefetch rejected");
          false
        }
        Err(e) => {
          warn!(%url, error = %e, "prefetch failed");
          false
        }
      }
    });

    let outcomes = join_all(fetches).await;
    let stored = outcomes.iter().filter(|ok| **ok).count();
    ControlOutcome::Cached {
      stored,
      failed: outcomes.len() - stored,
    }
  }

  /// Background sync trigger. Only the `background-sync` tag flushes the queue.
  pub async fn on_sync(&self, tag: &str) -> Result<Option<SyncReport>> {
    if tag != SYNC_TAG {
      debug!(tag, "ignoring sync tag");
      return Ok(None);
    }
    let network = self.layer.network();
    flush(self.sync_queue.as_ref(), network.as_ref()).await.map(Some)
  }

  /// Show a notification for a push payload.
  pub fn on_push(&self, payload: Option<&[u8]>) -> Notification {
    let notification = Notification::from_payload(payload);
    if let Err(e) = self.notifier.show(&notification) {
      warn!(error = %e, "failed to show notification");
    }
    notification
  }

  /// Route a notification click to a window.
  pub fn on_notification_click(&self, click: &NotificationClick) -> ClickRoute {
    let clients = self.clients.match_all().unwrap_or_else(|e| {
      warn!(error = %e, "failed to list clients");
      Vec::new()
    });

    let route = route_click(click, &clients, &self.origin);
    let result = match &route {
      ClickRoute::Open(url) => self.clients.open_window(url),
      ClickRoute::Focus(id) => self.clients.focus(id),
      ClickRoute::Ignore => Ok(()),
    };
    if let Err(e) = result {
      warn!(?route, error = %e, "failed to handle notification click");
    }
    route
  }

  /// Tell every open client that a notification closed. Returns how many were told.
  pub fn on_notification_close(&self, tag: &str) -> usize {
    let message = push::closed_message(tag, Utc::now().timestamp_millis());
    let clients = match self.clients.match_all() {
      Ok(clients) => clients,
      Err(e) => {
        warn!(error = %e, "failed to list clients");
        return 0;
      }
    };

    clients
      .iter()
      .filter(|client| match self.clients.post_message(&client.id, &message) {
        Ok(()) => true,
        Err(e) => {
          warn!(client = %client.id, error = %e, "failed to post close event");
          false
        }
      })
      .count()
  }
}
