//! In-crate fakes for the network, socket and page seams.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use color_eyre::Result;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use url::Url;

use crate::cache::CacheStorage;
use crate::gateway::{ClientInfo, Clients, Notification, Notifier};
use crate::http::{BoxFuture, FetchError, Network, Request, Response};
use crate::realtime::{Connection, Transport, TransportError};

#[derive(Default)]
struct NetworkState {
  routes: HashMap<String, VecDeque<Result<Response, FetchError>>>,
  offline: bool,
  latency: Duration,
  requests: Vec<Request>,
}

/// Scripted network. Unknown URLs answer 404.
#[derive(Default)]
pub struct MockNetwork {
  state: Mutex<NetworkState>,
}

impl MockNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  /// Always answer `url` with `response`.
  pub fn route(&self, url: &str, response: Response) {
    self.script(url, vec![Ok(response)]);
  }

  /// Answer `url` with each outcome in turn, repeating the last one.
  pub fn script(&self, url: &str, outcomes: Vec<Result<Response, FetchError>>) {
    let mut state = self.state.lock().unwrap();
    state.routes.insert(url.to_string(), outcomes.into());
  }

  pub fn set_online(&self, online: bool) {
    self.state.lock().unwrap().offline = !online;
  }

  pub fn set_latency(&self, latency: Duration) {
    self.state.lock().unwrap().latency = latency;
  }

  /// Every request seen so far, in arrival order.
  pub fn requests(&self) -> Vec<Request> {
    self.state.lock().unwrap().requests.clone()
  }
}

impl Network for MockNetwork {
  fn fetch(&self, request: Request) -> BoxFuture<Result<Response, FetchError>> {
    let mut state = self.state.lock().unwrap();
    state.requests.push(request.clone());
    let latency = state.latency;

    let outcome = if state.offline {
      Err(FetchError::Network("offline".into()))
    } else {
      match state.routes.get_mut(request.url.as_str()) {
        Some(outcomes) if outcomes.len() > 1 => outcomes.pop_front().unwrap(),
        Some(outcomes) => outcomes
          .front()
          .cloned()
          .unwrap_or_else(|| Ok(Response::new(404, Vec::new()))),
        None => Ok(Response::new(404, Vec::new())),
      }
    };

    Box::pin(async move {
      if !latency.is_zero() {
        tokio::time::sleep(latency).await;
      }
      outcome
    })
  }
}

struct Peer {
  to_client: Option<mpsc::UnboundedSender<String>>,
  from_client: mpsc::UnboundedReceiver<String>,
}

#[derive(Default)]
struct TransportState {
  failing: bool,
  delay: Duration,
  attempts: Vec<Instant>,
  peers: Vec<Peer>,
  sent: Vec<Value>,
}

/// Fake socket server. Records connection attempts and frames sent to it.
#[derive(Default)]
pub struct MockTransport {
  state: Mutex<TransportState>,
}

impl MockTransport {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set_failing(&self, failing: bool) {
    self.state.lock().unwrap().failing = failing;
  }

  pub fn set_delay(&self, delay: Duration) {
    self.state.lock().unwrap().delay = delay;
  }

  /// When each connection attempt started.
  pub fn attempts(&self) -> Vec<Instant> {
    self.state.lock().unwrap().attempts.clone()
  }

  /// Every frame received from the client, across all connections.
  pub fn sent(&self) -> Vec<Value> {
    let mut state = self.state.lock().unwrap();
    let state = &mut *state;
    for peer in &mut state.peers {
      while let Ok(text) = peer.from_client.try_recv() {
        state.sent.push(serde_json::from_str(&text).unwrap());
      }
    }
    state.sent.clone()
  }

  /// Deliver a frame on the newest connection.
  pub fn push(&self, text: &str) {
    let state = self.state.lock().unwrap();
    let peer = state.peers.last().expect("no connection");
    peer
      .to_client
      .as_ref()
      .expect("connection dropped")
      .send(text.to_string())
      .unwrap();
  }

  /// Close the newest connection from the server side.
  pub fn drop_connection(&self) {
    let mut state = self.state.lock().unwrap();
    if let Some(peer) = state.peers.last_mut() {
      peer.to_client = None;
    }
  }
}

impl Transport for MockTransport {
  fn connect(&self, _url: &Url) -> BoxFuture<Result<Connection, TransportError>> {
    let mut state = self.state.lock().unwrap();
    state.attempts.push(Instant::now());
    let delay = state.delay;

    let outcome = if state.failing {
      Err(TransportError::Connect("connection refused".into()))
    } else {
      let (outgoing, from_client) = mpsc::unbounded_channel();
      let (to_client, incoming) = mpsc::unbounded_channel();
      state.peers.push(Peer {
        to_client: Some(to_client),
        from_client,
      });
      Ok(Connection { outgoing, incoming })
    };

    Box::pin(async move {
      if !delay.is_zero() {
        tokio::time::sleep(delay).await;
      }
      outcome
    })
  }
}

#[derive(Default)]
struct ClientsState {
  clients: Vec<ClientInfo>,
  claims: usize,
  buckets_at_claim: Vec<Vec<String>>,
  focused: Vec<String>,
  opened: Vec<Url>,
  messages: Vec<(String, Value)>,
}

/// Open pages that remember what was done to them.
#[derive(Default)]
pub struct MockClients {
  state: Mutex<ClientsState>,
  storage: Option<Arc<dyn CacheStorage>>,
}

impl MockClients {
  /// Also record the bucket names present at each `claim`.
  pub fn watching(storage: Arc<dyn CacheStorage>) -> Self {
    Self {
      state: Mutex::default(),
      storage: Some(storage),
    }
  }

  pub fn add(&self, id: &str, url: &str) {
    self.state.lock().unwrap().clients.push(ClientInfo {
      id: id.to_string(),
      url: Url::parse(url).unwrap(),
    });
  }

  pub fn claims(&self) -> usize {
    self.state.lock().unwrap().claims
  }

  pub fn buckets_at_claim(&self) -> Vec<Vec<String>> {
    self.state.lock().unwrap().buckets_at_claim.clone()
  }

  pub fn focused(&self) -> Vec<String> {
    self.state.lock().unwrap().focused.clone()
  }

  pub fn opened(&self) -> Vec<Url> {
    self.state.lock().unwrap().opened.clone()
  }

  pub fn messages(&self) -> Vec<(String, Value)> {
    self.state.lock().unwrap().messages.clone()
  }
}

impl Clients for MockClients {
  fn claim(&self) -> Result<()> {
    let buckets = match &self.storage {
      Some(storage) => Some(storage.bucket_names()?),
      None => None,
    };
    let mut state = self.state.lock().unwrap();
    state.claims += 1;
    state.buckets_at_claim.extend(buckets);
    Ok(())
  }

  fn match_all(&self) -> Result<Vec<ClientInfo>> {
    Ok(self.state.lock().unwrap().clients.clone())
  }

  fn post_message(&self, client_id: &str, message: &Value) -> Result<()> {
    self
      .state
      .lock()
      .unwrap()
      .messages
      .push((client_id.to_string(), message.clone()));
    Ok(())
  }

  fn focus(&self, client_id: &str) -> Result<()> {
    self.state.lock().unwrap().focused.push(client_id.to_string());
    Ok(())
  }

  fn open_window(&self, url: &Url) -> Result<()> {
    self.state.lock().unwrap().opened.push(url.clone());
    Ok(())
  }
}

#[derive(Default)]
pub struct RecordingNotifier {
  shown: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
  pub fn shown(&self) -> Vec<Notification> {
    self.shown.lock().unwrap().clone()
  }
}

impl Notifier for RecordingNotifier {
  fn show(&self, notification: &Notification) -> Result<()> {
    self.shown.lock().unwrap().push(notification.clone());
    Ok(())
  }
}
