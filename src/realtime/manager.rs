use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use super::state::{ConnectionState, ReconnectPolicy};
use super::subscriptions::{Removal, SubscriptionId, Subscriptions};
use super::transport::{Connection, Transport, TransportError};
use super::wire::{subscribe_frame, unsubscribe_frame, Frame};
use crate::config::RealtimeConfig;

const EVENT_CAPACITY: usize = 256;

/// Observable changes for UI consumers.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
  StateChange {
    from: ConnectionState,
    to: ConnectionState,
  },
  Connected,
  Disconnected,
  /// Every parsed inbound frame, whether or not a channel matched
  Message(Frame),
  /// Automatic reconnects are exhausted
  ReconnectFailed { attempts: u32 },
}

/// Display-only counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metrics {
  pub messages_sent: u64,
  pub messages_received: u64,
  pub last_connected: Option<DateTime<Utc>>,
  pub queued_messages: usize,
  pub attempt_count: u32,
}

struct Shared {
  state: ConnectionState,
  /// Bumped by `connect()` and `disconnect()`; stale tasks compare and bail
  generation: u64,
  attempt_count: u32,
  outgoing: Option<mpsc::UnboundedSender<String>>,
  reader: Option<JoinHandle<()>>,
  reconnect: Option<JoinHandle<()>>,
  subscriptions: Subscriptions,
  queue: VecDeque<String>,
  events: Option<broadcast::Sender<RealtimeEvent>>,
  messages_sent: u64,
  messages_received: u64,
  last_connected: Option<DateTime<Utc>>,
}

impl Shared {
  fn emit(&self, event: RealtimeEvent) {
    if let Some(events) = &self.events {
      // No receivers is fine
      let _ = events.send(event);
    }
  }

  fn set_state(&mut self, to: ConnectionState) {
    let from = self.state;
    if from == to {
      return;
    }
    self.state = to;
    debug!(%from, %to, "realtime state");
    self.emit(RealtimeEvent::StateChange { from, to });
    match to {
      ConnectionState::Connected => self.emit(RealtimeEvent::Connected),
      ConnectionState::Disconnected => self.emit(RealtimeEvent::Disconnected),
      _ => {}
    }
  }

  /// Write a frame if the socket is open, handing it back otherwise.
  fn transmit(&mut self, text: String) -> Result<(), String> {
    if self.state != ConnectionState::Connected {
      return Err(text);
    }
    let Some(outgoing) = &self.outgoing else {
      return Err(text);
    };
    outgoing.send(text).map_err(|e| e.0)?;
    self.messages_sent += 1;
    Ok(())
  }

  fn stop_tasks(&mut self) {
    self.generation += 1;
    if let Some(pending) = self.reconnect.take() {
      pending.abort();
    }
    if let Some(reader) = self.reader.take() {
      reader.abort();
    }
    self.outgoing = None;
  }
}

struct Inner {
  url: Url,
  transport: Arc<dyn Transport>,
  policy: ReconnectPolicy,
  queue_while_offline: bool,
  max_queued_messages: usize,
  shared: Mutex<Shared>,
}

impl Inner {
  fn lock(&self) -> MutexGuard<'_, Shared> {
    self.shared.lock().unwrap_or_else(PoisonError::into_inner)
  }

  async fn attempt(self: &Arc<Self>, generation: u64) -> Result<(), TransportError> {
    debug!(url = %self.url, "opening realtime connection");
    let result = self.transport.connect(&self.url).await;

    let mut shared = self.lock();
    if shared.generation != generation {
      debug!(url = %self.url, "discarding superseded connection attempt");
      return Err(TransportError::Superseded);
    }
    match result {
      Ok(connection) => {
        self.opened(&mut shared, connection, generation);
        Ok(())
      }
      Err(e) => {
        warn!(url = %self.url, error = %e, "realtime connection failed");
        shared.set_state(ConnectionState::Disconnected);
        self.schedule_reconnect(&mut shared);
        Err(e)
      }
    }
  }

  fn opened(self: &Arc<Self>, shared: &mut Shared, connection: Connection, generation: u64) {
    let Connection {
      outgoing,
      mut incoming,
    } = connection;
    shared.outgoing = Some(outgoing);
    shared.attempt_count = 0;
    shared.last_connected = Some(Utc::now());
    shared.set_state(ConnectionState::Connected);
    info!(url = %self.url, "realtime connected");

    for channel in shared.subscriptions.channels() {
      if shared.transmit(subscribe_frame(&channel)).is_err() {
        warn!(%channel, "failed to resubscribe");
      }
    }

    let queued: Vec<String> = shared.queue.drain(..).collect();
    if !queued.is_empty() {
      info!(count = queued.len(), "flushing queued realtime messages");
    }
    for text in queued {
      if shared.transmit(text).is_err() {
        warn!("lost queued realtime message");
      }
    }

    let inner = Arc::clone(self);
    shared.reader = Some(tokio::spawn(async move {
      while let Some(text) = incoming.recv().await {
        inner.dispatch(&text);
      }
      inner.closed(generation);
    }));
  }

  /// Fan a frame out to its channel's callbacks, then broadcast it.
  fn dispatch(&self, text: &str) {
    self.lock().messages_received += 1;

    let frame = match Frame::parse(text) {
      Ok(frame) => frame,
      Err(e) => {
        warn!(error = %e, "dropping malformed realtime frame");
        return;
      }
    };

    // Snapshot so callbacks may subscribe, unsubscribe or send
    let callbacks = match &frame.channel {
      Some(channel) => self.lock().subscriptions.callbacks(channel),
      None => Vec::new(),
    };
    for callback in callbacks {
      if catch_unwind(AssertUnwindSafe(|| callback(&frame.payload))).is_err() {
        error!(channel = ?frame.channel, "realtime subscriber panicked");
      }
    }

    self.lock().emit(RealtimeEvent::Message(frame));
  }

  fn closed(self: &Arc<Self>, generation: u64) {
    let mut shared = self.lock();
    if shared.generation != generation {
      return;
    }
    shared.outgoing = None;
    shared.reader = None;
    warn!(url = %self.url, "realtime connection closed unexpectedly");
    shared.set_state(ConnectionState::Disconnected);
    self.schedule_reconnect(&mut shared);
  }

  fn schedule_reconnect(self: &Arc<Self>, shared: &mut Shared) {
    shared.attempt_count += 1;
    let attempt = shared.attempt_count;
    if attempt > self.policy.max_attempts {
      warn!(
        attempts = self.policy.max_attempts,
        "giving up on realtime reconnects"
      );
      shared.set_state(ConnectionState::Disconnected);
      shared.emit(RealtimeEvent::ReconnectFailed {
        attempts: self.policy.max_attempts,
      });
      return;
    }

    let delay = self.policy.delay_for(attempt);
    shared.set_state(ConnectionState::Reconnecting);
    info!(attempt, ?delay, "scheduling realtime reconnect");

    let inner = Arc::clone(self);
    let generation = shared.generation;
    shared.reconnect = Some(tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      {
        let mut shared = inner.lock();
        if shared.generation != generation {
          return;
        }
        shared.set_state(ConnectionState::Connecting);
      }
      // A failure schedules the next attempt
      let _ = inner.attempt(generation).await;
    }));
  }
}

/// Owns the single realtime socket and multiplexes channels over it.
///
/// Reconnects with exponential backoff after an unexpected close or a failed
/// attempt, re-subscribing every registered channel once the socket is back.
pub struct ChannelManager {
  inner: Arc<Inner>,
}

impl ChannelManager {
  pub fn new(config: &RealtimeConfig, transport: Arc<dyn Transport>) -> Self {
    let (events, _) = broadcast::channel(EVENT_CAPACITY);
    Self {
      inner: Arc::new(Inner {
        url: config.url.clone(),
        transport,
        policy: config.reconnect_policy(),
        queue_while_offline: config.queue_while_offline,
        max_queued_messages: config.max_queued_messages,
        shared: Mutex::new(Shared {
          state: ConnectionState::Disconnected,
          generation: 0,
          attempt_count: 0,
          outgoing: None,
          reader: None,
          reconnect: None,
          subscriptions: Subscriptions::default(),
          queue: VecDeque::new(),
          events: Some(events),
          messages_sent: 0,
          messages_received: 0,
          last_connected: None,
        }),
      }),
    }
  }

  pub fn url(&self) -> &Url {
    &self.inner.url
  }

  pub fn state(&self) -> ConnectionState {
    self.inner.lock().state
  }

  pub fn is_connected(&self) -> bool {
    self.state() == ConnectionState::Connected
  }

  /// Listen for state changes and messages. Closed after `dispose()`.
  pub fn events(&self) -> broadcast::Receiver<RealtimeEvent> {
    match &self.inner.lock().events {
      Some(events) => events.subscribe(),
      None => broadcast::channel(1).1,
    }
  }

  pub fn metrics(&self) -> Metrics {
    let shared = self.inner.lock();
    Metrics {
      messages_sent: shared.messages_sent,
      messages_received: shared.messages_received,
      last_connected: shared.last_connected,
      queued_messages: shared.queue.len(),
      attempt_count: shared.attempt_count,
    }
  }

  /// Channels with at least one callback.
  pub fn channels(&self) -> Vec<String> {
    self.inner.lock().subscriptions.channels()
  }

  /// Open the socket, resolving once it is open.
  ///
  /// A no-op while connected or while an attempt is in flight. Supersedes a
  /// pending automatic reconnect. A failure schedules automatic reconnects.
  pub async fn connect(&self) -> Result<(), TransportError> {
    let generation = {
      let mut shared = self.inner.lock();
      let state = shared.state;
      match state {
        ConnectionState::Connected | ConnectionState::Connecting => {
          debug!(%state, "connect ignored");
          return Ok(());
        }
        ConnectionState::Disconnected => shared.attempt_count = 0,
        ConnectionState::Reconnecting => {}
      }
      if let Some(pending) = shared.reconnect.take() {
        pending.abort();
      }
      shared.generation += 1;
      shared.set_state(ConnectionState::Connecting);
      shared.generation
    };
    self.inner.attempt(generation).await
  }

  /// Close the socket and forget every subscription. No reconnect follows.
  pub fn disconnect(&self) {
    let mut shared = self.inner.lock();
    shared.stop_tasks();
    shared.subscriptions.clear();
    shared.queue.clear();
    shared.attempt_count = 0;
    shared.set_state(ConnectionState::Disconnected);
    info!(url = %self.inner.url, "realtime disconnected");
  }

  /// Disconnect and close the event stream.
  pub fn dispose(&self) {
    self.disconnect();
    self.inner.lock().events = None;
  }

  /// Register `callback` for `channel`. The first callback on a channel
  /// subscribes server-side.
  pub fn subscribe<F>(&self, channel: &str, callback: F) -> SubscriptionId
  where
    F: Fn(&Value) + Send + Sync + 'static,
  {
    let mut shared = self.inner.lock();
    let (id, first) = shared.subscriptions.add(channel, Arc::new(callback));
    if first {
      debug!(channel, "subscribing");
      // Not open yet: sent on connect
      let _ = shared.transmit(subscribe_frame(channel));
    }
    id
  }

  /// Remove one callback. Returns false if it was not registered.
  pub fn unsubscribe(&self, channel: &str, id: SubscriptionId) -> bool {
    let mut shared = self.inner.lock();
    match shared.subscriptions.remove(channel, id) {
      Removal::NotFound => false,
      Removal::Removed => true,
      Removal::ChannelEmptied => {
        debug!(channel, "unsubscribing");
        let _ = shared.transmit(unsubscribe_frame(channel));
        true
      }
    }
  }

  /// Send a JSON payload. Returns true only if it went out on an open socket.
  pub fn send(&self, payload: &Value) -> bool {
    let mut shared = self.inner.lock();
    let text = match shared.transmit(payload.to_string()) {
      Ok(()) => return true,
      Err(text) => text,
    };

    if self.inner.queue_while_offline && self.inner.max_queued_messages > 0 {
      if shared.queue.len() >= self.inner.max_queued_messages {
        shared.queue.pop_front();
        warn!("realtime queue full, dropping oldest message");
      }
      shared.queue.push_back(text);
      debug!(queued = shared.queue.len(), "queued realtime message");
    } else {
      debug!("not connected, dropping realtime message");
    }
    false
  }
}

impl Drop for ChannelManager {
  fn drop(&mut self) {
    self.inner.lock().stop_tasks();
  }
}
