use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// Receives the `payload` of every frame on its channel.
pub type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe that callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "sub-{}", self.0)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
  NotFound,
  Removed,
  /// The channel has no callbacks left and was dropped
  ChannelEmptied,
}

/// Callbacks registered per channel, in registration order.
#[derive(Default)]
pub struct Subscriptions {
  next_id: u64,
  channels: BTreeMap<String, Vec<(SubscriptionId, Callback)>>,
}

impl Subscriptions {
  /// Register `callback`; the flag is true when `channel` is new.
  pub fn add(&mut self, channel: &str, callback: Callback) -> (SubscriptionId, bool) {
    self.next_id += 1;
    let id = SubscriptionId(self.next_id);
    let first = !self.channels.contains_key(channel);
    self
      .channels
      .entry(channel.to_string())
      .or_default()
      .push((id, callback));
    (id, first)
  }

  pub fn remove(&mut self, channel: &str, id: SubscriptionId) -> Removal {
    let Some(callbacks) = self.channels.get_mut(channel) else {
      return Removal::NotFound;
    };
    let before = callbacks.len();
    callbacks.retain(|(existing, _)| *existing != id);
    if callbacks.len() == before {
      return Removal::NotFound;
    }
    if callbacks.is_empty() {
      self.channels.remove(channel);
      return Removal::ChannelEmptied;
    }
    Removal::Removed
  }

  /// Snapshot of the callbacks for `channel`.
  pub fn callbacks(&self, channel: &str) -> Vec<Callback> {
    self
      .channels
      .get(channel)
      .map(|callbacks| callbacks.iter().map(|(_, cb)| Arc::clone(cb)).collect())
      .unwrap_or_default()
  }

  pub fn channels(&self) -> Vec<String> {
    self.channels.keys().cloned().collect()
  }

  pub fn contains(&self, channel: &str) -> bool {
    self.channels.contains_key(channel)
  }

  pub fn clear(&mut self) {
    self.channels.clear();
  }
}

impl fmt::Debug for Subscriptions {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let counts: BTreeMap<&str, usize> = self
      .channels
      .iter()
      .map(|(name, callbacks)| (name.as_str(), callbacks.len()))
      .collect();
    f.debug_struct("Subscriptions").field("channels", &counts).finish()
  }
}
