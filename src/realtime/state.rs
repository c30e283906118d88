use std::fmt;
use std::time::Duration;

/// Connection state of the channel manager.
///
/// `Disconnected` after exhausted retries is a resting state; a manual
/// `connect()` always starts over from `Connecting`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
  #[default]
  Disconnected,
  Connecting,
  Connected,
  Reconnecting,
}

impl fmt::Display for ConnectionState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ConnectionState::Disconnected => "disconnected",
      ConnectionState::Connecting => "connecting",
      ConnectionState::Connected => "connected",
      ConnectionState::Reconnecting => "reconnecting",
    };
    f.write_str(name)
  }
}

/// Exponential backoff for automatic reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
  pub max_attempts: u32,
  pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 5,
      base_delay: Duration::from_millis(1000),
    }
  }
}

impl ReconnectPolicy {
  /// Delay before reconnect attempt `attempt` (1-based): `base * 2^(attempt - 1)`.
  pub fn delay_for(&self, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    self.base_delay.saturating_mul(1u32 << exponent)
  }
}
