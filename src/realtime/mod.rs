//! Realtime channel client.
//!
//! A single WebSocket carries every dashboard channel. Callbacks register per
//! channel; the server is told to start or stop fanning out a channel when
//! its first callback arrives or its last one leaves.

mod manager;
mod state;
mod subscriptions;
mod transport;
mod wire;

pub use manager::{ChannelManager, Metrics, RealtimeEvent};
pub use state::{ConnectionState, ReconnectPolicy};
pub use subscriptions::SubscriptionId;
pub use transport::{Connection, Transport, TransportError, TungsteniteTransport};
pub use wire::Frame;
