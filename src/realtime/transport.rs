//! The socket seam: open a text-frame connection to a URL.

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

use crate::http::BoxFuture;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
  #[error("connection failed: {0}")]
  Connect(String),
  /// The attempt was overtaken by `disconnect()` or a newer `connect()`
  #[error("connection attempt superseded")]
  Superseded,
}

/// An open connection.
///
/// Dropping `outgoing` closes the socket. `incoming` ends when the peer
/// closes or the socket fails.
#[derive(Debug)]
pub struct Connection {
  pub outgoing: mpsc::UnboundedSender<String>,
  pub incoming: mpsc::UnboundedReceiver<String>,
}

pub trait Transport: Send + Sync {
  fn connect(&self, url: &Url) -> BoxFuture<Result<Connection, TransportError>>;
}

/// WebSocket transport over tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteTransport;

impl Transport for TungsteniteTransport {
  fn connect(&self, url: &Url) -> BoxFuture<Result<Connection, TransportError>> {
    let url = url.to_string();
    Box::pin(async move {
      let (ws, _) = connect_async(url.as_str())
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;
      let (mut write, mut read) = ws.split();

      let (outgoing, mut outbox) = mpsc::unbounded_channel::<String>();
      let (inbox, incoming) = mpsc::unbounded_channel::<String>();

      tokio::spawn(async move {
        while let Some(text) = outbox.recv().await {
          if let Err(e) = write.send(Message::Text(text.into())).await {
            warn!(error = %e, "websocket send failed");
            break;
          }
        }
        if let Err(e) = write.close().await {
          debug!(error = %e, "websocket close failed");
        }
      });

      tokio::spawn(async move {
        while let Some(next) = read.next().await {
          let text = match next {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
              Ok(text) => text,
              Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
              warn!(error = %e, "websocket read failed");
              break;
            }
          };
          if inbox.send(text).is_err() {
            break;
          }
        }
      });

      Ok(Connection { outgoing, incoming })
    })
  }
}
