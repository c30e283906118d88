//! Page clients and the notification surface the gateway talks to.

use color_eyre::Result;
use serde_json::Value;
use tracing::info;
use url::Url;

use super::push::Notification;

/// An open page controlled (or controllable) by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
  pub id: String,
  pub url: Url,
}

/// The set of open pages.
pub trait Clients: Send + Sync {
  /// Take control of every open page.
  fn claim(&self) -> Result<()>;

  fn match_all(&self) -> Result<Vec<ClientInfo>>;

  fn post_message(&self, client_id: &str, message: &Value) -> Result<()>;

  fn focus(&self, client_id: &str) -> Result<()>;

  fn open_window(&self, url: &Url) -> Result<()>;
}

/// Displays notifications to the user.
pub trait Notifier: Send + Sync {
  fn show(&self, notification: &Notification) -> Result<()>;
}

/// Headless clients: there are no pages, every action is logged.
#[derive(Debug, Default)]
pub struct LogClients;

impl Clients for LogClients {
  fn claim(&self) -> Result<()> {
    info!("claimed open clients");
    Ok(())
  }

  fn match_all(&self) -> Result<Vec<ClientInfo>> {
    Ok(Vec::new())
  }

  fn post_message(&self, client_id: &str, message: &Value) -> Result<()> {
    info!(client_id, %message, "post message");
    Ok(())
  }

  fn focus(&self, client_id: &str) -> Result<()> {
    info!(client_id, "focus client");
    Ok(())
  }

  fn open_window(&self, url: &Url) -> Result<()> {
    info!(%url, "open window");
    Ok(())
  }
}

/// Notifier that writes notifications to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
  fn show(&self, notification: &Notification) -> Result<()> {
    info!(
      title = %notification.title,
      body = %notification.body,
      tag = %notification.tag,
      require_interaction = notification.require_interaction,
      "notification"
    );
    Ok(())
  }
}
