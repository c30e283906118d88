//! Push notifications: payload parsing, click routing, close broadcast.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;
use url::Url;

use super::clients::ClientInfo;

pub const DEFAULT_TITLE: &str = "OMNIX AI";
pub const DEFAULT_BODY: &str = "New notification from OMNIX AI";
pub const DEFAULT_ICON: &str = "/icons/icon-192x192.png";
pub const DEFAULT_BADGE: &str = "/icons/badge-72x72.png";
pub const DEFAULT_TAG: &str = "omnix-notification";

/// Action id that opens the details view.
pub const ACTION_VIEW: &str = "view";
/// Action id that only closes the notification.
pub const ACTION_DISMISS: &str = "dismiss";

const DEFAULT_DETAILS_PATH: &str = "/alerts";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub icon: Option<String>,
}

/// Push payload as sent by the server; every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushPayload {
  title: Option<String>,
  body: Option<String>,
  icon: Option<String>,
  badge: Option<String>,
  data: Option<Value>,
  actions: Option<Vec<NotificationAction>>,
  tag: Option<String>,
  require_interaction: Option<bool>,
}

/// A notification ready to display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub data: Value,
  pub actions: Vec<NotificationAction>,
  pub tag: String,
  pub require_interaction: bool,
}

impl Default for Notification {
  fn default() -> Self {
    Self::from(PushPayload::default())
  }
}

impl From<PushPayload> for Notification {
  fn from(p: PushPayload) -> Self {
    Notification {
      title: p.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
      body: p.body.unwrap_or_else(|| DEFAULT_BODY.to_string()),
      icon: p.icon.unwrap_or_else(|| DEFAULT_ICON.to_string()),
      badge: p.badge.unwrap_or_else(|| DEFAULT_BADGE.to_string()),
      data: p.data.unwrap_or(Value::Null),
      actions: p.actions.unwrap_or_else(default_actions),
      tag: p.tag.unwrap_or_else(|| DEFAULT_TAG.to_string()),
      require_interaction: p.require_interaction.unwrap_or(false),
    }
  }
}

fn default_actions() -> Vec<NotificationAction> {
  vec![
    NotificationAction {
      action: ACTION_VIEW.to_string(),
      title: "View Details".to_string(),
      icon: None,
    },
    NotificationAction {
      action: ACTION_DISMISS.to_string(),
      title: "Dismiss".to_string(),
      icon: None,
    },
  ]
}

impl Notification {
  /// Build a notification from a raw push payload.
  ///
  /// A missing or malformed payload yields the default notification.
  pub fn from_payload(payload: Option<&[u8]>) -> Self {
    let Some(bytes) = payload.filter(|b| !b.is_empty()) else {
      return Self::default();
    };

    match serde_json::from_slice::<PushPayload>(bytes) {
      Ok(parsed) => parsed.into(),
      Err(e) => {
        warn!(error = %e, "malformed push payload, showing default notification");
        Self::default()
      }
    }
  }
}

/// A click on a displayed notification.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationClick {
  /// Action button id, `None` for a click on the notification body
  pub action: Option<String>,
  pub tag: String,
  pub data: Value,
}

/// What a notification click should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickRoute {
  /// Open a new window at the URL
  Open(Url),
  /// Focus the existing client with this id
  Focus(String),
  /// Nothing beyond closing the notification
  Ignore,
}

/// Decide how to handle a notification click.
///
/// `view` opens the details page (`data.url` or `/alerts`), `dismiss` does
/// nothing, anything else focuses a same-origin client or opens the origin.
pub fn route_click(click: &NotificationClick, clients: &[ClientInfo], origin: &Url) -> ClickRoute {
  match click.action.as_deref() {
    Some(ACTION_VIEW) => {
      let path = click
        .data
        .get("url")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_DETAILS_PATH);
      match origin.join(path) {
        Ok(url) => ClickRoute::Open(url),
        Err(e) => {
          warn!(path, error = %e, "invalid notification url, opening default details view");
          origin
            .join(DEFAULT_DETAILS_PATH)
            .map(ClickRoute::Open)
            .unwrap_or_else(|_| ClickRoute::Open(origin.clone()))
        }
      }
    }
    Some(ACTION_DISMISS) => ClickRoute::Ignore,
    _ => clients
      .iter()
      .find(|c| c.url.origin() == origin.origin())
      .map(|c| ClickRoute::Focus(c.id.clone()))
      .unwrap_or_else(|| ClickRoute::Open(origin.clone())),
  }
}

/// Message broadcast to every client when a notification closes.
pub fn closed_message(tag: &str, timestamp_ms: i64) -> Value {
  json!({
    "type": "NOTIFICATION_CLOSED",
    "tag": tag,
    "timestamp": timestamp_ms,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn origin() -> Url {
    Url::parse("http://localhost:3000").unwrap()
  }

  fn click(action: Option<&str>, data: Value) -> NotificationClick {
    NotificationClick {
      action: action.map(String::from),
      tag: DEFAULT_TAG.to_string(),
      data,
    }
  }

  #[test]
  fn test_missing_payload_uses_defaults() {
    let n = Notification::from_payload(None);
    assert_eq!(n.title, DEFAULT_TITLE);
    assert_eq!(n.body, DEFAULT_BODY);
    assert_eq!(n.tag, DEFAULT_TAG);
    assert!(!n.require_interaction);
    assert_eq!(n.actions.len(), 2);
  }

  #[test]
  fn test_malformed_payload_uses_defaults() {
    let n = Notification::from_payload(Some(&b"{not json"[..]));
    assert_eq!(n, Notification::default());
  }

  #[test]
  fn test_payload_fields_override_defaults() {
    let payload = br#"{
      "title": "Low stock",
      "body": "Milk below threshold",
      "tag": "stock-42",
      "requireInteraction": true,
      "data": { "url": "/products/42" },
      "actions": [{ "action": "view", "title": "Open" }]
    }"#;
    let n = Notification::from_payload(Some(&payload[..]));
    assert_eq!(n.title, "Low stock");
    assert_eq!(n.icon, DEFAULT_ICON);
    assert_eq!(n.tag, "stock-42");
    assert!(n.require_interaction);
    assert_eq!(n.actions.len(), 1);
    assert_eq!(n.data["url"], "/products/42");
  }

  #[test]
  fn test_view_action_opens_details() {
    let route = route_click(&click(Some("view"), json!({ "url": "/products/42" })), &[], &origin());
    assert_eq!(route, ClickRoute::Open(origin().join("/products/42").unwrap()));

    let route = route_click(&click(Some("view"), Value::Null), &[], &origin());
    assert_eq!(route, ClickRoute::Open(origin().join("/alerts").unwrap()));
  }

  #[test]
  fn test_dismiss_does_nothing() {
    let route = route_click(&click(Some("dismiss"), Value::Null), &[], &origin());
    assert_eq!(route, ClickRoute::Ignore);
  }

  #[test]
  fn test_body_click_focuses_same_origin_client() {
    let clients = vec![
      ClientInfo {
        id: "other".into(),
        url: Url::parse("http://elsewhere.test/").unwrap(),
      },
      ClientInfo {
        id: "dashboard".into(),
        url: Url::parse("http://localhost:3000/dashboard").unwrap(),
      },
    ];
    let route = route_click(&click(None, Value::Null), &clients, &origin());
    assert_eq!(route, ClickRoute::Focus("dashboard".into()));
  }

  #[test]
  fn test_body_click_without_clients_opens_origin() {
    let route = route_click(&click(None, Value::Null), &[], &origin());
    assert_eq!(route, ClickRoute::Open(origin()));
  }

  #[test]
  fn test_closed_message_shape() {
    let msg = closed_message("stock-42", 1_700_000_000_000);
    assert_eq!(
      msg,
      json!({ "type": "NOTIFICATION_CLOSED", "tag": "stock-42", "timestamp": 1_700_000_000_000i64 })
    );
  }
}
