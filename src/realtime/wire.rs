//! JSON frames exchanged over the realtime socket.

use serde::Serialize;
use serde_json::Value;

/// A parsed inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
  /// `channel` field, else `type`
  pub channel: Option<String>,
  pub payload: Value,
  /// The whole frame as received
  pub raw: Value,
}

impl Frame {
  pub fn parse(text: &str) -> serde_json::Result<Self> {
    let raw: Value = serde_json::from_str(text)?;
    let channel = raw
      .get("channel")
      .and_then(Value::as_str)
      .or_else(|| raw.get("type").and_then(Value::as_str))
      .map(str::to_string);
    let payload = raw.get("payload").cloned().unwrap_or(Value::Null);
    Ok(Self {
      channel,
      payload,
      raw,
    })
  }
}

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum ControlKind {
  Subscribe,
  Unsubscribe,
}

#[derive(Serialize)]
struct ControlFrame<'a> {
  #[serde(rename = "type")]
  kind: ControlKind,
  channel: &'a str,
}

fn control(kind: ControlKind, channel: &str) -> String {
  serde_json::to_string(&ControlFrame { kind, channel }).unwrap_or_default()
}

pub fn subscribe_frame(channel: &str) -> String {
  control(ControlKind::Subscribe, channel)
}

pub fn unsubscribe_frame(channel: &str) -> String {
  control(ControlKind::Unsubscribe, channel)
}
