//! Typed errors surfaced by the API client.

use std::fmt;

use serde_json::Value;
use thiserror::Error;

use super::network::FetchError;
use super::types::Response;

/// Application-level error code carried by every `ApiError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
  Timeout,
  Network,
  Unauthorized,
  Client,
  Server,
  InvalidResponse,
}

impl ErrorCode {
  pub fn as_str(&self) -> &'static str {
    match self {
      ErrorCode::Timeout => "TIMEOUT_ERROR",
      ErrorCode::Network => "NETWORK_ERROR",
      ErrorCode::Unauthorized => "UNAUTHORIZED",
      ErrorCode::Client => "CLIENT_ERROR",
      ErrorCode::Server => "SERVER_ERROR",
      ErrorCode::InvalidResponse => "INVALID_RESPONSE",
    }
  }
}

impl fmt::Display for ErrorCode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Error returned by `ApiClient`.
///
/// `status` is 0 when no HTTP response was received (timeout, network).
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message} (status {status}, {code})")]
pub struct ApiError {
  pub status: u16,
  pub code: ErrorCode,
  pub message: String,
  /// Server-supplied detail payload, if any
  pub detail: Option<Value>,
}

impl ApiError {
  pub fn new(status: u16, code: ErrorCode, message: impl Into<String>) -> Self {
    Self {
      status,
      code,
      message: message.into(),
      detail: None,
    }
  }

  pub fn unauthorized(message: impl Into<String>) -> Self {
    Self::new(401, ErrorCode::Unauthorized, message)
  }

  /// Build an error from a non-success HTTP response.
  ///
  /// Servers answer with `{ "error" | "message": .., "details": .. }`; anything
  /// else is kept verbatim as the detail.
  pub fn from_response(response: &Response) -> Self {
    let code = match response.status {
      401 => ErrorCode::Unauthorized,
      400..=499 => ErrorCode::Client,
      _ => ErrorCode::Server,
    };

    let body = response.json_body().ok().filter(|v| !v.is_null());
    let message = body
      .as_ref()
      .and_then(|v| {
        v.get("error")
          .or_else(|| v.get("message"))
          .and_then(Value::as_str)
      })
      .map(String::from)
      .unwrap_or_else(|| format!("HTTP {}", response.status));
    let detail = body.map(|v| v.get("details").cloned().unwrap_or(v));

    Self {
      status: response.status,
      code,
      message,
      detail,
    }
  }

  pub fn is_retryable(&self) -> bool {
    matches!(
      self.code,
      ErrorCode::Timeout | ErrorCode::Network | ErrorCode::Server
    )
  }
}

impl From<FetchError> for ApiError {
  fn from(e: FetchError) -> Self {
    match e {
      FetchError::Timeout(_) => ApiError::new(0, ErrorCode::Timeout, e.to_string()),
      FetchError::Network(_) => ApiError::new(0, ErrorCode::Network, e.to_string()),
    }
  }
}
