//! Session credentials and the refresh-token exchange.

use std::sync::{Arc, PoisonError, RwLock};

use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use url::Url;

use super::client::endpoint;
use super::error::{ApiError, ErrorCode};
use super::network::{BoxFuture, Network};
use super::types::{Method, Request};

/// Bearer credentials for the API.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
  pub access_token: Option<String>,
  pub refresh_token: Option<String>,
}

/// Shared, mutable login state.
///
/// Ending the session drops both tokens; the client treats that as logged out.
#[derive(Debug, Default)]
pub struct Session {
  credentials: RwLock<Credentials>,
}

impl Session {
  pub fn new(credentials: Credentials) -> Self {
    Self {
      credentials: RwLock::new(credentials),
    }
  }

  pub fn credentials(&self) -> Credentials {
    self
      .credentials
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  pub fn access_token(&self) -> Option<String> {
    self.credentials().access_token
  }

  pub fn is_authenticated(&self) -> bool {
    self.access_token().is_some()
  }

  /// Replace the access token, keeping the old refresh token unless a new one is given.
  pub fn update(&self, fresh: Credentials) {
    let mut current = self
      .credentials
      .write()
      .unwrap_or_else(PoisonError::into_inner);
    current.access_token = fresh.access_token;
    if fresh.refresh_token.is_some() {
      current.refresh_token = fresh.refresh_token;
    }
  }

  /// Force the logged-out state.
  pub fn end(&self) {
    warn!("session ended, credentials cleared");
    *self
      .credentials
      .write()
      .unwrap_or_else(PoisonError::into_inner) = Credentials::default();
  }
}

/// Exchanges a refresh token for fresh credentials.
pub trait CredentialRefresher: Send + Sync {
  fn refresh(&self, refresh_token: Option<String>) -> BoxFuture<Result<Credentials, ApiError>>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
  access_token: String,
  refresh_token: Option<String>,
}

/// Posts the refresh token to the backend's refresh endpoint.
pub struct TokenRefresher {
  network: Arc<dyn Network>,
  endpoint: Url,
}

impl TokenRefresher {
  pub const PATH: &'static str = "/api/auth/refresh";

  pub fn new(network: Arc<dyn Network>, base_url: &Url) -> Result<Self, url::ParseError> {
    Ok(Self {
      network,
      endpoint: endpoint(base_url, Self::PATH)?,
    })
  }
}

impl CredentialRefresher for TokenRefresher {
  fn refresh(&self, refresh_token: Option<String>) -> BoxFuture<Result<Credentials, ApiError>> {
    let network = Arc::clone(&self.network);
    let endpoint = self.endpoint.clone();
    Box::pin(async move {
      let token =
        refresh_token.ok_or_else(|| ApiError::unauthorized("No refresh token available"))?;

      let body = json!({ "refreshToken": token }).to_string().into_bytes();
      let request = Request::new(Method::Post, endpoint)
        .with_header("content-type", "application/json")
        .with_body(body);

      let response = network.fetch(request).await?;
      if !response.is_success() {
        return Err(ApiError::unauthorized(format!(
          "Token refresh rejected with HTTP {}",
          response.status
        )));
      }

      let parsed: RefreshResponse = serde_json::from_slice(&response.body).map_err(|e| {
        ApiError::new(
          response.status,
          ErrorCode::InvalidResponse,
          format!("Malformed refresh response: {}", e),
        )
      })?;

      info!("access token refreshed");
      Ok(Credentials {
        access_token: Some(parsed.access_token),
        refresh_token: parsed.refresh_token,
      })
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::MockNetwork;
  use crate::http::Response;

  #[test]
  fn test_update_keeps_refresh_token() {
    let session = Session::new(Credentials {
      access_token: Some("old".into()),
      refresh_token: Some("refresh".into()),
    });
    session.update(Credentials {
      access_token: Some("new".into()),
      refresh_token: None,
    });
    let creds = session.credentials();
    assert_eq!(creds.access_token.as_deref(), Some("new"));
    assert_eq!(creds.refresh_token.as_deref(), Some("refresh"));
  }

  #[test]
  fn test_end_logs_out() {
    let session = Session::new(Credentials {
      access_token: Some("a".into()),
      refresh_token: Some("r".into()),
    });
    session.end();
    assert!(!session.is_authenticated());
    assert_eq!(session.credentials(), Credentials::default());
  }

  #[tokio::test]
  async fn test_token_refresher_parses_response() {
    let network = Arc::new(MockNetwork::new());
    network.route(
      "http://api.test/api/auth/refresh",
      Response::json(200, &json!({ "accessToken": "fresh", "refreshToken": "r2" })),
    );
    let base = Url::parse("http://api.test").unwrap();
    let refresher = TokenRefresher::new(network.clone(), &base).unwrap();

    let creds = refresher.refresh(Some("r1".into())).await.unwrap();
    assert_eq!(creds.access_token.as_deref(), Some("fresh"));
    assert_eq!(creds.refresh_token.as_deref(), Some("r2"));

    let sent = network.requests();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].method, Method::Post);
  }

  #[tokio::test]
  async fn test_token_refresher_without_token_fails() {
    let network = Arc::new(MockNetwork::new());
    let base = Url::parse("http://api.test").unwrap();
    let refresher = TokenRefresher::new(network.clone(), &base).unwrap();

    let err = refresher.refresh(None).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Unauthorized);
    assert!(network.requests().is_empty());
  }
}
