//! The raw network seam: one request in, one response (or failure) out.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use super::types::{Headers, Request, Response};

/// A boxed, sendable future.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Why a fetch produced no response at all.
///
/// HTTP error statuses are not failures at this level; they come back as
/// ordinary responses.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
  #[error("request timed out after {0:?}")]
  Timeout(Duration),
  #[error("network error: {0}")]
  Network(String),
}

impl FetchError {
  pub fn is_timeout(&self) -> bool {
    matches!(self, FetchError::Timeout(_))
  }
}

/// Anything that can perform a fetch.
pub trait Network: Send + Sync {
  fn fetch(&self, request: Request) -> BoxFuture<Result<Response, FetchError>>;
}

/// Network implementation backed by reqwest, with a hard timeout per request.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
  timeout: Duration,
}

impl HttpNetwork {
  pub fn new(timeout: Duration) -> Self {
    Self {
      client: reqwest::Client::new(),
      timeout,
    }
  }

  async fn execute(
    client: reqwest::Client,
    request: Request,
  ) -> Result<Response, reqwest::Error> {
    let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
      .unwrap_or(reqwest::Method::GET);

    let mut builder = client.request(method, request.url.as_str());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = request.body {
      builder = builder.body(body);
    }

    let response = builder.send().await?;
    let status = response.status().as_u16();
    let mut headers = Headers::new();
    for (name, value) in response.headers() {
      if let Ok(value) = value.to_str() {
        headers.insert(name.as_str().to_ascii_lowercase(), value.to_string());
      }
    }
    let body = response.bytes().await?.to_vec();

    Ok(Response {
      headers,
      ..Response::new(status, body)
    })
  }
}

impl Network for HttpNetwork {
  fn fetch(&self, request: Request) -> BoxFuture<Result<Response, FetchError>> {
    let client = self.client.clone();
    let timeout = self.timeout;
    Box::pin(async move {
      let url = request.url.clone();
      // Dropping the inner future on timeout aborts the underlying request
      match tokio::time::timeout(timeout, Self::execute(client, request)).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(e)) => {
          debug!(%url, error = %e, "fetch failed");
          if e.is_timeout() {
            Err(FetchError::Timeout(timeout))
          } else {
            Err(FetchError::Network(e.to_string()))
          }
        }
        Err(_) => {
          debug!(%url, ?timeout, "fetch timed out");
          Err(FetchError::Timeout(timeout))
        }
      }
    })
  }
}
