//! HTTP plumbing shared by the cache gateway and the API client.

mod client;
mod error;
mod network;
mod session;
mod types;

pub use client::{ApiClient, RetryPolicy};
pub use error::{ApiError, ErrorCode};
pub use network::{BoxFuture, FetchError, HttpNetwork, Network};
pub use session::{CredentialRefresher, Credentials, Session, TokenRefresher};
pub use types::{Headers, Method, Request, RequestMode, Response};
