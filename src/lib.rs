//! Edge runtime for the OMNIX AI dashboard: an offline cache gateway, a
//! realtime channel client and a retry-aware API client.

pub mod cache;
pub mod config;
pub mod gateway;
pub mod http;
pub mod logging;
pub mod realtime;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;
