//! Background sync: replay requests that failed while offline.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::http::{Network, Request};

/// Sync tag that triggers a queue flush.
pub const SYNC_TAG: &str = "background-sync";

/// A request waiting to be replayed.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedRequest {
  pub id: i64,
  pub request: Request,
  pub queued_at: DateTime<Utc>,
}

/// Snapshot of the queue taken at the start of a round.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pending {
  /// Replayable requests in insertion order.
  pub requests: Vec<QueuedRequest>,
  /// Entries that could not be decoded. They can never be replayed.
  pub unreadable: Vec<i64>,
}

/// Persistent queue of failed mutating requests.
pub trait SyncQueue: Send + Sync {
  fn enqueue(&self, request: &Request) -> Result<()>;

  /// Everything currently queued. An undecodable entry is reported in
  /// `unreadable` and never fails the whole read.
  fn pending(&self) -> Result<Pending>;

  /// Remove the given entries.
  fn remove(&self, ids: &[i64]) -> Result<()>;
}

/// Queue held in process memory.
#[derive(Debug, Default)]
pub struct MemorySyncQueue {
  inner: Mutex<(i64, Vec<QueuedRequest>)>,
}

impl SyncQueue for MemorySyncQueue {
  fn enqueue(&self, request: &Request) -> Result<()> {
    let mut inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    inner.0 += 1;
    let id = inner.0;
    inner.1.push(QueuedRequest {
      id,
      request: request.clone(),
      queued_at: Utc::now(),
    });
    Ok(())
  }

  fn pending(&self) -> Result<Pending> {
    let inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(Pending {
      requests: inner.1.clone(),
      unreadable: Vec::new(),
    })
  }

  fn remove(&self, ids: &[i64]) -> Result<()> {
    let mut inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    inner.1.retain(|q| !ids.contains(&q.id));
    Ok(())
  }
}

/// Outcome of one flush round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
  pub attempted: usize,
  pub succeeded: usize,
  pub failed: usize,
  /// Undecodable entries dropped from the queue.
  pub discarded: usize,
}

/// Replay every queued request, then clear the entries that were attempted.
///
/// All replays run concurrently and settle independently. Entries are
/// cleared only after the whole round has finished, whatever their outcome;
/// requests queued during the round stay for the next one. Undecodable
/// entries are dropped in the same sweep.
pub async fn flush(queue: &dyn SyncQueue, network: &dyn Network) -> Result<SyncReport> {
  let Pending {
    requests: pending,
    unreadable,
  } = queue.pending()?;
  if pending.is_empty() && unreadable.is_empty() {
    debug!("sync queue empty");
    return Ok(SyncReport::default());
  }

  let outcomes = join_all(pending.iter().map(|queued| async move {
    match network.fetch(queued.request.clone()).await {
      Ok(response) if response.is_success() => true,
      Ok(response) => {
        warn!(id = queued.id, url = %queued.request.url, status = response.status, "sync replay rejected");
        false
      }
      Err(e) => {
        warn!(id = queued.id, url = %queued.request.url, error = %e, "sync replay failed");
        false
      }
    }
  }))
  .await;

  let ids: Vec<i64> = pending
    .iter()
    .map(|q| q.id)
    .chain(unreadable.iter().copied())
    .collect();
  queue.remove(&ids)?;

  let succeeded = outcomes.iter().filter(|ok| **ok).count();
  let report = SyncReport {
    attempted: outcomes.len(),
    succeeded,
    failed: outcomes.len() - succeeded,
    discarded: unreadable.len(),
  };
  info!(?report, "background sync round finished");
  Ok(report)
}
