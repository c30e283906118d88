//! Fire-and-forget task helper.

use std::fmt::Display;
use std::future::Future;

use tokio::task::JoinHandle;
use tracing::debug;

/// Spawn `task` and discard its failure.
///
/// Every call site using this helper accepts that nobody observes the
/// outcome; failures are logged at debug level and dropped.
pub fn run_detached<F, E>(name: &'static str, task: F) -> JoinHandle<()>
where
  F: Future<Output = Result<(), E>> + Send + 'static,
  E: Display + Send + 'static,
{
  tokio::spawn(async move {
    if let Err(e) = task.await {
      debug!(task = name, error = %e, "detached task failed");
    }
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::sync::Arc;

  #[tokio::test]
  async fn test_failure_is_swallowed() {
    let handle = run_detached("failing", async { Err::<(), _>("boom") });
    assert!(handle.await.is_ok());
  }

  #[tokio::test]
  async fn test_task_runs() {
    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    run_detached("flag", async move {
      flag.store(true, Ordering::SeqCst);
      Ok::<_, String>(())
    })
    .await
    .unwrap();
    assert!(ran.load(Ordering::SeqCst));
  }
}
