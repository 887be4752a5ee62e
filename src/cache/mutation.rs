use std::future::Future;

use tokio::sync::watch;
use tracing::debug;

use super::error::MutateError;
use super::store::CacheStore;

/// Status of one mutation invocation. `Idle` is the resting state of a
/// slot that has not run yet; a running invocation goes `Pending` and
/// settles as `Success` or `Error`. Statuses of different invocations are
/// fully independent: one failed mutation says nothing about another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationStatus {
  Idle,
  Pending,
  Success,
  Error(MutateError),
}

impl MutationStatus {
  #[allow(dead_code)]
  pub fn is_idle(&self) -> bool {
    matches!(self, MutationStatus::Idle)
  }

  pub fn is_pending(&self) -> bool {
    matches!(self, MutationStatus::Pending)
  }

  #[allow(dead_code)]
  pub fn is_success(&self) -> bool {
    matches!(self, MutationStatus::Success)
  }

  #[allow(dead_code)]
  pub fn is_error(&self) -> bool {
    matches!(self, MutationStatus::Error(_))
  }
}

/// Runs mutations and applies their results to a [`CacheStore`].
///
/// A mutation is a write against the outside world followed by a
/// reconciliation callback that folds the result back into the cache. The
/// callback runs before the invocation's status flips to settled, so a
/// caller that observes `Success` can rely on the cache already being
/// up to date. On failure the controller itself never touches the store;
/// the callback receives the error and decides.
#[derive(Clone)]
pub struct MutationController {
  store: CacheStore,
}

impl MutationController {
  pub fn new(store: CacheStore) -> Self {
    Self { store }
  }

  /// Run `mutate(input)` on a background task, then hand the result to
  /// `on_settled` together with the store. Dropping the returned handle
  /// does not cancel anything; the mutation runs to completion and
  /// reconciles either way.
  pub fn run<I, R, M, Fut, S>(&self, input: I, mutate: M, on_settled: S) -> MutationHandle
  where
    I: Send + 'static,
    R: Send + 'static,
    M: FnOnce(I) -> Fut + Send + 'static,
    Fut: Future<Output = Result<R, MutateError>> + Send + 'static,
    S: FnOnce(&CacheStore, &Result<R, MutateError>) + Send + 'static,
  {
    let (status_tx, status_rx) = watch::channel(MutationStatus::Pending);
    let store = self.store.clone();
    tokio::spawn(async move {
      let result = mutate(input).await;
      on_settled(&store, &result);
      let status = match &result {
        Ok(_) => MutationStatus::Success,
        Err(error) => {
          debug!(error = %error, "mutation failed");
          MutationStatus::Error(error.clone())
        }
      };
      let _ = status_tx.send(status);
    });
    MutationHandle { status: status_rx }
  }
}

/// Observes the status of a single mutation invocation. Cloning the handle
/// gives another view of the same invocation.
#[derive(Debug, Clone)]
pub struct MutationHandle {
  status: watch::Receiver<MutationStatus>,
}

impl MutationHandle {
  pub fn status(&self) -> MutationStatus {
    self.status.borrow().clone()
  }

  pub fn is_pending(&self) -> bool {
    self.status().is_pending()
  }

  /// Wait until the invocation settles and return its final status. By the
  /// time this returns, the reconciliation callback has already run.
  #[allow(dead_code)]
  pub async fn settled(mut self) -> MutationStatus {
    match self.status.wait_for(|status| !status.is_pending()).await {
      Ok(status) => status.clone(),
      Err(_) => MutationStatus::Error(MutateError::new("mutation task was cancelled")),
    }
  }
}
