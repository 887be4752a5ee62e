use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::entry::Entry;
use super::error::FetchError;
use super::key::QueryKey;
use super::lock::lock_or_recover;
use super::store::CacheStore;

/// Runs keyed fetches against a [`CacheStore`].
///
/// At most one fetch per key is in flight at a time: callers that request a
/// key that is already being fetched attach to the running fetch instead of
/// starting another. Fresh entries (younger than `stale_time`) short-circuit
/// without fetching at all; the default stale time is zero, so every settled
/// entry is refetched on the next `run`.
///
/// A fetch that dies without settling (a panic, a torn-down runtime) records
/// an error entry and frees the key for the next caller.
#[derive(Clone)]
pub struct QueryController {
  store: CacheStore,
  in_flight: Arc<Mutex<HashMap<QueryKey, watch::Receiver<bool>>>>,
  stale_time: Duration,
}

impl QueryController {
  pub fn new(store: CacheStore) -> Self {
    Self {
      store,
      in_flight: Arc::new(Mutex::new(HashMap::new())),
      stale_time: Duration::ZERO,
    }
  }

  /// Treat successful entries younger than `stale_time` as fresh.
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  /// Fetch the entry under `key` unless it is already fresh. The returned
  /// handle carries a snapshot of the entry as the call saw it; dropping
  /// the handle does not cancel the fetch.
  pub fn run<T, F, Fut>(&self, key: &QueryKey, fetch: F) -> QueryRun
  where
    T: Serialize + Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
  {
    self.start(key, fetch, false)
  }

  /// Fetch regardless of freshness. Still attaches to an in-flight fetch
  /// for the key rather than starting a second one.
  pub fn refetch<T, F, Fut>(&self, key: &QueryKey, fetch: F) -> QueryRun
  where
    T: Serialize + Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
  {
    self.start(key, fetch, true)
  }

  fn start<T, F, Fut>(&self, key: &QueryKey, fetch: F, force: bool) -> QueryRun
  where
    T: Serialize + Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
  {
    if !force {
      if let Some(entry) = self.store.get(key) {
        if entry.is_success() && !entry.is_stale(self.stale_time) {
          debug!(key = %key, "entry is fresh, skipping fetch");
          let (_tx, done) = watch::channel(true);
          return QueryRun {
            key: key.clone(),
            store: self.store.clone(),
            entry,
            done,
          };
        }
      }
    }

    // register as the fetcher for this key, or pick up the running fetch;
    // the check and the insert stay under one lock so two callers can
    // never both become the fetcher
    let (done, settled_tx) = {
      let mut in_flight = lock_or_recover(&self.in_flight, "start");
      match in_flight.get(key) {
        Some(done) => (done.clone(), None),
        None => {
          let (tx, rx) = watch::channel(false);
          in_flight.insert(key.clone(), rx.clone());
          (rx, Some(tx))
        }
      }
    };

    let settled_tx = match settled_tx {
      Some(tx) => tx,
      None => {
        debug!(key = %key, "attached to in-flight fetch");
        let entry = self
          .store
          .get(key)
          .unwrap_or_else(|| Entry::idle(key.clone()));
        return QueryRun {
          key: key.clone(),
          store: self.store.clone(),
          entry,
          done,
        };
      }
    };

    let entry = self.store.set(key, Entry::into_loading);

    // the guard owns deregistration, so the key leaves the in-flight map
    // even when the fetch future panics instead of settling
    let mut settle = SettleGuard {
      store: self.store.clone(),
      in_flight: Arc::clone(&self.in_flight),
      key: key.clone(),
      settled_tx,
      armed: true,
    };
    tokio::spawn(async move {
      let outcome = match fetch().await {
        Ok(value) => serde_json::to_value(value)
          .map_err(|e| FetchError::new(format!("could not encode fetched value: {}", e))),
        Err(e) => Err(e),
      };
      let stored = match outcome {
        Ok(value) => settle.store.set(&settle.key, |entry| entry.into_success(value)),
        Err(error) => settle.store.set(&settle.key, |entry| entry.into_error(error)),
      };
      settle.armed = false;
      debug!(key = %settle.key, status = ?stored.status, "fetch settled");
    });

    QueryRun {
      key: key.clone(),
      store: self.store.clone(),
      entry,
      done,
    }
  }
}

/// Handle to a single `run`/`refetch` call.
///
/// Dropping the handle does not cancel anything; the fetch task settles the
/// cache entry either way.
#[derive(Debug)]
#[allow(dead_code)]
pub struct QueryRun {
  key: QueryKey,
  store: CacheStore,
  entry: Entry,
  done: watch::Receiver<bool>,
}

impl QueryRun {
  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  /// The entry as this call saw it: `Loading` when a fetch was started or
  /// joined, the cached entry when freshness short-circuited the fetch.
  pub fn entry(&self) -> &Entry {
    &self.entry
  }

  /// Wait until the fetch behind this run settles, then return the entry as
  /// it stands in the store. `None` means the entry was deleted meanwhile.
  #[allow(dead_code)]
  pub async fn settled(mut self) -> Option<Entry> {
    let _ = self.done.wait_for(|done| *done).await;
    self.store.get(&self.key)
  }
}

// Owned by the fetch task. An armed drop means the task died before writing
// an outcome; record that as an error entry. Either way the key deregisters
// before waiters wake, so the next run starts a new fetch.
struct SettleGuard {
  store: CacheStore,
  in_flight: Arc<Mutex<HashMap<QueryKey, watch::Receiver<bool>>>>,
  key: QueryKey,
  settled_tx: watch::Sender<bool>,
  armed: bool,
}

impl Drop for SettleGuard {
  fn drop(&mut self) {
    if self.armed {
      warn!(key = %self.key, "fetch task died before settling");
      self.store.set(&self.key, |entry| {
        entry.into_error(FetchError::new("fetch task was cancelled"))
      });
    }
    lock_or_recover(&self.in_flight, "settle").remove(&self.key);
    let _ = self.settled_tx.send(true);
  }
}
