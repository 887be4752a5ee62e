use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::error::FetchError;
use super::key::QueryKey;

/// Lifecycle of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
  /// Nothing has been fetched for this key yet
  Idle,
  /// A fetch is in flight
  Loading,
  /// The last fetch produced a value
  Success,
  /// The last fetch failed
  Error,
}

/// A single keyed slot in the cache.
///
/// `value` and `error` survive later transitions so the UI can keep showing
/// stale data while a refetch is in flight, the same way a browser keeps the
/// old page visible during a reload. At most one of status `Success`/`Error`
/// is active at a time; the store bumps `version` on every write.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
  pub key: QueryKey,
  pub value: Option<Value>,
  pub status: EntryStatus,
  pub error: Option<FetchError>,
  pub version: u64,
  pub fetched_at: Option<Instant>,
}

impl Entry {
  /// An empty slot. This is what an updater receives for a key that has
  /// never been written.
  pub fn idle(key: QueryKey) -> Self {
    Self {
      key,
      value: None,
      status: EntryStatus::Idle,
      error: None,
      version: 0,
      fetched_at: None,
    }
  }

  /// Transition to `Loading`, keeping the previous value visible.
  pub fn into_loading(mut self) -> Self {
    self.status = EntryStatus::Loading;
    self.error = None;
    self
  }

  /// Transition to `Success` with a fresh value.
  pub fn into_success(mut self, value: Value) -> Self {
    self.status = EntryStatus::Success;
    self.value = Some(value);
    self.error = None;
    self.fetched_at = Some(Instant::now());
    self
  }

  /// Transition to `Error`, keeping any previously fetched value.
  pub fn into_error(mut self, error: FetchError) -> Self {
    self.status = EntryStatus::Error;
    self.error = Some(error);
    self
  }

  /// Replace the value directly, outside the fetch lifecycle. Used by
  /// mutation reconciliation, which edits cached collections in place.
  pub fn with_value(mut self, value: Value) -> Self {
    self.value = Some(value);
    self
  }

  #[allow(dead_code)]
  pub fn is_idle(&self) -> bool {
    self.status == EntryStatus::Idle
  }

  pub fn is_loading(&self) -> bool {
    self.status == EntryStatus::Loading
  }

  pub fn is_success(&self) -> bool {
    self.status == EntryStatus::Success
  }

  pub fn is_error(&self) -> bool {
    self.status == EntryStatus::Error
  }

  /// A successful entry is stale once `stale_time` has elapsed since its
  /// fetch. Entries in any other state are never stale; they are refreshed
  /// through their own lifecycle instead.
  pub fn is_stale(&self, stale_time: Duration) -> bool {
    match self.status {
      EntryStatus::Success => match self.fetched_at {
        Some(fetched_at) => fetched_at.elapsed() >= stale_time,
        None => true,
      },
      _ => false,
    }
  }

  /// Decode the value into a concrete type. Returns `None` when the slot is
  /// empty or the value does not match the requested shape.
  pub fn data<T: DeserializeOwned>(&self) -> Option<T> {
    self
      .value
      .as_ref()
      .and_then(|value| serde_json::from_value(value.clone()).ok())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_idle_entry_is_empty() {
    let entry = Entry::idle(QueryKey::from("posts"));
    assert!(entry.is_idle());
    assert_eq!(entry.value, None);
    assert_eq!(entry.error, None);
    assert_eq!(entry.version, 0);
  }

  #[test]
  fn test_success_sets_value_and_clears_error() {
    let entry = Entry::idle(QueryKey::from("posts"))
      .into_error(FetchError::new("boom"))
      .into_success(json!([1, 2, 3]));
    assert!(entry.is_success());
    assert_eq!(entry.value, Some(json!([1, 2, 3])));
    assert_eq!(entry.error, None);
    assert!(entry.fetched_at.is_some());
  }

  #[test]
  fn test_error_keeps_previous_value() {
    let entry = Entry::idle(QueryKey::from("posts"))
      .into_success(json!(["old"]))
      .into_error(FetchError::new("network down"));
    assert!(entry.is_error());
    assert_eq!(entry.value, Some(json!(["old"])));
    assert_eq!(entry.error, Some(FetchError::new("network down")));
  }

  #[test]
  fn test_loading_keeps_value_and_drops_error() {
    let entry = Entry::idle(QueryKey::from("posts"))
      .into_success(json!(["old"]))
      .into_error(FetchError::new("boom"))
      .into_loading();
    assert!(entry.is_loading());
    assert_eq!(entry.value, Some(json!(["old"])));
    assert_eq!(entry.error, None);
  }

  #[test]
  fn test_success_goes_stale_after_stale_time() {
    let entry = Entry::idle(QueryKey::from("posts")).into_success(json!([]));
    // zero stale time means a success is stale as soon as it lands
    assert!(entry.is_stale(Duration::ZERO));
    assert!(!entry.is_stale(Duration::from_secs(3600)));
  }

  #[test]
  fn test_only_success_can_be_stale() {
    let idle = Entry::idle(QueryKey::from("posts"));
    assert!(!idle.is_stale(Duration::ZERO));
    let loading = idle.into_loading();
    assert!(!loading.is_stale(Duration::ZERO));
    let failed = loading.into_error(FetchError::new("boom"));
    assert!(!failed.is_stale(Duration::ZERO));
  }

  #[test]
  fn test_data_decodes_into_requested_type() {
    let entry = Entry::idle(QueryKey::from("posts")).into_success(json!([1, 2, 3]));
    assert_eq!(entry.data::<Vec<u64>>(), Some(vec![1, 2, 3]));
    // shape mismatch decodes to nothing rather than failing
    assert_eq!(entry.data::<String>(), None);
  }
}
