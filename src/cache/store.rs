use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::debug;

use super::entry::Entry;
use super::key::QueryKey;
use super::lock::lock_or_recover;

type Observer = Arc<dyn Fn(Option<&Entry>) + Send + Sync>;

/// Keyed store of cache entries with synchronous change notification.
///
/// Every write (`set`, an accepted `set_if`, `delete`) notifies the key's
/// subscribers exactly once, in write order, with a snapshot of the entry as
/// written (`None` for a delete). Delivery happens before the outermost
/// write call returns.
/// Observers may read or write the store from inside a callback; such
/// writes are queued and delivered after the notification in progress.
///
/// Cloning is cheap and clones share the same entries and subscribers.
#[derive(Clone)]
pub struct CacheStore {
  inner: Arc<StoreInner>,
}

struct StoreInner {
  state: Mutex<State>,
}

#[derive(Default)]
struct State {
  entries: HashMap<QueryKey, Entry>,
  subscribers: HashMap<QueryKey, Vec<(u64, Observer)>>,
  queue: VecDeque<(QueryKey, Option<Entry>)>,
  dispatching: bool,
  next_observer_id: u64,
}

impl CacheStore {
  pub fn new() -> Self {
    Self {
      inner: Arc::new(StoreInner {
        state: Mutex::new(State::default()),
      }),
    }
  }

  /// Snapshot of the entry under `key`, if any. Reading never changes
  /// state and never notifies.
  pub fn get(&self, key: &QueryKey) -> Option<Entry> {
    lock_or_recover(&self.inner.state, "get").entries.get(key).cloned()
  }

  /// Replace the entry under `key` with `updater(current)`, creating an
  /// idle entry for the updater if the key is absent. The store owns the
  /// entry's key and version: whatever the updater returns is stored under
  /// `key` with the previous version plus one. Returns the stored entry.
  pub fn set(&self, key: &QueryKey, updater: impl FnOnce(Entry) -> Entry) -> Entry {
    let stored = {
      let mut state = lock_or_recover(&self.inner.state, "set");
      let current = state
        .entries
        .remove(key)
        .unwrap_or_else(|| Entry::idle(key.clone()));
      let previous_version = current.version;
      let mut next = updater(current);
      next.key = key.clone();
      next.version = previous_version + 1;
      debug!(key = %key, status = ?next.status, version = next.version, "cache entry written");
      state.entries.insert(key.clone(), next.clone());
      state.queue.push_back((key.clone(), Some(next.clone())));
      next
    };
    self.dispatch();
    stored
  }

  /// Like `set`, but the updater may decline. Returning `None` stores
  /// nothing, notifies nobody, and leaves the version untouched; an absent
  /// key declines before the updater runs. The check and the write happen
  /// under one lock, so the entry cannot change in between.
  pub fn set_if(
    &self,
    key: &QueryKey,
    updater: impl FnOnce(&Entry) -> Option<Entry>,
  ) -> Option<Entry> {
    let stored = {
      let mut state = lock_or_recover(&self.inner.state, "set_if");
      let current = state.entries.get(key)?;
      let previous_version = current.version;
      let mut next = updater(current)?;
      next.key = key.clone();
      next.version = previous_version + 1;
      debug!(key = %key, status = ?next.status, version = next.version, "cache entry written");
      state.entries.insert(key.clone(), next.clone());
      state.queue.push_back((key.clone(), Some(next.clone())));
      next
    };
    self.dispatch();
    Some(stored)
  }

  /// Remove the entry under `key`. Subscribers are notified with `None`.
  /// Deleting an absent key does nothing and notifies nobody.
  #[allow(dead_code)]
  pub fn delete(&self, key: &QueryKey) -> bool {
    let removed = {
      let mut state = lock_or_recover(&self.inner.state, "delete");
      match state.entries.remove(key) {
        Some(_) => {
          debug!(key = %key, "cache entry deleted");
          state.queue.push_back((key.clone(), None));
          true
        }
        None => false,
      }
    };
    if removed {
      self.dispatch();
    }
    removed
  }

  /// Register `observer` for changes to `key`. The observer fires on every
  /// subsequent write to that key until the returned handle is dropped.
  pub fn subscribe(
    &self,
    key: &QueryKey,
    observer: impl Fn(Option<&Entry>) + Send + Sync + 'static,
  ) -> Subscription {
    let mut state = lock_or_recover(&self.inner.state, "subscribe");
    let id = state.next_observer_id;
    state.next_observer_id += 1;
    state
      .subscribers
      .entry(key.clone())
      .or_default()
      .push((id, Arc::new(observer)));
    debug!(key = %key, observer = id, "observer subscribed");
    Subscription {
      inner: Arc::clone(&self.inner),
      key: key.clone(),
      id,
    }
  }

  #[allow(dead_code)]
  pub fn len(&self) -> usize {
    lock_or_recover(&self.inner.state, "len").entries.len()
  }

  #[allow(dead_code)]
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Drop every entry, notifying each key's subscribers with `None`.
  #[allow(dead_code)]
  pub fn clear(&self) {
    {
      let mut state = lock_or_recover(&self.inner.state, "clear");
      let keys: Vec<QueryKey> = state.entries.keys().cloned().collect();
      state.entries.clear();
      for key in keys {
        state.queue.push_back((key, None));
      }
    }
    self.dispatch();
  }

  /// Drain queued notifications, calling observers outside the state lock.
  /// Only one caller drains at a time; writes made while a drain is running
  /// land on the queue and are delivered by the active drainer, which keeps
  /// delivery in write order without deadlocking re-entrant observers.
  fn dispatch(&self) {
    {
      let mut state = lock_or_recover(&self.inner.state, "dispatch");
      if state.dispatching {
        return;
      }
      state.dispatching = true;
    }
    // if an observer panics, clear the flag so later writes still dispatch
    let mut reset = DispatchReset {
      state: &self.inner.state,
      armed: true,
    };
    loop {
      let (entry, observers) = {
        let mut state = lock_or_recover(&self.inner.state, "dispatch");
        match state.queue.pop_front() {
          Some((key, entry)) => {
            let observers: Vec<Observer> = state
              .subscribers
              .get(&key)
              .map(|subs| subs.iter().map(|(_, observer)| Arc::clone(observer)).collect())
              .unwrap_or_default();
            (entry, observers)
          }
          None => {
            state.dispatching = false;
            break;
          }
        }
      };
      for observer in &observers {
        observer(entry.as_ref());
      }
    }
    reset.armed = false;
  }
}

impl Default for CacheStore {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Debug for CacheStore {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = lock_or_recover(&self.inner.state, "debug");
    f.debug_struct("CacheStore")
      .field("entries", &state.entries.len())
      .field("subscribers", &state.subscribers.len())
      .finish_non_exhaustive()
  }
}

struct DispatchReset<'a> {
  state: &'a Mutex<State>,
  armed: bool,
}

impl Drop for DispatchReset<'_> {
  fn drop(&mut self) {
    if self.armed {
      lock_or_recover(self.state, "dispatch_reset").dispatching = false;
    }
  }
}

/// Keeps an observer registered. Dropping the handle removes the observer;
/// no notifications are delivered to it afterwards.
pub struct Subscription {
  inner: Arc<StoreInner>,
  key: QueryKey,
  id: u64,
}

impl Subscription {
  /// Remove the observer now instead of at end of scope.
  #[allow(dead_code)]
  pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
  fn drop(&mut self) {
    let mut state = lock_or_recover(&self.inner.state, "unsubscribe");
    if let Some(observers) = state.subscribers.get_mut(&self.key) {
      observers.retain(|(id, _)| *id != self.id);
      if observers.is_empty() {
        state.subscribers.remove(&self.key);
      }
    }
    debug!(key = %self.key, observer = self.id, "observer unsubscribed");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::error::FetchError;
  use serde_json::json;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn posts_key() -> QueryKey {
    QueryKey::from("posts")
  }

  #[test]
  fn test_set_stores_the_updated_entry() {
    let store = CacheStore::new();
    let stored = store.set(&posts_key(), |entry| entry.into_success(json!([1, 2])));
    assert!(stored.is_success());
    assert_eq!(stored.value, Some(json!([1, 2])));
    assert_eq!(stored.version, 1);
    assert_eq!(store.get(&posts_key()), Some(stored));
  }

  #[test]
  fn test_get_unknown_key_is_none() {
    let store = CacheStore::new();
    assert_eq!(store.get(&posts_key()), None);
    assert!(store.is_empty());
  }

  #[test]
  fn test_reads_do_not_change_state() {
    let store = CacheStore::new();
    store.set(&posts_key(), |entry| entry.into_success(json!(["a"])));
    let first = store.get(&posts_key());
    let second = store.get(&posts_key());
    assert_eq!(first, second);
    assert_eq!(first.unwrap().version, 1);
  }

  #[test]
  fn test_every_set_bumps_the_version() {
    let store = CacheStore::new();
    let v1 = store.set(&posts_key(), |entry| entry.into_loading());
    let v2 = store.set(&posts_key(), |entry| entry.into_success(json!([])));
    let v3 = store.set(&posts_key(), |entry| entry.into_error(FetchError::new("boom")));
    assert_eq!((v1.version, v2.version, v3.version), (1, 2, 3));
  }

  #[test]
  fn test_store_owns_key_and_version() {
    let store = CacheStore::new();
    let stored = store.set(&posts_key(), |mut entry| {
      entry.key = QueryKey::from("somewhere-else");
      entry.version = 999;
      entry.into_success(json!([]))
    });
    assert_eq!(stored.key, posts_key());
    assert_eq!(stored.version, 1);
    assert_eq!(store.get(&QueryKey::from("somewhere-else")), None);
  }

  #[test]
  fn test_set_if_on_an_absent_key_declines_without_running_the_updater() {
    let store = CacheStore::new();
    let calls = Arc::new(AtomicU32::new(0));
    let _sub = store.subscribe(&posts_key(), {
      let calls = calls.clone();
      move |_| {
        calls.fetch_add(1, Ordering::SeqCst);
      }
    });

    let mut ran = false;
    let stored = store.set_if(&posts_key(), |entry| {
      ran = true;
      Some(entry.clone().into_loading())
    });
    assert_eq!(stored, None);
    assert!(!ran);
    assert_eq!(store.get(&posts_key()), None);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn test_declined_set_if_writes_and_notifies_nothing() {
    let store = CacheStore::new();
    store.set(&posts_key(), |entry| entry.into_success(json!(["kept"])));
    let calls = Arc::new(AtomicU32::new(0));
    let _sub = store.subscribe(&posts_key(), {
      let calls = calls.clone();
      move |_| {
        calls.fetch_add(1, Ordering::SeqCst);
      }
    });

    assert_eq!(store.set_if(&posts_key(), |_| None), None);
    let entry = store.get(&posts_key()).unwrap();
    assert_eq!(entry.value, Some(json!(["kept"])));
    assert_eq!(entry.version, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn test_accepted_set_if_stores_and_bumps_the_version_like_set() {
    let store = CacheStore::new();
    store.set(&posts_key(), |entry| entry.into_success(json!([1])));
    let stored = store
      .set_if(&posts_key(), |entry| {
        Some(entry.clone().with_value(json!([1, 2])))
      })
      .unwrap();
    assert_eq!(stored.version, 2);
    assert_eq!(store.get(&posts_key()), Some(stored));
  }

  #[test]
  fn test_delete_removes_the_entry() {
    let store = CacheStore::new();
    store.set(&posts_key(), |entry| entry.into_success(json!([])));
    assert!(store.delete(&posts_key()));
    assert_eq!(store.get(&posts_key()), None);
    assert!(!store.delete(&posts_key()));
  }

  #[test]
  fn test_set_notifies_each_subscriber_exactly_once() {
    let store = CacheStore::new();
    let first = Arc::new(AtomicU32::new(0));
    let second = Arc::new(AtomicU32::new(0));
    let _sub_a = store.subscribe(&posts_key(), {
      let first = first.clone();
      move |entry| {
        assert_eq!(entry.map(|e| e.value.clone()), Some(Some(json!(["fresh"]))));
        first.fetch_add(1, Ordering::SeqCst);
      }
    });
    let _sub_b = store.subscribe(&posts_key(), {
      let second = second.clone();
      move |_| {
        second.fetch_add(1, Ordering::SeqCst);
      }
    });

    store.set(&posts_key(), |entry| entry.into_success(json!(["fresh"])));
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_delete_notifies_with_none() {
    let store = CacheStore::new();
    store.set(&posts_key(), |entry| entry.into_success(json!([])));
    let deletions = Arc::new(AtomicU32::new(0));
    let _sub = store.subscribe(&posts_key(), {
      let deletions = deletions.clone();
      move |entry| {
        assert!(entry.is_none());
        deletions.fetch_add(1, Ordering::SeqCst);
      }
    });
    store.delete(&posts_key());
    assert_eq!(deletions.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_deleting_an_absent_key_notifies_nobody() {
    let store = CacheStore::new();
    let calls = Arc::new(AtomicU32::new(0));
    let _sub = store.subscribe(&posts_key(), {
      let calls = calls.clone();
      move |_| {
        calls.fetch_add(1, Ordering::SeqCst);
      }
    });
    assert!(!store.delete(&posts_key()));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn test_observers_only_fire_for_their_key() {
    let store = CacheStore::new();
    let calls = Arc::new(AtomicU32::new(0));
    let _sub = store.subscribe(&posts_key(), {
      let calls = calls.clone();
      move |_| {
        calls.fetch_add(1, Ordering::SeqCst);
      }
    });
    store.set(&QueryKey::from("users"), |entry| entry.into_success(json!([])));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn test_notifications_arrive_in_write_order() {
    let store = CacheStore::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let _sub = store.subscribe(&posts_key(), {
      let seen = seen.clone();
      move |entry| {
        seen.lock().unwrap().push(entry.map(|e| e.version));
      }
    });
    store.set(&posts_key(), |entry| entry.into_loading());
    store.set(&posts_key(), |entry| entry.into_success(json!([])));
    store.delete(&posts_key());
    assert_eq!(*seen.lock().unwrap(), vec![Some(1), Some(2), None]);
  }

  #[test]
  fn test_dropped_subscription_goes_silent() {
    let store = CacheStore::new();
    let calls = Arc::new(AtomicU32::new(0));
    let sub = store.subscribe(&posts_key(), {
      let calls = calls.clone();
      move |_| {
        calls.fetch_add(1, Ordering::SeqCst);
      }
    });
    store.set(&posts_key(), |entry| entry.into_loading());
    sub.unsubscribe();
    store.set(&posts_key(), |entry| entry.into_success(json!([])));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_observers_may_write_other_keys() {
    let store = CacheStore::new();
    let mirrored = Arc::new(AtomicU32::new(0));
    let _forwarder = store.subscribe(&posts_key(), {
      let store = store.clone();
      move |entry| {
        if let Some(entry) = entry {
          let value = entry.value.clone().unwrap_or(json!(null));
          store.set(&QueryKey::from("posts-mirror"), |e| e.with_value(value));
        }
      }
    });
    let _mirror_sub = store.subscribe(&QueryKey::from("posts-mirror"), {
      let mirrored = mirrored.clone();
      move |_| {
        mirrored.fetch_add(1, Ordering::SeqCst);
      }
    });

    store.set(&posts_key(), |entry| entry.into_success(json!(["hello"])));
    assert_eq!(mirrored.load(Ordering::SeqCst), 1);
    assert_eq!(
      store.get(&QueryKey::from("posts-mirror")).and_then(|e| e.value),
      Some(json!(["hello"]))
    );
  }

  #[test]
  fn test_observers_may_unsubscribe_themselves() {
    let store = CacheStore::new();
    let calls = Arc::new(AtomicU32::new(0));
    let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
    let sub = store.subscribe(&posts_key(), {
      let calls = calls.clone();
      let slot = slot.clone();
      move |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        // drop our own handle from inside the callback
        slot.lock().unwrap().take();
      }
    });
    *slot.lock().unwrap() = Some(sub);

    store.set(&posts_key(), |entry| entry.into_loading());
    store.set(&posts_key(), |entry| entry.into_success(json!([])));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_clear_notifies_and_empties() {
    let store = CacheStore::new();
    store.set(&posts_key(), |entry| entry.into_success(json!([])));
    store.set(&QueryKey::from("users"), |entry| entry.into_success(json!([])));
    let calls = Arc::new(AtomicU32::new(0));
    let _sub = store.subscribe(&posts_key(), {
      let calls = calls.clone();
      move |entry| {
        assert!(entry.is_none());
        calls.fetch_add(1, Ordering::SeqCst);
      }
    });
    store.clear();
    assert!(store.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_store_survives_a_poisoned_lock() {
    let store = CacheStore::new();
    store.set(&posts_key(), |entry| entry.into_success(json!(["before"])));
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
      let _guard = store.inner.state.lock().unwrap();
      panic!("poisoned on purpose");
    }));
    assert!(result.is_err());

    let stored = store.set(&posts_key(), |entry| entry.into_success(json!(["after"])));
    assert_eq!(stored.value, Some(json!(["after"])));
    assert_eq!(stored.version, 2);
  }
}
