//! Helpers for folding mutation results back into cached collections.
//!
//! Each helper edits the JSON array cached under a key: append a created
//! record, replace the element a server update returned, or drop a deleted
//! one. They are meant to be called from a mutation's settle callback. A
//! key with no cached collection is left untouched; none of these helpers
//! will invent an entry that was never fetched.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::key::QueryKey;
use super::store::CacheStore;

/// Append `record` to the end of the collection cached under `key`.
pub fn append(store: &CacheStore, key: &QueryKey, record: &impl Serialize) {
  let record = match encode(record, "append") {
    Some(record) => record,
    None => return,
  };
  apply(store, key, "append", move |mut items| {
    items.push(record);
    items
  });
}

/// Replace every element whose `id_field` equals the record's with the
/// record, keeping element positions. With no matching element the
/// collection is rewritten unchanged; nothing is inserted.
pub fn replace_matching(
  store: &CacheStore,
  key: &QueryKey,
  id_field: &str,
  record: &impl Serialize,
) {
  let record = match encode(record, "replace") {
    Some(record) => record,
    None => return,
  };
  let id = match record.get(id_field) {
    Some(id) => id.clone(),
    None => {
      warn!(key = %key, id_field, "record carries no id field, skipping reconciliation");
      return;
    }
  };
  let id_field = id_field.to_string();
  apply(store, key, "replace", move |items| {
    items
      .into_iter()
      .map(|item| {
        if item.get(id_field.as_str()) == Some(&id) {
          record.clone()
        } else {
          item
        }
      })
      .collect()
  });
}

/// Remove every element whose `id_field` equals `id`.
pub fn remove_matching(store: &CacheStore, key: &QueryKey, id_field: &str, id: &impl Serialize) {
  let id = match encode(id, "remove") {
    Some(id) => id,
    None => return,
  };
  let id_field = id_field.to_string();
  apply(store, key, "remove", move |items| {
    items
      .into_iter()
      .filter(|item| item.get(id_field.as_str()) != Some(&id))
      .collect()
  });
}

fn encode(record: &impl Serialize, op: &'static str) -> Option<Value> {
  match serde_json::to_value(record) {
    Ok(value) => Some(value),
    Err(error) => {
      warn!(op, error = %error, "could not encode record for reconciliation");
      None
    }
  }
}

fn apply(
  store: &CacheStore,
  key: &QueryKey,
  op: &'static str,
  edit: impl FnOnce(Vec<Value>) -> Vec<Value>,
) {
  // the collection check and the write share one critical section, so a
  // delete racing this call cannot end with the key resurrected
  let stored = store.set_if(key, |entry| match &entry.value {
    Some(Value::Array(items)) => {
      let items = edit(items.clone());
      Some(entry.clone().with_value(Value::Array(items)))
    }
    _ => None,
  });
  if stored.is_none() {
    debug!(key = %key, op, "no cached collection under key, skipping reconciliation");
  }
}
