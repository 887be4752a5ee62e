use std::sync::{Mutex, MutexGuard};

use tracing::warn;

/// Lock a mutex, recovering the guard if a previous holder panicked. The
/// cache must stay usable after an observer panic, so poisoning is logged
/// and the inner state is used as-is.
pub(crate) fn lock_or_recover<'a, T>(lock: &'a Mutex<T>, op: &'static str) -> MutexGuard<'a, T> {
  match lock.lock() {
    Ok(guard) => guard,
    Err(poisoned) => {
      warn!(op, "recovered a poisoned cache lock");
      poisoned.into_inner()
    }
  }
}
