//! Keyed cache for remote data, in the spirit of TanStack Query.
//!
//! This module is UI-agnostic and has three moving parts:
//! - [`CacheStore`] holds versioned entries under structured keys and
//!   notifies per-key subscribers synchronously on every change
//! - [`QueryController`] runs keyed fetches, deduplicating concurrent
//!   requests for the same key into one in-flight fetch
//! - [`MutationController`] runs writes against the outside world and
//!   reconciles their results back into the cached collections

mod entry;
mod error;
mod key;
mod lock;
mod mutation;
mod query;
pub mod reconcile;
mod store;

pub use entry::Entry;
pub use error::{FetchError, MutateError};
pub use key::QueryKey;
pub use mutation::{MutationController, MutationHandle, MutationStatus};
pub use query::QueryController;
pub use store::{CacheStore, Subscription};
