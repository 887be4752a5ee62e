use thiserror::Error;

/// Opaque failure produced by a fetch function. The cache records and
/// republishes it without inspecting it, so callers map their transport
/// errors into a message up front.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct FetchError(String);

impl FetchError {
  pub fn new(message: impl Into<String>) -> Self {
    Self(message.into())
  }

  pub fn message(&self) -> &str {
    &self.0
  }
}

/// Opaque failure produced by a mutation function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct MutateError(String);

impl MutateError {
  pub fn new(message: impl Into<String>) -> Self {
    Self(message.into())
  }

  pub fn message(&self) -> &str {
    &self.0
  }
}
