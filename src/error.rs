//! Error taxonomy shared by loaders, mutations and the cache.

use thiserror::Error;

/// Errors surfaced by the synchronization layer.
///
/// Cloneable because one in-flight load result is handed to every caller
/// attached to it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
  /// Transport failure or unexpected server response. Callers may retry.
  #[error("network error: {0}")]
  Network(String),

  /// The requested entity does not exist.
  #[error("{resource} not found")]
  NotFound { resource: String },

  /// The backend rejected the payload. The message is kept verbatim for form display.
  #[error("validation failed: {0}")]
  Validation(String),

  /// The write conflicts with existing server state (e.g. duplicate slug).
  #[error("conflict: {0}")]
  Conflict(String),

  /// A delete for the same entity is still pending.
  #[error("delete already in progress for {0}")]
  DeleteInProgress(String),

  /// The request cannot be built (e.g. a replace without a record id).
  #[error("invalid request: {0}")]
  InvalidRequest(String),

  /// A cached value did not have the kind the caller asked for.
  #[error("cached value for {key} is a {found}, expected {expected}")]
  KindMismatch {
    key: String,
    expected: &'static str,
    found: &'static str,
  },
}

impl SyncError {
  pub fn not_found(resource: impl Into<String>) -> Self {
    Self::NotFound {
      resource: resource.into(),
    }
  }

  pub fn is_not_found(&self) -> bool {
    matches!(self, Self::NotFound { .. })
  }

  /// Whether retrying the same request could succeed.
  pub fn is_transient(&self) -> bool {
    matches!(self, Self::Network(_))
  }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_not_found_message() {
    let err = SyncError::not_found("record orders/r1");
    assert!(err.is_not_found());
    assert_eq!(err.to_string(), "record orders/r1 not found");
  }

  #[test]
  fn test_only_network_is_transient() {
    assert!(SyncError::Network("timeout".into()).is_transient());
    assert!(!SyncError::Conflict("slug taken".into()).is_transient());
    assert!(!SyncError::not_found("x").is_transient());
  }
}
