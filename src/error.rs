//! Error taxonomy for queries and mutations.

use thiserror::Error;

/// Errors surfaced by the query layer.
///
/// Everything except `InvalidQueryParams` is captured in cache state and shown
/// to the UI; `InvalidQueryParams` is a caller bug and is returned directly.
/// The type is `Clone` because one leader's result is handed to every follower.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
  /// Query parameters could not be turned into a cache key.
  #[error("invalid params for query `{query}`: {reason}")]
  InvalidQueryParams { query: String, reason: String },

  /// Transport-level failure (no connectivity, timeout, broken body).
  #[error("network failure: {0}")]
  NetworkFailure(String),

  /// The service answered with a domain-level error.
  #[error("remote error ({status}): {message}")]
  RemoteError { status: u16, message: String },

  /// The credential was rejected, expired or revoked.
  #[error("unauthorized: {0}")]
  Unauthorized(String),
}

/// Coarse classification of a [`QueryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
  InvalidQueryParams,
  NetworkFailure,
  RemoteError,
  Unauthorized,
}

impl QueryError {
  pub fn invalid_params(query: impl Into<String>, reason: impl Into<String>) -> Self {
    Self::InvalidQueryParams {
      query: query.into(),
      reason: reason.into(),
    }
  }

  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::InvalidQueryParams { .. } => ErrorKind::InvalidQueryParams,
      Self::NetworkFailure(_) => ErrorKind::NetworkFailure,
      Self::RemoteError { .. } => ErrorKind::RemoteError,
      Self::Unauthorized(_) => ErrorKind::Unauthorized,
    }
  }

  pub fn is_unauthorized(&self) -> bool {
    self.kind() == ErrorKind::Unauthorized
  }
}
