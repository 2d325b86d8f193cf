//! The network boundary the cache layer fetches through.

use futures::future::BoxFuture;
use serde_json::Value;

use super::key::CacheKey;
use super::registry::Method;
use crate::error::QueryError;

/// Outcome of a single network call.
pub type FetchResult = Result<Value, QueryError>;

/// A write request, built from a registered mutation and its input.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRequest {
  /// Mutation name as registered, e.g. `update_goal`.
  pub name: String,
  pub method: Method,
  /// Rendered request path, e.g. `goals/g1`.
  pub path: String,
  pub body: Value,
}

/// Performs the remote calls behind queries and mutations.
///
/// Implementations own timeouts and transport details; anything that goes
/// wrong comes back as a [`QueryError`].
pub trait Transport: Send + Sync {
  /// Idempotent read for one cache key.
  fn query(&self, key: &CacheKey, credential: Option<&str>) -> BoxFuture<'static, FetchResult>;

  /// Non-idempotent write. Called exactly once per caller-initiated mutation.
  fn mutate(
    &self,
    request: &MutationRequest,
    credential: Option<&str>,
  ) -> BoxFuture<'static, FetchResult>;
}
