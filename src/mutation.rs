//! Handle for issuing one kind of write and showing its progress.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::Value;

use crate::client::QueryClient;
use crate::error::QueryError;

/// Outcome of the most recent call through a [`MutationHandle`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationState {
  /// True while any call through the handle is still outstanding.
  pub is_pending: bool,
  pub data: Option<Value>,
  pub error: Option<QueryError>,
}

#[derive(Debug, Default)]
struct Inner {
  in_flight: usize,
  data: Option<Value>,
  error: Option<QueryError>,
}

/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MutationHandle {
  client: QueryClient,
  name: String,
  inner: Arc<Mutex<Inner>>,
}

impl MutationHandle {
  pub(crate) fn new(client: QueryClient, name: &str) -> Self {
    Self {
      client,
      name: name.to_string(),
      inner: Arc::default(),
    }
  }

  fn lock(&self) -> MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Send the write. Each call is its own request, even with equal input.
  ///
  /// Calls may overlap; the handle stays pending until the last one returns.
  pub async fn mutate<I>(&self, input: &I) -> Result<Value, QueryError>
  where
    I: Serialize + ?Sized,
  {
    self.lock().in_flight += 1;

    let result = self.client.mutate(&self.name, input).await;

    let mut inner = self.lock();
    inner.in_flight = inner.in_flight.saturating_sub(1);
    match &result {
      Ok(data) => {
        inner.data = Some(data.clone());
        inner.error = None;
      }
      Err(error) => inner.error = Some(error.clone()),
    }
    result
  }

  pub fn is_pending(&self) -> bool {
    self.lock().in_flight > 0
  }

  pub fn error(&self) -> Option<QueryError> {
    self.lock().error.clone()
  }

  pub fn state(&self) -> MutationState {
    let inner = self.lock();
    MutationState {
      is_pending: inner.in_flight > 0,
      data: inner.data.clone(),
      error: inner.error.clone(),
    }
  }

  /// Forget the last outcome. Calls still in flight keep the handle pending.
  pub fn reset(&self) {
    let mut inner = self.lock();
    inner.data = None;
    inner.error = None;
  }
}

impl std::fmt::Debug for MutationHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("MutationHandle")
      .field("name", &self.name)
      .field("state", &*self.lock())
      .finish_non_exhaustive()
  }
}
