//! Subscribed view of one cached query, for rendering code.
//!
//! A `QueryHandle` is what a screen holds while it shows some data. It keeps
//! the key subscribed (so polling stays alive), exposes a render-ready
//! snapshot, and tells the event loop when something changed.
//!
//! # Example
//!
//! ```ignore
//! let mut progress = client.query("goals/g1/progress", &())?;
//!
//! // In event loop tick
//! if progress.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! // In render
//! let snapshot = progress.read();
//! match snapshot.executed {
//!     ExecutedState::NotExecuted => render_hint(),
//!     ExecutedState::Loading => render_spinner(),
//!     ExecutedState::Success => render_progress(snapshot.data.as_ref()),
//!     ExecutedState::Error => render_error(snapshot.error.as_ref()),
//! }
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;

use crate::cache::{CacheEntry, CacheKey, EntryState, Subscription};
use crate::client::QueryClient;
use crate::error::QueryError;

/// Where a query is in its lifecycle, as far as a screen cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutedState {
  /// The guard kept the query from running; no request was made.
  NotExecuted,
  /// Waiting for the first value.
  Loading,
  /// A value is available (possibly stale, possibly refreshing).
  Success,
  /// The last fetch failed.
  Error,
}

/// Everything a render pass needs for one query.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySnapshot {
  pub data: Option<Value>,
  /// No data yet and a request is outstanding.
  pub is_loading: bool,
  /// Any request is outstanding, including background refreshes.
  pub is_fetching: bool,
  pub is_stale: bool,
  pub error: Option<QueryError>,
  pub executed: ExecutedState,
  pub updated_at: Option<DateTime<Utc>>,
}

impl QuerySnapshot {
  fn not_executed() -> Self {
    Self {
      data: None,
      is_loading: false,
      is_fetching: false,
      is_stale: false,
      error: None,
      executed: ExecutedState::NotExecuted,
      updated_at: None,
    }
  }

  fn from_entry(entry: Option<CacheEntry>) -> Self {
    let Some(entry) = entry else {
      return Self {
        is_loading: true,
        executed: ExecutedState::Loading,
        ..Self::not_executed()
      };
    };

    let is_fetching = entry.state == EntryState::Fetching;
    let executed = match entry.state {
      EntryState::Error => ExecutedState::Error,
      _ if entry.data.is_some() => ExecutedState::Success,
      _ => ExecutedState::Loading,
    };

    Self {
      is_loading: executed == ExecutedState::Loading,
      is_fetching,
      is_stale: entry.is_stale(),
      error: entry.error,
      updated_at: entry.updated_at,
      data: entry.data,
      executed,
    }
  }

  /// Decode the data into a typed shape.
  pub fn parse<T: DeserializeOwned>(&self) -> Result<Option<T>, QueryError> {
    self
      .data
      .as_ref()
      .map(|data| T::deserialize(data))
      .transpose()
      .map_err(|e| QueryError::NetworkFailure(format!("unexpected response shape: {}", e)))
  }
}

/// Live handle on one query. Dropping it releases the subscription.
pub struct QueryHandle {
  client: QueryClient,
  name: String,
  params: Value,
  key: Option<CacheKey>,
  subscription: Option<Subscription>,
  notify: Arc<watch::Sender<u64>>,
  changes: watch::Receiver<u64>,
}

impl QueryHandle {
  pub(crate) fn open<P>(client: QueryClient, name: &str, params: &P) -> Result<Self, QueryError>
  where
    P: Serialize + ?Sized,
  {
    let (notify, changes) = watch::channel(0);
    let mut handle = Self {
      client,
      name: name.to_string(),
      params: Value::Null,
      key: None,
      subscription: None,
      notify: Arc::new(notify),
      changes,
    };
    handle.attach(params)?;
    Ok(handle)
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn params(&self) -> &Value {
    &self.params
  }

  /// `None` while the guard keeps the query disabled.
  pub fn key(&self) -> Option<&CacheKey> {
    self.key.as_ref()
  }

  /// Current state, without side effects.
  pub fn snapshot(&self) -> QuerySnapshot {
    match &self.key {
      Some(key) => QuerySnapshot::from_entry(self.client.store().get(key)),
      None => QuerySnapshot::not_executed(),
    }
  }

  /// Current state; a stale entry also gets a background refresh.
  ///
  /// An entry in error is left alone. Use [`QueryHandle::refetch`] to retry.
  pub fn read(&self) -> QuerySnapshot {
    if let Some(key) = &self.key {
      self.client.observe(key, false);
    }
    self.snapshot()
  }

  /// Force a fresh request, superseding any in flight.
  pub fn refetch(&self) {
    if let Some(key) = &self.key {
      self.client.refetch(key);
    }
  }

  /// Switch to new params. Moves the subscription to the new key, or drops it
  /// when the guard disables the query.
  pub fn set_params<P>(&mut self, params: &P) -> Result<(), QueryError>
  where
    P: Serialize + ?Sized,
  {
    self.detach();
    let result = self.attach(params);
    self.notify.send_modify(|version| *version += 1);
    result
  }

  /// Returns `true` if the state changed since the last call.
  ///
  /// Call this in your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    match self.changes.has_changed() {
      Ok(true) => {
        self.changes.borrow_and_update();
        true
      }
      _ => false,
    }
  }

  /// Wait for the next change.
  pub async fn changed(&mut self) {
    // The sender lives in self, so this cannot fail while we wait.
    let _ = self.changes.changed().await;
  }

  /// Wait until no request is outstanding and return the resulting state.
  pub async fn settled(&mut self) -> QuerySnapshot {
    loop {
      let snapshot = self.snapshot();
      let idle = self
        .key
        .as_ref()
        .and_then(|key| self.client.store().get(key))
        .is_some_and(|entry| entry.state == EntryState::Idle);
      if !snapshot.is_fetching && !idle {
        return snapshot;
      }
      self.changed().await;
    }
  }

  fn attach<P>(&mut self, params: &P) -> Result<(), QueryError>
  where
    P: Serialize + ?Sized,
  {
    self.params = crate::cache::params_to_value(&self.name, params)?;
    self.key = self.client.resolve_key(&self.name, &self.params)?;

    if let Some(key) = &self.key {
      let notify = Arc::clone(&self.notify);
      self.subscription = Some(self.client.store().subscribe(
        key,
        Arc::new(move |_: &CacheEntry| notify.send_modify(|version| *version += 1)),
      ));
      self.client.observe(key, true);
    }
    Ok(())
  }

  fn detach(&mut self) {
    self.subscription = None;
    if let Some(key) = self.key.take() {
      self.client.scheduler().release(&key);
    }
  }
}

impl Drop for QueryHandle {
  fn drop(&mut self) {
    self.detach();
  }
}

impl std::fmt::Debug for QueryHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QueryHandle")
      .field("name", &self.name)
      .field("key", &self.key)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{
    EnablementGuard, InvalidationGraph, PollInterval, QueryDef, QueryRegistry, StalenessPolicy,
  };
  use crate::session::Session;
  use crate::testing::{settle, FakeTransport};
  use serde_json::json;
  use std::time::Duration;

  const ACTIVE: &[&str] = &["active"];

  fn client(transport: &Arc<FakeTransport>) -> QueryClient {
    let registry = QueryRegistry::new(StalenessPolicy::new(Duration::from_secs(60)))
      .with_query(
        QueryDef::new("sources").enabled_when(
          EnablementGuard::requires(&["item_id"])
            .and(EnablementGuard::positive("required_quantity")),
        ),
      )
      .with_query(QueryDef::new("goals/{id}/progress").poll(PollInterval::while_field_in(
        "status",
        ACTIVE,
        Duration::from_secs(30),
      )))
      .with_query(QueryDef::new("recipes").stale_after(Duration::from_secs(5)));
    QueryClient::new(
      registry,
      InvalidationGraph::new(),
      transport.clone(),
      Session::new(Some("token".into())),
    )
  }

  #[tokio::test]
  async fn test_find_sources_lifecycle() {
    let transport = Arc::new(FakeTransport::new());
    transport.respond("sources", json!([{ "item_id": "iron", "via": "mine" }]));
    let gate = transport.hold("sources");
    let client = client(&transport);

    let mut handle = client
      .query("sources", &json!({ "item_id": null, "required_quantity": 0 }))
      .unwrap();
    assert_eq!(handle.snapshot().executed, ExecutedState::NotExecuted);
    settle().await;
    assert_eq!(transport.total_query_calls(), 0);

    handle
      .set_params(&json!({ "item_id": "iron", "required_quantity": 10 }))
      .unwrap();
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.executed, ExecutedState::Loading);
    assert!(snapshot.is_loading);

    gate.release();
    let snapshot = handle.settled().await;
    assert_eq!(snapshot.executed, ExecutedState::Success);
    assert_eq!(snapshot.data.unwrap()[0]["via"], "mine");
    assert_eq!(transport.query_calls("sources"), 1);
  }

  #[tokio::test]
  async fn test_param_order_shares_one_request() {
    let transport = Arc::new(FakeTransport::new());
    transport.respond("items", json!([]));
    let gate = transport.hold("items");
    let client = client(&transport);

    let mut a = client
      .query("items", &json!({ "skip": 0, "limit": 5 }))
      .unwrap();
    let b = client
      .query("items", &json!({ "limit": 5, "skip": 0 }))
      .unwrap();
    assert_eq!(a.key(), b.key());
    settle().await;
    gate.release();

    a.settled().await;
    assert_eq!(transport.query_calls("items"), 1);
    assert_eq!(b.snapshot().executed, ExecutedState::Success);
  }

  #[tokio::test]
  async fn test_poll_reports_changes_once() {
    let transport = Arc::new(FakeTransport::new());
    transport.respond("inventory", json!({ "iron": 3 }));
    let client = client(&transport);

    let mut handle = client.query("inventory", &()).unwrap();
    settle().await;
    assert!(handle.poll());
    assert!(!handle.poll());
    assert_eq!(handle.snapshot().data, Some(json!({ "iron": 3 })));
  }

  #[tokio::test]
  async fn test_error_is_not_retried_on_read() {
    let transport = Arc::new(FakeTransport::new());
    transport.fail("inventory", QueryError::NetworkFailure("offline".into()));
    let client = client(&transport);

    let mut handle = client.query("inventory", &()).unwrap();
    let snapshot = handle.settled().await;
    assert_eq!(snapshot.executed, ExecutedState::Error);

    for _ in 0..5 {
      handle.read();
    }
    settle().await;
    assert_eq!(transport.query_calls("inventory"), 1);

    transport.respond("inventory", json!({}));
    handle.refetch();
    let snapshot = handle.settled().await;
    assert_eq!(snapshot.executed, ExecutedState::Success);
    assert_eq!(transport.query_calls("inventory"), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_read_refreshes_stale_data_in_background() {
    let transport = Arc::new(FakeTransport::new());
    transport.script("recipes", vec![Ok(json!(["old"])), Ok(json!(["new"]))]);
    let client = client(&transport);

    let mut handle = client.query("recipes", &()).unwrap();
    handle.settled().await;
    tokio::time::sleep(Duration::from_secs(6)).await;

    let snapshot = handle.read();
    assert_eq!(snapshot.data, Some(json!(["old"])));
    assert!(snapshot.is_stale);
    assert!(snapshot.is_fetching);

    let snapshot = handle.settled().await;
    assert_eq!(snapshot.data, Some(json!(["new"])));
    assert!(!snapshot.is_stale);
  }

  #[tokio::test(start_paused = true)]
  async fn test_drop_stops_polling() {
    let transport = Arc::new(FakeTransport::new());
    transport.respond("goals/g1/progress", json!({ "status": "active" }));
    let client = client(&transport);

    let handle = client.query("goals/g1/progress", &()).unwrap();
    tokio::time::sleep(Duration::from_secs(65)).await;
    assert_eq!(transport.query_calls("goals/g1/progress"), 3);

    drop(handle);
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(transport.query_calls("goals/g1/progress"), 3);
  }

  #[test]
  fn test_parse_typed_data() {
    #[derive(serde::Deserialize)]
    struct Progress {
      status: String,
    }

    let snapshot = QuerySnapshot {
      data: Some(json!({ "status": "active" })),
      executed: ExecutedState::Success,
      ..QuerySnapshot::not_executed()
    };
    let progress: Progress = snapshot.parse().unwrap().unwrap();
    assert_eq!(progress.status, "active");

    let err = snapshot.parse::<Vec<u8>>().unwrap_err();
    assert!(matches!(err, QueryError::NetworkFailure(_)));
  }
}
