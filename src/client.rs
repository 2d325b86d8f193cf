//! Query client: wires the cache store, fetcher, scheduler and invalidation
//! graph together behind one injectable value.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::cache::{
  key_from_value, params_to_value, CacheKey, CacheStore, EntryState, FetchMode, Fetcher,
  InvalidationGraph, InvalidationReport, KeyPattern, Method, MutationRequest, PollingScheduler,
  QueryRegistry, Transport,
};
use crate::error::QueryError;
use crate::mutation::MutationHandle;
use crate::query::QueryHandle;
use crate::session::Session;

struct ClientInner {
  store: CacheStore,
  fetcher: Fetcher,
  scheduler: PollingScheduler,
  graph: InvalidationGraph,
  session: Session,
}

/// Entry point for reads and writes against the remote service.
///
/// Each client owns its own store; create one per session and pass it around.
/// Clones share everything. Methods that start background work must be called
/// from within a tokio runtime.
#[derive(Clone)]
pub struct QueryClient {
  inner: Arc<ClientInner>,
}

impl QueryClient {
  pub fn new(
    registry: QueryRegistry,
    graph: InvalidationGraph,
    transport: Arc<dyn Transport>,
    session: Session,
  ) -> Self {
    let store = CacheStore::new(Arc::new(registry));
    let fetcher = Fetcher::new(store.clone(), transport, session.clone());
    let scheduler = PollingScheduler::new(fetcher.clone());

    Self {
      inner: Arc::new(ClientInner {
        store,
        fetcher,
        scheduler,
        graph,
        session,
      }),
    }
  }

  pub fn store(&self) -> &CacheStore {
    &self.inner.store
  }

  pub fn session(&self) -> &Session {
    &self.inner.session
  }

  pub(crate) fn scheduler(&self) -> &PollingScheduler {
    &self.inner.scheduler
  }

  /// Guard check then key, or `None` when the query must not run yet.
  pub(crate) fn resolve_key<P>(&self, name: &str, params: &P) -> Result<Option<CacheKey>, QueryError>
  where
    P: Serialize + ?Sized,
  {
    let params = params_to_value(name, params)?;
    if !self.store().registry().guard(name).is_enabled(&params) {
      debug!(query = name, "query disabled by guard");
      return Ok(None);
    }
    key_from_value(name, params).map(Some)
  }

  /// Subscribe to a query. The handle fetches as needed and keeps polling
  /// alive while it exists.
  pub fn query<P>(&self, name: &str, params: &P) -> Result<QueryHandle, QueryError>
  where
    P: Serialize + ?Sized,
  {
    QueryHandle::open(self.clone(), name, params)
  }

  /// One-shot read through the cache. `Ok(None)` means the guard kept the
  /// query from running.
  pub async fn fetch_query<P>(&self, name: &str, params: &P) -> Result<Option<Value>, QueryError>
  where
    P: Serialize + ?Sized,
  {
    match self.resolve_key(name, params)? {
      Some(key) => self
        .inner
        .fetcher
        .fetch(&key, FetchMode::IfNeeded)
        .await
        .map(Some),
      None => Ok(None),
    }
  }

  /// Start fetching `key` if the cache cannot serve it, and arm polling.
  ///
  /// `include_errors` decides whether an entry in error is retried; only
  /// explicit observations do that.
  pub(crate) fn observe(&self, key: &CacheKey, include_errors: bool) {
    let should_fetch = match self.store().get(key) {
      None => true,
      Some(entry) if entry.state == EntryState::Error && !include_errors => false,
      // an in-flight fetch is joined unless an invalidation superseded it
      Some(entry) => entry.needs_fetch() || entry.state == EntryState::Fetching,
    };
    if should_fetch {
      self.inner.fetcher.start(key, false);
    }
    self.inner.scheduler.watch(key);
  }

  /// Force a new fetch for `key`, superseding any fetch in flight.
  pub(crate) fn refetch(&self, key: &CacheKey) {
    self.inner.fetcher.start(key, true);
    self.inner.scheduler.watch(key);
  }

  pub fn mutation(&self, name: &str) -> MutationHandle {
    MutationHandle::new(self.clone(), name)
  }

  /// Run a registered mutation and apply its invalidations once it succeeds.
  pub async fn mutate<I>(&self, name: &str, input: &I) -> Result<Value, QueryError>
  where
    I: Serialize + ?Sized,
  {
    let def = self
      .store()
      .registry()
      .mutation(name)
      .cloned()
      .ok_or_else(|| QueryError::invalid_params(name, "mutation is not registered"))?;
    let input =
      serde_json::to_value(input).map_err(|e| QueryError::invalid_params(name, e.to_string()))?;
    let path = def.path.render(&[&input]).ok_or_else(|| {
      QueryError::invalid_params(name, format!("input does not fill path `{}`", def.path))
    })?;

    let request = MutationRequest {
      name: def.name.clone(),
      method: def.method,
      body: if def.method == Method::Delete {
        Value::Null
      } else {
        input.clone()
      },
      path,
    };

    info!(mutation = name, method = %request.method, path = %request.path, "sending mutation");
    let result = self.inner.fetcher.mutate(&request).await?;

    let patterns = self.inner.graph.invalidate_for(name, &input, &result);
    self.invalidate(&patterns);
    Ok(result)
  }

  /// Invalidate matching entries as one batch and refresh the ones in use.
  pub fn invalidate(&self, patterns: &[KeyPattern]) -> InvalidationReport {
    if patterns.is_empty() {
      return InvalidationReport::default();
    }

    let report = self.inner.store.invalidate(patterns);
    info!(
      patterns = patterns.len(),
      invalidated = report.invalidated.len(),
      conflicts = report.conflicts.len(),
      "invalidation applied"
    );

    for key in &report.invalidated {
      if self.inner.store.subscriber_count(key) > 0 {
        self.refetch(key);
      }
    }
    report
  }

  pub fn login(&self, credential: impl Into<String>) {
    self.inner.session.login(credential);
  }

  /// Revoke the credential, stop all polling and drop every cached value.
  pub fn logout(&self) {
    self.inner.session.revoke();
    self.inner.scheduler.cancel_all();
    self.inner.store.flush();
    info!("logged out, cache flushed");
  }
}

impl fmt::Debug for QueryClient {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueryClient")
      .field("store", &self.inner.store)
      .field("session", &self.inner.session)
      .finish_non_exhaustive()
  }
}
