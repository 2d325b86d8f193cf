//! Fetcher: runs network calls on behalf of the cache store.

use std::sync::Arc;

use futures::FutureExt;
use tracing::debug;

use super::key::CacheKey;
use super::storage::{CacheStore, EntryState, FetchTicket, SharedFetch};
use super::traits::{FetchResult, MutationRequest, Transport};
use crate::session::Session;

/// Whether cached data may satisfy a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
  /// Return fresh cached data; otherwise fetch (or join the fetch in flight).
  IfNeeded,
  /// Always start a new network call.
  Force,
}

/// Sits between the store and the transport.
///
/// Reads go through `begin_fetch` so concurrent callers share one call per key.
/// A leader's call is spawned onto the runtime, so it completes and lands in
/// the cache even if every caller stops waiting. There is no retry: a failed
/// fetch stays failed until something asks again.
#[derive(Clone)]
pub struct Fetcher {
  store: CacheStore,
  transport: Arc<dyn Transport>,
  session: Session,
}

impl Fetcher {
  pub fn new(store: CacheStore, transport: Arc<dyn Transport>, session: Session) -> Self {
    Self {
      store,
      transport,
      session,
    }
  }

  pub fn store(&self) -> &CacheStore {
    &self.store
  }

  /// Fetch `key` through the cache.
  pub async fn fetch(&self, key: &CacheKey, mode: FetchMode) -> FetchResult {
    if mode == FetchMode::IfNeeded {
      if let Some(entry) = self.store.get(key) {
        if let (EntryState::Fresh, Some(data)) = (entry.state, entry.data) {
          debug!(key = %key, "cache hit");
          return Ok(data);
        }
      }
    }

    self.start(key, mode == FetchMode::Force).fetch.await
  }

  /// Begin or join a fetch without waiting for it.
  pub fn start(&self, key: &CacheKey, force: bool) -> FetchTicket {
    let ticket = self
      .store
      .begin_fetch(key, force, |seq| self.leader(key.clone(), seq));
    if ticket.role.is_leader() {
      tokio::spawn(ticket.fetch.clone());
    }
    ticket
  }

  fn leader(&self, key: CacheKey, seq: u64) -> SharedFetch {
    let store = self.store.clone();
    let transport = Arc::clone(&self.transport);
    let session = self.session.clone();

    async move {
      let credential = session.credential();
      let result = transport
        .query(&key, credential.as_deref())
        .await
        .map_err(|e| session.classify(e));

      match &result {
        Ok(data) => {
          store.resolve(&key, seq, data.clone());
        }
        Err(error) => {
          store.reject(&key, seq, error.clone());
        }
      }
      result
    }
    .boxed()
    .shared()
  }

  /// Send a write. Never cached or de-duplicated.
  pub async fn mutate(&self, request: &MutationRequest) -> FetchResult {
    let credential = self.session.credential();
    self
      .transport
      .mutate(request, credential.as_deref())
      .await
      .map_err(|e| self.session.classify(e))
  }
}
