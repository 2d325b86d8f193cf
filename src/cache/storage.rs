//! In-memory cache store.
//!
//! The store is the only owner of cache entries. Everything else changes them
//! through four transitions: `begin_fetch`, `resolve`, `reject` and
//! `invalidate` (plus `flush` on logout). Listeners are called synchronously
//! after the transition, in registration order, once the internal lock has been
//! released, so a listener may read the store again.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::key::{CacheKey, KeyPattern};
use super::registry::QueryRegistry;
use super::traits::FetchResult;
use crate::error::QueryError;

/// A network call that any number of callers can await.
pub type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

/// Change callback for one key.
pub type Listener = Arc<dyn Fn(&CacheEntry) + Send + Sync>;

/// Lifecycle of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
  /// Observed but never fetched (or flushed).
  Idle,
  Fetching,
  Fresh,
  /// Data is still present but should be refreshed.
  Stale,
  /// Last fetch failed; `data` keeps the last good value if there was one.
  Error,
}

/// Snapshot of one cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub key: CacheKey,
  pub data: Option<Value>,
  pub error: Option<QueryError>,
  pub fetched_at: Option<Instant>,
  /// Wall-clock time of the last successful fetch, for display.
  pub updated_at: Option<DateTime<Utc>>,
  pub state: EntryState,
}

impl CacheEntry {
  /// Whether the next observation should go to the network.
  pub fn needs_fetch(&self) -> bool {
    matches!(
      self.state,
      EntryState::Idle | EntryState::Stale | EntryState::Error
    )
  }

  /// Data is present but known to be out of date (or being refreshed).
  pub fn is_stale(&self) -> bool {
    self.data.is_some() && matches!(self.state, EntryState::Stale | EntryState::Fetching)
  }
}

/// Whether a `begin_fetch` caller started the network call or joined one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchRole {
  Leader(u64),
  Follower(u64),
}

impl FetchRole {
  pub fn seq(&self) -> u64 {
    match self {
      Self::Leader(seq) | Self::Follower(seq) => *seq,
    }
  }

  pub fn is_leader(&self) -> bool {
    matches!(self, Self::Leader(_))
  }
}

/// Result of `begin_fetch`: the caller's role and the call to await.
pub struct FetchTicket {
  pub role: FetchRole,
  pub fetch: SharedFetch,
}

/// An invalidated key that had a fetch in flight at invalidation time.
///
/// The in-flight response may still land, but the entry stays stale and the
/// higher sequence number of the follow-up fetch wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleWriteConflict {
  pub key: CacheKey,
  pub in_flight_seq: u64,
}

/// What one invalidation batch touched.
#[derive(Debug, Clone, Default)]
pub struct InvalidationReport {
  pub invalidated: Vec<CacheKey>,
  pub conflicts: Vec<StaleWriteConflict>,
}

impl InvalidationReport {
  pub fn is_empty(&self) -> bool {
    self.invalidated.is_empty()
  }
}

struct Slot {
  data: Option<Value>,
  error: Option<QueryError>,
  fetched_at: Option<Instant>,
  updated_at: Option<DateTime<Utc>>,
  state: EntryState,
  /// Sequence number of the most recently started fetch.
  latest_seq: u64,
  /// Fetches with a sequence number at or below this settle as stale.
  barrier_seq: u64,
  in_flight: Option<(u64, SharedFetch)>,
  listeners: Vec<(u64, Listener)>,
}

impl Slot {
  fn new() -> Self {
    Self {
      data: None,
      error: None,
      fetched_at: None,
      updated_at: None,
      state: EntryState::Idle,
      latest_seq: 0,
      barrier_seq: 0,
      in_flight: None,
      listeners: Vec::new(),
    }
  }

  fn snapshot(&self, key: &CacheKey, registry: &QueryRegistry) -> CacheEntry {
    let mut state = self.state;
    if state == EntryState::Fresh {
      let stale_after = registry.policy(key.name()).stale_after;
      if self.fetched_at.is_some_and(|at| at.elapsed() > stale_after) {
        state = EntryState::Stale;
      }
    }

    CacheEntry {
      key: key.clone(),
      data: self.data.clone(),
      error: self.error.clone(),
      fetched_at: self.fetched_at,
      updated_at: self.updated_at,
      state,
    }
  }
}

struct Inner {
  slots: HashMap<CacheKey, Slot>,
  next_seq: u64,
  next_listener: u64,
}

type Notifications = Vec<(Listener, CacheEntry)>;

/// Shared in-memory cache. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct CacheStore {
  inner: Arc<Mutex<Inner>>,
  registry: Arc<QueryRegistry>,
}

impl CacheStore {
  pub fn new(registry: Arc<QueryRegistry>) -> Self {
    Self {
      inner: Arc::new(Mutex::new(Inner {
        slots: HashMap::new(),
        next_seq: 0,
        next_listener: 0,
      })),
      registry,
    }
  }

  pub fn registry(&self) -> &Arc<QueryRegistry> {
    &self.registry
  }

  // Transitions must never fail, so a poisoned lock is simply taken over.
  fn lock(&self) -> MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Current entry for `key`, with time-based staleness applied.
  pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
    let inner = self.lock();
    inner
      .slots
      .get(key)
      .map(|slot| slot.snapshot(key, &self.registry))
  }

  pub fn len(&self) -> usize {
    self.lock().slots.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn subscriber_count(&self, key: &CacheKey) -> usize {
    self
      .lock()
      .slots
      .get(key)
      .map_or(0, |slot| slot.listeners.len())
  }

  /// Keys that currently have at least one subscriber, in key order.
  pub fn subscribed_keys(&self) -> Vec<CacheKey> {
    let inner = self.lock();
    let mut keys: Vec<CacheKey> = inner
      .slots
      .iter()
      .filter(|(_, slot)| !slot.listeners.is_empty())
      .map(|(key, _)| key.clone())
      .collect();
    keys.sort();
    keys
  }

  /// The fetch currently in flight for `key`, if any.
  pub fn in_flight(&self, key: &CacheKey) -> Option<SharedFetch> {
    self
      .lock()
      .slots
      .get(key)
      .and_then(|slot| slot.in_flight.as_ref())
      .map(|(_, fetch)| fetch.clone())
  }

  /// Start a fetch for `key`, or join the one already in flight.
  ///
  /// `make` is only called when the caller becomes the leader, with the new
  /// sequence number. With `force`, or when the fetch in flight was issued
  /// before the last invalidation, a new leader is started; the fetch it
  /// supersedes can still finish but its result is discarded.
  pub fn begin_fetch<F>(&self, key: &CacheKey, force: bool, make: F) -> FetchTicket
  where
    F: FnOnce(u64) -> SharedFetch,
  {
    let (ticket, notifications) = {
      let mut inner = self.lock();
      inner.next_seq += 1;
      let seq = inner.next_seq;

      let slot = inner.slots.entry(key.clone()).or_insert_with(Slot::new);
      if let (false, Some((leader_seq, fetch))) = (force, slot.in_flight.as_ref()) {
        // A fetch issued before the last invalidation cannot satisfy a new read.
        if *leader_seq > slot.barrier_seq {
          debug!(key = %key, seq = leader_seq, "joining in-flight fetch");
          return FetchTicket {
            role: FetchRole::Follower(*leader_seq),
            fetch: fetch.clone(),
          };
        }
        debug!(key = %key, seq = leader_seq, "in-flight fetch predates invalidation");
      }

      let fetch = make(seq);
      slot.latest_seq = seq;
      slot.state = EntryState::Fetching;
      slot.in_flight = Some((seq, fetch.clone()));
      debug!(key = %key, seq, force, "leading fetch");

      let notifications = collect(slot, key, &self.registry);
      (
        FetchTicket {
          role: FetchRole::Leader(seq),
          fetch,
        },
        notifications,
      )
    };

    deliver(notifications);
    ticket
  }

  /// Record a successful fetch. Returns `false` when the result was superseded.
  pub fn resolve(&self, key: &CacheKey, seq: u64, data: Value) -> bool {
    self.settle(key, seq, Ok(data))
  }

  /// Record a failed fetch. Returns `false` when the result was superseded.
  pub fn reject(&self, key: &CacheKey, seq: u64, error: QueryError) -> bool {
    self.settle(key, seq, Err(error))
  }

  fn settle(&self, key: &CacheKey, seq: u64, result: FetchResult) -> bool {
    let notifications = {
      let mut inner = self.lock();
      let Some(slot) = inner.slots.get_mut(key) else {
        debug!(key = %key, seq, "dropping result for flushed entry");
        return false;
      };

      if seq < slot.latest_seq {
        debug!(key = %key, seq, latest = slot.latest_seq, "discarding out-of-order result");
        return false;
      }

      if slot.in_flight.as_ref().is_some_and(|(s, _)| *s == seq) {
        slot.in_flight = None;
      }

      match result {
        Ok(data) => {
          slot.data = Some(data);
          slot.error = None;
          slot.fetched_at = Some(Instant::now());
          slot.updated_at = Some(Utc::now());
          slot.state = if seq <= slot.barrier_seq {
            EntryState::Stale
          } else {
            EntryState::Fresh
          };
        }
        Err(error) => {
          debug!(key = %key, seq, error = %error, "fetch failed");
          slot.error = Some(error);
          slot.state = EntryState::Error;
        }
      }

      collect(slot, key, &self.registry)
    };

    deliver(notifications);
    true
  }

  /// Mark every entry matching any pattern as stale, as one batch.
  ///
  /// Data is kept so it can still be shown while a refresh runs. Listeners are
  /// only told once the whole batch has been applied.
  pub fn invalidate(&self, patterns: &[KeyPattern]) -> InvalidationReport {
    let mut report = InvalidationReport::default();
    let notifications = {
      let mut inner = self.lock();
      let mut keys: Vec<CacheKey> = inner
        .slots
        .keys()
        .filter(|key| patterns.iter().any(|p| p.matches(key)))
        .cloned()
        .collect();
      keys.sort();

      let mut notifications = Vec::new();
      for key in keys {
        let Some(slot) = inner.slots.get_mut(&key) else {
          continue;
        };
        slot.barrier_seq = slot.latest_seq;
        match slot.state {
          EntryState::Fetching => {
            if let Some((in_flight_seq, _)) = slot.in_flight {
              warn!(key = %key, in_flight_seq, "invalidated while a fetch was in flight");
              report.conflicts.push(StaleWriteConflict {
                key: key.clone(),
                in_flight_seq,
              });
            }
          }
          EntryState::Idle => {}
          EntryState::Fresh | EntryState::Stale | EntryState::Error => {
            slot.state = EntryState::Stale;
          }
        }
        notifications.extend(collect(slot, &key, &self.registry));
        report.invalidated.push(key);
      }
      notifications
    };

    deliver(notifications);
    report
  }

  /// Drop every cached value (logout).
  ///
  /// Entries with subscribers stay as `Idle` so their handles keep working;
  /// responses still in flight are discarded when they land.
  pub fn flush(&self) {
    let notifications = {
      let mut inner = self.lock();
      inner.next_seq += 1;
      let barrier = inner.next_seq;
      inner.slots.retain(|_, slot| !slot.listeners.is_empty());

      let mut keys: Vec<CacheKey> = inner.slots.keys().cloned().collect();
      keys.sort();
      let mut notifications = Vec::new();
      for key in keys {
        if let Some(slot) = inner.slots.get_mut(&key) {
          let listeners = std::mem::take(&mut slot.listeners);
          *slot = Slot::new();
          slot.latest_seq = barrier;
          slot.barrier_seq = barrier;
          slot.listeners = listeners;
          notifications.extend(collect(slot, &key, &self.registry));
        }
      }
      notifications
    };

    debug!("cache flushed");
    deliver(notifications);
  }

  /// Call `listener` after every change to `key` until the handle is dropped.
  pub fn subscribe(&self, key: &CacheKey, listener: Listener) -> Subscription {
    let mut inner = self.lock();
    inner.next_listener += 1;
    let id = inner.next_listener;
    inner
      .slots
      .entry(key.clone())
      .or_insert_with(Slot::new)
      .listeners
      .push((id, listener));

    Subscription {
      store: Arc::downgrade(&self.inner),
      key: key.clone(),
      id,
    }
  }
}

impl fmt::Debug for CacheStore {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheStore")
      .field("entries", &self.len())
      .finish_non_exhaustive()
  }
}

fn collect(slot: &Slot, key: &CacheKey, registry: &QueryRegistry) -> Notifications {
  if slot.listeners.is_empty() {
    return Vec::new();
  }
  let entry = slot.snapshot(key, registry);
  slot
    .listeners
    .iter()
    .map(|(_, listener)| (Arc::clone(listener), entry.clone()))
    .collect()
}

fn deliver(notifications: Notifications) {
  for (listener, entry) in notifications {
    listener(&entry);
  }
}

/// Live subscription to one key; unsubscribes on drop.
pub struct Subscription {
  store: Weak<Mutex<Inner>>,
  key: CacheKey,
  id: u64,
}

impl Subscription {
  pub fn key(&self) -> &CacheKey {
    &self.key
  }

  pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
  fn drop(&mut self) {
    let Some(inner) = self.store.upgrade() else {
      return;
    };
    let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(slot) = inner.slots.get_mut(&self.key) {
      slot.listeners.retain(|(id, _)| *id != self.id);
    }
  }
}

impl fmt::Debug for Subscription {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Subscription")
      .field("key", &self.key)
      .field("id", &self.id)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::key::build_key;
  use crate::cache::policy::StalenessPolicy;
  use crate::cache::registry::QueryDef;
  use futures::FutureExt;
  use serde_json::json;
  use std::time::Duration;

  fn store() -> CacheStore {
    let registry = QueryRegistry::new(StalenessPolicy::new(Duration::from_secs(60)))
      .with_query(QueryDef::new("goals/{id}/progress").stale_after(Duration::from_secs(5)));
    CacheStore::new(Arc::new(registry))
  }

  fn ready(value: Value) -> SharedFetch {
    futures::future::ready(Ok(value)).boxed().shared()
  }

  fn key(name: &str) -> CacheKey {
    build_key(name, &()).unwrap()
  }

  fn recorder(store: &CacheStore, key: &CacheKey) -> (Subscription, Arc<Mutex<Vec<EntryState>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let sub = store.subscribe(
      key,
      Arc::new(move |entry: &CacheEntry| sink.lock().unwrap().push(entry.state)),
    );
    (sub, seen)
  }

  #[test]
  fn test_absent_until_observed() {
    let store = store();
    assert!(store.get(&key("items")).is_none());
    assert!(store.is_empty());
  }

  #[test]
  fn test_one_leader_many_followers() {
    let store = store();
    let items = key("items");
    let mut made = 0;

    let first = store.begin_fetch(&items, false, |_| {
      made += 1;
      ready(json!([1]))
    });
    let second = store.begin_fetch(&items, false, |_| {
      made += 1;
      ready(json!([2]))
    });

    assert!(first.role.is_leader());
    assert_eq!(second.role, FetchRole::Follower(first.role.seq()));
    assert_eq!(made, 1);
    assert_eq!(store.get(&items).unwrap().state, EntryState::Fetching);
  }

  #[test]
  fn test_resolve_clears_in_flight() {
    let store = store();
    let items = key("items");
    let ticket = store.begin_fetch(&items, false, |_| ready(json!([1])));
    assert!(store.resolve(&items, ticket.role.seq(), json!([1])));

    let entry = store.get(&items).unwrap();
    assert_eq!(entry.state, EntryState::Fresh);
    assert_eq!(entry.data, Some(json!([1])));
    assert!(!entry.needs_fetch());

    let next = store.begin_fetch(&items, false, |_| ready(json!([2])));
    assert!(next.role.is_leader());
  }

  #[test]
  fn test_older_result_never_overwrites_newer() {
    let store = store();
    let items = key("items");
    let old = store.begin_fetch(&items, false, |_| ready(json!("old")));
    let new = store.begin_fetch(&items, true, |_| ready(json!("new")));
    assert!(new.role.seq() > old.role.seq());

    assert!(store.resolve(&items, new.role.seq(), json!("new")));
    assert!(!store.resolve(&items, old.role.seq(), json!("old")));
    assert!(!store.reject(
      &items,
      old.role.seq(),
      QueryError::NetworkFailure("late".into())
    ));

    let entry = store.get(&items).unwrap();
    assert_eq!(entry.data, Some(json!("new")));
    assert_eq!(entry.state, EntryState::Fresh);
  }

  #[test]
  fn test_superseded_result_keeps_entry_fetching() {
    let store = store();
    let items = key("items");
    let old = store.begin_fetch(&items, false, |_| ready(json!("old")));
    let _new = store.begin_fetch(&items, true, |_| ready(json!("new")));

    assert!(!store.resolve(&items, old.role.seq(), json!("old")));
    let entry = store.get(&items).unwrap();
    assert_eq!(entry.state, EntryState::Fetching);
    assert_eq!(entry.data, None);
  }

  #[test]
  fn test_error_keeps_last_good_data() {
    let store = store();
    let items = key("items");
    let t1 = store.begin_fetch(&items, false, |_| ready(json!([1])));
    store.resolve(&items, t1.role.seq(), json!([1]));
    let t2 = store.begin_fetch(&items, true, |_| ready(json!([2])));
    store.reject(&items, t2.role.seq(), QueryError::NetworkFailure("offline".into()));

    let entry = store.get(&items).unwrap();
    assert_eq!(entry.state, EntryState::Error);
    assert_eq!(entry.data, Some(json!([1])));
    assert!(entry.error.is_some());
    assert!(entry.needs_fetch());
  }

  #[tokio::test(start_paused = true)]
  async fn test_fresh_ages_into_stale() {
    let store = store();
    let progress = key("goals/g1/progress");
    let ticket = store.begin_fetch(&progress, false, |_| ready(json!({})));
    store.resolve(&progress, ticket.role.seq(), json!({}));
    assert_eq!(store.get(&progress).unwrap().state, EntryState::Fresh);

    tokio::time::advance(Duration::from_secs(6)).await;
    let entry = store.get(&progress).unwrap();
    assert_eq!(entry.state, EntryState::Stale);
    assert_eq!(entry.data, Some(json!({})));
    assert!(entry.needs_fetch());
  }

  #[test]
  fn test_invalidate_matches_patterns_only() {
    let store = store();
    for name in ["goals", "goals/g1", "goals/g1/progress", "items"] {
      let k = key(name);
      let t = store.begin_fetch(&k, false, |_| ready(json!(name)));
      store.resolve(&k, t.role.seq(), json!(name));
    }

    let report = store.invalidate(&[
      KeyPattern::Name("goals".into()),
      KeyPattern::Name("goals/g1".into()),
      KeyPattern::Name("goals/g1/progress".into()),
    ]);
    assert_eq!(report.invalidated.len(), 3);
    assert!(report.conflicts.is_empty());

    for name in ["goals", "goals/g1", "goals/g1/progress"] {
      let entry = store.get(&key(name)).unwrap();
      assert_eq!(entry.state, EntryState::Stale);
      assert_eq!(entry.data, Some(json!(name)));
    }
    assert_eq!(store.get(&key("items")).unwrap().state, EntryState::Fresh);
  }

  #[test]
  fn test_invalidate_with_no_matches_is_noop() {
    let store = store();
    let report = store.invalidate(&[KeyPattern::Prefix("recipes".into())]);
    assert!(report.is_empty());
  }

  #[test]
  fn test_invalidate_during_fetch_settles_stale() {
    let store = store();
    let goals = key("goals");
    let ticket = store.begin_fetch(&goals, false, |_| ready(json!("pre-write")));

    let report = store.invalidate(&[KeyPattern::Name("goals".into())]);
    assert_eq!(
      report.conflicts,
      vec![StaleWriteConflict {
        key: goals.clone(),
        in_flight_seq: ticket.role.seq()
      }]
    );

    assert!(store.resolve(&goals, ticket.role.seq(), json!("pre-write")));
    assert_eq!(store.get(&goals).unwrap().state, EntryState::Stale);

    let refetch = store.begin_fetch(&goals, false, |_| ready(json!("post-write")));
    store.resolve(&goals, refetch.role.seq(), json!("post-write"));
    assert_eq!(store.get(&goals).unwrap().state, EntryState::Fresh);
  }

  #[test]
  fn test_invalidated_fetch_is_not_joined() {
    let store = store();
    let goals = key("goals");
    let before = store.begin_fetch(&goals, false, |_| ready(json!("pre-write")));
    store.invalidate(&[KeyPattern::Name("goals".into())]);

    let mut made = 0;
    let after = store.begin_fetch(&goals, false, |_| {
      made += 1;
      ready(json!("post-write"))
    });
    assert_eq!(made, 1);
    assert!(after.role.is_leader());
    assert!(after.role.seq() > before.role.seq());

    let again = store.begin_fetch(&goals, false, |_| ready(json!("unused")));
    assert_eq!(again.role, FetchRole::Follower(after.role.seq()));

    assert!(store.resolve(&goals, after.role.seq(), json!("post-write")));
    assert!(!store.resolve(&goals, before.role.seq(), json!("pre-write")));
    let entry = store.get(&goals).unwrap();
    assert_eq!(entry.state, EntryState::Fresh);
    assert_eq!(entry.data, Some(json!("post-write")));
  }

  #[test]
  fn test_listeners_run_in_order_after_batch() {
    let store = store();
    let a = key("goals");
    let b = key("goals/g1");
    for k in [&a, &b] {
      let t = store.begin_fetch(k, false, |_| ready(json!(1)));
      store.resolve(k, t.role.seq(), json!(1));
    }

    let order = Arc::new(Mutex::new(Vec::new()));
    let o1 = Arc::clone(&order);
    let reader = store.clone();
    let other = b.clone();
    let _s1 = store.subscribe(
      &a,
      Arc::new(move |_: &CacheEntry| {
        // the rest of the batch is already applied
        let b_state = reader.get(&other).map(|e| e.state);
        o1.lock().unwrap().push(("first", b_state));
      }),
    );
    let o2 = Arc::clone(&order);
    let _s2 = store.subscribe(
      &a,
      Arc::new(move |_: &CacheEntry| o2.lock().unwrap().push(("second", None))),
    );

    store.invalidate(&[KeyPattern::Prefix("goals".into())]);
    assert_eq!(
      *order.lock().unwrap(),
      vec![("first", Some(EntryState::Stale)), ("second", None)]
    );
  }

  #[test]
  fn test_subscription_drop_unsubscribes() {
    let store = store();
    let items = key("items");
    let (sub, seen) = recorder(&store, &items);
    assert_eq!(store.subscriber_count(&items), 1);
    assert_eq!(store.subscribed_keys(), vec![items.clone()]);

    let t = store.begin_fetch(&items, false, |_| ready(json!(1)));
    store.resolve(&items, t.role.seq(), json!(1));
    assert_eq!(
      *seen.lock().unwrap(),
      vec![EntryState::Fetching, EntryState::Fresh]
    );

    sub.unsubscribe();
    assert_eq!(store.subscriber_count(&items), 0);
    store.invalidate(&[KeyPattern::Name("items".into())]);
    assert_eq!(seen.lock().unwrap().len(), 2);
  }

  #[test]
  fn test_flush_drops_data_and_late_results() {
    let store = store();
    let items = key("items");
    let orphan = key("recipes");
    let (_sub, seen) = recorder(&store, &items);

    let t = store.begin_fetch(&items, false, |_| ready(json!([1])));
    let o = store.begin_fetch(&orphan, false, |_| ready(json!([])));
    store.resolve(&orphan, o.role.seq(), json!([]));

    store.flush();
    assert!(store.get(&orphan).is_none());
    let entry = store.get(&items).unwrap();
    assert_eq!(entry.state, EntryState::Idle);
    assert_eq!(entry.data, None);
    assert_eq!(seen.lock().unwrap().last(), Some(&EntryState::Idle));

    assert!(!store.resolve(&items, t.role.seq(), json!(["secret"])));
    assert_eq!(store.get(&items).unwrap().data, None);
  }
}
