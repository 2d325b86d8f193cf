//! Background polling for subscribed queries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use super::key::CacheKey;
use super::layer::Fetcher;
use super::policy::PollInterval;
use super::storage::{CacheStore, EntryState};

struct Timer {
  id: u64,
  handle: JoinHandle<()>,
}

/// Runs one polling loop per subscribed key whose policy asks for it.
///
/// The interval is recomputed from the latest data after every fetch, and the
/// loop stops for good when the policy returns no interval, when the entry is
/// in error, or when the key has no subscribers left.
#[derive(Clone)]
pub struct PollingScheduler {
  fetcher: Fetcher,
  timers: Arc<Mutex<HashMap<CacheKey, Timer>>>,
  next_id: Arc<AtomicU64>,
}

impl PollingScheduler {
  pub fn new(fetcher: Fetcher) -> Self {
    Self {
      fetcher,
      timers: Arc::new(Mutex::new(HashMap::new())),
      next_id: Arc::new(AtomicU64::new(0)),
    }
  }

  fn timers(&self) -> MutexGuard<'_, HashMap<CacheKey, Timer>> {
    self.timers.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Make sure `key` is being polled if its policy wants it.
  ///
  /// Call after a fetch has been started or data is present; a conditional
  /// policy has nothing to decide on before that.
  pub fn watch(&self, key: &CacheKey) {
    let policy = self.fetcher.store().registry().policy(key.name());
    if matches!(policy.poll_interval, PollInterval::Never) {
      return;
    }

    let mut timers = self.timers();
    if timers.get(key).is_some_and(|t| !t.handle.is_finished()) {
      return;
    }

    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let handle = tokio::spawn(poll_loop(self.clone(), key.clone(), id));
    timers.insert(key.clone(), Timer { id, handle });
  }

  /// Stop polling `key` if nobody is subscribed to it any more.
  pub fn release(&self, key: &CacheKey) {
    if self.fetcher.store().subscriber_count(key) > 0 {
      return;
    }
    if let Some(timer) = self.timers().remove(key) {
      debug!(key = %key, "no subscribers, polling cancelled");
      timer.handle.abort();
    }
  }

  pub fn cancel_all(&self) {
    for (_, timer) in self.timers().drain() {
      timer.handle.abort();
    }
  }

  pub fn is_polling(&self, key: &CacheKey) -> bool {
    self
      .timers()
      .get(key)
      .is_some_and(|t| !t.handle.is_finished())
  }

  fn finished(&self, key: &CacheKey, id: u64) {
    let mut timers = self.timers();
    if timers.get(key).is_some_and(|t| t.id == id) {
      timers.remove(key);
    }
  }
}

/// Interval until the next poll, or `None` when polling should stop.
fn next_interval(store: &CacheStore, key: &CacheKey) -> Option<Duration> {
  if store.subscriber_count(key) == 0 {
    return None;
  }
  let entry = store.get(key)?;
  if entry.state == EntryState::Error {
    return None;
  }
  store
    .registry()
    .policy(key.name())
    .poll_interval
    .next(entry.data.as_ref())
}

async fn poll_loop(scheduler: PollingScheduler, key: CacheKey, id: u64) {
  let store = scheduler.fetcher.store().clone();

  loop {
    if let Some(fetch) = store.in_flight(&key) {
      let _ = fetch.await;
    }

    let Some(interval) = next_interval(&store, &key) else {
      debug!(key = %key, "polling stopped");
      break;
    };
    tokio::time::sleep(interval).await;

    // Someone else refreshed meanwhile; re-evaluate once it lands.
    if store.in_flight(&key).is_some() {
      continue;
    }
    if next_interval(&store, &key).is_none() {
      debug!(key = %key, "polling stopped");
      break;
    }

    debug!(key = %key, ?interval, "polling");
    scheduler.fetcher.start(&key, false);
  }

  scheduler.finished(&key, id);
}
