//! Scripted transport for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::cache::{CacheKey, FetchResult, MutationRequest, Transport};
use crate::error::QueryError;

/// Let spawned tasks on the current-thread test runtime make progress.
pub(crate) async fn settle() {
  for _ in 0..16 {
    tokio::task::yield_now().await;
  }
}

/// Blocks queries for one name until released.
pub(crate) struct Gate(Arc<Semaphore>);

impl Gate {
  /// Let every held and future call through.
  pub(crate) fn release(&self) {
    self.0.close();
  }

  /// Let exactly one held call through.
  pub(crate) fn release_one(&self) {
    self.0.add_permits(1);
  }
}

async fn pass(gate: &Semaphore) {
  // closed semaphore means released
  if let Ok(permit) = gate.acquire().await {
    permit.forget();
  }
}

#[derive(Default)]
struct State {
  responses: HashMap<String, FetchResult>,
  scripted: HashMap<String, VecDeque<FetchResult>>,
  mutation_responses: HashMap<String, FetchResult>,
  gates: HashMap<String, Arc<Semaphore>>,
  query_calls: HashMap<String, usize>,
  key_calls: Vec<CacheKey>,
  mutations: Vec<MutationRequest>,
  credentials: Vec<Option<String>>,
}

/// In-memory [`Transport`] keyed by query name.
///
/// Scripted responses are consumed in call order, picked when the call is
/// made; once they run out the standing response for the name is used.
#[derive(Default)]
pub(crate) struct FakeTransport {
  state: Arc<Mutex<State>>,
}

impl FakeTransport {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  pub(crate) fn respond(&self, name: &str, value: Value) {
    self
      .state
      .lock()
      .unwrap()
      .responses
      .insert(name.to_string(), Ok(value));
  }

  pub(crate) fn fail(&self, name: &str, error: QueryError) {
    self
      .state
      .lock()
      .unwrap()
      .responses
      .insert(name.to_string(), Err(error));
  }

  pub(crate) fn script(&self, name: &str, results: Vec<FetchResult>) {
    self
      .state
      .lock()
      .unwrap()
      .scripted
      .entry(name.to_string())
      .or_default()
      .extend(results);
  }

  pub(crate) fn respond_mutation(&self, name: &str, value: Value) {
    self
      .state
      .lock()
      .unwrap()
      .mutation_responses
      .insert(name.to_string(), Ok(value));
  }

  pub(crate) fn fail_mutation(&self, name: &str, error: QueryError) {
    self
      .state
      .lock()
      .unwrap()
      .mutation_responses
      .insert(name.to_string(), Err(error));
  }

  /// Hold every query or mutation named `name` until the gate is released.
  pub(crate) fn hold(&self, name: &str) -> Gate {
    let semaphore = Arc::new(Semaphore::new(0));
    self
      .state
      .lock()
      .unwrap()
      .gates
      .insert(name.to_string(), Arc::clone(&semaphore));
    Gate(semaphore)
  }

  pub(crate) fn query_calls(&self, name: &str) -> usize {
    self
      .state
      .lock()
      .unwrap()
      .query_calls
      .get(name)
      .copied()
      .unwrap_or(0)
  }

  pub(crate) fn total_query_calls(&self) -> usize {
    self.state.lock().unwrap().key_calls.len()
  }

  pub(crate) fn key_calls(&self, key: &CacheKey) -> usize {
    self
      .state
      .lock()
      .unwrap()
      .key_calls
      .iter()
      .filter(|k| *k == key)
      .count()
  }

  pub(crate) fn mutations(&self) -> Vec<MutationRequest> {
    self.state.lock().unwrap().mutations.clone()
  }

  pub(crate) fn last_credential(&self) -> Option<String> {
    self
      .state
      .lock()
      .unwrap()
      .credentials
      .last()
      .cloned()
      .flatten()
  }
}

impl Transport for FakeTransport {
  fn query(&self, key: &CacheKey, credential: Option<&str>) -> BoxFuture<'static, FetchResult> {
    let state = Arc::clone(&self.state);
    let key = key.clone();
    let credential = credential.map(String::from);

    async move {
      let (gate, response) = {
        let mut s = state.lock().unwrap();
        *s.query_calls.entry(key.name().to_string()).or_default() += 1;
        s.key_calls.push(key.clone());
        s.credentials.push(credential);
        let response = match s.scripted.get_mut(key.name()).and_then(VecDeque::pop_front) {
          Some(next) => next,
          None => s.responses.get(key.name()).cloned().unwrap_or_else(|| {
            Err(QueryError::RemoteError {
              status: 404,
              message: format!("no fake response for {}", key.name()),
            })
          }),
        };
        (s.gates.get(key.name()).cloned(), response)
      };
      if let Some(gate) = gate {
        pass(&gate).await;
      }
      response
    }
    .boxed()
  }

  fn mutate(
    &self,
    request: &MutationRequest,
    credential: Option<&str>,
  ) -> BoxFuture<'static, FetchResult> {
    let state = Arc::clone(&self.state);
    let request = request.clone();
    let credential = credential.map(String::from);

    async move {
      let gate = {
        let mut s = state.lock().unwrap();
        s.mutations.push(request.clone());
        s.credentials.push(credential);
        s.gates.get(&request.name).cloned()
      };
      if let Some(gate) = gate {
        pass(&gate).await;
      }

      let s = state.lock().unwrap();
      s.mutation_responses
        .get(&request.name)
        .cloned()
        .unwrap_or(Ok(Value::Null))
    }
    .boxed()
  }
}
