//! Declared queries and mutations.
//!
//! Policies and guards are attached per query template at registration time,
//! so every key whose name fits a template shares its policy.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use super::guard::EnablementGuard;
use super::key::NameTemplate;
use super::policy::{PollInterval, StalenessPolicy};

/// Registration for one query template.
#[derive(Debug, Clone)]
pub struct QueryDef {
  pub template: NameTemplate,
  policy: Option<StalenessPolicy>,
  stale_after: Option<Duration>,
  poll_interval: Option<PollInterval>,
  pub guard: EnablementGuard,
}

impl QueryDef {
  pub fn new(template: &str) -> Self {
    Self {
      template: NameTemplate::new(template),
      policy: None,
      stale_after: None,
      poll_interval: None,
      guard: EnablementGuard::always(),
    }
  }

  pub fn policy(mut self, policy: StalenessPolicy) -> Self {
    self.policy = Some(policy);
    self
  }

  /// Override only the staleness window; other settings use the default.
  pub fn stale_after(mut self, stale_after: Duration) -> Self {
    self.stale_after = Some(stale_after);
    self
  }

  pub fn poll(mut self, poll_interval: PollInterval) -> Self {
    self.poll_interval = Some(poll_interval);
    self
  }

  pub fn enabled_when(mut self, guard: EnablementGuard) -> Self {
    self.guard = guard;
    self
  }

  fn resolve_policy(&self, default: &StalenessPolicy) -> StalenessPolicy {
    let base = self.policy.clone().unwrap_or_else(|| default.clone());
    StalenessPolicy {
      stale_after: self.stale_after.unwrap_or(base.stale_after),
      poll_interval: self.poll_interval.clone().unwrap_or(base.poll_interval),
    }
  }
}

/// HTTP verbs a mutation may use. Reads are never mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Post,
  Put,
  Patch,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Post => "POST",
      Self::Put => "PUT",
      Self::Patch => "PATCH",
      Self::Delete => "DELETE",
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Registration for one mutation type.
#[derive(Debug, Clone)]
pub struct MutationDef {
  pub name: String,
  pub method: Method,
  /// Request path, rendered from the mutation input.
  pub path: NameTemplate,
}

impl MutationDef {
  pub fn new(name: &str, method: Method, path: &str) -> Self {
    Self {
      name: name.to_string(),
      method,
      path: NameTemplate::new(path),
    }
  }
}

struct RegisteredQuery {
  def: QueryDef,
  policy: StalenessPolicy,
}

/// Lookup table from query names to policies and guards.
pub struct QueryRegistry {
  default_policy: StalenessPolicy,
  queries: Vec<RegisteredQuery>,
  mutations: HashMap<String, MutationDef>,
  always: EnablementGuard,
}

impl QueryRegistry {
  pub fn new(default_policy: StalenessPolicy) -> Self {
    Self {
      default_policy,
      queries: Vec::new(),
      mutations: HashMap::new(),
      always: EnablementGuard::always(),
    }
  }

  pub fn with_query(mut self, def: QueryDef) -> Self {
    self.register_query(def);
    self
  }

  pub fn with_mutation(mut self, def: MutationDef) -> Self {
    self.register_mutation(def);
    self
  }

  pub fn register_query(&mut self, def: QueryDef) {
    let policy = def.resolve_policy(&self.default_policy);
    self.queries.push(RegisteredQuery { def, policy });
  }

  pub fn register_mutation(&mut self, def: MutationDef) {
    self.mutations.insert(def.name.clone(), def);
  }

  /// Most specific registered template matching `name`.
  fn lookup(&self, name: &str) -> Option<&RegisteredQuery> {
    self
      .queries
      .iter()
      .filter(|q| q.def.template.matches(name))
      .max_by_key(|q| q.def.template.specificity())
  }

  pub fn query(&self, name: &str) -> Option<&QueryDef> {
    self.lookup(name).map(|q| &q.def)
  }

  /// Policy for `name`, or the default when nothing is registered.
  pub fn policy(&self, name: &str) -> &StalenessPolicy {
    self
      .lookup(name)
      .map(|q| &q.policy)
      .unwrap_or(&self.default_policy)
  }

  pub fn guard(&self, name: &str) -> &EnablementGuard {
    self
      .lookup(name)
      .map(|q| &q.def.guard)
      .unwrap_or(&self.always)
  }

  pub fn mutation(&self, name: &str) -> Option<&MutationDef> {
    self.mutations.get(name)
  }
}

impl Default for QueryRegistry {
  fn default() -> Self {
    Self::new(StalenessPolicy::default())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_most_specific_template_wins() {
    let registry = QueryRegistry::new(StalenessPolicy::new(Duration::from_secs(60)))
      .with_query(QueryDef::new("goals/{id}").stale_after(Duration::from_secs(10)))
      .with_query(QueryDef::new("goals/{id}/progress").stale_after(Duration::from_secs(5)))
      .with_query(QueryDef::new("goals/new").stale_after(Duration::from_secs(1)));

    assert_eq!(
      registry.policy("goals/g1").stale_after,
      Duration::from_secs(10)
    );
    assert_eq!(
      registry.policy("goals/g1/progress").stale_after,
      Duration::from_secs(5)
    );
    assert_eq!(
      registry.policy("goals/new").stale_after,
      Duration::from_secs(1)
    );
    assert_eq!(registry.policy("items").stale_after, Duration::from_secs(60));
  }

  #[test]
  fn test_partial_overrides_keep_defaults() {
    let default = StalenessPolicy::new(Duration::from_secs(60))
      .with_poll_interval(PollInterval::Every(Duration::from_secs(9)));
    let registry = QueryRegistry::new(default).with_query(QueryDef::new("items").stale_after(Duration::ZERO));

    let policy = registry.policy("items");
    assert_eq!(policy.stale_after, Duration::ZERO);
    assert_eq!(policy.poll_interval.next(None), Some(Duration::from_secs(9)));
  }

  #[test]
  fn test_unregistered_query_is_always_enabled() {
    let registry = QueryRegistry::default()
      .with_query(QueryDef::new("sources").enabled_when(EnablementGuard::requires(&["item_id"])));
    assert!(registry.guard("items").is_enabled(&json!({})));
    assert!(!registry.guard("sources").is_enabled(&json!({})));
  }

  #[test]
  fn test_mutation_lookup() {
    let registry =
      QueryRegistry::default().with_mutation(MutationDef::new("update_goal", Method::Patch, "goals/{id}"));
    let def = registry.mutation("update_goal").unwrap();
    assert_eq!(def.method.as_str(), "PATCH");
    assert!(registry.mutation("nope").is_none());
  }
}
