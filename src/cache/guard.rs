//! Enablement guards: decide whether a query may run with the given params.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Predicate evaluated on params before any key is built or cache consulted.
#[derive(Clone)]
pub struct EnablementGuard {
  predicate: Option<Predicate>,
}

impl EnablementGuard {
  /// Guard that lets every call through.
  pub fn always() -> Self {
    Self { predicate: None }
  }

  pub fn new<F>(predicate: F) -> Self
  where
    F: Fn(&Value) -> bool + Send + Sync + 'static,
  {
    Self {
      predicate: Some(Arc::new(predicate)),
    }
  }

  /// Every listed param must be present, non-null and not an empty string.
  pub fn requires(fields: &'static [&'static str]) -> Self {
    Self::new(move |params| fields.iter().all(|f| is_present(params.get(*f))))
  }

  /// The param must be a number strictly greater than zero.
  pub fn positive(field: &'static str) -> Self {
    Self::new(move |params| {
      params
        .get(field)
        .and_then(Value::as_f64)
        .is_some_and(|n| n > 0.0)
    })
  }

  /// Both guards must pass.
  pub fn and(self, other: EnablementGuard) -> Self {
    match (self.predicate, other.predicate) {
      (None, None) => Self::always(),
      (Some(p), None) | (None, Some(p)) => Self { predicate: Some(p) },
      (Some(a), Some(b)) => Self::new(move |params| a(params) && b(params)),
    }
  }

  pub fn is_enabled(&self, params: &Value) -> bool {
    self.predicate.as_ref().map_or(true, |p| p(params))
  }
}

impl Default for EnablementGuard {
  fn default() -> Self {
    Self::always()
  }
}

impl fmt::Debug for EnablementGuard {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.predicate {
      Some(_) => f.write_str("EnablementGuard(..)"),
      None => f.write_str("EnablementGuard(always)"),
    }
  }
}

fn is_present(value: Option<&Value>) -> bool {
  match value {
    None | Some(Value::Null) => false,
    Some(Value::String(s)) => !s.trim().is_empty(),
    Some(_) => true,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_always_enabled() {
    assert!(EnablementGuard::always().is_enabled(&json!({})));
  }

  #[test]
  fn test_requires_fields() {
    let guard = EnablementGuard::requires(&["item_id"]);
    assert!(!guard.is_enabled(&json!({})));
    assert!(!guard.is_enabled(&json!({ "item_id": "" })));
    assert!(!guard.is_enabled(&json!({ "item_id": null })));
    assert!(guard.is_enabled(&json!({ "item_id": "iron" })));
    assert!(guard.is_enabled(&json!({ "item_id": 0 })));
  }

  #[test]
  fn test_find_sources_guard() {
    let guard =
      EnablementGuard::requires(&["item_id"]).and(EnablementGuard::positive("required_quantity"));
    assert!(!guard.is_enabled(&json!({ "item_id": "iron", "required_quantity": 0 })));
    assert!(!guard.is_enabled(&json!({ "item_id": "iron" })));
    assert!(guard.is_enabled(&json!({ "item_id": "iron", "required_quantity": 10 })));
  }
}
