//! Mutation → invalidation mapping.
//!
//! Each mutation type declares which query names it can make wrong. Targets
//! are name templates filled in from the mutation's result (then its input), so
//! `goals/{id}/progress` after updating goal `g1` becomes `goals/g1/progress`.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};

use super::key::{key_from_value, KeyPattern, NameTemplate};

/// One thing a mutation invalidates.
#[derive(Debug, Clone)]
pub enum InvalidationTarget {
  /// Every key with the rendered name, any params.
  Name(NameTemplate),
  /// The rendered name and every name below it.
  Prefix(NameTemplate),
  /// A single descriptor.
  Exact { name: NameTemplate, params: Value },
}

/// Declared invalidations for one mutation type.
#[derive(Debug, Clone)]
pub struct InvalidationRule {
  pub mutation: String,
  pub targets: Vec<InvalidationTarget>,
}

impl InvalidationRule {
  pub fn new(mutation: &str) -> Self {
    Self {
      mutation: mutation.to_string(),
      targets: Vec::new(),
    }
  }

  pub fn name(mut self, template: &str) -> Self {
    self
      .targets
      .push(InvalidationTarget::Name(NameTemplate::new(template)));
    self
  }

  pub fn prefix(mut self, template: &str) -> Self {
    self
      .targets
      .push(InvalidationTarget::Prefix(NameTemplate::new(template)));
    self
  }

  pub fn exact(mut self, template: &str, params: Value) -> Self {
    self.targets.push(InvalidationTarget::Exact {
      name: NameTemplate::new(template),
      params,
    });
    self
  }
}

/// Static for the life of the process.
#[derive(Debug, Clone, Default)]
pub struct InvalidationGraph {
  rules: HashMap<String, Vec<InvalidationTarget>>,
}

impl InvalidationGraph {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add a rule; a second rule for the same mutation extends the first.
  pub fn with_rule(mut self, rule: InvalidationRule) -> Self {
    self
      .rules
      .entry(rule.mutation)
      .or_default()
      .extend(rule.targets);
    self
  }

  /// Patterns to invalidate after `mutation` succeeded.
  ///
  /// A target whose placeholders cannot be filled widens to the literal prefix
  /// in front of the first placeholder. Mutations without a rule invalidate
  /// nothing.
  pub fn invalidate_for(&self, mutation: &str, input: &Value, result: &Value) -> Vec<KeyPattern> {
    let Some(targets) = self.rules.get(mutation) else {
      debug!(mutation, "no invalidation rule");
      return Vec::new();
    };

    let sources = [result, input];
    let mut patterns: Vec<KeyPattern> = Vec::new();
    for target in targets {
      let pattern = match target {
        InvalidationTarget::Name(template) => match template.render(&sources) {
          Some(name) => Some(KeyPattern::Name(name)),
          None => widen(mutation, template),
        },
        InvalidationTarget::Prefix(template) => match template.render(&sources) {
          Some(name) => Some(KeyPattern::Prefix(name)),
          None => widen(mutation, template),
        },
        InvalidationTarget::Exact { name, params } => match name.render(&sources) {
          Some(rendered) => match key_from_value(&rendered, params.clone()) {
            Ok(key) => Some(KeyPattern::Exact(key)),
            Err(e) => {
              warn!(mutation, error = %e, "bad exact invalidation target, widening to name");
              Some(KeyPattern::Name(rendered))
            }
          },
          None => widen(mutation, name),
        },
      };

      if let Some(pattern) = pattern {
        if !patterns.contains(&pattern) {
          patterns.push(pattern);
        }
      }
    }
    patterns
  }
}

fn widen(mutation: &str, template: &NameTemplate) -> Option<KeyPattern> {
  let prefix = template.literal_prefix();
  if prefix.is_empty() {
    warn!(mutation, template = %template, "cannot resolve invalidation target");
    return None;
  }
  debug!(mutation, template = %template, prefix, "widening invalidation to prefix");
  Some(KeyPattern::Prefix(prefix))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::key::build_key;
  use serde_json::json;

  fn graph() -> InvalidationGraph {
    InvalidationGraph::new()
      .with_rule(
        InvalidationRule::new("update_goal")
          .name("goals")
          .name("goals/{id}")
          .name("goals/{id}/progress"),
      )
      .with_rule(InvalidationRule::new("craft").name("inventory").prefix("goals"))
      .with_rule(InvalidationRule::new("reset_page").exact("items", json!({ "skip": 0, "limit": 5 })))
  }

  #[test]
  fn test_update_goal_cascade() {
    let patterns = graph().invalidate_for("update_goal", &json!({}), &json!({ "id": "g1" }));
    assert_eq!(
      patterns,
      vec![
        KeyPattern::Name("goals".into()),
        KeyPattern::Name("goals/g1".into()),
        KeyPattern::Name("goals/g1/progress".into()),
      ]
    );
  }

  #[test]
  fn test_id_falls_back_to_input() {
    let patterns = graph().invalidate_for("update_goal", &json!({ "id": "g2" }), &Value::Null);
    assert!(patterns.contains(&KeyPattern::Name("goals/g2/progress".into())));
  }

  #[test]
  fn test_missing_id_widens_to_prefix() {
    let patterns = graph().invalidate_for("update_goal", &json!({}), &json!({}));
    assert_eq!(
      patterns,
      vec![
        KeyPattern::Name("goals".into()),
        KeyPattern::Prefix("goals".into()),
      ]
    );
  }

  #[test]
  fn test_prefix_and_exact_targets() {
    let g = graph();
    let patterns = g.invalidate_for("craft", &json!({}), &json!({}));
    assert_eq!(
      patterns,
      vec![
        KeyPattern::Name("inventory".into()),
        KeyPattern::Prefix("goals".into()),
      ]
    );

    let patterns = g.invalidate_for("reset_page", &json!({}), &json!({}));
    let expected = build_key("items", &json!({ "limit": 5, "skip": 0 })).unwrap();
    assert_eq!(patterns, vec![KeyPattern::Exact(expected)]);
  }

  #[test]
  fn test_unknown_mutation_invalidates_nothing() {
    assert!(graph()
      .invalidate_for("delete_everything", &json!({}), &json!({}))
      .is_empty());
  }
}
