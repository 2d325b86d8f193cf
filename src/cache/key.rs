//! Cache keys, key patterns and query name templates.
//!
//! A cache key is the canonical JSON encoding of `[name, params]` where params
//! have their map entries sorted at every depth and absent (null) fields
//! dropped. Two descriptors that are deep-equal produce byte-identical keys no
//! matter what order the caller built them in, and the encoding is structural so
//! distinct descriptors never collide.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Number, Value};

use crate::error::QueryError;

/// Canonical identity of a query descriptor.
///
/// Cheap to clone; equality, ordering and hashing use the canonical encoding.
#[derive(Clone)]
pub struct CacheKey(Arc<KeyInner>);

struct KeyInner {
  name: String,
  params: Value,
  canonical: String,
}

impl CacheKey {
  /// Query name, e.g. `goals/g1/progress`.
  pub fn name(&self) -> &str {
    &self.0.name
  }

  /// Canonicalized params (always an object).
  pub fn params(&self) -> &Value {
    &self.0.params
  }

  /// The canonical encoding used as the store key.
  pub fn as_str(&self) -> &str {
    &self.0.canonical
  }
}

impl PartialEq for CacheKey {
  fn eq(&self, other: &Self) -> bool {
    self.0.canonical == other.0.canonical
  }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.0.canonical.hash(state);
  }
}

impl PartialOrd for CacheKey {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for CacheKey {
  fn cmp(&self, other: &Self) -> Ordering {
    self.0.canonical.cmp(&other.0.canonical)
  }
}

impl fmt::Debug for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("CacheKey").field(&self.0.canonical).finish()
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0.canonical)
  }
}

/// Build the cache key for `name` with the given params.
///
/// `params` must serialize to a map (or to nothing at all). Values may be
/// primitives, arrays or nested maps; `None` fields are left out of the key.
pub fn build_key<P>(name: &str, params: &P) -> Result<CacheKey, QueryError>
where
  P: Serialize + ?Sized,
{
  let value =
    serde_json::to_value(params).map_err(|e| QueryError::invalid_params(name, e.to_string()))?;
  key_from_value(name, value)
}

/// Build a cache key from params that are already JSON.
pub fn key_from_value(name: &str, params: Value) -> Result<CacheKey, QueryError> {
  validate_name(name)?;

  let params = match params {
    Value::Null => Map::new(),
    Value::Object(map) => canonical_object(map),
    other => {
      return Err(QueryError::invalid_params(
        name,
        format!("params must be a map, got {}", json_type(&other)),
      ))
    }
  };
  let params = Value::Object(params);

  let canonical = serde_json::to_string(&Value::Array(vec![
    Value::String(name.to_string()),
    params.clone(),
  ]))
  .map_err(|e| QueryError::invalid_params(name, e.to_string()))?;

  Ok(CacheKey(Arc::new(KeyInner {
    name: name.to_string(),
    params,
    canonical,
  })))
}

/// Serialize params into a canonical JSON object without building a key.
///
/// Used by guards, which must look at params before any key exists.
pub fn params_to_value<P>(name: &str, params: &P) -> Result<Value, QueryError>
where
  P: Serialize + ?Sized,
{
  match serde_json::to_value(params) {
    Ok(Value::Null) => Ok(Value::Object(Map::new())),
    Ok(Value::Object(map)) => Ok(Value::Object(canonical_object(map))),
    Ok(other) => Err(QueryError::invalid_params(
      name,
      format!("params must be a map, got {}", json_type(&other)),
    )),
    Err(e) => Err(QueryError::invalid_params(name, e.to_string())),
  }
}

fn validate_name(name: &str) -> Result<(), QueryError> {
  if name.is_empty() {
    return Err(QueryError::invalid_params(name, "query name is empty"));
  }
  if name.split('/').any(str::is_empty) {
    return Err(QueryError::invalid_params(
      name,
      "query name has an empty segment",
    ));
  }
  if name.contains(['{', '}']) {
    return Err(QueryError::invalid_params(
      name,
      "query name contains an unrendered placeholder",
    ));
  }
  Ok(())
}

fn canonical_object(map: Map<String, Value>) -> Map<String, Value> {
  let mut entries: Vec<(String, Value)> = map.into_iter().filter(|(_, v)| !v.is_null()).collect();
  entries.sort_by(|a, b| a.0.cmp(&b.0));
  entries
    .into_iter()
    .map(|(k, v)| (k, canonicalize(v)))
    .collect()
}

fn canonicalize(value: Value) -> Value {
  match value {
    Value::Object(map) => Value::Object(canonical_object(map)),
    // Nulls inside arrays are positional and stay.
    Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
    Value::Number(n) => Value::Number(canonical_number(n)),
    other => other,
  }
}

/// `5.0` and `5` are the same parameter value.
fn canonical_number(n: Number) -> Number {
  match n.as_f64() {
    Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < (i64::MAX as f64) => {
      Number::from(f as i64)
    }
    _ => n,
  }
}

fn json_type(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "a boolean",
    Value::Number(_) => "a number",
    Value::String(_) => "a string",
    Value::Array(_) => "an array",
    Value::Object(_) => "a map",
  }
}

// ============================================================================
// Patterns
// ============================================================================

/// Selects cache entries for invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPattern {
  /// One specific descriptor.
  Exact(CacheKey),
  /// Every key with this query name, whatever its params.
  Name(String),
  /// This name and every name below it (`goals` covers `goals/g1/progress`).
  Prefix(String),
}

impl KeyPattern {
  pub fn matches(&self, key: &CacheKey) -> bool {
    match self {
      Self::Exact(exact) => exact == key,
      Self::Name(name) => key.name() == name,
      Self::Prefix(prefix) => {
        let name = key.name();
        name == prefix
          || (name.len() > prefix.len()
            && name.starts_with(prefix.as_str())
            && name.as_bytes()[prefix.len()] == b'/')
      }
    }
  }
}

impl fmt::Display for KeyPattern {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Exact(key) => write!(f, "={}", key),
      Self::Name(name) => write!(f, "{}", name),
      Self::Prefix(prefix) => write!(f, "{}/**", prefix),
    }
  }
}

// ============================================================================
// Name templates
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
  Literal(String),
  Var(String),
}

/// A query or mutation name with placeholders, e.g. `goals/{id}/progress`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameTemplate {
  raw: String,
  segments: Vec<Segment>,
}

impl NameTemplate {
  pub fn new(raw: &str) -> Self {
    let segments = raw
      .split('/')
      .filter(|s| !s.is_empty())
      .map(|s| match s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
        Some(var) => Segment::Var(var.to_string()),
        None => Segment::Literal(s.to_string()),
      })
      .collect();

    Self {
      raw: raw.to_string(),
      segments,
    }
  }

  pub fn as_str(&self) -> &str {
    &self.raw
  }

  pub fn is_literal(&self) -> bool {
    self
      .segments
      .iter()
      .all(|s| matches!(s, Segment::Literal(_)))
  }

  /// Whether a concrete name fits this template.
  pub fn matches(&self, name: &str) -> bool {
    let parts: Vec<&str> = name.split('/').collect();
    parts.len() == self.segments.len()
      && self.segments.iter().zip(parts).all(|(seg, part)| match seg {
        Segment::Literal(lit) => lit == part,
        Segment::Var(_) => !part.is_empty(),
      })
  }

  /// Number of literal segments; used to prefer specific templates.
  pub fn specificity(&self) -> usize {
    self
      .segments
      .iter()
      .filter(|s| matches!(s, Segment::Literal(_)))
      .count()
  }

  /// Fill placeholders from the first source object that has each variable.
  ///
  /// Returns `None` when a variable is missing or is not a scalar that can
  /// stand in for a single path segment.
  pub fn render(&self, sources: &[&Value]) -> Option<String> {
    let mut parts = Vec::with_capacity(self.segments.len());
    for seg in &self.segments {
      match seg {
        Segment::Literal(lit) => parts.push(lit.clone()),
        Segment::Var(var) => {
          let value = sources.iter().find_map(|src| segment_value(src.get(var)?))?;
          parts.push(value);
        }
      }
    }
    Some(parts.join("/"))
  }

  /// Literal segments before the first placeholder.
  pub fn literal_prefix(&self) -> String {
    self
      .segments
      .iter()
      .map_while(|s| match s {
        Segment::Literal(lit) => Some(lit.as_str()),
        Segment::Var(_) => None,
      })
      .collect::<Vec<_>>()
      .join("/")
  }
}

impl From<&str> for NameTemplate {
  fn from(raw: &str) -> Self {
    Self::new(raw)
  }
}

impl fmt::Display for NameTemplate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.raw)
  }
}

fn segment_value(value: &Value) -> Option<String> {
  let text = match value {
    Value::String(s) => s.clone(),
    Value::Number(n) => n.to_string(),
    Value::Bool(b) => b.to_string(),
    _ => return None,
  };
  if text.is_empty() || text.contains('/') {
    return None;
  }
  Some(text)
}
