//! Staleness and polling policies.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

/// Pure function from the last resolved value to the next poll interval.
pub type IntervalFn = Arc<dyn Fn(&Value) -> Option<Duration> + Send + Sync>;

/// How often a subscribed query is re-fetched in the background.
#[derive(Clone, Default)]
pub enum PollInterval {
  #[default]
  Never,
  Every(Duration),
  /// Re-evaluated after every successful fetch; `None` stops polling.
  Conditional(IntervalFn),
}

impl PollInterval {
  pub fn conditional<F>(f: F) -> Self
  where
    F: Fn(&Value) -> Option<Duration> + Send + Sync + 'static,
  {
    Self::Conditional(Arc::new(f))
  }

  /// Poll every `every` while `value[field]` is one of `active`.
  ///
  /// Any other status, including a missing field, is treated as terminal.
  pub fn while_field_in(field: &'static str, active: &'static [&'static str], every: Duration) -> Self {
    Self::conditional(move |value| {
      let status = value.get(field)?.as_str()?;
      active.contains(&status).then_some(every)
    })
  }

  /// Interval to wait before the next poll given the latest data.
  ///
  /// Conditional policies never poll before a value exists.
  pub fn next(&self, last: Option<&Value>) -> Option<Duration> {
    match self {
      Self::Never => None,
      Self::Every(every) => Some(*every),
      Self::Conditional(f) => last.and_then(|value| f(value)),
    }
  }
}

impl fmt::Debug for PollInterval {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Never => f.write_str("Never"),
      Self::Every(every) => f.debug_tuple("Every").field(every).finish(),
      Self::Conditional(_) => f.write_str("Conditional(..)"),
    }
  }
}

/// Freshness window and polling behaviour shared by every key of a query.
#[derive(Debug, Clone)]
pub struct StalenessPolicy {
  pub stale_after: Duration,
  pub poll_interval: PollInterval,
}

impl StalenessPolicy {
  pub fn new(stale_after: Duration) -> Self {
    Self {
      stale_after,
      poll_interval: PollInterval::Never,
    }
  }

  pub fn with_poll_interval(mut self, poll_interval: PollInterval) -> Self {
    self.poll_interval = poll_interval;
    self
  }
}

impl Default for StalenessPolicy {
  fn default() -> Self {
    Self::new(Duration::from_secs(60))
  }
}
