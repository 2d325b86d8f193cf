use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use super::catalog::RUNNING_GOAL_STATUSES;

/// Ids come back as strings or integers depending on the endpoint.
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Id {
    Text(String),
    Number(i64),
  }

  Ok(match Id::deserialize(deserializer)? {
    Id::Text(s) => s,
    Id::Number(n) => n.to_string(),
  })
}

/// Item in the catalog
#[derive(Debug, Clone, Deserialize)]
pub struct Item {
  #[serde(deserialize_with = "deserialize_id")]
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub quantity: i64,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GoalStatus {
  Pending,
  Active,
  Completed,
  Failed,
  Cancelled,
  #[serde(other)]
  Unknown,
}

impl GoalStatus {
  /// Terminal statuses never change again.
  pub fn is_terminal(&self) -> bool {
    matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
  }

  /// Whether progress for this status is still being polled.
  ///
  /// Mirrors the progress query's poll policy; anything not running, including
  /// statuses this client does not know, gets no further updates.
  pub fn is_running(&self) -> bool {
    RUNNING_GOAL_STATUSES.contains(&self.as_str())
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Active => "active",
      Self::Completed => "completed",
      Self::Failed => "failed",
      Self::Cancelled => "cancelled",
      Self::Unknown => "unknown",
    }
  }
}

impl fmt::Display for GoalStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for GoalStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "pending" => Ok(Self::Pending),
      "active" => Ok(Self::Active),
      "completed" => Ok(Self::Completed),
      "failed" => Ok(Self::Failed),
      "cancelled" | "canceled" => Ok(Self::Cancelled),
      other => Err(format!("unknown goal status `{}`", other)),
    }
  }
}

/// Crafting goal: produce `target_quantity` of an item
#[derive(Debug, Clone, Deserialize)]
pub struct Goal {
  #[serde(deserialize_with = "deserialize_id")]
  pub id: String,
  #[serde(default)]
  pub name: String,
  pub status: GoalStatus,
  #[serde(default)]
  pub item_id: Option<String>,
  #[serde(default)]
  pub target_quantity: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoalProgress {
  pub status: GoalStatus,
  /// Fraction done, 0.0 to 1.0
  #[serde(default)]
  pub progress: f64,
  #[serde(default)]
  pub message: Option<String>,
}

/// Body of `update_goal`; `id` selects the goal and is part of the path.
#[derive(Debug, Clone, Serialize)]
pub struct GoalUpdate {
  pub id: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<GoalStatus>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub target_quantity: Option<i64>,
}

/// Body of `adjust_inventory`
#[derive(Debug, Clone, Serialize)]
pub struct InventoryAdjustment {
  pub item_id: String,
  pub delta: i64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub reason: Option<String>,
}
