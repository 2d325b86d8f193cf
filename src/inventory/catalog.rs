//! The queries and mutations the inventory service exposes, with their
//! caching and invalidation behaviour.

use serde_json::{json, Map, Value};

use crate::cache::{
  EnablementGuard, InvalidationGraph, InvalidationRule, Method, MutationDef, PollInterval,
  QueryDef, QueryRegistry, StalenessPolicy,
};
use crate::config::CacheSettings;

/// Goal statuses that keep progress polling alive.
pub const RUNNING_GOAL_STATUSES: &[&str] = &["active", "pending"];

pub const CREATE_ITEM: &str = "create_item";
pub const UPDATE_ITEM: &str = "update_item";
pub const DELETE_ITEM: &str = "delete_item";
pub const ADJUST_INVENTORY: &str = "adjust_inventory";
pub const CREATE_GOAL: &str = "create_goal";
pub const UPDATE_GOAL: &str = "update_goal";
pub const DELETE_GOAL: &str = "delete_goal";
pub const CRAFT: &str = "craft";

/// Query definitions and mutation endpoints.
pub fn registry(settings: &CacheSettings) -> QueryRegistry {
  QueryRegistry::new(StalenessPolicy::new(settings.stale_after()))
    .with_query(QueryDef::new("goals/{id}/progress").poll(PollInterval::while_field_in(
      "status",
      RUNNING_GOAL_STATUSES,
      settings.goal_poll(),
    )))
    .with_query(
      QueryDef::new("sources").enabled_when(
        EnablementGuard::requires(&["item_id"]).and(EnablementGuard::positive("required_quantity")),
      ),
    )
    .with_query(QueryDef::new("crafts/suggestions").enabled_when(EnablementGuard::requires(&["goal_id"])))
    .with_query(QueryDef::new("resource_gap").enabled_when(EnablementGuard::requires(&["goal_id"])))
    .with_mutation(MutationDef::new(CREATE_ITEM, Method::Post, "items"))
    .with_mutation(MutationDef::new(UPDATE_ITEM, Method::Patch, "items/{id}"))
    .with_mutation(MutationDef::new(DELETE_ITEM, Method::Delete, "items/{id}"))
    .with_mutation(MutationDef::new(ADJUST_INVENTORY, Method::Post, "inventory/adjustments"))
    .with_mutation(MutationDef::new(CREATE_GOAL, Method::Post, "goals"))
    .with_mutation(MutationDef::new(UPDATE_GOAL, Method::Patch, "goals/{id}"))
    .with_mutation(MutationDef::new(DELETE_GOAL, Method::Delete, "goals/{id}"))
    .with_mutation(MutationDef::new(CRAFT, Method::Post, "crafts"))
}

/// What each mutation makes stale.
pub fn graph() -> InvalidationGraph {
  InvalidationGraph::new()
    .with_rule(InvalidationRule::new(CREATE_ITEM).name("items").name("inventory"))
    .with_rule(
      InvalidationRule::new(UPDATE_ITEM)
        .name("items")
        .name("items/{id}")
        .name("inventory")
        .name("sources"),
    )
    .with_rule(
      InvalidationRule::new(DELETE_ITEM)
        .name("items")
        .name("items/{id}")
        .name("inventory")
        .name("sources"),
    )
    .with_rule(
      InvalidationRule::new(ADJUST_INVENTORY)
        .name("inventory")
        .name("sources")
        .prefix("goals")
        .name("resource_gap")
        .name("crafts/suggestions"),
    )
    .with_rule(InvalidationRule::new(CREATE_GOAL).name("goals"))
    .with_rule(
      InvalidationRule::new(UPDATE_GOAL)
        .name("goals")
        .name("goals/{id}")
        .name("goals/{id}/progress")
        .name("resource_gap"),
    )
    .with_rule(
      InvalidationRule::new(DELETE_GOAL)
        .name("goals")
        .name("goals/{id}")
        .name("goals/{id}/progress"),
    )
    .with_rule(
      InvalidationRule::new(CRAFT)
        .name("inventory")
        .prefix("goals")
        .name("resource_gap")
        .name("crafts/suggestions")
        .name("sources"),
    )
}

/// Typed descriptors for the service's read endpoints.
#[derive(Clone, Debug, PartialEq)]
pub enum InventoryQuery {
  /// Paged item list, optionally filtered by name
  Items {
    skip: Option<u64>,
    limit: Option<u64>,
    search: Option<String>,
  },
  Item { id: String },
  /// Current stock levels
  Inventory,
  Recipes,
  Recipe { id: String },
  Goals,
  Goal { id: String },
  GoalProgress { goal_id: String },
  /// Where to get `required_quantity` of an item
  Sources {
    item_id: Option<String>,
    required_quantity: i64,
  },
  CraftSuggestions { goal_id: Option<String> },
  ResourceGap { goal_id: Option<String> },
}

impl InventoryQuery {
  pub fn name(&self) -> String {
    match self {
      Self::Items { .. } => "items".to_string(),
      Self::Item { id } => format!("items/{}", id),
      Self::Inventory => "inventory".to_string(),
      Self::Recipes => "recipes".to_string(),
      Self::Recipe { id } => format!("recipes/{}", id),
      Self::Goals => "goals".to_string(),
      Self::Goal { id } => format!("goals/{}", id),
      Self::GoalProgress { goal_id } => format!("goals/{}/progress", goal_id),
      Self::Sources { .. } => "sources".to_string(),
      Self::CraftSuggestions { .. } => "crafts/suggestions".to_string(),
      Self::ResourceGap { .. } => "resource_gap".to_string(),
    }
  }

  /// Request params. Unset fields are left out.
  pub fn params(&self) -> Value {
    match self {
      Self::Items {
        skip,
        limit,
        search,
      } => {
        let mut params = Map::new();
        if let Some(skip) = skip {
          params.insert("skip".into(), json!(skip));
        }
        if let Some(limit) = limit {
          params.insert("limit".into(), json!(limit));
        }
        if let Some(search) = search.as_deref().filter(|s| !s.trim().is_empty()) {
          params.insert("search".into(), json!(search));
        }
        Value::Object(params)
      }
      Self::Sources {
        item_id,
        required_quantity,
      } => json!({ "item_id": item_id, "required_quantity": required_quantity }),
      Self::CraftSuggestions { goal_id } | Self::ResourceGap { goal_id } => {
        json!({ "goal_id": goal_id })
      }
      _ => json!({}),
    }
  }

  pub fn description(&self) -> String {
    match self {
      Self::Items { search, .. } => match search {
        Some(s) => format!("items matching {}", s),
        None => "items".to_string(),
      },
      Self::Item { id } => format!("item {}", id),
      Self::Inventory => "inventory".to_string(),
      Self::Recipes => "all recipes".to_string(),
      Self::Recipe { id } => format!("recipe {}", id),
      Self::Goals => "all goals".to_string(),
      Self::Goal { id } => format!("goal {}", id),
      Self::GoalProgress { goal_id } => format!("progress of goal {}", goal_id),
      Self::Sources {
        item_id,
        required_quantity,
      } => format!(
        "sources for {} x {}",
        required_quantity,
        item_id.as_deref().unwrap_or("?")
      ),
      Self::CraftSuggestions { goal_id } => {
        format!("craft suggestions for goal {}", goal_id.as_deref().unwrap_or("?"))
      }
      Self::ResourceGap { goal_id } => {
        format!("resource gap for goal {}", goal_id.as_deref().unwrap_or("?"))
      }
    }
  }
}
