//! Typed inventory client on top of the query cache.

use std::sync::Arc;

use color_eyre::Result;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::client::QueryClient;
use crate::config::Config;
use crate::error::QueryError;
use crate::query::QueryHandle;
use crate::session::Session;

use super::catalog::{self, InventoryQuery};
use super::client::HttpTransport;
use super::types::{Goal, GoalProgress, GoalUpdate, InventoryAdjustment, Item};

/// Inventory service client with transparent caching.
///
/// Reads share the cache (and in-flight requests) with every other user of
/// the same [`QueryClient`]; writes invalidate what they affect.
#[derive(Clone, Debug)]
pub struct InventoryClient {
  client: QueryClient,
}

impl InventoryClient {
  /// Create a client for the configured server, signed in with the token from
  /// the environment if there is one.
  pub fn new(config: &Config) -> Result<Self> {
    let transport = HttpTransport::new(&config.server)?;
    let session = Session::new(Config::api_token());

    Ok(Self::from_query_client(QueryClient::new(
      catalog::registry(&config.cache),
      catalog::graph(),
      Arc::new(transport),
      session,
    )))
  }

  pub fn from_query_client(client: QueryClient) -> Self {
    Self { client }
  }

  pub fn query_client(&self) -> &QueryClient {
    &self.client
  }

  /// Subscribe to a query for live display.
  pub fn watch(&self, query: &InventoryQuery) -> Result<QueryHandle, QueryError> {
    self.client.query(&query.name(), &query.params())
  }

  /// Read through the cache; `None` when the query is disabled for its params.
  pub async fn fetch(&self, query: &InventoryQuery) -> Result<Option<Value>, QueryError> {
    self.client.fetch_query(&query.name(), &query.params()).await
  }

  async fn fetch_typed<T: DeserializeOwned>(&self, query: InventoryQuery) -> Result<T, QueryError> {
    let data = self.fetch(&query).await?.ok_or_else(|| {
      QueryError::invalid_params(query.name(), "query is disabled for these params")
    })?;
    decode(data)
  }

  pub async fn items(
    &self,
    skip: Option<u64>,
    limit: Option<u64>,
    search: Option<&str>,
  ) -> Result<Vec<Item>, QueryError> {
    self
      .fetch_typed(InventoryQuery::Items {
        skip,
        limit,
        search: search.map(String::from),
      })
      .await
  }

  pub async fn goal(&self, id: &str) -> Result<Goal, QueryError> {
    self
      .fetch_typed(InventoryQuery::Goal { id: id.to_string() })
      .await
  }

  pub async fn goal_progress(&self, goal_id: &str) -> Result<GoalProgress, QueryError> {
    self
      .fetch_typed(InventoryQuery::GoalProgress {
        goal_id: goal_id.to_string(),
      })
      .await
  }

  /// `None` until both an item and a positive quantity are given.
  pub async fn find_sources(
    &self,
    item_id: Option<&str>,
    required_quantity: i64,
  ) -> Result<Option<Value>, QueryError> {
    self
      .fetch(&InventoryQuery::Sources {
        item_id: item_id.map(String::from),
        required_quantity,
      })
      .await
  }

  pub async fn update_goal(&self, update: &GoalUpdate) -> Result<Goal, QueryError> {
    let data = self.client.mutate(catalog::UPDATE_GOAL, update).await?;
    decode(data)
  }

  /// Returns whatever the service reports back for the adjustment.
  pub async fn adjust_inventory(
    &self,
    adjustment: &InventoryAdjustment,
  ) -> Result<Value, QueryError> {
    self.client.mutate(catalog::ADJUST_INVENTORY, adjustment).await
  }
}

fn decode<T: DeserializeOwned>(data: Value) -> Result<T, QueryError> {
  serde_json::from_value(data)
    .map_err(|e| QueryError::NetworkFailure(format!("unexpected response shape: {}", e)))
}
