//! Binding to the inventory and crafting service.

pub mod cached_client;
pub mod catalog;
pub mod client;
pub mod types;

pub use cached_client::InventoryClient;
pub use catalog::InventoryQuery;
pub use client::HttpTransport;
