//! Client-side query cache for the inventory and crafting service.
//!
//! Reads go through a [`QueryClient`], which keys, de-duplicates, caches and
//! polls them; writes go through registered mutations, which invalidate the
//! reads they can make wrong.

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod inventory;
pub mod mutation;
pub mod query;
pub mod session;

#[cfg(test)]
mod testing;

pub use client::QueryClient;
pub use error::{ErrorKind, QueryError};
pub use mutation::{MutationHandle, MutationState};
pub use query::{ExecutedState, QueryHandle, QuerySnapshot};
pub use session::Session;
