//! Query cache and invalidation layer.
//!
//! This module provides the in-memory machinery behind every read the client
//! makes:
//! - Canonical cache keys built from a query name and its params
//! - A single store of entries with explicit fetch/resolve/reject/invalidate
//!   transitions and ordered change listeners
//! - Leader/follower de-duplication so one key has at most one call in flight
//! - Per-query staleness and (possibly data-dependent) polling
//! - Declarative mutation → invalidation rules
//! - Guards that keep queries with incomplete params from running at all

mod guard;
mod invalidation;
mod key;
mod layer;
mod policy;
mod registry;
mod scheduler;
mod storage;
mod traits;

pub use guard::EnablementGuard;
pub use invalidation::{InvalidationGraph, InvalidationRule, InvalidationTarget};
pub use key::{build_key, key_from_value, params_to_value, CacheKey, KeyPattern, NameTemplate};
pub use layer::{FetchMode, Fetcher};
pub use policy::{IntervalFn, PollInterval, StalenessPolicy};
pub use registry::{Method, MutationDef, QueryDef, QueryRegistry};
pub use scheduler::PollingScheduler;
pub use storage::{
  CacheEntry, CacheStore, EntryState, FetchRole, FetchTicket, InvalidationReport, Listener,
  SharedFetch, StaleWriteConflict, Subscription,
};
pub use traits::{FetchResult, MutationRequest, Transport};
