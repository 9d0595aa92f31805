//! Normalized entity cache for the skein client.
//!
//! Server-fetched records (accounts, statuses, groups, relationships) are
//! stored once per `(type, id)` and referenced by id from any number of
//! named lists. Consumers get query handles that de-duplicate concurrent
//! requests, coalesce batched lookups, and apply optimistic transactions.
//!
//! ## Components
//!
//! - **Store**: per-type tables plus the list index behind one lock
//! - **Fetch coordinator**: one in-flight request per key, status tracking
//! - **Batch resolver**: missing ids collected into one request
//! - **Transactions**: synchronous multi-entity updates with optional snapshot
//! - **Hooks**: [`EntityCache`] and its query/action handles

pub mod api;
pub mod batch;
mod config;
mod entity;
mod error;
pub mod fetch;
mod hooks;
pub mod lists;
pub mod store;
pub mod subscription;
mod transaction;

pub use api::{Api, ApiFuture, ApiResponse, BatchFetcher, Fetcher, PageFetcher, batch_fetcher, fetcher, page_fetcher};
pub use config::{CacheConfig, StalenessPolicy};
pub use entity::{Entity, EntityPath, EntityType, ListPath, fallback, parse_filtered, parse_with_serde};
pub use error::{ApiError, EntityError};
pub use fetch::{FetchCoordinator, FetchStatus, RequestKey};
pub use hooks::{
    BatchOptions, BatchedEntities, Endpoints, EntitiesOptions, EntitiesQuery, EntitiesState, EntityActions,
    EntityCache, EntityLookup, EntityOptions, EntityQuery, EntityState,
};
pub use lists::{ListPosition, ListState};
pub use store::{EntityStore, StoreUpdate, StoreWriter};
pub use subscription::{SameRef, Subscription};
pub use transaction::{Snapshot, Transaction};
