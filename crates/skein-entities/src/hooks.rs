//! The cache's public surface.
//!
//! [`EntityCache`] is the constructible cache instance. Feature code asks it
//! for query handles ([`EntityQuery`], [`EntitiesQuery`], [`EntityLookup`]),
//! batched lookups, and mutating [`EntityActions`]. Query handles never
//! return errors from `fetch()`; failures land in the returned state so the
//! caller can render a retry or redirect to login.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::api::{Api, ApiResponse, BatchFetcher, Fetcher, PageFetcher};
use crate::batch::BatchResolver;
use crate::fetch::{FetchCoordinator, FetchResult, FetchStatus, RequestKey, SharedFetch};
use crate::lists::{ListPosition, ListState};
use crate::subscription::{self, Subscription};
use crate::transaction::{Snapshot, Transaction};
use crate::{CacheConfig, Entity, EntityError, EntityPath, EntityStore, EntityType, ListPath, parse_filtered};

struct CacheInner {
    store: Arc<EntityStore>,
    coordinator: Arc<FetchCoordinator>,
    batches: Arc<BatchResolver>,
    config: CacheConfig,
}

/// A cache instance. Cloning is cheap and shares the same store.
#[derive(Clone)]
pub struct EntityCache {
    inner: Arc<CacheInner>,
}

impl Default for EntityCache {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityCache {
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    pub fn with_config(config: CacheConfig) -> Self {
        let store = Arc::new(EntityStore::with_capacity(config.update_capacity));
        let coordinator = Arc::new(FetchCoordinator::new(config.staleness));
        let batches = Arc::new(BatchResolver::new(Arc::clone(&coordinator), config.batch_window));
        Self {
            inner: Arc::new(CacheInner {
                store,
                coordinator,
                batches,
                config,
            }),
        }
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.inner.store
    }

    pub fn coordinator(&self) -> &Arc<FetchCoordinator> {
        &self.inner.coordinator
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Fetch status of `key`.
    pub fn status(&self, key: &RequestKey) -> FetchStatus {
        self.inner.coordinator.status(key)
    }

    /// Mark `key` stale. Nothing is fetched until a consumer next asks.
    pub fn invalidate(&self, key: &RequestKey) {
        self.inner.coordinator.invalidate(key);
    }

    /// Mark every entity and list of `entity_type` stale.
    pub fn invalidate_type(&self, entity_type: EntityType) {
        self.inner.coordinator.invalidate_where(|key| match key {
            RequestKey::Entity(path) => path.entity_type == entity_type,
            RequestKey::List(path) | RequestKey::Page(path) | RequestKey::Batch(path) => {
                path.entity_type == entity_type
            }
            RequestKey::Lookup { entity_type: t, .. } => *t == entity_type,
        });
    }

    /// Write entities into the store, optionally also into a list.
    pub fn import<T: Entity>(&self, entities: Vec<T>, list: Option<(&ListPath, ListPosition)>) -> Vec<String> {
        self.inner.store.batch(|w| {
            let ids = w.put_all(entities);
            if let Some((path, position)) = list {
                w.insert_list(path, ids.clone(), position);
            }
            ids
        })
    }

    /// Remove entities, and their ids from lists unless `preserve_lists`.
    pub fn delete(&self, entity_type: EntityType, ids: &[String], preserve_lists: bool) {
        self.inner.store.remove(entity_type, ids, preserve_lists);
    }

    /// Apply a transaction synchronously.
    pub fn transaction(&self, transaction: Transaction) {
        self.inner.store.transaction(transaction);
    }

    /// Apply a transaction and keep a snapshot to revert it with.
    pub fn optimistic(&self, transaction: Transaction) -> Snapshot {
        self.inner.store.optimistic(transaction)
    }

    /// Undo an optimistic transaction.
    pub fn revert(&self, snapshot: Snapshot) {
        snapshot.revert(&self.inner.store);
    }

    /// Query handle for one entity.
    pub fn entity<T: Entity>(&self, id: impl Into<String>, fetcher: Fetcher, options: EntityOptions) -> EntityQuery<T> {
        EntityQuery {
            cache: self.clone(),
            path: EntityPath::of::<T>(id),
            fetcher,
            options,
            mounted: AtomicBool::new(false),
            _marker: PhantomData,
        }
    }

    /// Query handle for a paginated list.
    pub fn entities<T: Entity>(&self, path: ListPath, fetcher: Fetcher, options: EntitiesOptions) -> EntitiesQuery<T> {
        EntitiesQuery {
            cache: self.clone(),
            path,
            fetcher,
            pages: None,
            options,
            _marker: PhantomData,
        }
    }

    /// Query handle that finds an entity already in the store before
    /// falling back to the network.
    ///
    /// `key` names the lookup for de-duplication (e.g. an account handle).
    pub fn lookup<T, P>(&self, key: impl Into<String>, predicate: P, fetcher: Fetcher, options: EntityOptions) -> EntityLookup<T>
    where
        T: Entity,
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        EntityLookup {
            cache: self.clone(),
            key: key.into(),
            predicate: Arc::new(predicate),
            fetcher,
            options,
            mounted: AtomicBool::new(false),
        }
    }

    /// Resolve `ids`, fetching the ones not in the store in one request.
    ///
    /// Ids the server leaves out of its response are absent from the map.
    pub async fn batched<T: Entity>(
        &self,
        path: &ListPath,
        ids: &[String],
        fetch_many: BatchFetcher,
        options: BatchOptions,
    ) -> BatchedEntities<T> {
        let store = &self.inner.store;
        if options.enabled {
            let missing = store.missing_ids(T::ENTITY_TYPE, ids);
            if !missing.is_empty() {
                let store = Arc::clone(store);
                let list_path = path.clone();
                let batch = self.inner.batches.enqueue(path, missing, fetch_many, move |response| {
                    let entities = parse_filtered::<T>(response.data)?;
                    Ok(store.batch(|w| {
                        let ids = w.put_all(entities);
                        w.insert_list(&list_path, ids.clone(), ListPosition::End);
                        ids
                    }))
                });
                if let Err(e) = batch.await {
                    debug!(path = %path, error = %e, "batched lookup failed");
                }
            }
        }

        BatchedEntities {
            entity_map: store.get_many::<T>(ids),
            status: self.status(&RequestKey::Batch(path.clone())),
        }
    }

    /// Create/update/delete actions for `T`.
    pub fn actions<T: Entity>(&self, api: Arc<dyn Api>, endpoints: Endpoints) -> EntityActions<T> {
        EntityActions {
            cache: self.clone(),
            api,
            endpoints,
            list: None,
            submitting: AtomicUsize::new(0),
            _marker: PhantomData,
        }
    }

    /// Watch one entity for changes.
    pub fn subscribe_entity<T: Entity>(&self, id: impl Into<String>) -> Subscription<Option<Arc<T>>> {
        subscription::entity::<T>(Arc::clone(&self.inner.store), id)
    }

    /// Watch a list for changes.
    pub fn subscribe_list<T: Entity>(&self, path: ListPath) -> Subscription<Vec<Arc<T>>> {
        subscription::list::<T>(Arc::clone(&self.inner.store), path)
    }

    /// Watch a set of ids for changes.
    pub fn subscribe_ids<T: Entity>(&self, ids: Vec<String>) -> Subscription<HashMap<String, Arc<T>>> {
        subscription::ids::<T>(Arc::clone(&self.inner.store), ids)
    }
}

/// Write a single-entity response to the store.
fn apply_entity<T: Entity>(store: Arc<EntityStore>) -> impl FnOnce(ApiResponse) -> FetchResult + Send + 'static {
    move |response| {
        let entity = T::parse(response.data)?;
        Ok(store.put(vec![entity]))
    }
}

/// Write a list page to the store and the list at `path`.
fn apply_page<T: Entity>(
    store: Arc<EntityStore>,
    path: ListPath,
    position: ListPosition,
) -> impl FnOnce(ApiResponse) -> FetchResult + Send + 'static {
    move |response| {
        let entities = parse_filtered::<T>(response.data)?;
        Ok(store.batch(|w| {
            let ids = w.put_all(entities);
            w.insert_list(&path, ids.clone(), position);

            let previous = w.list_state(&path);
            let state = match position {
                ListPosition::Replace => ListState {
                    next: response.next,
                    prev: response.prev,
                    total_count: response.total_count,
                },
                ListPosition::End => ListState {
                    next: response.next,
                    prev: previous.prev,
                    total_count: response.total_count.or(previous.total_count),
                },
                ListPosition::Start => ListState {
                    next: previous.next,
                    prev: response.prev,
                    total_count: response.total_count.or(previous.total_count),
                },
            };
            w.set_list_state(&path, state);
            ids
        }))
    }
}

/// Options for single-entity queries.
#[derive(Debug, Clone, Copy)]
pub struct EntityOptions {
    /// When false, `fetch()` only reads the store.
    pub enabled: bool,
    /// Fetch on the first `fetch()` even if the entity is cached.
    pub refetch: bool,
}

impl Default for EntityOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            refetch: false,
        }
    }
}

impl EntityOptions {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn refetch(mut self, refetch: bool) -> Self {
        self.refetch = refetch;
        self
    }
}

/// What a single-entity query currently knows.
#[derive(Debug, Clone)]
pub struct EntityState<T> {
    pub entity: Option<Arc<T>>,
    pub status: FetchStatus,
}

impl<T> EntityState<T> {
    pub fn is_loading(&self) -> bool {
        self.status.is_loading
    }

    pub fn is_fetched(&self) -> bool {
        self.status.is_fetched
    }

    pub fn error(&self) -> Option<&EntityError> {
        self.status.error.as_ref()
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status.is_unauthorized()
    }

    pub fn is_forbidden(&self) -> bool {
        self.status.is_forbidden()
    }
}

/// Handle for one entity.
pub struct EntityQuery<T> {
    cache: EntityCache,
    path: EntityPath,
    fetcher: Fetcher,
    options: EntityOptions,
    mounted: AtomicBool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> EntityQuery<T> {
    pub fn path(&self) -> &EntityPath {
        &self.path
    }

    pub fn key(&self) -> RequestKey {
        RequestKey::Entity(self.path.clone())
    }

    /// Read the store without fetching.
    pub fn state(&self) -> EntityState<T> {
        EntityState {
            entity: self.cache.store().get::<T>(&self.path.id),
            status: self.cache.status(&self.key()),
        }
    }

    /// Fetch if the entity is missing, invalidated, or `refetch` was asked
    /// for on first use, joining any request already in flight.
    pub async fn fetch(&self) -> EntityState<T> {
        if !self.options.enabled {
            return self.state();
        }

        let first = !self.mounted.swap(true, Ordering::SeqCst);
        let key = self.key();
        let coordinator = self.cache.coordinator();
        let needed = coordinator.is_in_flight(&key)
            || !self.cache.store().contains(T::ENTITY_TYPE, &self.path.id)
            || coordinator.status(&key).is_invalid
            || (first && self.options.refetch);

        if needed {
            let _ = self.request(false).await;
        }
        self.state()
    }

    /// Issue a new request even if one is in flight.
    pub async fn refetch(&self) -> EntityState<T> {
        let _ = self.request(true).await;
        self.state()
    }

    pub fn invalidate(&self) {
        self.cache.invalidate(&self.key());
    }

    pub fn subscribe(&self) -> Subscription<Option<Arc<T>>> {
        self.cache.subscribe_entity::<T>(self.path.id.clone())
    }

    fn request(&self, force: bool) -> SharedFetch {
        let fetcher = Arc::clone(&self.fetcher);
        let apply = apply_entity::<T>(Arc::clone(self.cache.store()));
        let coordinator = self.cache.coordinator();
        if force {
            coordinator.restart(self.key(), move || fetcher(), apply)
        } else {
            coordinator.join_or_start(self.key(), move || fetcher(), apply)
        }
    }
}

/// Options for list queries.
#[derive(Debug, Clone, Copy)]
pub struct EntitiesOptions {
    /// When false, `fetch()` only reads the store.
    pub enabled: bool,
    /// A fetched list older than this is refetched on the next `fetch()`.
    pub stale_time: Duration,
}

impl Default for EntitiesOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            stale_time: Duration::from_secs(60),
        }
    }
}

impl EntitiesOptions {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }
}

/// What a list query currently knows.
#[derive(Debug, Clone)]
pub struct EntitiesState<T> {
    pub entities: Vec<Arc<T>>,
    pub list: ListState,
    pub status: FetchStatus,
}

impl<T> EntitiesState<T> {
    pub fn is_loading(&self) -> bool {
        self.status.is_loading
    }

    pub fn is_fetched(&self) -> bool {
        self.status.is_fetched
    }

    pub fn error(&self) -> Option<&EntityError> {
        self.status.error.as_ref()
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status.is_unauthorized()
    }

    pub fn has_next_page(&self) -> bool {
        self.list.next.is_some()
    }

    pub fn has_previous_page(&self) -> bool {
        self.list.prev.is_some()
    }
}

/// Handle for a paginated list.
pub struct EntitiesQuery<T> {
    cache: EntityCache,
    path: ListPath,
    fetcher: Fetcher,
    pages: Option<PageFetcher>,
    options: EntitiesOptions,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> EntitiesQuery<T> {
    /// Enable `fetch_next_page` / `fetch_previous_page` with a fetcher for
    /// pagination links.
    pub fn with_pages(mut self, pages: PageFetcher) -> Self {
        self.pages = Some(pages);
        self
    }

    pub fn path(&self) -> &ListPath {
        &self.path
    }

    pub fn key(&self) -> RequestKey {
        RequestKey::List(self.path.clone())
    }

    /// Key for next and previous page loads. Kept apart from [`Self::key`]
    /// so a page load never marks the first page fresh.
    pub fn page_key(&self) -> RequestKey {
        RequestKey::Page(self.path.clone())
    }

    /// The list's status, plus loading and error from page loads.
    pub fn state(&self) -> EntitiesState<T> {
        let store = self.cache.store();
        let mut status = self.cache.status(&self.key());
        let page = self.cache.status(&self.page_key());
        status.is_loading |= page.is_loading;
        if status.error.is_none() {
            status.error = page.error;
        }
        EntitiesState {
            entities: store.list::<T>(&self.path),
            list: store.list_state(&self.path),
            status,
        }
    }

    /// Fetch the first page if the list was never fetched, was
    /// invalidated, or has gone stale. The response replaces the list.
    pub async fn fetch(&self) -> EntitiesState<T> {
        if !self.options.enabled {
            return self.state();
        }

        let key = self.key();
        let coordinator = self.cache.coordinator();
        let status = coordinator.status(&key);
        let stale = status.last_fetched_at.is_none_or(|at| {
            (Utc::now() - at).to_std().is_ok_and(|age| age >= self.options.stale_time)
        });
        if coordinator.is_in_flight(&key) || !status.is_fetched || status.is_invalid || stale {
            let fetcher = Arc::clone(&self.fetcher);
            let apply = apply_page::<T>(Arc::clone(self.cache.store()), self.path.clone(), ListPosition::Replace);
            let _ = coordinator.join_or_start(key, move || fetcher(), apply).await;
        }
        self.state()
    }

    /// Refetch the first page now.
    pub async fn refetch(&self) -> EntitiesState<T> {
        let fetcher = Arc::clone(&self.fetcher);
        let apply = apply_page::<T>(Arc::clone(self.cache.store()), self.path.clone(), ListPosition::Replace);
        let _ = self.cache.coordinator().restart(self.key(), move || fetcher(), apply).await;
        self.state()
    }

    /// Append the next page. Does nothing without a `next` link.
    pub async fn fetch_next_page(&self) -> EntitiesState<T> {
        let next = self.cache.store().list_state(&self.path).next;
        self.fetch_page(next, ListPosition::End).await
    }

    /// Prepend the previous page. Does nothing without a `prev` link.
    pub async fn fetch_previous_page(&self) -> EntitiesState<T> {
        let prev = self.cache.store().list_state(&self.path).prev;
        self.fetch_page(prev, ListPosition::Start).await
    }

    /// Skipped while the first page or another page is loading.
    async fn fetch_page(&self, link: Option<String>, position: ListPosition) -> EntitiesState<T> {
        let (Some(link), Some(pages)) = (link, self.pages.as_ref()) else {
            return self.state();
        };
        let coordinator = self.cache.coordinator();
        if coordinator.is_in_flight(&self.key()) || coordinator.is_in_flight(&self.page_key()) {
            trace!(path = %self.path, "list is loading, skipping page");
            return self.state();
        }
        let pages = Arc::clone(pages);
        let apply = apply_page::<T>(Arc::clone(self.cache.store()), self.path.clone(), position);
        let _ = coordinator.join_or_start(self.page_key(), move || pages(link), apply).await;
        self.state()
    }

    pub fn invalidate(&self) {
        self.cache.invalidate(&self.key());
    }

    pub fn subscribe(&self) -> Subscription<Vec<Arc<T>>> {
        self.cache.subscribe_list::<T>(self.path.clone())
    }
}

/// Handle that resolves an entity by predicate.
pub struct EntityLookup<T> {
    cache: EntityCache,
    key: String,
    predicate: Arc<dyn Fn(&T) -> bool + Send + Sync>,
    fetcher: Fetcher,
    options: EntityOptions,
    mounted: AtomicBool,
}

impl<T: Entity> EntityLookup<T> {
    pub fn key(&self) -> RequestKey {
        RequestKey::Lookup {
            entity_type: T::ENTITY_TYPE,
            key: self.key.clone(),
        }
    }

    pub fn state(&self) -> EntityState<T> {
        let predicate = Arc::clone(&self.predicate);
        EntityState {
            entity: self.cache.store().find::<T>(move |e| predicate(e)),
            status: self.cache.status(&self.key()),
        }
    }

    /// Use a cached match if there is one; otherwise fetch.
    pub async fn fetch(&self) -> EntityState<T> {
        if !self.options.enabled {
            return self.state();
        }

        let first = !self.mounted.swap(true, Ordering::SeqCst);
        let key = self.key();
        let coordinator = self.cache.coordinator();
        let cached = self.state().entity.is_some();
        let needed = coordinator.is_in_flight(&key)
            || !cached
            || coordinator.status(&key).is_invalid
            || (first && self.options.refetch);

        if needed {
            let _ = self.request(false).await;
        } else {
            debug!(key = %key, "lookup served from store");
        }
        self.state()
    }

    pub async fn refetch(&self) -> EntityState<T> {
        let _ = self.request(true).await;
        self.state()
    }

    pub fn invalidate(&self) {
        self.cache.invalidate(&self.key());
    }

    fn request(&self, force: bool) -> SharedFetch {
        let fetcher = Arc::clone(&self.fetcher);
        let apply = apply_entity::<T>(Arc::clone(self.cache.store()));
        let coordinator = self.cache.coordinator();
        if force {
            coordinator.restart(self.key(), move || fetcher(), apply)
        } else {
            coordinator.join_or_start(self.key(), move || fetcher(), apply)
        }
    }
}

/// Options for batched lookups.
#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub enabled: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Result of a batched lookup.
#[derive(Debug, Clone)]
pub struct BatchedEntities<T> {
    /// Requested ids that resolved, keyed by id.
    pub entity_map: HashMap<String, Arc<T>>,
    pub status: FetchStatus,
}

impl<T> BatchedEntities<T> {
    pub fn get(&self, id: &str) -> Option<&Arc<T>> {
        self.entity_map.get(id)
    }

    pub fn is_loading(&self) -> bool {
        self.status.is_loading
    }

    pub fn error(&self) -> Option<&EntityError> {
        self.status.error.as_ref()
    }
}

/// Endpoints used by [`EntityActions`]. `:id` in a path is replaced by the
/// entity id.
#[derive(Debug, Clone, Default)]
pub struct Endpoints {
    pub post: Option<String>,
    pub patch: Option<String>,
    pub delete: Option<String>,
}

impl Endpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(mut self, path: impl Into<String>) -> Self {
        self.post = Some(path.into());
        self
    }

    pub fn patch(mut self, path: impl Into<String>) -> Self {
        self.patch = Some(path.into());
        self
    }

    pub fn delete(mut self, path: impl Into<String>) -> Self {
        self.delete = Some(path.into());
        self
    }
}

fn expand(template: &str, id: &str) -> String {
    template.replace(":id", id)
}

/// Decrements the submitting counter when an action finishes.
struct Submitting<'a>(&'a AtomicUsize);

impl<'a> Submitting<'a> {
    fn start(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for Submitting<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Mutating actions for one entity type.
pub struct EntityActions<T> {
    cache: EntityCache,
    api: Arc<dyn Api>,
    endpoints: Endpoints,
    list: Option<ListPath>,
    submitting: AtomicUsize,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> EntityActions<T> {
    /// Prepend created entities to `path`.
    pub fn with_list(mut self, path: ListPath) -> Self {
        self.list = Some(path);
        self
    }

    /// Whether an action is in progress.
    pub fn is_submitting(&self) -> bool {
        self.submitting.load(Ordering::SeqCst) > 0
    }

    /// POST `data` and import the created entity.
    pub async fn create(&self, data: Value) -> Result<Arc<T>, EntityError> {
        let endpoint = self.endpoint(self.endpoints.post.as_deref(), "create")?;
        let _submitting = Submitting::start(&self.submitting);

        let response = self.api.post(&endpoint, Some(data)).await?;
        let entity = T::parse(response.data)?;
        let list = self.list.as_ref().map(|p| (p, ListPosition::Start));
        let id = entity.id().to_string();
        self.cache.import(vec![entity], list);
        self.cached(&id)
    }

    /// PATCH `data` onto entity `id` and import the result.
    pub async fn update(&self, id: &str, data: Value) -> Result<Arc<T>, EntityError> {
        let template = self.endpoint(self.endpoints.patch.as_deref(), "update")?;
        let _submitting = Submitting::start(&self.submitting);

        let response = self.api.patch(&expand(&template, id), Some(data)).await?;
        let entity = T::parse(response.data)?;
        let id = entity.id().to_string();
        self.cache.import(vec![entity], None);
        self.cached(&id)
    }

    /// DELETE entity `id`.
    ///
    /// The entity disappears from the store immediately but stays in its
    /// lists until the server confirms. On failure it is put back.
    pub async fn delete(&self, id: &str) -> Result<(), EntityError> {
        let template = self.endpoint(self.endpoints.delete.as_deref(), "delete")?;
        let _submitting = Submitting::start(&self.submitting);

        let store = self.cache.store();
        let ids = [id.to_string()];
        let previous = store.batch(|w| {
            let previous = w.get_raw(T::ENTITY_TYPE, id);
            w.remove(T::ENTITY_TYPE, &ids, true);
            previous
        });

        match self.api.delete(&expand(&template, id)).await {
            Ok(_) => {
                store.batch(|w| w.remove_from_lists(T::ENTITY_TYPE, &ids));
                Ok(())
            }
            Err(e) => {
                warn!(entity_type = %T::ENTITY_TYPE, id = %id, error = %e, "delete failed, restoring entity");
                if let Some(previous) = previous {
                    store.batch(|w| w.put_raw(T::ENTITY_TYPE, id.to_string(), previous));
                }
                Err(e.into())
            }
        }
    }

    fn endpoint(&self, endpoint: Option<&str>, action: &'static str) -> Result<String, EntityError> {
        endpoint.map(str::to_string).ok_or(EntityError::MissingEndpoint {
            entity_type: T::ENTITY_TYPE,
            action,
        })
    }

    fn cached(&self, id: &str) -> Result<Arc<T>, EntityError> {
        self.cache.store().get::<T>(id).ok_or_else(|| EntityError::Validation {
            entity_type: T::ENTITY_TYPE,
            message: format!("entity {} missing after import", id),
        })
    }
}
