//! Normalized entity store.
//!
//! One table per [`EntityType`], each mapping id to the latest known value,
//! plus the [`ListIndex`]. Both live behind a single lock so a write that
//! touches several entities, types and lists becomes visible all at once.
//! Each write publishes one [`StoreUpdate`] describing what it touched.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::trace;

use crate::lists::{ListIndex, ListPosition, ListState};
use crate::{Entity, EntityType, ListPath};

/// Type-erased stored value. Always an `Arc<T>` for the table's `T`.
pub(crate) type ErasedEntity = Arc<dyn Any + Send + Sync>;

/// Broadcast channel capacity for store updates.
pub const DEFAULT_UPDATE_CAPACITY: usize = 4096;

/// Keys touched by one atomic write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreUpdate {
    /// Entities written or removed.
    pub entities: Vec<(EntityType, String)>,
    /// Lists whose ids or state changed.
    pub lists: Vec<ListPath>,
}

impl StoreUpdate {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.lists.is_empty()
    }

    pub fn touches_entity(&self, entity_type: EntityType, id: &str) -> bool {
        self.entities
            .iter()
            .any(|(t, i)| *t == entity_type && i == id)
    }

    pub fn touches_type(&self, entity_type: EntityType) -> bool {
        self.entities.iter().any(|(t, _)| *t == entity_type)
    }

    pub fn touches_list(&self, path: &ListPath) -> bool {
        self.lists.contains(path)
    }
}

#[derive(Default)]
struct StoreState {
    tables: HashMap<EntityType, HashMap<String, ErasedEntity>>,
    lists: ListIndex,
}

/// Mutable view of the store handed to [`EntityStore::batch`].
///
/// Records every key it touches so the batch can publish one update.
pub struct StoreWriter<'a> {
    state: &'a mut StoreState,
    update: StoreUpdate,
}

impl StoreWriter<'_> {
    /// Current value of `id` in `T`'s table.
    pub fn get<T: Entity>(&self, id: &str) -> Option<Arc<T>> {
        self.get_raw(T::ENTITY_TYPE, id)
            .and_then(|e| e.downcast::<T>().ok())
    }

    pub(crate) fn get_raw(&self, entity_type: EntityType, id: &str) -> Option<ErasedEntity> {
        self.state
            .tables
            .get(&entity_type)
            .and_then(|table| table.get(id))
            .cloned()
    }

    /// Upsert one entity. Last write wins.
    pub fn put<T: Entity>(&mut self, entity: T) -> Arc<T> {
        let entity = Arc::new(entity);
        let id = entity.id().to_string();
        self.put_raw(T::ENTITY_TYPE, id, Arc::clone(&entity) as ErasedEntity);
        entity
    }

    /// Upsert many entities, returning their ids in input order.
    pub fn put_all<T: Entity>(&mut self, entities: Vec<T>) -> Vec<String> {
        entities
            .into_iter()
            .map(|e| self.put(e).id().to_string())
            .collect()
    }

    pub(crate) fn put_raw(&mut self, entity_type: EntityType, id: String, entity: ErasedEntity) {
        trace!(entity_type = %entity_type, id = %id, "store: entity upserted");
        self.state
            .tables
            .entry(entity_type)
            .or_default()
            .insert(id.clone(), entity);
        self.touch_entity(entity_type, id);
    }

    /// Remove entities. Unless `preserve_lists` is set, their ids are also
    /// stripped from every list of that type.
    pub fn remove(&mut self, entity_type: EntityType, ids: &[String], preserve_lists: bool) {
        if let Some(table) = self.state.tables.get_mut(&entity_type) {
            for id in ids {
                if table.remove(id).is_some() {
                    trace!(entity_type = %entity_type, id = %id, "store: entity removed");
                    self.update.entities.push((entity_type, id.clone()));
                }
            }
        }

        if !preserve_lists {
            let changed = self.state.lists.remove_ids(entity_type, ids);
            for path in changed {
                self.touch_list(path);
            }
        }
    }

    /// Ids currently in `path`.
    pub fn list_ids(&self, path: &ListPath) -> Vec<String> {
        self.state.lists.ids(path)
    }

    /// Insert ids into `path` at `position`.
    pub fn insert_list(&mut self, path: &ListPath, ids: Vec<String>, position: ListPosition) {
        self.state.lists.insert_ids(path, ids, position);
        self.touch_list(path.clone());
    }

    pub fn list_state(&self, path: &ListPath) -> ListState {
        self.state.lists.state(path)
    }

    pub fn set_list_state(&mut self, path: &ListPath, state: ListState) {
        self.state.lists.set_state(path, state);
        self.touch_list(path.clone());
    }

    /// Strip ids from every list of `entity_type` without touching the entities.
    pub fn remove_from_lists(&mut self, entity_type: EntityType, ids: &[String]) {
        let changed = self.state.lists.remove_ids(entity_type, ids);
        for path in changed {
            self.touch_list(path);
        }
    }

    fn touch_entity(&mut self, entity_type: EntityType, id: String) {
        if !self.update.touches_entity(entity_type, &id) {
            self.update.entities.push((entity_type, id));
        }
    }

    fn touch_list(&mut self, path: ListPath) {
        if !self.update.lists.contains(&path) {
            self.update.lists.push(path);
        }
    }
}

/// Process-wide table of entities, constructed per cache instance.
pub struct EntityStore {
    state: RwLock<StoreState>,
    updates_tx: broadcast::Sender<StoreUpdate>,
}

impl EntityStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_UPDATE_CAPACITY)
    }

    /// Create an empty store whose update channel buffers `capacity` batches.
    pub fn with_capacity(capacity: usize) -> Self {
        let (updates_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            state: RwLock::new(StoreState::default()),
            updates_tx,
        }
    }

    /// Subscribe to store updates.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreUpdate> {
        self.updates_tx.subscribe()
    }

    /// Apply a batch of writes atomically.
    ///
    /// The closure runs under the write lock; readers see either none or all
    /// of its effects. One update is published if anything was touched.
    pub fn batch<R>(&self, f: impl FnOnce(&mut StoreWriter<'_>) -> R) -> R {
        let mut state = self.state.write();
        let mut writer = StoreWriter {
            state: &mut *state,
            update: StoreUpdate::default(),
        };
        let result = f(&mut writer);
        let update = writer.update;

        // Published under the lock so subscribers see updates in write order.
        if !update.is_empty() && self.updates_tx.send(update).is_err() {
            trace!("no subscribers for store update");
        }
        result
    }

    /// Get an entity by id.
    pub fn get<T: Entity>(&self, id: &str) -> Option<Arc<T>> {
        self.get_raw(T::ENTITY_TYPE, id)
            .and_then(|e| e.downcast::<T>().ok())
    }

    pub(crate) fn get_raw(&self, entity_type: EntityType, id: &str) -> Option<ErasedEntity> {
        self.state
            .read()
            .tables
            .get(&entity_type)
            .and_then(|table| table.get(id))
            .cloned()
    }

    pub fn contains(&self, entity_type: EntityType, id: &str) -> bool {
        self.state
            .read()
            .tables
            .get(&entity_type)
            .is_some_and(|table| table.contains_key(id))
    }

    /// Look up several ids at once. Absent ids are simply missing from the map.
    pub fn get_many<T: Entity>(&self, ids: &[String]) -> HashMap<String, Arc<T>> {
        let state = self.state.read();
        let Some(table) = state.tables.get(&T::ENTITY_TYPE) else {
            return HashMap::new();
        };
        ids.iter()
            .filter_map(|id| {
                let entity = table.get(id)?.clone().downcast::<T>().ok()?;
                Some((id.clone(), entity))
            })
            .collect()
    }

    /// Ids in `ids` that are not in `entity_type`'s table, in input order.
    pub fn missing_ids(&self, entity_type: EntityType, ids: &[String]) -> Vec<String> {
        let state = self.state.read();
        let table = state.tables.get(&entity_type);
        let missing = ids
            .iter()
            .filter(|id| !table.is_some_and(|t| t.contains_key(id.as_str())))
            .cloned();
        crate::lists::dedup_ids(missing)
    }

    /// Find the first cached entity matching `predicate`.
    pub fn find<T: Entity>(&self, predicate: impl Fn(&T) -> bool) -> Option<Arc<T>> {
        let state = self.state.read();
        state
            .tables
            .get(&T::ENTITY_TYPE)?
            .values()
            .filter_map(|e| e.clone().downcast::<T>().ok())
            .find(|e| predicate(&**e))
    }

    /// Every cached entity of type `T`, in no particular order.
    pub fn all<T: Entity>(&self) -> Vec<Arc<T>> {
        let state = self.state.read();
        state
            .tables
            .get(&T::ENTITY_TYPE)
            .map(|table| {
                table
                    .values()
                    .filter_map(|e| e.clone().downcast::<T>().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of cached entities of `entity_type`.
    pub fn len(&self, entity_type: EntityType) -> usize {
        self.state
            .read()
            .tables
            .get(&entity_type)
            .map_or(0, |table| table.len())
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().tables.values().all(|t| t.is_empty())
    }

    /// Upsert entities. Last write wins per id.
    pub fn put<T: Entity>(&self, entities: Vec<T>) -> Vec<String> {
        self.batch(|w| w.put_all(entities))
    }

    /// Remove entities, and their ids from lists unless `preserve_lists`.
    pub fn remove(&self, entity_type: EntityType, ids: &[String], preserve_lists: bool) {
        self.batch(|w| w.remove(entity_type, ids, preserve_lists));
    }

    /// Ids in the list at `path`.
    pub fn list_ids(&self, path: &ListPath) -> Vec<String> {
        self.state.read().lists.ids(path)
    }

    /// Resolve the list at `path` against the store. Ids with no cached
    /// entity are skipped.
    pub fn list<T: Entity>(&self, path: &ListPath) -> Vec<Arc<T>> {
        let state = self.state.read();
        let Some(list) = state.lists.get(path) else {
            return Vec::new();
        };
        let Some(table) = state.tables.get(&T::ENTITY_TYPE) else {
            return Vec::new();
        };
        list.ids()
            .iter()
            .filter_map(|id| table.get(id)?.clone().downcast::<T>().ok())
            .collect()
    }

    /// Pagination state of the list at `path`.
    pub fn list_state(&self, path: &ListPath) -> ListState {
        self.state.read().lists.state(path)
    }

    /// Insert ids into a list.
    pub fn insert_list(&self, path: &ListPath, ids: Vec<String>, position: ListPosition) {
        self.batch(|w| w.insert_list(path, ids, position));
    }

    /// Drop every entity and list.
    pub fn clear(&self) {
        self.batch(|w| {
            let StoreState { tables, lists } = &mut *w.state;
            for (entity_type, table) in tables.drain() {
                for (id, _) in table {
                    w.update.entities.push((entity_type, id));
                }
            }
            for entity_type in EntityType::ALL {
                w.update.lists.extend(lists.paths(entity_type));
            }
            lists.clear();
        });
    }
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}
