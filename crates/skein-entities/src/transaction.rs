//! Optimistic transactions.
//!
//! A [`Transaction`] is a set of pure updaters keyed by entity type and id.
//! Applying it runs every updater under one store write, so the change is
//! visible to all readers at once and before the call returns. Entities that
//! are not cached are skipped.
//!
//! The engine keeps no record of pending transactions. Callers that need to
//! undo a change either apply the inverse transaction themselves or use
//! [`EntityStore::optimistic`], which returns a [`Snapshot`] of the values
//! the transaction replaced.

use std::sync::Arc;

use tracing::debug;

use crate::store::{ErasedEntity, StoreWriter};
use crate::{Entity, EntityStore, EntityType};

type Updater = Box<dyn FnOnce(ErasedEntity) -> Option<ErasedEntity> + Send>;

/// A batch of entity updates applied atomically.
#[derive(Default)]
pub struct Transaction {
    updates: Vec<(EntityType, String, Updater)>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached `T` with id `id` by `updater(current)`.
    pub fn update<T, F>(mut self, id: impl Into<String>, updater: F) -> Self
    where
        T: Entity,
        F: FnOnce(&T) -> T + Send + 'static,
    {
        let updater: Updater = Box::new(move |current| {
            let current = current.downcast::<T>().ok()?;
            Some(Arc::new(updater(&current)) as ErasedEntity)
        });
        self.updates.push((T::ENTITY_TYPE, id.into(), updater));
        self
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Run the updaters, returning the values they replaced.
    fn apply(self, writer: &mut StoreWriter<'_>) -> Vec<(EntityType, String, ErasedEntity)> {
        let mut replaced = Vec::with_capacity(self.updates.len());
        for (entity_type, id, updater) in self.updates {
            let Some(current) = writer.get_raw(entity_type, &id) else {
                debug!(entity_type = %entity_type, id = %id, "transaction: entity not cached, skipping");
                continue;
            };
            if let Some(next) = updater(Arc::clone(&current)) {
                writer.put_raw(entity_type, id.clone(), next);
                replaced.push((entity_type, id, current));
            }
        }
        replaced
    }
}

/// Values replaced by an optimistic transaction.
#[must_use = "a snapshot does nothing unless reverted"]
pub struct Snapshot {
    previous: Vec<(EntityType, String, ErasedEntity)>,
}

impl Snapshot {
    /// Number of entities the transaction changed.
    pub fn len(&self) -> usize {
        self.previous.len()
    }

    pub fn is_empty(&self) -> bool {
        self.previous.is_empty()
    }

    /// Put back every value the transaction replaced, atomically.
    pub fn revert(self, store: &EntityStore) {
        store.batch(|w| {
            for (entity_type, id, entity) in self.previous {
                w.put_raw(entity_type, id, entity);
            }
        });
    }
}

impl EntityStore {
    /// Apply `transaction` synchronously and atomically.
    pub fn transaction(&self, transaction: Transaction) {
        self.batch(|w| {
            transaction.apply(w);
        });
    }

    /// Apply `transaction` and return a snapshot that undoes it.
    pub fn optimistic(&self, transaction: Transaction) -> Snapshot {
        let previous = self.batch(|w| transaction.apply(w));
        Snapshot { previous }
    }
}
