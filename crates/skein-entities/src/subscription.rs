//! Change notification for slices of the store.
//!
//! A [`Subscription`] watches one selection (an entity, a list, a set of
//! ids) and wakes only when that selection's value changes by reference.
//! Writes to unrelated entities are filtered twice: cheaply by the keys in
//! the [`StoreUpdate`], then exactly by comparing `Arc` identity of the
//! re-selected value.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::debug;

use crate::store::StoreUpdate;
use crate::{Entity, EntityStore, ListPath};

/// Reference equality for selected values.
pub trait SameRef {
    fn same_ref(&self, other: &Self) -> bool;
}

impl<T: ?Sized> SameRef for Arc<T> {
    fn same_ref(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }
}

impl<T: SameRef> SameRef for Option<T> {
    fn same_ref(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.same_ref(b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: SameRef> SameRef for Vec<T> {
    fn same_ref(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.same_ref(b))
    }
}

impl<T: SameRef> SameRef for HashMap<String, T> {
    fn same_ref(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(k, a)| other.get(k).is_some_and(|b| a.same_ref(b)))
    }
}

type Relevance = Box<dyn Fn(&StoreUpdate) -> bool + Send + Sync>;
type Selector<S> = Box<dyn Fn(&EntityStore) -> S + Send + Sync>;

/// A live view of one slice of the store.
///
/// Dropping the subscription unsubscribes it. The subscription does not
/// keep the store alive.
pub struct Subscription<S> {
    rx: broadcast::Receiver<StoreUpdate>,
    store: Weak<EntityStore>,
    relevant: Relevance,
    select: Selector<S>,
    current: S,
}

impl<S: SameRef + Clone> Subscription<S> {
    pub fn new(
        store: Arc<EntityStore>,
        relevant: impl Fn(&StoreUpdate) -> bool + Send + Sync + 'static,
        select: impl Fn(&EntityStore) -> S + Send + Sync + 'static,
    ) -> Self {
        // Subscribe before the first read so no write can fall in between.
        let rx = store.subscribe();
        let current = select(&store);
        Self {
            rx,
            store: Arc::downgrade(&store),
            relevant: Box::new(relevant),
            select: Box::new(select),
            current,
        }
    }

    /// The value as of the last change observed.
    pub fn current(&self) -> &S {
        &self.current
    }

    /// Wait for the selection to change and return the new value.
    ///
    /// Returns `None` once the store has been dropped.
    pub async fn changed(&mut self) -> Option<S> {
        loop {
            match self.rx.recv().await {
                Ok(update) if !(self.relevant)(&update) => continue,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "subscriber lagged, re-reading selection");
                }
                Err(RecvError::Closed) => return None,
            }
            if let Some(next) = self.reselect() {
                return Some(next);
            }
        }
    }

    /// Drain pending updates without waiting. Returns the new value if the
    /// selection changed.
    pub fn try_changed(&mut self) -> Option<S> {
        let mut dirty = false;
        loop {
            match self.rx.try_recv() {
                Ok(update) => dirty |= (self.relevant)(&update),
                Err(TryRecvError::Lagged(_)) => dirty = true,
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
        if dirty { self.reselect() } else { None }
    }

    fn reselect(&mut self) -> Option<S> {
        let store = self.store.upgrade()?;
        let next = (self.select)(&store);
        if next.same_ref(&self.current) {
            return None;
        }
        self.current = next.clone();
        Some(next)
    }
}

/// Watch one entity.
pub fn entity<T: Entity>(store: Arc<EntityStore>, id: impl Into<String>) -> Subscription<Option<Arc<T>>> {
    let id = id.into();
    let watched = id.clone();
    Subscription::new(
        store,
        move |update| update.touches_entity(T::ENTITY_TYPE, &watched),
        move |store| store.get::<T>(&id),
    )
}

/// Watch a list, resolved against the store.
pub fn list<T: Entity>(store: Arc<EntityStore>, path: ListPath) -> Subscription<Vec<Arc<T>>> {
    let watched = path.clone();
    Subscription::new(
        store,
        move |update| update.touches_list(&watched) || update.touches_type(T::ENTITY_TYPE),
        move |store| store.list::<T>(&path),
    )
}

/// Watch a fixed set of ids.
pub fn ids<T: Entity>(store: Arc<EntityStore>, ids: Vec<String>) -> Subscription<HashMap<String, Arc<T>>> {
    let watched = ids.clone();
    Subscription::new(
        store,
        move |update| watched.iter().any(|id| update.touches_entity(T::ENTITY_TYPE, id)),
        move |store| store.get_many::<T>(&ids),
    )
}
