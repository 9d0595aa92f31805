//! Batched lookups.
//!
//! Callers hand in ids they want resolved. Ids already in the store are
//! served from it; the rest are queued on a pending batch for the list path.
//! The first caller's batch waits out the batch window, then takes every id
//! queued by any caller in the meantime and issues a single request for all
//! of them.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::api::{ApiResponse, BatchFetcher};
use crate::fetch::{FetchCoordinator, FetchResult, RequestKey, SharedFetch};
use crate::{EntityError, ListPath};

/// Ids queued for the next request on one list path.
struct PendingBatch {
    generation: u64,
    ids: Arc<Mutex<Vec<String>>>,
    future: SharedFetch,
}

/// Coalesces lookups for missing ids into one request per batch window.
pub struct BatchResolver {
    pending: DashMap<ListPath, PendingBatch>,
    next_generation: AtomicU64,
    window: Duration,
    coordinator: Arc<FetchCoordinator>,
}

impl BatchResolver {
    pub fn new(coordinator: Arc<FetchCoordinator>, window: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            next_generation: AtomicU64::new(0),
            window,
            coordinator,
        }
    }

    /// Whether ids are waiting to be sent for `path`.
    pub fn has_pending(&self, path: &ListPath) -> bool {
        self.pending.contains_key(path)
    }

    /// Queue `ids` for `path` and return the future of the request that will
    /// carry them.
    ///
    /// `fetch_many` is only used if this call opens a new batch. `apply`
    /// writes the response for the whole batch.
    pub fn enqueue<A>(
        self: &Arc<Self>,
        path: &ListPath,
        ids: Vec<String>,
        fetch_many: BatchFetcher,
        apply: A,
    ) -> SharedFetch
    where
        A: FnOnce(ApiResponse) -> FetchResult + Send + 'static,
    {
        let entry = self.pending.entry(path.clone());
        if let Entry::Occupied(ref occupied) = entry {
            let batch = occupied.get();
            let mut queued = batch.ids.lock();
            let known: HashSet<String> = queued.iter().cloned().collect();
            let added: Vec<String> = ids.into_iter().filter(|id| !known.contains(id)).collect();
            trace!(path = %path, added = added.len(), "joining pending batch");
            queued.extend(added);
            return batch.future.clone();
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let queued = Arc::new(Mutex::new(crate::lists::dedup_ids(ids)));
        let key = RequestKey::Batch(path.clone());
        self.coordinator.mark_loading(&key);

        let future = Arc::clone(self)
            .flush(path.clone(), generation, Arc::clone(&queued), fetch_many, apply)
            .boxed()
            .shared();

        if let Entry::Vacant(vacant) = entry {
            vacant.insert(PendingBatch {
                generation,
                ids: queued,
                future: future.clone(),
            });
        }

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(future.clone());
        }
        future
    }

    async fn flush<A>(
        self: Arc<Self>,
        path: ListPath,
        generation: u64,
        queued: Arc<Mutex<Vec<String>>>,
        fetch_many: BatchFetcher,
        apply: A,
    ) -> FetchResult
    where
        A: FnOnce(ApiResponse) -> FetchResult + Send + 'static,
    {
        if self.window.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.window).await;
        }

        // Close the batch before reading it: a caller holding the entry
        // either queued its ids already or will open a new batch.
        self.pending.remove_if(&path, |_, p| p.generation == generation);
        let ids = std::mem::take(&mut *queued.lock());

        debug!(path = %path, count = ids.len(), "sending batched lookup");
        let result = match fetch_many(ids).await {
            Ok(response) => apply(response),
            Err(e) => Err(EntityError::from(e)),
        };

        let key = RequestKey::Batch(path.clone());
        let still_loading = self.has_pending(&path);
        self.coordinator.record(&key, &result, still_loading);
        result
    }
}
