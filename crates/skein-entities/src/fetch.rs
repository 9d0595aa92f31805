//! Fetch coordination: request de-duplication and per-key status.
//!
//! Every request is identified by a [`RequestKey`]. While a request for a
//! key is outstanding, further callers join it through a [`Shared`] future
//! instead of issuing their own, so N concurrent callers cost one network
//! call and all observe the same result.
//!
//! Each started request gets a generation number. The in-flight slot is only
//! released by the request that owns it, and under
//! [`StalenessPolicy::LatestRequestWins`] a response older than the latest
//! request for its key is discarded instead of applied.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tracing::{debug, trace, warn};

use crate::api::{ApiFuture, ApiResponse};
use crate::{EntityError, EntityPath, EntityType, ListPath, StalenessPolicy};

/// Ids written by a completed request, or the error it failed with.
pub type FetchResult = Result<Vec<String>, EntityError>;

/// Future shared by every caller waiting on the same request.
pub type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

/// Identity of a request for de-duplication and status tracking.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequestKey {
    /// A single entity by id.
    Entity(EntityPath),
    /// The first page of a paginated list.
    List(ListPath),
    /// A further page of a list, loaded from a pagination link.
    Page(ListPath),
    /// Batched lookups collected into a list.
    Batch(ListPath),
    /// A lookup by some key other than id (e.g. an account handle).
    Lookup { entity_type: EntityType, key: String },
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKey::Entity(path) => write!(f, "entity:{}", path),
            RequestKey::List(path) => write!(f, "list:{}", path),
            RequestKey::Page(path) => write!(f, "page:{}", path),
            RequestKey::Batch(path) => write!(f, "batch:{}", path),
            RequestKey::Lookup { entity_type, key } => write!(f, "lookup:{}/{}", entity_type, key),
        }
    }
}

/// Loading state for one request key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchStatus {
    /// A request is outstanding.
    pub is_loading: bool,
    /// At least one request has succeeded.
    pub is_fetched: bool,
    /// Cached data was invalidated; the next enabled fetch refetches.
    pub is_invalid: bool,
    /// Error from the most recent failed request, cleared on success.
    pub error: Option<EntityError>,
    /// When the most recent successful request completed.
    pub last_fetched_at: Option<DateTime<Utc>>,
}

impl FetchStatus {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_unauthorized(&self) -> bool {
        self.error.as_ref().is_some_and(EntityError::is_unauthorized)
    }

    pub fn is_forbidden(&self) -> bool {
        self.error.as_ref().is_some_and(EntityError::is_forbidden)
    }
}

struct InFlight {
    generation: u64,
    future: SharedFetch,
}

/// De-duplicates requests and tracks their status.
pub struct FetchCoordinator {
    /// Outstanding requests per key, oldest first. New callers join the last.
    in_flight: DashMap<RequestKey, Vec<InFlight>>,
    status: DashMap<RequestKey, FetchStatus>,
    /// Latest generation issued per key.
    latest: DashMap<RequestKey, u64>,
    next_generation: AtomicU64,
    staleness: StalenessPolicy,
}

impl FetchCoordinator {
    pub fn new(staleness: StalenessPolicy) -> Self {
        Self {
            in_flight: DashMap::new(),
            status: DashMap::new(),
            latest: DashMap::new(),
            next_generation: AtomicU64::new(0),
            staleness,
        }
    }

    pub fn staleness(&self) -> StalenessPolicy {
        self.staleness
    }

    /// Current status of `key`.
    pub fn status(&self, key: &RequestKey) -> FetchStatus {
        self.status
            .get(key)
            .map(|s| s.value().clone())
            .unwrap_or_default()
    }

    /// Whether a request for `key` is outstanding.
    pub fn is_in_flight(&self, key: &RequestKey) -> bool {
        self.in_flight.contains_key(key)
    }

    /// Number of keys with at least one outstanding request.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Mark `key` stale without fetching. The next enabled fetch refetches.
    pub fn invalidate(&self, key: &RequestKey) {
        let mut status = self.status.entry(key.clone()).or_default();
        status.is_invalid = true;
        debug!(key = %key, "invalidated");
    }

    /// Invalidate every tracked key matching `predicate`.
    pub fn invalidate_where(&self, predicate: impl Fn(&RequestKey) -> bool) {
        for mut entry in self.status.iter_mut() {
            if predicate(entry.key()) {
                entry.value_mut().is_invalid = true;
                debug!(key = %entry.key(), "invalidated");
            }
        }
    }

    /// Join the outstanding request for `key`, or start one.
    ///
    /// `request` is only called when a new request is started. `apply` runs
    /// once on success, before any waiter is woken, and decides what the
    /// response writes to the store.
    pub fn join_or_start<R, A>(self: &Arc<Self>, key: RequestKey, request: R, apply: A) -> SharedFetch
    where
        R: FnOnce() -> ApiFuture,
        A: FnOnce(ApiResponse) -> FetchResult + Send + 'static,
    {
        self.begin(key, request, apply, false)
    }

    /// Start a new request for `key` even if one is outstanding.
    ///
    /// New callers join the new request; callers already waiting on the old
    /// one still get the old result. The key stays loading until every
    /// outstanding request for it has resolved.
    pub fn restart<R, A>(self: &Arc<Self>, key: RequestKey, request: R, apply: A) -> SharedFetch
    where
        R: FnOnce() -> ApiFuture,
        A: FnOnce(ApiResponse) -> FetchResult + Send + 'static,
    {
        self.begin(key, request, apply, true)
    }

    fn begin<R, A>(self: &Arc<Self>, key: RequestKey, request: R, apply: A, force: bool) -> SharedFetch
    where
        R: FnOnce() -> ApiFuture,
        A: FnOnce(ApiResponse) -> FetchResult + Send + 'static,
    {
        let mut outstanding = self.in_flight.entry(key.clone()).or_default();
        if !force {
            if let Some(latest) = outstanding.last() {
                trace!(key = %key, "joining in-flight request");
                return latest.future.clone();
            }
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.latest.insert(key.clone(), generation);
        self.mark_loading(&key);
        debug!(key = %key, generation, "starting request");

        let future = Arc::clone(self)
            .drive(key, generation, request(), apply)
            .boxed()
            .shared();
        outstanding.push(InFlight {
            generation,
            future: future.clone(),
        });
        drop(outstanding);

        // Drive the request to completion even if every caller goes away.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(future.clone());
        }
        future
    }

    async fn drive<A>(
        self: Arc<Self>,
        key: RequestKey,
        generation: u64,
        request: ApiFuture,
        apply: A,
    ) -> FetchResult
    where
        A: FnOnce(ApiResponse) -> FetchResult + Send + 'static,
    {
        let response = request.await;

        if self.is_superseded(&key, generation) {
            debug!(key = %key, generation, "discarding superseded response");
            self.release(&key, generation);
            let still_loading = self.is_in_flight(&key);
            if let Some(mut status) = self.status.get_mut(&key) {
                status.is_loading = still_loading;
            }
            return Ok(Vec::new());
        }

        let result = match response {
            Ok(response) => apply(response),
            Err(e) => Err(EntityError::from(e)),
        };

        self.release(&key, generation);
        let still_loading = self.is_in_flight(&key);
        self.record(&key, &result, still_loading);
        result
    }

    fn is_superseded(&self, key: &RequestKey, generation: u64) -> bool {
        self.staleness == StalenessPolicy::LatestRequestWins
            && self.latest.get(key).is_some_and(|latest| *latest > generation)
    }

    fn release(&self, key: &RequestKey, generation: u64) {
        if let Entry::Occupied(mut outstanding) = self.in_flight.entry(key.clone()) {
            outstanding.get_mut().retain(|f| f.generation != generation);
            if outstanding.get().is_empty() {
                outstanding.remove();
            }
        }
    }

    pub(crate) fn mark_loading(&self, key: &RequestKey) {
        self.status.entry(key.clone()).or_default().is_loading = true;
    }

    pub(crate) fn record(&self, key: &RequestKey, result: &FetchResult, still_loading: bool) {
        let mut status = self.status.entry(key.clone()).or_default();
        status.is_loading = still_loading;
        match result {
            Ok(ids) => {
                status.is_fetched = true;
                status.is_invalid = false;
                status.error = None;
                status.last_fetched_at = Some(Utc::now());
                debug!(key = %key, count = ids.len(), "request succeeded");
            }
            Err(e) => {
                status.error = Some(e.clone());
                warn!(key = %key, error = %e, "request failed");
            }
        }
    }
}
