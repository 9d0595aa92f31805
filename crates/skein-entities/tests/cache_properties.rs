//! End-to-end behaviour of the entity cache through its public API.
//!
//! Each test drives an `EntityCache` with in-memory fetchers and checks one
//! observable guarantee: request de-duplication, structural sharing,
//! batched lookups, optimistic rollback, response ordering, lazy
//! invalidation and schema rejection.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::oneshot;

use skein_entities::{
    ApiResponse, BatchOptions, CacheConfig, Entity, EntityCache, EntityOptions, EntityType, Fetcher, ListPath,
    StalenessPolicy, Transaction, batch_fetcher, fallback, fetcher,
};

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct Profile {
    id: String,
    username: String,
    #[serde(default, deserialize_with = "fallback")]
    followers_count: u64,
    #[serde(default, deserialize_with = "fallback")]
    following: bool,
}

impl Entity for Profile {
    const ENTITY_TYPE: EntityType = EntityType::Accounts;

    fn id(&self) -> &str {
        &self.id
    }
}

fn profile_json(id: &str, username: &str) -> Value {
    json!({"id": id, "username": username, "followers_count": 10})
}

fn counting_fetcher(calls: &Arc<AtomicUsize>, body: Value) -> Fetcher {
    let calls = Arc::clone(calls);
    fetcher(move || {
        calls.fetch_add(1, Ordering::SeqCst);
        let body = body.clone();
        async move { Ok(ApiResponse::new(body)) }
    })
}

/// A fetcher whose response is released by the returned sender.
fn gated_fetcher(body: Value) -> (Fetcher, oneshot::Sender<()>) {
    let (tx, rx) = oneshot::channel::<()>();
    let rx = Arc::new(Mutex::new(Some(rx)));
    let fetch = fetcher(move || {
        let rx = rx.lock().take();
        let body = body.clone();
        async move {
            if let Some(rx) = rx {
                let _ = rx.await;
            }
            Ok(ApiResponse::new(body))
        }
    });
    (fetch, tx)
}

#[tokio::test]
async fn concurrent_fetches_share_one_request() {
    let cache = EntityCache::new();
    let (fetch, release) = gated_fetcher(profile_json("1", "alice"));
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    let fetch: Fetcher = Arc::new(move || {
        counted.fetch_add(1, Ordering::SeqCst);
        fetch()
    });

    let queries: Vec<_> = (0..5)
        .map(|_| cache.entity::<Profile>("1", Arc::clone(&fetch), EntityOptions::default()))
        .collect();
    let pending = futures_util::future::join_all(queries.iter().map(|q| q.fetch()));

    let release_later = async {
        tokio::task::yield_now().await;
        let _ = release.send(());
    };
    let (states, ()) = tokio::join!(pending, release_later);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let first = states[0].entity.clone().unwrap();
    for state in &states {
        assert!(Arc::ptr_eq(state.entity.as_ref().unwrap(), &first));
        assert!(state.is_fetched());
    }
}

#[tokio::test]
async fn unrelated_update_keeps_reference_and_subscriber_quiet() {
    let cache = EntityCache::new();
    let alice = cache.entity::<Profile>("a", fetcher(|| async { Ok(ApiResponse::new(profile_json("a", "alice"))) }), EntityOptions::default());
    let bob = cache.entity::<Profile>("b", fetcher(|| async { Ok(ApiResponse::new(profile_json("b", "bob"))) }), EntityOptions::default());
    alice.fetch().await;
    let before = bob.fetch().await.entity.unwrap();

    let mut bob_watch = bob.subscribe();
    cache.transaction(Transaction::new().update::<Profile, _>("a", |p| Profile {
        followers_count: p.followers_count + 1,
        ..p.clone()
    }));

    let after = bob.state().entity.unwrap();
    assert!(Arc::ptr_eq(&before, &after));
    assert!(bob_watch.try_changed().is_none());
}

#[tokio::test]
async fn batched_lookup_requests_only_missing_ids() {
    let cache = EntityCache::new();
    cache.import(
        vec![
            Profile::parse(profile_json("1", "one")).unwrap(),
            Profile::parse(profile_json("2", "two")).unwrap(),
        ],
        None,
    );

    let requested = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&requested);
    let fetch_many = batch_fetcher(move |ids: Vec<String>| {
        log.lock().push(ids.clone());
        async move {
            let body: Vec<Value> = ids.iter().map(|id| profile_json(id, "fetched")).collect();
            Ok(ApiResponse::new(Value::Array(body)))
        }
    });

    let path = ListPath::new(EntityType::Accounts, ["batch"]);
    let ids: Vec<String> = ["1", "2", "3"].iter().map(|s| s.to_string()).collect();
    let result = cache.batched::<Profile>(&path, &ids, fetch_many, BatchOptions::default()).await;

    assert_eq!(*requested.lock(), vec![vec!["3".to_string()]]);
    let mut found: Vec<&str> = result.entity_map.keys().map(String::as_str).collect();
    found.sort();
    assert_eq!(found, vec!["1", "2", "3"]);
}

#[tokio::test]
async fn concurrent_batched_lookups_coalesce() {
    let cache = EntityCache::with_config(CacheConfig::default().with_batch_window(std::time::Duration::from_millis(5)));
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    let fetch_many = batch_fetcher(move |ids: Vec<String>| {
        counted.fetch_add(1, Ordering::SeqCst);
        async move {
            let body: Vec<Value> = ids.iter().map(|id| profile_json(id, "x")).collect();
            Ok(ApiResponse::new(Value::Array(body)))
        }
    });

    let path = ListPath::new(EntityType::Accounts, ["rows"]);
    let row_a = vec!["1".to_string()];
    let row_b = vec!["2".to_string()];
    let (a, b) = tokio::join!(
        cache.batched::<Profile>(&path, &row_a, Arc::clone(&fetch_many), BatchOptions::default()),
        cache.batched::<Profile>(&path, &row_b, Arc::clone(&fetch_many), BatchOptions::default()),
    );

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(a.get("1").is_some());
    assert!(b.get("2").is_some());
}

#[tokio::test]
async fn failed_request_rolls_back_with_inverse_transaction() {
    let cache = EntityCache::new();
    cache.import(vec![Profile::parse(profile_json("1", "alice")).unwrap()], None);

    let follow = |p: &Profile| Profile {
        following: true,
        followers_count: p.followers_count + 1,
        ..p.clone()
    };
    let unfollow = |p: &Profile| Profile {
        following: false,
        followers_count: p.followers_count.saturating_sub(1),
        ..p.clone()
    };

    cache.transaction(Transaction::new().update::<Profile, _>("1", follow));
    let optimistic = cache.store().get::<Profile>("1").unwrap();
    assert!(optimistic.following);
    assert_eq!(optimistic.followers_count, 11);

    // The request failed: the caller applies the inverse.
    cache.transaction(Transaction::new().update::<Profile, _>("1", unfollow));
    let restored = cache.store().get::<Profile>("1").unwrap();
    assert!(!restored.following);
    assert_eq!(restored.followers_count, 10);
}

#[tokio::test]
async fn snapshot_revert_undoes_optimistic_update() {
    let cache = EntityCache::new();
    cache.import(vec![Profile::parse(profile_json("1", "alice")).unwrap()], None);

    let snapshot = cache.optimistic(Transaction::new().update::<Profile, _>("1", |p| Profile {
        following: true,
        ..p.clone()
    }));
    assert!(cache.store().get::<Profile>("1").unwrap().following);

    cache.revert(snapshot);
    assert!(!cache.store().get::<Profile>("1").unwrap().following);
}

#[tokio::test]
async fn slow_older_response_overwrites_newer_by_default() {
    let cache = EntityCache::new();
    let (slow, release_slow) = gated_fetcher(profile_json("1", "stale"));
    let fast = fetcher(|| async { Ok(ApiResponse::new(profile_json("1", "fresh"))) });

    let r1 = cache.entity::<Profile>("1", slow, EntityOptions::default());
    let r2 = cache.entity::<Profile>("1", fast, EntityOptions::default());

    let first = r1.fetch();
    let second = async {
        tokio::task::yield_now().await;
        let state = r2.refetch().await;
        assert_eq!(state.entity.unwrap().username, "fresh");
        let _ = release_slow.send(());
    };
    tokio::join!(first, second);

    assert_eq!(cache.store().get::<Profile>("1").unwrap().username, "stale");
}

#[tokio::test]
async fn latest_request_wins_discards_slow_response() {
    let cache = EntityCache::with_config(CacheConfig::default().with_staleness(StalenessPolicy::LatestRequestWins));
    let (slow, release_slow) = gated_fetcher(profile_json("1", "stale"));
    let fast = fetcher(|| async { Ok(ApiResponse::new(profile_json("1", "fresh"))) });

    let r1 = cache.entity::<Profile>("1", slow, EntityOptions::default());
    let r2 = cache.entity::<Profile>("1", fast, EntityOptions::default());

    let first = r1.fetch();
    let second = async {
        tokio::task::yield_now().await;
        r2.refetch().await;
        let _ = release_slow.send(());
    };
    tokio::join!(first, second);

    assert_eq!(cache.store().get::<Profile>("1").unwrap().username, "fresh");
}

#[tokio::test]
async fn invalidate_defers_refetch_to_next_fetch() {
    let cache = EntityCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let query = cache.entity::<Profile>("1", counting_fetcher(&calls, profile_json("1", "alice")), EntityOptions::default());

    query.fetch().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    query.invalidate();
    tokio::task::yield_now().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(query.state().status.is_invalid);

    let state = query.fetch().await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(!state.status.is_invalid);
}

#[tokio::test]
async fn malformed_payload_sets_error_and_writes_nothing() {
    let cache = EntityCache::new();
    let query = cache.entity::<Profile>(
        "1",
        fetcher(|| async { Ok(ApiResponse::new(json!({"id": "1"}))) }),
        EntityOptions::default(),
    );

    let state = query.fetch().await;
    assert!(state.entity.is_none());
    assert!(state.error().is_some_and(|e| e.is_validation()));
    assert!(!state.is_fetched());
    assert!(cache.store().get::<Profile>("1").is_none());
}

#[tokio::test]
async fn unauthorized_is_flagged() {
    let cache = EntityCache::new();
    let query = cache.entity::<Profile>(
        "1",
        fetcher(|| async {
            Err(skein_entities::ApiError::Http {
                status: 401,
                message: "The access token is invalid".to_string(),
            })
        }),
        EntityOptions::default(),
    );

    let state = query.fetch().await;
    assert!(state.is_unauthorized());
    assert!(!state.is_forbidden());
}

#[test]
fn malformed_optional_field_takes_default() {
    let parsed = Profile::parse(json!({"id": "1", "username": "a", "followers_count": "lots"})).unwrap();
    assert_eq!(parsed.followers_count, 0);
}
