use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use skein_entities::{
    Api, ApiError, ApiResponse, BatchOptions, BatchedEntities, Entity, EntityCache, EntityError, EntityOptions,
    EntityQuery, EntityType, ListPath, Transaction, fetcher,
};

use super::get_many;
use crate::schemas::{Account, Relationship};

/// Relationships for `ids`, fetched in one request for the ids not cached.
pub async fn use_relationships(
    cache: &EntityCache,
    api: &Arc<dyn Api>,
    list_key: &[&str],
    ids: &[String],
) -> BatchedEntities<Relationship> {
    let path = ListPath::new(EntityType::Relationships, list_key);
    cache
        .batched::<Relationship>(&path, ids, get_many(api, "/api/v1/accounts/relationships"), BatchOptions::default())
        .await
}

/// Relationship with one account.
///
/// The endpoint answers with an array; the first element is the entity.
pub fn use_relationship(
    cache: &EntityCache,
    api: &Arc<dyn Api>,
    account_id: &str,
    options: EntityOptions,
) -> EntityQuery<Relationship> {
    let api = Arc::clone(api);
    let id = account_id.to_string();
    let fetch = fetcher(move || {
        let api = Arc::clone(&api);
        let query = vec![("id[]", id.clone())];
        async move {
            let response = api.get("/api/v1/accounts/relationships", &query).await?;
            first_element(response)
        }
    });
    cache.entity::<Relationship>(account_id, fetch, options)
}

/// Replace an array body by its first element.
pub(crate) fn first_element(mut response: ApiResponse) -> Result<ApiResponse, ApiError> {
    let first = match response.data {
        Value::Array(items) => items.into_iter().next(),
        _ => None,
    };
    let Some(first) = first else {
        return Err(ApiError::InvalidResponse("expected a non-empty array".to_string()));
    };
    response.data = first;
    Ok(response)
}

fn follow_effect(account_id: &str) -> Transaction {
    Transaction::new()
        .update::<Account, _>(account_id, |account| Account {
            followers_count: account.followers_count + 1,
            ..account.clone()
        })
        .update::<Relationship, _>(account_id, |relationship| Relationship {
            following: true,
            ..relationship.clone()
        })
}

fn unfollow_effect(account_id: &str) -> Transaction {
    Transaction::new()
        .update::<Account, _>(account_id, |account| Account {
            followers_count: account.followers_count.saturating_sub(1),
            ..account.clone()
        })
        .update::<Relationship, _>(account_id, |relationship| Relationship {
            following: false,
            ..relationship.clone()
        })
}

/// Follow and unfollow with optimistic counters.
pub struct Follow {
    cache: EntityCache,
    api: Arc<dyn Api>,
}

pub fn use_follow(cache: &EntityCache, api: &Arc<dyn Api>) -> Follow {
    Follow {
        cache: cache.clone(),
        api: Arc::clone(api),
    }
}

impl Follow {
    /// Follow `account_id`. `params` is passed through as the request body
    /// (e.g. `{"reblogs": false}`).
    ///
    /// The follower count and relationship change immediately and are
    /// reverted if the request fails.
    pub async fn follow(&self, account_id: &str, params: Option<Value>) -> Result<(), EntityError> {
        self.cache.transaction(follow_effect(account_id));

        let path = format!("/api/v1/accounts/{}/follow", account_id);
        match self.api.post(&path, params).await {
            Ok(response) => {
                self.import_relationship(response);
                Ok(())
            }
            Err(e) => {
                warn!(account_id = %account_id, error = %e, "follow failed, reverting");
                self.cache.transaction(unfollow_effect(account_id));
                Err(e.into())
            }
        }
    }

    /// Unfollow `account_id`, reverting the optimistic change on failure.
    pub async fn unfollow(&self, account_id: &str) -> Result<(), EntityError> {
        self.cache.transaction(unfollow_effect(account_id));

        let path = format!("/api/v1/accounts/{}/unfollow", account_id);
        match self.api.post(&path, None).await {
            Ok(response) => {
                self.import_relationship(response);
                Ok(())
            }
            Err(e) => {
                warn!(account_id = %account_id, error = %e, "unfollow failed, reverting");
                self.cache.transaction(follow_effect(account_id));
                Err(e.into())
            }
        }
    }

    fn import_relationship(&self, response: ApiResponse) {
        match Relationship::parse(response.data) {
            Ok(relationship) => {
                debug!(account_id = %relationship.id, following = relationship.following, "relationship updated");
                self.cache.import(vec![relationship], None);
            }
            Err(e) => warn!(error = %e, "ignoring invalid relationship in follow response"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_element() {
        let response = ApiResponse::new(json!([{"id": "1"}, {"id": "2"}]));
        assert_eq!(first_element(response).unwrap().data, json!({"id": "1"}));

        assert!(first_element(ApiResponse::new(json!([]))).is_err());
        assert!(first_element(ApiResponse::new(json!({"id": "1"}))).is_err());
    }

    #[test]
    fn test_follow_effect_is_inverted_by_unfollow() {
        let cache = EntityCache::new();
        let account = Account::parse(json!({
            "id": "7", "username": "bob", "acct": "bob", "followers_count": 3
        }))
        .unwrap();
        let relationship = Relationship::parse(json!({"id": "7"})).unwrap();
        cache.import(vec![account], None);
        cache.import(vec![relationship], None);

        cache.transaction(follow_effect("7"));
        assert_eq!(cache.store().get::<Account>("7").unwrap().followers_count, 4);
        assert!(cache.store().get::<Relationship>("7").unwrap().following);

        cache.transaction(unfollow_effect("7"));
        assert_eq!(cache.store().get::<Account>("7").unwrap().followers_count, 3);
        assert!(!cache.store().get::<Relationship>("7").unwrap().following);
    }
}
