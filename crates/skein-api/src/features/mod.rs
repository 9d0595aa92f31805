//! Feature hooks: concrete endpoints and schemas on top of the generic cache.
//!
//! Each hook is a thin adapter. It picks the entity type, the list key and
//! the endpoint, and hands fetchers built from the injected [`Api`] to the
//! matching [`EntityCache`](skein_entities::EntityCache) primitive.

use std::sync::Arc;

use skein_entities::{Api, BatchFetcher, Fetcher, PageFetcher, batch_fetcher, fetcher, page_fetcher};

mod accounts;
mod groups;
mod relationships;
mod statuses;

pub use accounts::{
    AccountList, AccountListQuery, AccountListState, AccountLookupQuery, AccountOptions, AccountQuery, AccountState,
    AccountWithRelationship, use_account, use_account_list, use_account_lookup,
};
pub use groups::{
    GroupMembershipAction, GroupWithRelationship, GroupsQuery, GroupsState, use_group, use_group_members,
    use_group_relationship, use_group_relationships, use_groups, use_join_group, use_leave_group,
};
pub use relationships::{Follow, use_follow, use_relationship, use_relationships};
pub use statuses::{Timeline, use_status, use_timeline};

/// GET `path` with fixed query parameters.
pub(crate) fn get(api: &Arc<dyn Api>, path: impl Into<String>, query: Vec<(&'static str, String)>) -> Fetcher {
    let api = Arc::clone(api);
    let path = path.into();
    fetcher(move || {
        let api = Arc::clone(&api);
        let path = path.clone();
        let query = query.clone();
        async move { api.get(&path, &query).await }
    })
}

/// GET an absolute pagination link.
pub(crate) fn get_page(api: &Arc<dyn Api>) -> PageFetcher {
    let api = Arc::clone(api);
    page_fetcher(move |url: String| {
        let api = Arc::clone(&api);
        async move { api.get(&url, &[]).await }
    })
}

/// GET `path` once for many ids, passed as repeated `id[]` parameters.
pub(crate) fn get_many(api: &Arc<dyn Api>, path: &'static str) -> BatchFetcher {
    let api = Arc::clone(api);
    batch_fetcher(move |ids: Vec<String>| {
        let api = Arc::clone(&api);
        let query: Vec<(&'static str, String)> = ids.into_iter().map(|id| ("id[]", id)).collect();
        async move { api.get(path, &query).await }
    })
}
