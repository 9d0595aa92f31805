use std::ops::Deref;
use std::sync::Arc;

use skein_entities::{
    Api, EntitiesOptions, EntitiesQuery, EntityCache, EntityError, EntityLookup, EntityOptions, EntityQuery,
    EntityState, EntityType, FetchStatus, ListPath, ListState,
};

use super::relationships::{use_relationship, use_relationships};
use super::{get, get_page};
use crate::schemas::{Account, Relationship};

/// An account joined with the viewer's relationship to it.
#[derive(Debug, Clone)]
pub struct AccountWithRelationship {
    pub account: Arc<Account>,
    pub relationship: Option<Arc<Relationship>>,
}

impl Deref for AccountWithRelationship {
    type Target = Account;

    fn deref(&self) -> &Account {
        &self.account
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AccountOptions {
    pub entity: EntityOptions,
    /// Also load the relationship and join it onto the account.
    pub with_relationship: bool,
}

impl AccountOptions {
    pub fn with_relationship(mut self) -> Self {
        self.with_relationship = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct AccountState {
    pub account: Option<AccountWithRelationship>,
    pub status: FetchStatus,
}

impl AccountState {
    pub fn is_loading(&self) -> bool {
        self.status.is_loading
    }

    pub fn error(&self) -> Option<&EntityError> {
        self.status.error.as_ref()
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status.is_unauthorized()
    }
}

async fn join_relationship(
    cache: &EntityCache,
    api: &Arc<dyn Api>,
    state: EntityState<Account>,
    with_relationship: bool,
) -> AccountState {
    let Some(account) = state.entity else {
        return AccountState {
            account: None,
            status: state.status,
        };
    };

    let relationship = if with_relationship {
        use_relationship(cache, api, &account.id, EntityOptions::default())
            .fetch()
            .await
            .entity
    } else {
        None
    };

    AccountState {
        account: Some(AccountWithRelationship { account, relationship }),
        status: state.status,
    }
}

/// One account by id.
pub struct AccountQuery {
    cache: EntityCache,
    api: Arc<dyn Api>,
    query: EntityQuery<Account>,
    with_relationship: bool,
}

pub fn use_account(cache: &EntityCache, api: &Arc<dyn Api>, account_id: &str, options: AccountOptions) -> AccountQuery {
    let fetch = get(api, format!("/api/v1/accounts/{}", account_id), Vec::new());
    AccountQuery {
        cache: cache.clone(),
        api: Arc::clone(api),
        query: cache.entity::<Account>(account_id, fetch, options.entity),
        with_relationship: options.with_relationship,
    }
}

impl AccountQuery {
    pub async fn fetch(&self) -> AccountState {
        let state = self.query.fetch().await;
        join_relationship(&self.cache, &self.api, state, self.with_relationship).await
    }

    pub async fn refetch(&self) -> AccountState {
        let state = self.query.refetch().await;
        join_relationship(&self.cache, &self.api, state, self.with_relationship).await
    }

    pub fn invalidate(&self) {
        self.query.invalidate();
    }
}

/// One account by `acct` handle, resolved from the cache when possible.
pub struct AccountLookupQuery {
    cache: EntityCache,
    api: Arc<dyn Api>,
    lookup: EntityLookup<Account>,
    with_relationship: bool,
}

pub fn use_account_lookup(cache: &EntityCache, api: &Arc<dyn Api>, acct: &str, options: AccountOptions) -> AccountLookupQuery {
    let acct = acct.trim_start_matches('@').to_string();
    let fetch = get(api, "/api/v1/accounts/lookup", vec![("acct", acct.clone())]);
    let key = acct.to_lowercase();
    let lookup = cache.lookup::<Account, _>(
        key,
        move |account: &Account| account.acct.eq_ignore_ascii_case(&acct),
        fetch,
        options.entity,
    );
    AccountLookupQuery {
        cache: cache.clone(),
        api: Arc::clone(api),
        lookup,
        with_relationship: options.with_relationship,
    }
}

impl AccountLookupQuery {
    pub async fn fetch(&self) -> AccountState {
        let state = self.lookup.fetch().await;
        join_relationship(&self.cache, &self.api, state, self.with_relationship).await
    }

    pub async fn refetch(&self) -> AccountState {
        let state = self.lookup.refetch().await;
        join_relationship(&self.cache, &self.api, state, self.with_relationship).await
    }

    pub fn invalidate(&self) {
        self.lookup.invalidate();
    }
}

/// Lists of accounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountList {
    Followers(String),
    Following(String),
    Blocks,
    Mutes,
}

impl AccountList {
    fn key(&self) -> Vec<&str> {
        match self {
            AccountList::Followers(id) => vec![id.as_str(), "followers"],
            AccountList::Following(id) => vec![id.as_str(), "following"],
            AccountList::Blocks => vec!["blocks"],
            AccountList::Mutes => vec!["mutes"],
        }
    }

    fn endpoint(&self) -> String {
        match self {
            AccountList::Followers(id) => format!("/api/v1/accounts/{}/followers", id),
            AccountList::Following(id) => format!("/api/v1/accounts/{}/following", id),
            AccountList::Blocks => "/api/v1/blocks".to_string(),
            AccountList::Mutes => "/api/v1/mutes".to_string(),
        }
    }

    pub fn list_path(&self) -> ListPath {
        ListPath::new(EntityType::Accounts, self.key())
    }
}

/// A paginated account list with relationships joined on.
pub struct AccountListQuery {
    cache: EntityCache,
    api: Arc<dyn Api>,
    list: AccountList,
    query: EntitiesQuery<Account>,
}

#[derive(Debug, Clone)]
pub struct AccountListState {
    pub accounts: Vec<AccountWithRelationship>,
    pub list: ListState,
    pub status: FetchStatus,
}

impl AccountListState {
    pub fn has_next_page(&self) -> bool {
        self.list.next.is_some()
    }
}

pub fn use_account_list(
    cache: &EntityCache,
    api: &Arc<dyn Api>,
    list: AccountList,
    options: EntitiesOptions,
) -> AccountListQuery {
    let query = cache
        .entities::<Account>(list.list_path(), get(api, list.endpoint(), Vec::new()), options)
        .with_pages(get_page(api));
    AccountListQuery {
        cache: cache.clone(),
        api: Arc::clone(api),
        list,
        query,
    }
}

impl AccountListQuery {
    pub async fn fetch(&self) -> AccountListState {
        self.query.fetch().await;
        self.joined().await
    }

    pub async fn fetch_next_page(&self) -> AccountListState {
        self.query.fetch_next_page().await;
        self.joined().await
    }

    pub fn invalidate(&self) {
        self.query.invalidate();
    }

    /// Join relationships for the whole list with one batched lookup.
    async fn joined(&self) -> AccountListState {
        let state = self.query.state();
        let ids: Vec<String> = state.entities.iter().map(|a| a.id.clone()).collect();
        let relationships = use_relationships(&self.cache, &self.api, &self.list.key(), &ids).await;

        let accounts = state
            .entities
            .into_iter()
            .map(|account| {
                let relationship = relationships.get(&account.id).cloned();
                AccountWithRelationship { account, relationship }
            })
            .collect();

        AccountListState {
            accounts,
            list: state.list,
            status: state.status,
        }
    }
}
