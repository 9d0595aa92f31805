use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use skein_entities::{
    Api, BatchOptions, BatchedEntities, Endpoints, EntitiesOptions, EntitiesQuery, EntityActions, EntityCache,
    EntityError, EntityOptions, EntityQuery, EntityType, FetchStatus, ListPath, ListState, RequestKey, fetcher,
};

use super::relationships::first_element;
use super::{get, get_many, get_page};
use crate::schemas::{Group, GroupMembership, GroupRelationship, GroupRole};

/// A group joined with the viewer's relationship to it.
#[derive(Debug, Clone)]
pub struct GroupWithRelationship {
    pub group: Arc<Group>,
    pub relationship: Option<Arc<GroupRelationship>>,
}

#[derive(Debug, Clone)]
pub struct GroupsState {
    pub groups: Vec<GroupWithRelationship>,
    pub list: ListState,
    pub status: FetchStatus,
    /// Status of the batched relationship lookup.
    pub relationship_status: FetchStatus,
}

impl GroupsState {
    pub fn is_loading(&self) -> bool {
        self.status.is_loading
    }

    pub fn has_next_page(&self) -> bool {
        self.list.next.is_some()
    }
}

/// Groups matching a search query, with relationships joined on.
pub struct GroupsQuery {
    cache: EntityCache,
    api: Arc<dyn Api>,
    query: String,
    groups: EntitiesQuery<Group>,
}

pub fn use_groups(cache: &EntityCache, api: &Arc<dyn Api>, query: &str, options: EntitiesOptions) -> GroupsQuery {
    let path = ListPath::new(EntityType::Groups, ["search", query]);
    let fetch = get(api, "/api/v1/groups", vec![("q", query.to_string())]);
    GroupsQuery {
        cache: cache.clone(),
        api: Arc::clone(api),
        query: query.to_string(),
        groups: cache.entities::<Group>(path, fetch, options).with_pages(get_page(api)),
    }
}

impl GroupsQuery {
    pub async fn fetch(&self) -> GroupsState {
        self.groups.fetch().await;
        self.joined().await
    }

    pub async fn fetch_next_page(&self) -> GroupsState {
        self.groups.fetch_next_page().await;
        self.joined().await
    }

    pub fn invalidate(&self) {
        self.groups.invalidate();
    }

    async fn joined(&self) -> GroupsState {
        let state = self.groups.state();
        let ids: Vec<String> = state.entities.iter().map(|g| g.id.clone()).collect();
        let list_key = ["search", self.query.as_str()];
        let relationships = use_group_relationships(&self.cache, &self.api, &list_key, &ids).await;

        let groups = state
            .entities
            .into_iter()
            .map(|group| {
                let relationship = relationships.get(&group.id).cloned();
                GroupWithRelationship { group, relationship }
            })
            .collect();

        GroupsState {
            groups,
            list: state.list,
            status: state.status,
            relationship_status: relationships.status,
        }
    }
}

/// One group by id.
pub fn use_group(cache: &EntityCache, api: &Arc<dyn Api>, group_id: &str, options: EntityOptions) -> EntityQuery<Group> {
    let fetch = get(api, format!("/api/v1/groups/{}", group_id), Vec::new());
    cache.entity::<Group>(group_id, fetch, options)
}

/// Relationships for many groups in one request.
pub async fn use_group_relationships(
    cache: &EntityCache,
    api: &Arc<dyn Api>,
    list_key: &[&str],
    ids: &[String],
) -> BatchedEntities<GroupRelationship> {
    let path = ListPath::new(EntityType::GroupRelationships, list_key);
    cache
        .batched::<GroupRelationship>(&path, ids, get_many(api, "/api/v1/groups/relationships"), BatchOptions::default())
        .await
}

/// Relationship with one group.
pub fn use_group_relationship(
    cache: &EntityCache,
    api: &Arc<dyn Api>,
    group_id: &str,
    options: EntityOptions,
) -> EntityQuery<GroupRelationship> {
    let api = Arc::clone(api);
    let id = group_id.to_string();
    let fetch = fetcher(move || {
        let api = Arc::clone(&api);
        let query = vec![("id[]", id.clone())];
        async move {
            let response = api.get("/api/v1/groups/relationships", &query).await?;
            first_element(response)
        }
    });
    cache.entity::<GroupRelationship>(group_id, fetch, options)
}

/// Members of a group with a given role.
pub fn use_group_members(
    cache: &EntityCache,
    api: &Arc<dyn Api>,
    group_id: &str,
    role: GroupRole,
    options: EntitiesOptions,
) -> EntitiesQuery<GroupMembership> {
    let role = match role {
        GroupRole::Owner => "owner",
        GroupRole::Admin => "admin",
        GroupRole::User => "user",
    };
    let path = ListPath::new(EntityType::GroupMemberships, [group_id, role]);
    let fetch = get(api, format!("/api/v1/groups/{}/memberships", group_id), vec![("role", role.to_string())]);
    cache.entities::<GroupMembership>(path, fetch, options).with_pages(get_page(api))
}

/// Join or leave a group.
pub struct GroupMembershipAction {
    cache: EntityCache,
    group_id: String,
    actions: EntityActions<GroupRelationship>,
}

fn membership_action(cache: &EntityCache, api: &Arc<dyn Api>, group_id: &str, verb: &str) -> GroupMembershipAction {
    let endpoints = Endpoints::new().post(format!("/api/v1/groups/{}/{}", group_id, verb));
    GroupMembershipAction {
        cache: cache.clone(),
        group_id: group_id.to_string(),
        actions: cache.actions::<GroupRelationship>(Arc::clone(api), endpoints),
    }
}

pub fn use_join_group(cache: &EntityCache, api: &Arc<dyn Api>, group_id: &str) -> GroupMembershipAction {
    membership_action(cache, api, group_id, "join")
}

pub fn use_leave_group(cache: &EntityCache, api: &Arc<dyn Api>, group_id: &str) -> GroupMembershipAction {
    membership_action(cache, api, group_id, "leave")
}

impl GroupMembershipAction {
    pub fn is_submitting(&self) -> bool {
        self.actions.is_submitting()
    }

    /// Send the request and import the updated relationship. The group's
    /// member lists are invalidated so they refetch on next use.
    pub async fn submit(&self) -> Result<Arc<GroupRelationship>, EntityError> {
        let relationship = self.actions.create(json!({})).await?;

        let prefix = format!("{}:", self.group_id);
        self.cache.coordinator().invalidate_where(|key| {
            matches!(key, RequestKey::List(path)
                if path.entity_type == EntityType::GroupMemberships && path.list_key.starts_with(&prefix))
        });
        debug!(group_id = %self.group_id, member = relationship.member, "group membership changed");
        Ok(relationship)
    }
}
