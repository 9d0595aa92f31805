//! Entity schemas.
//!
//! Required fields have no default and fail validation when missing. Every
//! optional field declares its default, and a present but malformed value
//! falls back to that default instead of rejecting the whole entity.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use skein_entities::{Entity, EntityError, EntityType, fallback, parse_with_serde};

fn default_visibility() -> String {
    "public".to_string()
}

/// A profile field shown on an account.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccountField {
    pub name: String,
    pub value: String,
    #[serde(default, deserialize_with = "fallback")]
    pub verified_at: Option<DateTime<Utc>>,
}

/// Custom emoji referenced from account or status text.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CustomEmoji {
    pub shortcode: String,
    pub url: String,
    #[serde(default, deserialize_with = "fallback")]
    pub static_url: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Account {
    pub id: String,
    pub username: String,
    pub acct: String,
    #[serde(default, deserialize_with = "fallback")]
    pub display_name: String,
    #[serde(default, deserialize_with = "fallback")]
    pub url: String,
    #[serde(default, deserialize_with = "fallback")]
    pub note: String,
    #[serde(default, deserialize_with = "fallback")]
    pub avatar: String,
    #[serde(default, deserialize_with = "fallback")]
    pub header: String,
    #[serde(default, deserialize_with = "fallback")]
    pub locked: bool,
    #[serde(default, deserialize_with = "fallback")]
    pub bot: bool,
    #[serde(default, deserialize_with = "fallback")]
    pub discoverable: bool,
    #[serde(default, deserialize_with = "fallback")]
    pub followers_count: u64,
    #[serde(default, deserialize_with = "fallback")]
    pub following_count: u64,
    #[serde(default, deserialize_with = "fallback")]
    pub statuses_count: u64,
    #[serde(default, deserialize_with = "fallback")]
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "fallback")]
    pub last_status_at: Option<String>,
    #[serde(default, deserialize_with = "fallback")]
    pub fields: Vec<AccountField>,
    #[serde(default, deserialize_with = "fallback")]
    pub emojis: Vec<CustomEmoji>,
    #[serde(default, deserialize_with = "fallback")]
    pub verified: bool,
}

impl Account {
    /// Whether the account lives on this server.
    pub fn is_local(&self) -> bool {
        !self.acct.contains('@')
    }

    /// Domain part of `acct`, if remote.
    pub fn domain(&self) -> Option<&str> {
        self.acct.split_once('@').map(|(_, domain)| domain)
    }
}

impl Entity for Account {
    const ENTITY_TYPE: EntityType = EntityType::Accounts;

    fn id(&self) -> &str {
        &self.id
    }

    fn parse(value: Value) -> Result<Self, EntityError> {
        let mut account: Account = parse_with_serde(value)?;
        if account.display_name.trim().is_empty() {
            account.display_name = account.username.clone();
        }
        Ok(account)
    }
}

/// The viewer's relationship to an account.
///
/// Stored separately from [`Account`] and joined at read time.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Relationship {
    pub id: String,
    #[serde(default, deserialize_with = "fallback")]
    pub following: bool,
    #[serde(default, deserialize_with = "fallback")]
    pub followed_by: bool,
    #[serde(default, deserialize_with = "fallback")]
    pub blocking: bool,
    #[serde(default, deserialize_with = "fallback")]
    pub blocked_by: bool,
    #[serde(default, deserialize_with = "fallback")]
    pub muting: bool,
    #[serde(default, deserialize_with = "fallback")]
    pub muting_notifications: bool,
    #[serde(default, deserialize_with = "fallback")]
    pub requested: bool,
    #[serde(default, deserialize_with = "fallback")]
    pub domain_blocking: bool,
    #[serde(default, deserialize_with = "fallback")]
    pub endorsed: bool,
    #[serde(default, deserialize_with = "fallback")]
    pub showing_reblogs: bool,
    #[serde(default, deserialize_with = "fallback")]
    pub notifying: bool,
    #[serde(default, deserialize_with = "fallback")]
    pub note: String,
}

impl Entity for Relationship {
    const ENTITY_TYPE: EntityType = EntityType::Relationships;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Status {
    pub id: String,
    pub account: Account,
    #[serde(default, deserialize_with = "fallback")]
    pub content: String,
    #[serde(default, deserialize_with = "fallback")]
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "fallback")]
    pub in_reply_to_id: Option<String>,
    #[serde(default, deserialize_with = "fallback")]
    pub in_reply_to_account_id: Option<String>,
    #[serde(default, deserialize_with = "fallback")]
    pub sensitive: bool,
    #[serde(default, deserialize_with = "fallback")]
    pub spoiler_text: String,
    #[serde(default = "default_visibility")]
    pub visibility: String,
    #[serde(default, deserialize_with = "fallback")]
    pub uri: String,
    #[serde(default, deserialize_with = "fallback")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "fallback")]
    pub replies_count: u64,
    #[serde(default, deserialize_with = "fallback")]
    pub reblogs_count: u64,
    #[serde(default, deserialize_with = "fallback")]
    pub favourites_count: u64,
    #[serde(default, deserialize_with = "fallback")]
    pub favourited: bool,
    #[serde(default, deserialize_with = "fallback")]
    pub reblogged: bool,
    #[serde(default, deserialize_with = "fallback")]
    pub bookmarked: bool,
    #[serde(default, deserialize_with = "fallback")]
    pub pinned: bool,
    #[serde(default, deserialize_with = "fallback")]
    pub muted: bool,
    #[serde(default, deserialize_with = "fallback")]
    pub emojis: Vec<CustomEmoji>,
    #[serde(default, deserialize_with = "fallback")]
    pub group: Option<Group>,
}

impl Entity for Status {
    const ENTITY_TYPE: EntityType = EntityType::Statuses;

    fn id(&self) -> &str {
        &self.id
    }
}

/// Owner reference embedded in a group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GroupOwner {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Group {
    pub id: String,
    #[serde(default, deserialize_with = "fallback")]
    pub display_name: String,
    #[serde(default, deserialize_with = "fallback")]
    pub slug: String,
    #[serde(default, deserialize_with = "fallback")]
    pub note: String,
    #[serde(default, deserialize_with = "fallback")]
    pub url: String,
    #[serde(default, deserialize_with = "fallback")]
    pub avatar: String,
    #[serde(default, deserialize_with = "fallback")]
    pub header: String,
    #[serde(default, deserialize_with = "fallback")]
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "fallback")]
    pub locked: bool,
    #[serde(default, deserialize_with = "fallback")]
    pub discoverable: bool,
    #[serde(default, deserialize_with = "fallback")]
    pub membership_required: bool,
    #[serde(default, deserialize_with = "fallback")]
    pub members_count: u64,
    #[serde(default, deserialize_with = "fallback")]
    pub owner: Option<GroupOwner>,
    #[serde(default, deserialize_with = "fallback")]
    pub tags: Vec<GroupTag>,
    #[serde(default, deserialize_with = "fallback")]
    pub emojis: Vec<CustomEmoji>,
}

impl Entity for Group {
    const ENTITY_TYPE: EntityType = EntityType::Groups;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GroupTag {
    pub id: String,
    pub name: String,
    #[serde(default, deserialize_with = "fallback")]
    pub uses: u64,
    #[serde(default, deserialize_with = "fallback")]
    pub groups: u64,
}

impl Entity for GroupTag {
    const ENTITY_TYPE: EntityType = EntityType::GroupTags;

    fn id(&self) -> &str {
        &self.id
    }
}

/// A member's role within a group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupRole {
    Owner,
    Admin,
    #[default]
    User,
}

/// The viewer's relationship to a group.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GroupRelationship {
    pub id: String,
    #[serde(default, deserialize_with = "fallback")]
    pub member: bool,
    #[serde(default, deserialize_with = "fallback")]
    pub requested: bool,
    #[serde(default, deserialize_with = "fallback")]
    pub role: Option<GroupRole>,
    #[serde(default, deserialize_with = "fallback")]
    pub blocked_by: bool,
    #[serde(default, deserialize_with = "fallback")]
    pub muting: bool,
    #[serde(default, deserialize_with = "fallback")]
    pub notifying: Option<bool>,
    #[serde(default, deserialize_with = "fallback")]
    pub pending_requests: bool,
}

impl GroupRelationship {
    pub fn is_owner(&self) -> bool {
        self.role == Some(GroupRole::Owner)
    }

    pub fn is_admin(&self) -> bool {
        matches!(self.role, Some(GroupRole::Owner | GroupRole::Admin))
    }
}

impl Entity for GroupRelationship {
    const ENTITY_TYPE: EntityType = EntityType::GroupRelationships;

    fn id(&self) -> &str {
        &self.id
    }
}

/// One account's membership in a group.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GroupMembership {
    pub id: String,
    pub account: Account,
    #[serde(default, deserialize_with = "fallback")]
    pub role: GroupRole,
}

impl Entity for GroupMembership {
    const ENTITY_TYPE: EntityType = EntityType::GroupMemberships;

    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn account_json() -> Value {
        json!({
            "id": "1",
            "username": "alice",
            "acct": "alice@example.social",
            "display_name": "",
            "followers_count": 12,
            "created_at": "2023-03-01T00:00:00.000Z",
            "fields": [{"name": "site", "value": "example.com"}]
        })
    }

    #[test]
    fn test_account_display_name_falls_back_to_username() {
        let account = Account::parse(account_json()).unwrap();
        assert_eq!(account.display_name, "alice");
        assert_eq!(account.followers_count, 12);
        assert_eq!(account.domain(), Some("example.social"));
        assert!(!account.is_local());
        assert_eq!(account.fields.len(), 1);
    }

    #[test]
    fn test_account_missing_required_field_is_rejected() {
        let err = Account::parse(json!({"id": "1", "acct": "alice"})).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_malformed_optional_fields_take_defaults() {
        let mut value = account_json();
        value["followers_count"] = json!("many");
        value["locked"] = json!(null);
        value["created_at"] = json!("yesterday");

        let account = Account::parse(value).unwrap();
        assert_eq!(account.followers_count, 0);
        assert!(!account.locked);
        assert_eq!(account.created_at, DateTime::<Utc>::default());
    }

    #[test]
    fn test_relationship_defaults() {
        let relationship = Relationship::parse(json!({"id": "1", "following": true})).unwrap();
        assert!(relationship.following);
        assert!(!relationship.blocking);
        assert_eq!(relationship.note, "");
    }

    #[test]
    fn test_group_relationship_role() {
        let owner = GroupRelationship::parse(json!({"id": "g", "member": true, "role": "owner"})).unwrap();
        assert!(owner.is_owner());
        assert!(owner.is_admin());

        let unknown = GroupRelationship::parse(json!({"id": "g", "role": "superuser"})).unwrap();
        assert_eq!(unknown.role, None);
    }

    #[test]
    fn test_status_embeds_account() {
        let status = Status::parse(json!({
            "id": "100",
            "account": account_json(),
            "content": "<p>hi</p>",
            "visibility": "unlisted"
        }))
        .unwrap();
        assert_eq!(status.account.id, "1");
        assert_eq!(status.visibility, "unlisted");
        assert!(status.group.is_none());
    }

    #[test]
    fn test_group_membership() {
        let membership = GroupMembership::parse(json!({
            "id": "m1",
            "account": account_json(),
            "role": "admin"
        }))
        .unwrap();
        assert_eq!(membership.role, GroupRole::Admin);
    }
}
