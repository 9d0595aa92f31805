//! Entity types, the [`Entity`] trait, and cache paths.

use std::fmt;

use serde::de::{Deserialize, DeserializeOwned, Deserializer};
use serde_json::Value;
use tracing::warn;

use crate::EntityError;

/// The fixed set of entity types the cache knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityType {
    Accounts,
    Statuses,
    Groups,
    GroupMemberships,
    GroupMutes,
    GroupRelationships,
    GroupTags,
    PatronUsers,
    Relationships,
}

impl EntityType {
    /// Every entity type, in declaration order.
    pub const ALL: [EntityType; 9] = [
        EntityType::Accounts,
        EntityType::Statuses,
        EntityType::Groups,
        EntityType::GroupMemberships,
        EntityType::GroupMutes,
        EntityType::GroupRelationships,
        EntityType::GroupTags,
        EntityType::PatronUsers,
        EntityType::Relationships,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Accounts => "Accounts",
            EntityType::Statuses => "Statuses",
            EntityType::Groups => "Groups",
            EntityType::GroupMemberships => "GroupMemberships",
            EntityType::GroupMutes => "GroupMutes",
            EntityType::GroupRelationships => "GroupRelationships",
            EntityType::GroupTags => "GroupTags",
            EntityType::PatronUsers => "PatronUsers",
            EntityType::Relationships => "Relationships",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A server-fetched record that can live in the cache.
///
/// Values are immutable once stored: updates replace the whole value, which
/// is what lets subscribers detect changes by pointer identity.
pub trait Entity: Clone + DeserializeOwned + Send + Sync + 'static {
    /// Table this entity is stored in.
    const ENTITY_TYPE: EntityType;

    /// Stable id, unique within [`Self::ENTITY_TYPE`].
    fn id(&self) -> &str;

    /// Validate a raw payload.
    ///
    /// The default runs the serde schema. Types with post-parse
    /// normalization override this and call [`parse_with_serde`] first.
    fn parse(value: Value) -> Result<Self, EntityError> {
        parse_with_serde(value)
    }
}

/// Run the serde schema for `T`, mapping failures to a validation error.
pub fn parse_with_serde<T: Entity>(value: Value) -> Result<T, EntityError> {
    serde_json::from_value(value).map_err(|e| EntityError::Validation {
        entity_type: T::ENTITY_TYPE,
        message: e.to_string(),
    })
}

/// Parse an array payload element by element.
///
/// Invalid elements are dropped with a warning instead of failing the whole
/// response; only a non-array payload is an error.
pub fn parse_filtered<T: Entity>(value: Value) -> Result<Vec<T>, EntityError> {
    let Value::Array(items) = value else {
        return Err(EntityError::Validation {
            entity_type: T::ENTITY_TYPE,
            message: "expected an array".to_string(),
        });
    };

    let mut entities = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        match T::parse(item) {
            Ok(entity) => entities.push(entity),
            Err(e) => {
                warn!(entity_type = %T::ENTITY_TYPE, index, error = %e, "dropping invalid entity");
            }
        }
    }
    Ok(entities)
}

/// Deserialize a field, replacing a malformed value with its default.
///
/// Use together with `#[serde(default)]` so a missing field also takes the
/// default: `#[serde(default, deserialize_with = "fallback")]`.
pub fn fallback<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).unwrap_or_default())
}

/// Address of one entity in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityPath {
    pub entity_type: EntityType,
    pub id: String,
}

impl EntityPath {
    pub fn new(entity_type: EntityType, id: impl Into<String>) -> Self {
        Self {
            entity_type,
            id: id.into(),
        }
    }

    /// Path of `id` in `T`'s table.
    pub fn of<T: Entity>(id: impl Into<String>) -> Self {
        Self::new(T::ENTITY_TYPE, id)
    }
}

impl fmt::Display for EntityPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.id)
    }
}

/// Address of a named list of ids.
///
/// The key is the `:`-joined list of parts, so `[Groups, "search", "dragons"]`
/// becomes `Groups` + `"search:dragons"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListPath {
    pub entity_type: EntityType,
    pub list_key: String,
}

impl ListPath {
    pub fn new<I, S>(entity_type: EntityType, parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let list_key = parts
            .into_iter()
            .map(|p| p.as_ref().to_string())
            .collect::<Vec<_>>()
            .join(":");
        Self {
            entity_type,
            list_key,
        }
    }
}

impl fmt::Display for ListPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.list_key)
    }
}
