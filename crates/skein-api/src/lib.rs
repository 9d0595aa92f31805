//! Server-facing half of the skein client.
//!
//! - [`HttpApi`]: REST client implementing [`skein_entities::Api`]
//! - [`schemas`]: the server's entity types
//! - [`features`]: per-endpoint hooks built on [`skein_entities::EntityCache`]
//! - [`streaming`]: live timeline updates written into the cache

mod client;
pub mod features;
pub mod schemas;
pub mod streaming;

pub use client::{HttpApi, parse_link_header};
pub use features::Timeline;
pub use schemas::{Account, Group, GroupMembership, GroupRelationship, GroupRole, GroupTag, Relationship, Status};
pub use streaming::{StreamError, StreamEvent, StreamManager};
