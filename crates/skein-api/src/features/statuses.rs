use std::sync::Arc;

use skein_entities::{Api, EntitiesOptions, EntitiesQuery, EntityCache, EntityOptions, EntityQuery, EntityType, ListPath};

use super::{get, get_page};
use crate::schemas::Status;

/// One status by id.
pub fn use_status(cache: &EntityCache, api: &Arc<dyn Api>, status_id: &str, options: EntityOptions) -> EntityQuery<Status> {
    let fetch = get(api, format!("/api/v1/statuses/{}", status_id), Vec::new());
    cache.entity::<Status>(status_id, fetch, options)
}

/// A status timeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Timeline {
    Home,
    Public,
    Local,
    Account(String),
    Group(String),
}

impl Timeline {
    fn key(&self) -> String {
        match self {
            Timeline::Home => "home".to_string(),
            Timeline::Public => "public".to_string(),
            Timeline::Local => "local".to_string(),
            Timeline::Account(id) => format!("account:{}", id),
            Timeline::Group(id) => format!("group:{}", id),
        }
    }

    fn endpoint(&self) -> (String, Vec<(&'static str, String)>) {
        match self {
            Timeline::Home => ("/api/v1/timelines/home".to_string(), Vec::new()),
            Timeline::Public => ("/api/v1/timelines/public".to_string(), Vec::new()),
            Timeline::Local => ("/api/v1/timelines/public".to_string(), vec![("local", "true".to_string())]),
            Timeline::Account(id) => (format!("/api/v1/accounts/{}/statuses", id), Vec::new()),
            Timeline::Group(id) => (format!("/api/v1/timelines/group/{}", id), Vec::new()),
        }
    }

    /// Query parameters selecting this timeline's streaming channel, if it
    /// has one.
    pub fn stream_params(&self) -> Option<Vec<(&'static str, String)>> {
        match self {
            Timeline::Home => Some(vec![("stream", "user".to_string())]),
            Timeline::Public => Some(vec![("stream", "public".to_string())]),
            Timeline::Local => Some(vec![("stream", "public:local".to_string())]),
            Timeline::Account(_) => None,
            Timeline::Group(id) => Some(vec![("stream", "group".to_string()), ("group", id.clone())]),
        }
    }

    /// Where the timeline's ids live in the store.
    pub fn list_path(&self) -> ListPath {
        ListPath::new(EntityType::Statuses, ["timeline", self.key().as_str()])
    }
}

/// A paginated timeline.
pub fn use_timeline(
    cache: &EntityCache,
    api: &Arc<dyn Api>,
    timeline: &Timeline,
    options: EntitiesOptions,
) -> EntitiesQuery<Status> {
    let (path, query) = timeline.endpoint();
    cache
        .entities::<Status>(timeline.list_path(), get(api, path, query), options)
        .with_pages(get_page(api))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_timeline_paths_are_distinct() {
        let timelines = [
            Timeline::Home,
            Timeline::Public,
            Timeline::Local,
            Timeline::Account("1".to_string()),
            Timeline::Group("1".to_string()),
        ];
        let mut keys: Vec<String> = timelines.iter().map(|t| t.list_path().list_key).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), timelines.len());
        assert_eq!(Timeline::Group("9".to_string()).list_path().list_key, "timeline:group:9");
    }

    #[test]
    fn test_local_timeline_uses_public_endpoint() {
        let (path, query) = Timeline::Local.endpoint();
        assert_eq!(path, "/api/v1/timelines/public");
        assert_eq!(query, vec![("local", "true".to_string())]);
    }
}
