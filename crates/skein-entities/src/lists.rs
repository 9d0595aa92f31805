//! Named, ordered lists of entity ids.
//!
//! Lists never hold values. A list is a sequence of ids resolved against the
//! store at read time, so one entity can appear in any number of lists and
//! an update to it shows up in all of them.

use std::collections::{HashMap, HashSet};

use crate::{EntityType, ListPath};

/// Pagination metadata attached to a list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListState {
    /// URL of the next page.
    pub next: Option<String>,
    /// URL of the previous page.
    pub prev: Option<String>,
    /// Total number of items reported by the server.
    pub total_count: Option<u64>,
}

/// Where newly fetched ids go relative to the existing ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListPosition {
    /// Replace the list wholesale.
    Replace,
    /// Add after the existing ids.
    End,
    /// Add before the existing ids.
    Start,
}

/// One list's ids and pagination state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityList {
    ids: Vec<String>,
    state: ListState,
}

impl EntityList {
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn state(&self) -> &ListState {
        &self.state
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|i| i == id)
    }

    fn insert(&mut self, ids: Vec<String>, position: ListPosition) {
        self.ids = match position {
            ListPosition::Replace => dedup_ids(ids),
            ListPosition::End => dedup_ids(std::mem::take(&mut self.ids).into_iter().chain(ids)),
            ListPosition::Start => dedup_ids(ids.into_iter().chain(std::mem::take(&mut self.ids))),
        };
    }

    fn remove(&mut self, ids: &HashSet<&str>) -> bool {
        let before = self.ids.len();
        self.ids.retain(|id| !ids.contains(id.as_str()));
        self.ids.len() != before
    }
}

/// Drop repeated ids, keeping the first occurrence of each.
pub fn dedup_ids<I>(ids: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    ids.into_iter()
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

/// All lists, keyed by path.
#[derive(Debug, Clone, Default)]
pub struct ListIndex {
    lists: HashMap<ListPath, EntityList>,
}

impl ListIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &ListPath) -> Option<&EntityList> {
        self.lists.get(path)
    }

    /// Ids in `path`, empty when the list does not exist yet.
    pub fn ids(&self, path: &ListPath) -> Vec<String> {
        self.lists
            .get(path)
            .map(|l| l.ids.clone())
            .unwrap_or_default()
    }

    /// Replace the ids in `path`, creating the list if needed.
    pub fn set_ids(&mut self, path: &ListPath, ids: Vec<String>) {
        self.insert_ids(path, ids, ListPosition::Replace);
    }

    /// Add ids after the existing ones (next page).
    pub fn append_ids(&mut self, path: &ListPath, ids: Vec<String>) {
        self.insert_ids(path, ids, ListPosition::End);
    }

    /// Add ids before the existing ones (previous page, live updates).
    pub fn prepend_ids(&mut self, path: &ListPath, ids: Vec<String>) {
        self.insert_ids(path, ids, ListPosition::Start);
    }

    pub fn insert_ids(&mut self, path: &ListPath, ids: Vec<String>, position: ListPosition) {
        self.lists
            .entry(path.clone())
            .or_default()
            .insert(ids, position);
    }

    pub fn state(&self, path: &ListPath) -> ListState {
        self.lists
            .get(path)
            .map(|l| l.state.clone())
            .unwrap_or_default()
    }

    pub fn set_state(&mut self, path: &ListPath, state: ListState) {
        self.lists.entry(path.clone()).or_default().state = state;
    }

    /// Strip `ids` from every list of `entity_type`.
    ///
    /// Returns the paths whose contents changed.
    pub fn remove_ids(&mut self, entity_type: EntityType, ids: &[String]) -> Vec<ListPath> {
        let ids: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut changed: Vec<ListPath> = self
            .lists
            .iter_mut()
            .filter(|(path, _)| path.entity_type == entity_type)
            .filter_map(|(path, list)| list.remove(&ids).then(|| path.clone()))
            .collect();
        changed.sort();
        changed
    }

    /// Paths of every list of `entity_type`.
    pub fn paths(&self, entity_type: EntityType) -> Vec<ListPath> {
        let mut paths: Vec<_> = self
            .lists
            .keys()
            .filter(|p| p.entity_type == entity_type)
            .cloned()
            .collect();
        paths.sort();
        paths
    }

    pub fn clear(&mut self) {
        self.lists.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_set_ids_dedups_preserving_first_seen_order() {
        let mut index = ListIndex::new();
        let path = ListPath::new(EntityType::Accounts, ["blocks"]);

        index.set_ids(&path, ids(&["3", "1", "3", "2", "1"]));
        assert_eq!(index.ids(&path), ids(&["3", "1", "2"]));
    }

    #[test]
    fn test_set_ids_replaces() {
        let mut index = ListIndex::new();
        let path = ListPath::new(EntityType::Accounts, ["blocks"]);

        index.set_ids(&path, ids(&["1", "2"]));
        index.set_ids(&path, ids(&["9"]));
        assert_eq!(index.ids(&path), ids(&["9"]));
    }

    #[test]
    fn test_append_keeps_existing_positions() {
        let mut index = ListIndex::new();
        let path = ListPath::new(EntityType::Statuses, ["home"]);

        index.set_ids(&path, ids(&["1", "2"]));
        index.append_ids(&path, ids(&["2", "3"]));
        assert_eq!(index.ids(&path), ids(&["1", "2", "3"]));
    }

    #[test]
    fn test_prepend_moves_ids_to_front() {
        let mut index = ListIndex::new();
        let path = ListPath::new(EntityType::Statuses, ["home"]);

        index.set_ids(&path, ids(&["1", "2", "3"]));
        index.prepend_ids(&path, ids(&["4", "3"]));
        assert_eq!(index.ids(&path), ids(&["4", "3", "1", "2"]));
    }

    #[test]
    fn test_remove_ids_only_touches_matching_type() {
        let mut index = ListIndex::new();
        let followers = ListPath::new(EntityType::Accounts, ["followers", "1"]);
        let following = ListPath::new(EntityType::Accounts, ["following", "1"]);
        let statuses = ListPath::new(EntityType::Statuses, ["home"]);

        index.set_ids(&followers, ids(&["a", "b"]));
        index.set_ids(&following, ids(&["c"]));
        index.set_ids(&statuses, ids(&["a"]));

        let changed = index.remove_ids(EntityType::Accounts, &ids(&["a"]));
        assert_eq!(changed, vec![followers.clone()]);
        assert_eq!(index.ids(&followers), ids(&["b"]));
        assert_eq!(index.ids(&following), ids(&["c"]));
        assert_eq!(index.ids(&statuses), ids(&["a"]));
    }

    #[test]
    fn test_missing_list_reads_empty() {
        let index = ListIndex::new();
        let path = ListPath::new(EntityType::Groups, ["search", "dragons"]);
        assert!(index.ids(&path).is_empty());
        assert_eq!(index.state(&path), ListState::default());
        assert!(index.get(&path).is_none());
    }
}
