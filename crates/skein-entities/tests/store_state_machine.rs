//! Stateful property testing for the store and list index.
//!
//! Random sequences of upserts, removals and list writes are applied both to
//! a real `EntityStore` and to a plain reference model. After every step the
//! two must agree, and every list must be free of duplicate ids.

use std::collections::{HashMap, HashSet};

use proptest::prelude::*;
use proptest_state_machine::{ReferenceStateMachine, StateMachineTest, prop_state_machine};
use serde::Deserialize;

use skein_entities::{Entity, EntityStore, EntityType, ListPath, ListPosition};

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct Note {
    id: String,
    body: u8,
}

impl Entity for Note {
    const ENTITY_TYPE: EntityType = EntityType::Statuses;

    fn id(&self) -> &str {
        &self.id
    }
}

fn timeline() -> ListPath {
    ListPath::new(EntityType::Statuses, ["timeline"])
}

/// Operations applied to the store.
#[derive(Debug, Clone)]
pub enum StoreOperation {
    Put { id: String, body: u8 },
    Remove { id: String, preserve_lists: bool },
    SetIds { ids: Vec<String> },
    Append { ids: Vec<String> },
    Prepend { ids: Vec<String> },
}

/// Reference model: a map of entities and one ordered list.
#[derive(Clone, Debug, Default)]
pub struct StoreModel {
    pub entities: HashMap<String, u8>,
    pub list: Vec<String>,
}

fn dedup(ids: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

fn id_strategy() -> impl Strategy<Value = String> {
    (0u8..8).prop_map(|n| n.to_string())
}

fn ids_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(id_strategy(), 0..6)
}

impl ReferenceStateMachine for StoreModel {
    type State = Self;
    type Transition = StoreOperation;

    fn init_state() -> BoxedStrategy<Self::State> {
        Just(Self::default()).boxed()
    }

    fn transitions(_state: &Self::State) -> BoxedStrategy<Self::Transition> {
        prop_oneof![
            4 => (id_strategy(), any::<u8>()).prop_map(|(id, body)| StoreOperation::Put { id, body }),
            2 => (id_strategy(), any::<bool>())
                .prop_map(|(id, preserve_lists)| StoreOperation::Remove { id, preserve_lists }),
            1 => ids_strategy().prop_map(|ids| StoreOperation::SetIds { ids }),
            2 => ids_strategy().prop_map(|ids| StoreOperation::Append { ids }),
            2 => ids_strategy().prop_map(|ids| StoreOperation::Prepend { ids }),
        ]
        .boxed()
    }

    fn apply(mut state: Self::State, transition: &Self::Transition) -> Self::State {
        match transition {
            StoreOperation::Put { id, body } => {
                state.entities.insert(id.clone(), *body);
            }
            StoreOperation::Remove { id, preserve_lists } => {
                state.entities.remove(id);
                if !preserve_lists {
                    state.list.retain(|i| i != id);
                }
            }
            StoreOperation::SetIds { ids } => {
                state.list = dedup(ids.iter().cloned());
            }
            StoreOperation::Append { ids } => {
                state.list = dedup(state.list.iter().cloned().chain(ids.iter().cloned()));
            }
            StoreOperation::Prepend { ids } => {
                state.list = dedup(ids.iter().cloned().chain(state.list.iter().cloned()));
            }
        }
        state
    }
}

/// Test harness wrapping a real store.
pub struct StoreHarness {
    store: EntityStore,
}

impl StoreHarness {
    fn apply_operation(&self, op: &StoreOperation) {
        let path = timeline();
        match op {
            StoreOperation::Put { id, body } => {
                self.store.put(vec![Note {
                    id: id.clone(),
                    body: *body,
                }]);
            }
            StoreOperation::Remove { id, preserve_lists } => {
                self.store
                    .remove(EntityType::Statuses, &[id.clone()], *preserve_lists);
            }
            StoreOperation::SetIds { ids } => {
                self.store.insert_list(&path, ids.clone(), ListPosition::Replace);
            }
            StoreOperation::Append { ids } => {
                self.store.insert_list(&path, ids.clone(), ListPosition::End);
            }
            StoreOperation::Prepend { ids } => {
                self.store.insert_list(&path, ids.clone(), ListPosition::Start);
            }
        }
    }

    fn verify_invariants(&self, model: &StoreModel) {
        // Invariant 1: one value per id, matching the model
        assert_eq!(self.store.len(EntityType::Statuses), model.entities.len());
        for (id, body) in &model.entities {
            let note = self.store.get::<Note>(id).expect("entity missing from store");
            assert_eq!(note.body, *body, "body mismatch for {}", id);
        }

        // Invariant 2: list order matches the model
        let ids = self.store.list_ids(&timeline());
        assert_eq!(ids, model.list);

        // Invariant 3: no duplicate ids in a list
        let unique: HashSet<&String> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len(), "duplicate ids in list: {:?}", ids);

        // Invariant 4: resolving the list skips ids with no entity
        let resolved = self.store.list::<Note>(&timeline());
        let expected = model
            .list
            .iter()
            .filter(|id| model.entities.contains_key(*id))
            .count();
        assert_eq!(resolved.len(), expected);
    }
}

impl StateMachineTest for StoreHarness {
    type SystemUnderTest = Self;
    type Reference = StoreModel;

    fn init_test(
        _ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) -> Self::SystemUnderTest {
        Self {
            store: EntityStore::new(),
        }
    }

    fn apply(
        state: Self::SystemUnderTest,
        ref_state: &<Self::Reference as ReferenceStateMachine>::State,
        transition: <Self::Reference as ReferenceStateMachine>::Transition,
    ) -> Self::SystemUnderTest {
        state.apply_operation(&transition);
        state.verify_invariants(ref_state);
        state
    }

    fn check_invariants(
        state: &Self::SystemUnderTest,
        ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) {
        state.verify_invariants(ref_state);
    }
}

prop_state_machine! {
    #![proptest_config(ProptestConfig {
        cases: 100,
        max_shrink_iters: 10000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn store_state_machine_test(sequential 1..60 => StoreHarness);
}

#[test]
fn test_set_ids_dedups_first_seen() {
    let store = EntityStore::new();
    let ids: Vec<String> = ["3", "1", "3", "2", "1"].iter().map(|s| s.to_string()).collect();
    store.insert_list(&timeline(), ids, ListPosition::Replace);
    assert_eq!(store.list_ids(&timeline()), vec!["3", "1", "2"]);
}
