//! Property-based invariant tests for `JoinEngine`.
//!
//! A selection list and a target tree share one `MemoryStore`; random
//! membership churn and target writes are applied to it.
//!
//! 1. Selection order inside the engine equals the store's selection list.
//! 2. With empty targets surfaced, the joined view is exactly the selection,
//!    each key carrying its target's current value.
//! 3. With empty targets hidden, the joined view is the selection filtered
//!    to keys whose target holds a value.
//! 4. A mirror stacked on the engine never fails and equals the engine.
//! 5. Each selected target has exactly one live subscription; others none.
//! 6. Teardown releases every store listener.

use keyjoin_core::{Record, Reference};
use keyjoin_harness::{MemoryRef, MemoryStore};
use keyjoin_runtime::{JoinConfig, JoinEngine, MirrorStatus, OrderedMirror};
use proptest::prelude::*;

// ── Helpers ──────────────────────────────────────────────────────────

const UNIVERSE: usize = 6;

#[derive(Debug, Clone)]
enum Step {
    Select { key: usize, after: usize },
    Deselect { key: usize },
    Reorder { key: usize, after: usize },
    Write { key: usize, value: Option<i64> },
}

fn arb_step() -> impl Strategy<Value = Step> {
    let key = 0..UNIVERSE;
    prop_oneof![
        3 => (key.clone(), any::<usize>()).prop_map(|(key, after)| Step::Select { key, after }),
        1 => key.clone().prop_map(|key| Step::Deselect { key }),
        2 => (key.clone(), any::<usize>()).prop_map(|(key, after)| Step::Reorder { key, after }),
        3 => (key, proptest::option::weighted(0.8, -50i64..50))
            .prop_map(|(key, value)| Step::Write { key, value }),
    ]
}

fn name(key: usize) -> String {
    format!("u{key}")
}

/// After-key for a pick among `keys`, slot 0 meaning "front".
fn after_of(keys: &[String], pick: usize) -> Option<String> {
    let slot = pick % (keys.len() + 1);
    (slot > 0).then(|| keys[slot - 1].clone())
}

/// Apply `step` to the store, skipping steps invalid in the current state.
fn apply(step: &Step, members: &MemoryRef<i64>, users: &MemoryRef<i64>) {
    let keys = members.child_keys();
    match step {
        Step::Select { key, after } => {
            let key = name(*key);
            if !keys.contains(&key) {
                let after = after_of(&keys, *after);
                members
                    .insert_child(&key, 1, after.as_deref())
                    .expect("insert");
            }
        }
        Step::Deselect { key } => {
            let key = name(*key);
            if keys.contains(&key) {
                members.remove_child(&key).expect("remove");
            }
        }
        Step::Reorder { key, after } => {
            let key = name(*key);
            if keys.contains(&key) {
                let rest: Vec<String> = keys.into_iter().filter(|k| *k != key).collect();
                let after = after_of(&rest, *after);
                members.move_child(&key, after.as_deref()).expect("move");
            }
        }
        Step::Write { key, value } => {
            users.child(&name(*key)).set_value(*value).expect("write");
        }
    }
}

struct World {
    members: MemoryRef<i64>,
    users: MemoryRef<i64>,
    engine: JoinEngine<MemoryRef<i64>>,
    view: OrderedMirror<Option<i64>>,
}

fn world(config: JoinConfig) -> World {
    let store = MemoryStore::new();
    let members = store.reference("/members");
    let users = store.reference("/users");
    let engine = JoinEngine::with_config(members.clone(), users.clone(), config);
    let view = OrderedMirror::attached(&engine).expect("attach view");
    World {
        members,
        users,
        engine,
        view,
    }
}

fn expected(world: &World, surface_empty: bool) -> Vec<Record<Option<i64>>> {
    world
        .members
        .child_keys()
        .into_iter()
        .map(|key| {
            let value = world.users.child(&key).value();
            Record::new(key, value)
        })
        .filter(|r| surface_empty || r.value.is_some())
        .collect()
}

fn joined(engine: &JoinEngine<MemoryRef<i64>>) -> Vec<Record<Option<i64>>> {
    (0..engine.count())
        .map(|i| engine.get(i).expect("index below count"))
        .collect()
}

// ═════════════════════════════════════════════════════════════════════════
// 1 + 2. Surfaced empty targets: view equals the selection
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn surfaced_view_matches_selection(steps in proptest::collection::vec(arb_step(), 0..60)) {
        let world = world(JoinConfig::default());
        for step in &steps {
            apply(step, &world.members, &world.users);
            prop_assert_eq!(world.engine.selection_keys(), world.members.child_keys());
            prop_assert_eq!(joined(&world.engine), expected(&world, true));
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. Hidden empty targets: view is the resolved subset
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn hidden_view_matches_resolved_subset(steps in proptest::collection::vec(arb_step(), 0..60)) {
        let world = world(JoinConfig::default().with_surface_null_targets(false));
        for step in &steps {
            apply(step, &world.members, &world.users);
            prop_assert_eq!(world.engine.selection_keys(), world.members.child_keys());
            prop_assert_eq!(joined(&world.engine), expected(&world, false));
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. Stacked mirror never diverges
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn stacked_mirror_tracks_engine(
        steps in proptest::collection::vec(arb_step(), 0..60),
        surface_empty in any::<bool>(),
    ) {
        let config = JoinConfig::default().with_surface_null_targets(surface_empty);
        let world = world(config);
        for step in &steps {
            apply(step, &world.members, &world.users);
            prop_assert_eq!(world.view.status(), MirrorStatus::Attached);
            prop_assert_eq!(world.view.records(), joined(&world.engine));
            prop_assert_eq!(world.view.count(), world.engine.count());
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 5 + 6. Subscription accounting
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn one_subscription_per_selected_target(
        steps in proptest::collection::vec(arb_step(), 0..60),
        evict in any::<bool>(),
    ) {
        let world = world(JoinConfig::default().with_evict_on_remove(evict));
        for step in &steps {
            apply(step, &world.members, &world.users);
            let selected = world.members.child_keys();
            for key in (0..UNIVERSE).map(name) {
                let want = usize::from(selected.contains(&key));
                prop_assert_eq!(world.users.child(&key).value_listener_count(), want);
            }
        }

        world.engine.teardown();
        prop_assert_eq!(world.members.child_listener_count(), 0);
        for key in (0..UNIVERSE).map(name) {
            prop_assert_eq!(world.users.child(&key).value_listener_count(), 0);
        }
    }
}
