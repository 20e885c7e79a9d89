#![no_main]

use arbitrary::Arbitrary;
use keyjoin_core::{ChildEvent, EventSource, ListenerRegistry, Reference, Subscription, ValueEvent};
use keyjoin_harness::MemoryStore;
use keyjoin_runtime::{JoinConfig, JoinEngine, MirrorStatus, OrderedMirror};
use libfuzzer_sys::fuzz_target;
use std::rc::Rc;

/// Selection events are sent raw, so unknown and duplicate keys occur.
#[derive(Arbitrary, Debug)]
enum Op {
    Added { key: u8, after: Option<u8> },
    Changed { key: u8, after: Option<u8> },
    Removed { key: u8 },
    Moved { key: u8, after: Option<u8> },
    Write { key: u8, value: Option<i16> },
}

#[derive(Arbitrary, Debug)]
struct Input {
    surface_null_targets: bool,
    evict_on_remove: bool,
    ops: Vec<Op>,
}

#[derive(Default)]
struct Feed {
    children: ListenerRegistry<ChildEvent<()>>,
    values: ListenerRegistry<ValueEvent<()>>,
}

impl EventSource for Feed {
    type Value = ();

    fn subscribe_children<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ChildEvent<()>) + 'static,
    {
        self.children.subscribe(listener)
    }

    fn subscribe_value<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ValueEvent<()>) + 'static,
    {
        self.values.subscribe(listener)
    }
}

fn key(k: u8) -> String {
    format!("u{}", k % 8)
}

fuzz_target!(|input: Input| {
    let store = MemoryStore::<i16>::new();
    let users = store.reference("/users");
    let feed = Rc::new(Feed::default());
    let config = JoinConfig::default()
        .with_surface_null_targets(input.surface_null_targets)
        .with_evict_on_remove(input.evict_on_remove);
    let engine = JoinEngine::with_config(Rc::clone(&feed), users.clone(), config);
    let view = OrderedMirror::attached(&engine).expect("empty engine replays nothing");

    for op in input.ops.iter().take(512) {
        let event = match op {
            Op::Added { key: k, after } => ChildEvent::added(key(*k), (), after.map(key).as_deref()),
            Op::Changed { key: k, after } => {
                ChildEvent::changed(key(*k), (), after.map(key).as_deref())
            }
            Op::Removed { key: k } => ChildEvent::removed(key(*k), ()),
            Op::Moved { key: k, after } => ChildEvent::moved(key(*k), (), after.map(key).as_deref()),
            Op::Write { key: k, value } => {
                let _ = users.child(&key(*k)).set_value(*value);
                continue;
            }
        };
        feed.children.notify(&event);

        assert_eq!(view.status(), MirrorStatus::Attached);
        assert_eq!(view.keys(), engine.keys());
        assert_eq!(engine.count(), engine.keys().len());
    }

    engine.teardown();
    for k in 0..8 {
        assert_eq!(users.child(&key(k)).value_listener_count(), 0);
    }
});
