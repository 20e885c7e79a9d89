#![no_main]

use std::collections::HashSet;

use arbitrary::Arbitrary;
use keyjoin_core::ChildEvent;
use keyjoin_runtime::{MirrorStatus, OrderedMirror};
use libfuzzer_sys::fuzz_target;

/// Raw events over a small key space, valid or not.
#[derive(Arbitrary, Debug)]
enum Op {
    Added { key: u8, after: Option<u8>, value: i16 },
    Changed { key: u8, after: Option<u8>, value: i16 },
    Removed { key: u8 },
    Moved { key: u8, after: Option<u8> },
}

fn key(k: u8) -> String {
    format!("k{}", k % 16)
}

impl Op {
    fn to_event(&self) -> ChildEvent<i16> {
        let after = |a: &Option<u8>| a.map(key);
        match self {
            Op::Added { key: k, after: a, value } => ChildEvent::Added {
                key: key(*k),
                value: *value,
                after: after(a),
            },
            Op::Changed { key: k, after: a, value } => ChildEvent::Changed {
                key: key(*k),
                value: *value,
                after: after(a),
            },
            Op::Removed { key: k } => ChildEvent::removed(key(*k), 0),
            Op::Moved { key: k, after: a } => ChildEvent::Moved {
                key: key(*k),
                value: 0,
                after: after(a),
            },
        }
    }
}

fuzz_target!(|ops: Vec<Op>| {
    let mirror = OrderedMirror::new();
    for op in ops.iter().take(512) {
        let accepted = mirror.apply(&op.to_event()).is_ok();
        if !accepted {
            assert_eq!(mirror.status(), MirrorStatus::Failed);
            assert!(mirror.failure().is_some());
            assert!(mirror.apply(&op.to_event()).is_err());
            break;
        }
        let keys = mirror.keys();
        let unique: HashSet<&String> = keys.iter().collect();
        assert_eq!(unique.len(), keys.len());
        assert_eq!(mirror.count(), keys.len());
    }
});
