// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for the opaque-handle map
//! OWNERS: @kernel-team
//! NOTE: Tests only; no map logic.
//!
//! TEST_SCOPE:
//!   - Issued handles resolve to their object and type until removed
//!   - Removed and forged handles never resolve
//!
//! TEST_SCENARIOS:
//!   - add_verify_remove_matches_model(): random op sequences agree with a reference model
//!   - arbitrary_raw_values_never_panic(): verify/get/remove on any u32 are total

use alloc::vec::Vec;

use super::{HandleMap, ObjType};
use crate::fixtures::layout;
use proptest::prelude::*;

const TYPES: [ObjType; 8] = [
    ObjType::Queue,
    ObjType::Task,
    ObjType::EspTimer,
    ObjType::XTimer,
    ObjType::EventGroup,
    ObjType::Netif,
    ObjType::Gpio,
    ObjType::EventHandler,
];

#[derive(Clone, Debug)]
enum Op {
    Add(usize),
    Remove(usize),
}

fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    proptest::collection::vec(
        prop_oneof![(0usize..8).prop_map(Op::Add), (0usize..64).prop_map(Op::Remove)],
        1..96,
    )
}

proptest! {
    #[test]
    fn add_verify_remove_matches_model(ops in arb_ops()) {
        let map = HandleMap::new(layout(), 4, true).unwrap();
        // (raw handle, type, ptr, live)
        let mut model: Vec<(u32, ObjType, usize, bool)> = Vec::new();

        for (step, op) in ops.iter().enumerate() {
            match *op {
                Op::Add(t) => {
                    let ptr = 0x3FCA_0000 + step * 16;
                    let h = map.add(ptr, TYPES[t]).unwrap();
                    prop_assert!(model.iter().all(|(raw, _, _, live)| !*live || *raw != h.raw()));
                    model.push((h.raw(), TYPES[t], ptr, true));
                }
                Op::Remove(i) => {
                    if let Some(rec) = model.get_mut(i) {
                        map.remove(rec.0);
                        rec.3 = false;
                    }
                }
            }
        }

        for (raw, ty, ptr, live) in &model {
            let got = map.verify(*raw, *ty);
            if *live {
                prop_assert_eq!(got.map(|e| e.ptr), Some(*ptr));
                for other in TYPES.iter().filter(|o| *o != ty) {
                    prop_assert!(map.verify(*raw, *other).is_none());
                }
            } else {
                prop_assert!(got.is_none());
            }
        }
        prop_assert_eq!(map.live().len(), model.iter().filter(|r| r.3).count());
    }

    #[test]
    fn arbitrary_raw_values_never_panic(raw in any::<u32>(), t in 0usize..8) {
        let map = HandleMap::new(layout(), 4, true).unwrap();
        let _ = map.add(0x3FCA_0000, ObjType::Queue).unwrap();
        let _ = map.verify(raw, TYPES[t]);
        let _ = map.get(raw);
        map.remove(raw);
    }
}
