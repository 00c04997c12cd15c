// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for the dispatcher's entry check
//! OWNERS: @runtime
//! NOTE: Tests only; no dispatch logic.
//!
//! TEST_SCOPE:
//!   - No record, however forged, reaches a non-user entry
//!
//! TEST_SCENARIOS:
//!   - arbitrary_records_never_escape(): raw 24-byte records
//!   - decoded_records_follow_the_classifier(): well-formed records, any target

use proptest::prelude::*;
use privsep_abi::DispatchMsg;

use super::{target, Dispatched, Dispatcher, Invoke};
use crate::fake::FakeTrap;
use crate::fixtures;
use crate::sys::Sys;

#[derive(Default)]
struct Count(usize);

impl Invoke for Count {
    fn invoke(&mut self, msg: &DispatchMsg) {
        assert!(fixtures::layout().is_valid_user_i_addr(target(msg) as usize));
        self.0 += 1;
    }
}

fn arb_target() -> impl Strategy<Value = u32> {
    prop_oneof![
        any::<u32>(),
        0x403A_FF00u32..0x403C_0100,
        0x4238_0000u32..0x4240_0100,
        0x4037_C000u32..0x403E_0000,
    ]
}

fn arb_msg() -> impl Strategy<Value = DispatchMsg> {
    (0u8..4, arb_target(), any::<u32>(), any::<i32>()).prop_map(|(tag, entry, arg, id)| match tag {
        0 => DispatchMsg::Gpio { isr: entry, arg },
        1 => DispatchMsg::EspTimer { callback: entry, arg },
        2 => DispatchMsg::XTimer { callback: entry, timer: arg },
        _ => DispatchMsg::Event { handler: entry, arg, base: 0x3FCC_0100, id, data: 0 },
    })
}

proptest! {
    #[test]
    fn arbitrary_records_never_escape(raw in proptest::collection::vec(any::<u8>(), 24)) {
        let sys = Sys::new(FakeTrap::default());
        let dispatcher = Dispatcher::new(&sys, fixtures::layout(), 1);
        let mut count = Count::default();
        let outcome = dispatcher.handle(&raw, &mut count);
        prop_assert_eq!(count.0, matches!(outcome, Dispatched::Invoked(_)) as usize);
    }

    #[test]
    fn decoded_records_follow_the_classifier(msg in arb_msg()) {
        let sys = Sys::new(FakeTrap::default());
        let dispatcher = Dispatcher::new(&sys, fixtures::layout(), 1);
        let mut count = Count::default();
        let outcome = dispatcher.handle(&msg.encode(), &mut count);
        if fixtures::layout().is_valid_user_i_addr(target(&msg) as usize) {
            prop_assert_eq!(outcome, Dispatched::Invoked(msg));
        } else {
            prop_assert_eq!(outcome, Dispatched::Rejected(msg));
            prop_assert_eq!(count.0, 0);
        }
    }
}
