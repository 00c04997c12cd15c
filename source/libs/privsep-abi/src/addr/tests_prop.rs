// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for the address classifier
//! OWNERS: @kernel-team
//! NOTE: Tests only; no classifier logic.
//!
//! TEST_SCOPE:
//!   - The predicate families partition the address space
//!   - Range checks agree with per-byte checks at window edges
//!
//! TEST_SCENARIOS:
//!   - predicate_families_are_disjoint(): at most one family accepts any address
//!   - classify_agrees_with_predicates(): classify() names the single accepting family
//!   - narrow_ram_predicates_imply_wide_ones(): uiram => user-i, udram => user-d
//!   - udram_range_matches_endpoints(): range check equals first/last byte checks

use super::fixtures::layout;
use super::{AddrClass, Layout};
use proptest::prelude::*;

fn arb_addr() -> impl Strategy<Value = usize> {
    let l = layout();
    prop_oneof![
        any::<u32>().prop_map(|a| a as usize),
        (l.soc.dram.start - 0x100..l.soc.dram.end + 0x100),
        (l.soc.iram.start - 0x100..l.soc.iram.end + 0x100),
        (l.soc.drom.start..l.soc.drom.end + 0x100),
        (l.soc.irom.start..l.soc.irom.end + 0x100),
        (l.linker.w1_dram.start - 8..l.linker.w1_dram.end + 8),
        (l.linker.w1_iram.start - 8..l.linker.w1_iram.end + 8),
        (l.soc.rtc_dram.start - 8..l.soc.rtc_dram.end + 8),
    ]
}

fn families(l: &Layout, addr: usize) -> [bool; 4] {
    [
        l.is_valid_user_i_addr(addr),
        l.is_valid_user_d_addr(addr),
        l.is_valid_kernel_i_addr(addr),
        l.is_valid_kernel_d_addr(addr),
    ]
}

proptest! {
    #[test]
    fn predicate_families_are_disjoint(addr in arb_addr()) {
        let l = layout();
        let hits = families(&l, addr).iter().filter(|hit| **hit).count();
        prop_assert!(hits <= 1);
    }

    #[test]
    fn classify_agrees_with_predicates(addr in arb_addr()) {
        let l = layout();
        let [ui, ud, ki, kd] = families(&l, addr);
        let expected = if ui {
            AddrClass::UserInstruction
        } else if ud {
            AddrClass::UserData
        } else if ki {
            AddrClass::KernelInstruction
        } else if kd {
            AddrClass::KernelData
        } else {
            AddrClass::Neither
        };
        prop_assert_eq!(l.classify(addr), expected);
    }

    #[test]
    fn narrow_ram_predicates_imply_wide_ones(addr in arb_addr()) {
        let l = layout();
        if l.is_valid_uiram_addr(addr) {
            prop_assert!(l.is_valid_user_i_addr(addr));
        }
        if l.is_valid_udram_addr(addr) {
            prop_assert!(l.is_valid_user_d_addr(addr));
            prop_assert!(!l.is_valid_kdram_addr(addr));
        }
    }

    #[test]
    fn udram_range_matches_endpoints(addr in arb_addr(), len in 1usize..0x400) {
        let l = layout();
        let last = addr.saturating_add(len - 1);
        let expected = l.is_valid_udram_addr(addr) && l.is_valid_udram_addr(last);
        prop_assert_eq!(l.is_valid_udram_range(addr, len), expected);
    }
}
