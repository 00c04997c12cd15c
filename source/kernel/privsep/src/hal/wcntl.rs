// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! World controller: vector base, entry check and the WORLD1 switch trigger.

use super::regs::*;
use super::Mmio;

pub struct Wcntl<'a, M: Mmio> {
    regs: &'a M,
}

impl<'a, M: Mmio> Wcntl<'a, M> {
    pub const fn new(regs: &'a M) -> Self {
        Self { regs }
    }

    pub fn set_mtvec_base(&self, base: u32) {
        self.regs.write32(WCL_MTVEC_BASE, base);
    }

    pub fn mtvec_base(&self) -> u32 {
        self.regs.read32(WCL_MTVEC_BASE)
    }

    /// Bitmask of interrupt numbers that trigger a world switch back to WORLD0.
    pub fn set_entry_check(&self, mask: u32) {
        self.regs.write32(WCL_ENTRY_CHECK, mask);
    }

    pub fn entry_check(&self) -> u32 {
        self.regs.read32(WCL_ENTRY_CHECK)
    }

    /// Arms the switch into WORLD1 at `entry` on the next `mret`.
    pub fn set_w1_entry(&self, entry: u32) {
        self.regs.write32(WCL_WORLD_PREPARE, 1 << 1);
        self.regs.write32(WCL_WORLD_TRIGGER_ADDR, entry);
        self.regs.write32(WCL_WORLD_UPDATE, 1);
    }

    /// Saved world-status entry; 0 for indices past the table.
    pub fn statustable_entry(&self, index: u8) -> u32 {
        if index >= WCL_STATUSTABLE_ENTRIES {
            return 0;
        }
        self.regs.read32(WCL_STATUSTABLE_BASE + 4 * index as usize)
    }

    pub fn current_statustable(&self) -> u8 {
        self.regs.read32(WCL_STATUSTABLE_CURRENT) as u8
    }

    pub fn set_mstatus_mie(&self, enabled: bool) {
        self.regs.write32(WCL_MSTATUS_MIE, enabled as u32);
    }
}
