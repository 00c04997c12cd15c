// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Interrupt matrix routing and CPU interrupt configuration.

use super::regs::*;
use super::Mmio;

/// CPU interrupt number used for permission violations.
pub const VIOLATION_CPU_INT: u32 = 2;
/// Priority of the violation interrupt.
pub const VIOLATION_PRIORITY: u32 = 3;

pub struct Intc<'a, M: Mmio> {
    regs: &'a M,
}

impl<'a, M: Mmio> Intc<'a, M> {
    pub const fn new(regs: &'a M) -> Self {
        Self { regs }
    }

    /// Routes a peripheral interrupt source to a CPU interrupt line.
    pub fn route(&self, source: u32, cpu_int: u32) {
        self.regs.write32(INTERRUPT_BASE + 4 * source as usize, cpu_int);
    }

    pub fn routed_to(&self, source: u32) -> u32 {
        self.regs.read32(INTERRUPT_BASE + 4 * source as usize)
    }

    pub fn enable(&self, cpu_int: u32) {
        self.regs.set_field(CPU_INT_ENABLE, cpu_int, 1, 1);
    }

    /// Level-triggered when `edge` is false.
    pub fn set_type(&self, cpu_int: u32, edge: bool) {
        self.regs.set_field(CPU_INT_TYPE, cpu_int, 1, edge as u32);
    }

    pub fn set_priority(&self, cpu_int: u32, priority: u32) {
        self.regs.write32(CPU_INT_PRI_0 + 4 * cpu_int as usize, priority & CPU_INT_PRI_V);
    }
}
