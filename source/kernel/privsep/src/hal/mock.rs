// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! In-memory register bank for host tests. Unwritten registers read as zero.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use spin::Mutex;

use super::Mmio;

#[derive(Default)]
pub struct RegisterBank {
    regs: Mutex<BTreeMap<usize, u32>>,
    writes: Mutex<Vec<(usize, u32)>>,
}

impl RegisterBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a register without recording a write (models hardware-owned state).
    pub fn poke(&self, addr: usize, value: u32) {
        self.regs.lock().insert(addr, value);
    }

    pub fn peek(&self, addr: usize) -> u32 {
        self.regs.lock().get(&addr).copied().unwrap_or(0)
    }

    /// Every write performed through [`Mmio`], in order.
    pub fn writes(&self) -> Vec<(usize, u32)> {
        self.writes.lock().clone()
    }

    /// Index of the first write to `addr`, if any.
    pub fn first_write_to(&self, addr: usize) -> Option<usize> {
        self.writes.lock().iter().position(|(a, _)| *a == addr)
    }

    /// Index of the last write to `addr`, if any.
    pub fn last_write_to(&self, addr: usize) -> Option<usize> {
        self.writes.lock().iter().rposition(|(a, _)| *a == addr)
    }
}

impl Mmio for RegisterBank {
    fn read32(&self, addr: usize) -> u32 {
        self.peek(addr)
    }

    fn write32(&self, addr: usize, value: u32) {
        self.regs.lock().insert(addr, value);
        self.writes.lock().push((addr, value));
    }
}
