// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Hardware abstraction for the permission controller, world controller and
//! interrupt matrix. Every accessor is a plain register read or write; there is
//! no shadow state.

pub mod intc;
pub mod permc;
pub mod regs;
pub mod wcntl;

#[cfg(test)]
pub mod mock;

/// Minimal MMIO accessor over absolute register addresses.
pub trait Mmio {
    /// Reads a 32-bit register.
    fn read32(&self, addr: usize) -> u32;
    /// Writes a 32-bit register.
    fn write32(&self, addr: usize, value: u32);

    /// Read-modify-write of the field `mask << shift`.
    #[inline]
    fn set_field(&self, addr: usize, shift: u32, mask: u32, value: u32) {
        let cur = self.read32(addr) & !(mask << shift);
        self.write32(addr, cur | ((value & mask) << shift));
    }

    /// Reads the field `mask << shift`.
    #[inline]
    fn get_field(&self, addr: usize, shift: u32, mask: u32) -> u32 {
        (self.read32(addr) >> shift) & mask
    }
}

impl<T: Mmio + ?Sized> Mmio for &T {
    fn read32(&self, addr: usize) -> u32 {
        (**self).read32(addr)
    }

    fn write32(&self, addr: usize, value: u32) {
        (**self).write32(addr, value)
    }
}

/// Volatile access to the real register file.
pub struct Volatile {
    _private: (),
}

impl Volatile {
    /// # Safety
    /// The caller guarantees the SoC register blocks in [`regs`] are mapped at their
    /// documented addresses and that no other owner relies on their contents.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl Mmio for Volatile {
    #[inline]
    fn read32(&self, addr: usize) -> u32 {
        // SAFETY: construction of `Volatile` asserts the register file is mapped.
        unsafe { core::ptr::read_volatile(addr as *const u32) }
    }

    #[inline]
    fn write32(&self, addr: usize, value: u32) {
        // SAFETY: construction of `Volatile` asserts the register file is mapped.
        unsafe { core::ptr::write_volatile(addr as *mut u32, value) }
    }
}
