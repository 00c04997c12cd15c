// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Opaque-handle map translating protected objects into user-visible handles
//! OWNERS: @kernel-team
//! PUBLIC API: HandleMap{add,verify,get,remove,allocated_capacity,live}, Handle, ObjType, Entry
//! DEPENDS_ON: privsep_abi::Layout, sync::IrqMutex, cpu::in_isr, crc32fast
//! INVARIANTS: Handles are never raw pointers; 0 is "no handle"; a slot is reused only after
//!             remove() and always with a new generation; never used from interrupt context
//! ADR: docs/adr/0001-world-separation.md

use alloc::vec::Vec;
use core::fmt;

use privsep_abi::Layout;

use crate::sync::IrqMutex;

#[cfg(test)]
mod tests_prop;

/// Kind of protected object behind a handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ObjType {
    Queue = 0xF5A1,
    Task = 0xF5A2,
    EspTimer = 0xF5A3,
    XTimer = 0xF5A4,
    EventGroup = 0xF5A5,
    Netif = 0xF5A6,
    Gpio = 0xF5A7,
    EventHandler = 0xF5A8,
}

/// User-visible handle: `generation << 16 | (INDEX_OFFSET + slot)`.
///
/// The generation is at most 10 bits, so every handle is below `0x0400_0000` and can
/// never be mistaken for a memory address on this SoC.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(u32);

impl Handle {
    pub const INDEX_OFFSET: u32 = 1024;
    const INDEX_MASK: u32 = 0xFFFF;
    const GEN_SHIFT: u32 = 16;
    const GEN_MAX: u16 = 0x3FF;
    /// Largest slot count the index field can express.
    pub const MAX_SLOTS: usize = (Self::INDEX_MASK - Self::INDEX_OFFSET + 1) as usize;

    const fn new(slot: usize, generation: u16) -> Self {
        Self(((generation as u32) << Self::GEN_SHIFT) | (Self::INDEX_OFFSET + slot as u32))
    }

    /// Zero is the "no handle" value.
    pub const fn from_raw(raw: u32) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(Self(raw))
        }
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Slot index, or `None` below the offset.
    pub const fn slot(self) -> Option<usize> {
        let index = self.0 & Self::INDEX_MASK;
        if index < Self::INDEX_OFFSET {
            None
        } else {
            Some((index - Self::INDEX_OFFSET) as usize)
        }
    }

    pub const fn generation(self) -> u16 {
        (self.0 >> Self::GEN_SHIFT) as u16
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:#x})", self.0)
    }
}

/// Resolved map entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Entry {
    pub ty: ObjType,
    /// Protected object address.
    pub ptr: usize,
    crc: u32,
}

impl Entry {
    fn new(ty: ObjType, ptr: usize) -> Self {
        Self { ty, ptr, crc: entry_crc(ty, ptr) }
    }
}

fn entry_crc(ty: ObjType, ptr: usize) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&(ty as u16).to_le_bytes());
    hasher.update(&(ptr as u32).to_le_bytes());
    hasher.finalize()
}

#[derive(Clone, Copy)]
struct Slot {
    generation: u16,
    entry: Option<Entry>,
}

impl Slot {
    const EMPTY: Slot = Slot { generation: 1, entry: None };
}

/// Growable slot table guarded by a single lock.
///
/// The lock masks interrupts, so nothing under it allocates: a full table is
/// doubled into an array allocated before the lock is retaken.
pub struct HandleMap {
    slots: IrqMutex<Vec<Slot>>,
    layout: Layout,
    check_crc: bool,
}

impl HandleMap {
    /// Creates a map with `capacity` free slots. Returns `None` if the table cannot be allocated.
    pub fn new(layout: Layout, capacity: usize, check_crc: bool) -> Option<Self> {
        let capacity = capacity.clamp(1, Handle::MAX_SLOTS);
        let mut slots = Vec::new();
        slots.try_reserve_exact(capacity).ok()?;
        slots.resize(capacity, Slot::EMPTY);
        Some(Self { slots: IrqMutex::new(slots), layout, check_crc })
    }

    /// Registers `ptr` under a fresh handle, doubling the table when full.
    ///
    /// Returns `None` when the table cannot grow.
    pub fn add(&self, ptr: usize, ty: ObjType) -> Option<Handle> {
        assert_task_context();
        loop {
            let full_at = {
                let mut slots = self.slots.lock();
                if let Some(idx) = slots.iter().position(|slot| slot.entry.is_none()) {
                    let slot = &mut slots[idx];
                    slot.entry = Some(Entry::new(ty, ptr));
                    return Some(Handle::new(idx, slot.generation));
                }
                slots.len()
            };
            self.grow(full_at)?;
        }
    }

    /// Doubles a table found full at `old` slots. Another task may have grown it
    /// in the meantime; the caller then simply retries.
    fn grow(&self, old: usize) -> Option<()> {
        let grown = old.checked_mul(2)?.min(Handle::MAX_SLOTS);
        if grown == old {
            crate::log_error!(target: "esp_map", "handle table exhausted at {} slots", old);
            return None;
        }
        let mut fresh = Vec::new();
        if fresh.try_reserve_exact(grown).is_err() {
            crate::log_error!(target: "esp_map", "failed to grow handle table");
            return None;
        }
        let retired = {
            let mut slots = self.slots.lock();
            if slots.len() != old {
                return Some(());
            }
            fresh.extend_from_slice(&slots);
            fresh.resize(grown, Slot::EMPTY);
            core::mem::replace(&mut *slots, fresh)
        };
        drop(retired);
        Some(())
    }

    /// Resolves a user-supplied raw handle of the expected type.
    pub fn verify(&self, raw: u32, ty: ObjType) -> Option<Entry> {
        let entry = self.get(raw)?;
        if entry.ty != ty {
            return None;
        }
        if self.check_crc && entry.crc != entry_crc(entry.ty, entry.ptr) {
            return None;
        }
        Some(entry)
    }

    /// Resolves a raw handle without a type check (bulk teardown only).
    pub fn get(&self, raw: u32) -> Option<Entry> {
        assert_task_context();
        let handle = Handle::from_raw(raw)?;
        let idx = handle.slot()?;
        let slots = self.slots.lock();
        let slot = slots.get(idx)?;
        if slot.generation != handle.generation() {
            return None;
        }
        let entry = slot.entry?;
        if !self.layout.is_valid_kdram_addr(entry.ptr) {
            return None;
        }
        Some(entry)
    }

    /// Frees the slot behind `raw`; stale or unknown handles are ignored.
    pub fn remove(&self, raw: u32) {
        assert_task_context();
        let Some(handle) = Handle::from_raw(raw) else {
            return;
        };
        let Some(idx) = handle.slot() else {
            return;
        };
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(idx) {
            if slot.generation == handle.generation() && slot.entry.is_some() {
                slot.entry = None;
                slot.generation = if slot.generation >= Handle::GEN_MAX { 1 } else { slot.generation + 1 };
            }
        }
    }

    /// Current number of slots (free and used).
    pub fn allocated_capacity(&self) -> usize {
        assert_task_context();
        self.slots.lock().len()
    }

    /// Snapshot of every live entry, in slot order.
    pub fn live(&self) -> Vec<(Handle, Entry)> {
        assert_task_context();
        let mut out = Vec::new();
        loop {
            out.reserve(self.allocated_capacity());
            let slots = self.slots.lock();
            if slots.len() <= out.capacity() {
                out.extend(slots.iter().enumerate().filter_map(|(idx, slot)| {
                    slot.entry.map(|e| (Handle::new(idx, slot.generation), e))
                }));
                return out;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn corrupt(&self, raw: u32, ptr: usize) {
        if let Some(idx) = Handle::from_raw(raw).and_then(Handle::slot) {
            if let Some(entry) = self.slots.lock()[idx].entry.as_mut() {
                entry.ptr = ptr;
            }
        }
    }
}

#[inline]
fn assert_task_context() {
    assert!(!crate::cpu::in_isr(), "handle map used from interrupt context");
}
