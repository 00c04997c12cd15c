// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Per-task privilege-separation records
//! OWNERS: @kernel-team
//! PUBLIC API: TaskContext, KernelStack, TaskTable
//! DEPENDS_ON: platform::KObj, privsep_abi::World
//! INVARIANTS: A task is a user task iff its record carries a kernel stack;
//!             records are published with the scheduler suspended, before the task can run,
//!             into room reserved beforehand, so publishing never allocates
//! ADR: docs/adr/0001-world-separation.md

use alloc::vec::Vec;

use privsep_abi::World;

use crate::platform::KObj;
use crate::sync::IrqMutex;

/// Bytes reserved for a statically allocated task control block.
pub const TCB_SIZE: usize = 352;
/// Fill pattern for fresh kernel stacks (watermark detection).
pub const STACK_FILL_BYTE: u8 = 0xA5;

/// Protected-DRAM stack used while a user task executes a syscall.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernelStack {
    pub base: usize,
    pub size: usize,
}

impl KernelStack {
    pub const fn top(&self) -> usize {
        self.base + self.size
    }

    pub const fn contains(&self, sp: usize) -> bool {
        sp >= self.base && sp <= self.top()
    }
}

/// Everything the gateway knows about one task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskContext {
    pub world: World,
    pub kernel_stack: Option<KernelStack>,
    /// User-world errno cell.
    pub errno: usize,
    /// Handle under which the task is known to the user world.
    pub self_handle: u32,
    /// pthread bookkeeping slot owned by the user runtime.
    pub pthread: usize,
    pub user_stack: usize,
    pub user_stack_size: usize,
    /// User stack pointer saved while the task runs on its kernel stack.
    pub saved_user_sp: Option<usize>,
}

impl TaskContext {
    pub const fn is_user(&self) -> bool {
        self.kernel_stack.is_some()
    }
}

#[derive(Default)]
struct Records {
    entries: Vec<(KObj, TaskContext)>,
    /// Spare capacity promised to outstanding [`Reservation`]s.
    reserved: usize,
}

impl Records {
    fn position(&self, task: KObj) -> Option<usize> {
        self.entries.iter().position(|(t, _)| *t == task)
    }
}

/// Records of every live user task.
///
/// The lock masks interrupts and is never held across an allocation; room for a
/// new record is reserved first, with interrupts enabled.
#[derive(Default)]
pub struct TaskTable {
    records: IrqMutex<Records>,
}

/// Room for one record, taken before the scheduler is suspended.
#[must_use = "dropping a reservation gives the room back"]
pub struct Reservation<'a> {
    table: &'a TaskTable,
    armed: bool,
}

impl Reservation<'_> {
    /// Publishes the record into the reserved room.
    pub fn publish(mut self, task: KObj, ctx: TaskContext) {
        let mut records = self.table.records.lock();
        records.reserved -= 1;
        debug_assert!(records.entries.len() < records.entries.capacity());
        records.entries.push((task, ctx));
        self.armed = false;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.table.records.lock().reserved -= 1;
        }
    }
}

impl TaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves room for one record; `None` when the kernel heap is exhausted.
    pub fn reserve(&self) -> Option<Reservation<'_>> {
        loop {
            let needed = {
                let mut records = self.records.lock();
                let needed = records.entries.len() + records.reserved + 1;
                if records.entries.capacity() >= needed {
                    records.reserved += 1;
                    return Some(Reservation { table: self, armed: true });
                }
                needed
            };
            let mut fresh = Vec::new();
            fresh.try_reserve_exact(needed.max(4).next_power_of_two()).ok()?;
            let retired = {
                let mut records = self.records.lock();
                if fresh.capacity() > records.entries.capacity() {
                    fresh.extend_from_slice(&records.entries);
                    core::mem::replace(&mut records.entries, fresh)
                } else {
                    fresh
                }
            };
            drop(retired);
        }
    }

    pub fn get(&self, task: KObj) -> Option<TaskContext> {
        let records = self.records.lock();
        records.position(task).map(|idx| records.entries[idx].1)
    }

    pub fn remove(&self, task: KObj) -> Option<TaskContext> {
        let mut records = self.records.lock();
        let idx = records.position(task)?;
        Some(records.entries.swap_remove(idx).1)
    }

    /// Applies `f` to the record of `task`; returns false if there is none.
    pub fn update(&self, task: KObj, f: impl FnOnce(&mut TaskContext)) -> bool {
        let mut records = self.records.lock();
        match records.position(task) {
            Some(idx) => {
                f(&mut records.entries[idx].1);
                true
            }
            None => false,
        }
    }

    pub fn is_user_task(&self, task: KObj) -> bool {
        self.get(task).map_or(false, |ctx| ctx.is_user())
    }

    /// Non-blocking [`TaskTable::is_user_task`]; `None` if the table is busy.
    pub fn try_is_user_task(&self, task: KObj) -> Option<bool> {
        let records = self.records.try_lock()?;
        Some(records.position(task).map_or(false, |idx| records.entries[idx].1.is_user()))
    }

    /// Calls `f` on every user task in place, without allocating.
    ///
    /// For interrupt context: returns false, having called nothing, if the table is busy.
    pub fn try_for_each_user_task(&self, mut f: impl FnMut(KObj)) -> bool {
        let Some(records) = self.records.try_lock() else {
            return false;
        };
        for (task, ctx) in records.entries.iter() {
            if ctx.is_user() {
                f(*task);
            }
        }
        true
    }

    #[cfg(test)]
    pub fn user_tasks(&self) -> Vec<KObj> {
        let mut tasks = Vec::new();
        self.try_for_each_user_task(|task| tasks.push(task));
        tasks.sort_unstable();
        tasks
    }

    pub fn len(&self) -> usize {
        self.records.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn capacity(&self) -> usize {
        self.records.lock().entries.capacity()
    }

    #[cfg(test)]
    pub(crate) fn insert(&self, task: KObj, ctx: TaskContext) {
        self.reserve().unwrap().publish(task, ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::irqs_masked;

    fn user_ctx() -> TaskContext {
        TaskContext {
            world: World::W1,
            kernel_stack: Some(KernelStack { base: 0x3FCA_0000, size: 3072 }),
            errno: 0x3FCC_0000,
            self_handle: 0x1_0400,
            pthread: 0,
            user_stack: 0x3FCC_1000,
            user_stack_size: 4096,
            saved_user_sp: None,
        }
    }

    #[test]
    fn kernel_stack_decides_user_task() {
        let table = TaskTable::new();
        table.insert(1, user_ctx());
        table.insert(2, TaskContext { kernel_stack: None, world: World::W0, ..user_ctx() });
        assert!(table.is_user_task(1));
        assert!(!table.is_user_task(2));
        assert!(!table.is_user_task(3));
        assert_eq!(table.user_tasks(), [1]);
        assert_eq!(table.try_is_user_task(1), Some(true));
        assert_eq!(table.try_is_user_task(2), Some(false));
    }

    #[test]
    fn update_and_remove() {
        let table = TaskTable::new();
        table.insert(7, user_ctx());
        assert!(table.update(7, |ctx| ctx.saved_user_sp = Some(0x3FCC_1F00)));
        assert_eq!(table.get(7).unwrap().saved_user_sp, Some(0x3FCC_1F00));
        assert!(table.remove(7).is_some());
        assert!(table.remove(7).is_none());
        assert!(!table.update(7, |_| {}));
        assert!(table.is_empty());
    }

    #[test]
    fn kernel_stack_bounds() {
        let ks = KernelStack { base: 0x100, size: 0x40 };
        assert_eq!(ks.top(), 0x140);
        assert!(ks.contains(0x140));
        assert!(!ks.contains(0xFF));
    }

    #[test]
    fn publishing_into_a_reservation_never_grows_the_table() {
        let table = TaskTable::new();
        for task in 1..=4 {
            table.insert(task, user_ctx());
        }
        let full = table.capacity();
        let first = table.reserve().unwrap();
        let second = table.reserve().unwrap();
        let grown = table.capacity();
        assert!(grown >= 6 && grown > full);

        first.publish(10, user_ctx());
        second.publish(11, user_ctx());
        assert_eq!(table.capacity(), grown);
        assert_eq!(table.len(), 6);
    }

    #[test]
    fn dropped_reservation_returns_its_room() {
        let table = TaskTable::new();
        drop(table.reserve().unwrap());
        let cap = table.capacity();
        for task in 0..cap {
            table.reserve().unwrap().publish(task, user_ctx());
        }
        assert_eq!(table.capacity(), cap);
    }

    #[test]
    fn walk_runs_masked_and_skips_a_busy_table() {
        let table = TaskTable::new();
        table.insert(1, user_ctx());
        table.insert(2, TaskContext { kernel_stack: None, ..user_ctx() });
        let mut seen = 0;
        assert!(table.try_for_each_user_task(|task| {
            assert!(irqs_masked());
            assert_eq!(task, 1);
            seen += 1;
        }));
        assert_eq!(seen, 1);

        let held = table.records.lock();
        assert!(!table.try_for_each_user_task(|_| unreachable!()));
        drop(held);
        assert!(!irqs_masked());
    }
}
