// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Cleanup task: reclaims the stack and errno cell of deleted user tasks.
//!
//! The protected world cannot free user memory, so it posts `{ptr, len}` records
//! on the cleanup queue. The startup stack was never a heap block; when it comes
//! back, the whole startup resources block joins the heap as a second region.

use core::alloc::Layout;
use core::ptr::NonNull;

use privsep_abi::{CleanupItem, PORT_MAX_DELAY};

use crate::ecall::Trap;
use crate::heap::LockedUserHeap;
use crate::sys::Sys;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reclaim {
    /// The startup resources block became a heap region.
    StartupRegion,
    /// A heap block was freed.
    Freed,
    /// Not a heap block (e.g. the startup errno cell); left alone.
    Ignored,
    Malformed,
}

pub struct Cleanup<'a, T: Trap> {
    sys: &'a Sys<T>,
    heap: &'a LockedUserHeap,
    queue: u32,
    /// `[startup_stack, user_app_heap_start)`.
    startup: (usize, usize),
}

impl<'a, T: Trap> Cleanup<'a, T> {
    pub fn new(
        sys: &'a Sys<T>,
        heap: &'a LockedUserHeap,
        queue: u32,
        startup: (usize, usize),
    ) -> Self {
        Self { sys, heap, queue, startup }
    }

    pub fn reclaim(&self, item: CleanupItem) -> Reclaim {
        self.reclaim_at(item.ptr as usize, item.len as usize)
    }

    fn reclaim_at(&self, ptr: usize, len: usize) -> Reclaim {
        let mut heap = self.heap.lock();
        if ptr == self.startup.0 {
            // SAFETY: the first user task was the only user of the startup block and it is gone.
            return if unsafe { heap.add_region(self.startup.0, self.startup.1) } {
                Reclaim::StartupRegion
            } else {
                Reclaim::Ignored
            };
        }
        if len == 0 || !heap.in_main(ptr) {
            return Reclaim::Ignored;
        }
        let (Some(block), Ok(layout)) =
            (NonNull::new(ptr as *mut u8), Layout::from_size_align(len, 1))
        else {
            return Reclaim::Ignored;
        };
        // SAFETY: the protected world only returns the stack and errno buffers this
        // runtime allocated for the task, with the sizes it was given.
        if unsafe { heap.deallocate(block, layout) } {
            Reclaim::Freed
        } else {
            Reclaim::Ignored
        }
    }

    /// Waits up to `ticks` for one record; `None` when the queue stayed empty.
    pub fn poll(&self, ticks: u32) -> Option<Reclaim> {
        let mut raw = [0u8; CleanupItem::WIRE_SIZE];
        if !self.sys.queue_receive(self.queue, &mut raw, ticks) {
            return None;
        }
        Some(CleanupItem::decode(&raw).map_or(Reclaim::Malformed, |item| self.reclaim(item)))
    }

    /// Task body.
    pub fn run(&self) -> ! {
        loop {
            let _ = self.poll(PORT_MAX_DELAY);
        }
    }
}
