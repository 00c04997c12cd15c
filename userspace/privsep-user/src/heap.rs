// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: User-world heap
//! OWNERS: @runtime
//! PUBLIC API: UserHeap, LockedUserHeap (GlobalAlloc)
//! DEPENDS_ON: linked_list_allocator, spin
//! INVARIANTS: The main region is [user_app_heap_start, end of WORLD1 DRAM); the startup stack
//!             joins as a second region at most once, after the first user task is gone;
//!             a block is returned to the region that contains it
//! ADR: docs/adr/0001-world-separation.md

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull};

use linked_list_allocator::Heap;
use spin::{Mutex, MutexGuard};

struct Region {
    heap: Heap,
    start: usize,
    end: usize,
}

impl Region {
    /// # Safety
    /// `[start, end)` must be unused writable memory owned by the caller from now on.
    unsafe fn new(start: usize, end: usize) -> Self {
        let mut heap = Heap::empty();
        // SAFETY: forwarded from the caller.
        unsafe { heap.init(start as *mut u8, end - start) };
        Self { heap, start, end }
    }

    fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.end
    }

    fn overlaps(&self, start: usize, end: usize) -> bool {
        start < self.end && self.start < end
    }
}

/// Two-region first-fit heap backing the user world's allocations.
pub struct UserHeap {
    main: Option<Region>,
    startup: Option<Region>,
}

impl UserHeap {
    pub const fn empty() -> Self {
        Self { main: None, startup: None }
    }

    /// Installs the main region.
    ///
    /// # Safety
    /// `[start, end)` must be unused writable memory reserved for the heap.
    pub unsafe fn init(&mut self, start: usize, end: usize) {
        assert!(self.main.is_none(), "user heap initialised twice");
        assert!(start < end);
        // SAFETY: forwarded from the caller.
        self.main = Some(unsafe { Region::new(start, end) });
    }

    /// Hands `[start, end)` to the allocator as a second region.
    ///
    /// Returns `false` when a second region already exists or the range overlaps
    /// memory the heap already manages.
    ///
    /// # Safety
    /// Nothing may reference `[start, end)` any more.
    pub unsafe fn add_region(&mut self, start: usize, end: usize) -> bool {
        if self.startup.is_some() || start >= end {
            return false;
        }
        if self.main.as_ref().is_some_and(|main| main.overlaps(start, end)) {
            return false;
        }
        // SAFETY: forwarded from the caller.
        self.startup = Some(unsafe { Region::new(start, end) });
        true
    }

    pub fn allocate(&mut self, layout: Layout) -> Option<NonNull<u8>> {
        [self.main.as_mut(), self.startup.as_mut()]
            .into_iter()
            .flatten()
            .find_map(|region| region.heap.allocate_first_fit(layout).ok())
    }

    /// Returns a block to the region containing it; `false` when no region does.
    ///
    /// # Safety
    /// `ptr` must come from [`UserHeap::allocate`] with a layout of the same size.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>, layout: Layout) -> bool {
        let addr = ptr.as_ptr() as usize;
        let region = [self.main.as_mut(), self.startup.as_mut()]
            .into_iter()
            .flatten()
            .find(|region| region.contains(addr));
        match region {
            Some(region) => {
                // SAFETY: forwarded from the caller.
                unsafe { region.heap.deallocate(ptr, layout) };
                true
            }
            None => false,
        }
    }

    /// Whether `addr` lies inside the main region.
    pub fn in_main(&self, addr: usize) -> bool {
        self.main.as_ref().is_some_and(|main| main.contains(addr))
    }

    pub fn has_startup_region(&self) -> bool {
        self.startup.is_some()
    }

    /// Free bytes across both regions.
    pub fn free(&self) -> usize {
        [self.main.as_ref(), self.startup.as_ref()]
            .into_iter()
            .flatten()
            .map(|region| region.heap.free())
            .sum()
    }

    pub fn used(&self) -> usize {
        [self.main.as_ref(), self.startup.as_ref()]
            .into_iter()
            .flatten()
            .map(|region| region.heap.used())
            .sum()
    }
}

impl Default for UserHeap {
    fn default() -> Self {
        Self::empty()
    }
}

/// [`UserHeap`] behind a spin lock, usable as the `#[global_allocator]`.
pub struct LockedUserHeap(Mutex<UserHeap>);

impl LockedUserHeap {
    pub const fn empty() -> Self {
        Self(Mutex::new(UserHeap::empty()))
    }

    pub fn lock(&self) -> MutexGuard<'_, UserHeap> {
        self.0.lock()
    }
}

unsafe impl GlobalAlloc for LockedUserHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.lock().allocate(layout).map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if let Some(ptr) = NonNull::new(ptr) {
            // SAFETY: GlobalAlloc guarantees `ptr` came from `alloc` with `layout`.
            unsafe { self.lock().deallocate(ptr, layout) };
        }
    }
}

#[cfg(test)]
pub(crate) fn arena(bytes: usize) -> (usize, usize) {
    let buf = Box::leak(vec![0u64; bytes / 8].into_boxed_slice());
    let start = buf.as_mut_ptr() as usize;
    (start, start + bytes)
}
