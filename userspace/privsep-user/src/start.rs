// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: User-world start-up sequence run before the application's main
//! OWNERS: @runtime
//! PUBLIC API: init_heap, start_services, spawn, heap_region, startup_region, Services
//! DEPENDS_ON: sys::Sys, heap::LockedUserHeap
//! INVARIANTS: The cleanup service exists before any other user task can be deleted;
//!             a failed spawn returns its stack and errno cell to the heap
//! ADR: docs/adr/0001-world-separation.md

use core::alloc::Layout;
use core::fmt;

use privsep_abi::{
    CleanupItem, DispatchMsg, LinkerRegions, TaskCtx, UserAppDesc, CLEANUP_TASK_PRIORITY,
    DISPATCHER_TASK_PRIORITY, QUEUE_TYPE_CLEANUP, QUEUE_TYPE_DISPATCH, SYSTEM_QUEUE_DEPTH,
};

use crate::ecall::Trap;
use crate::heap::LockedUserHeap;
use crate::sys::{Sys, SysError, TaskEntry};

pub const CLEANUP_TASK_STACK_SIZE: usize = 1024;
pub const DISPATCHER_TASK_STACK_SIZE: usize = 2048;
const STACK_ALIGN: usize = 16;

const CLEANUP_TASK_NAME: &[u8] = b"User cleanup task\0";
const DISPATCHER_TASK_NAME: &[u8] = b"User event dispatcher\0";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartError {
    /// A system queue could not be obtained.
    Queue(&'static str),
    /// The user heap could not hold a task's stack or errno cell.
    NoMem,
    Spawn(SysError),
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartError::Queue(which) => write!(f, "error creating {which} queue"),
            StartError::NoMem => f.write_str("user heap exhausted"),
            StartError::Spawn(err) => write!(f, "error creating task: {err}"),
        }
    }
}

/// Queues owned by the runtime services.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Services {
    pub cleanup_queue: u32,
    pub dispatch_queue: u32,
}

/// Main heap: from the descriptor's heap start to the end of WORLD1 DRAM.
pub const fn heap_region(desc: &UserAppDesc, linker: &LinkerRegions) -> (usize, usize) {
    (desc.user_app_heap_start as usize, linker.w1_dram.end)
}

/// Startup resources block, reclaimed once the first user task is deleted.
pub const fn startup_region(desc: &UserAppDesc) -> (usize, usize) {
    (desc.user_app_resources as usize, desc.user_app_heap_start as usize)
}

/// Installs the main heap region.
///
/// # Safety
/// Must run once, before any allocation, on the image the descriptor describes.
pub unsafe fn init_heap(heap: &LockedUserHeap, desc: &UserAppDesc, linker: &LinkerRegions) {
    let (start, end) = heap_region(desc, linker);
    // SAFETY: the linker reserves [heap start, w1 dram end) for the heap alone.
    unsafe { heap.lock().init(start, end) };
}

/// Creates a task on a freshly allocated stack and errno cell.
pub fn spawn<T: Trap>(
    sys: &Sys<T>,
    heap: &LockedUserHeap,
    entry: TaskEntry,
    name: &[u8],
    param: usize,
    priority: u32,
    stack_size: usize,
) -> Result<(), StartError> {
    let stack_layout =
        Layout::from_size_align(stack_size, STACK_ALIGN).map_err(|_| StartError::NoMem)?;
    let errno_layout = Layout::new::<u32>();

    let stack = heap.lock().allocate(stack_layout).ok_or(StartError::NoMem)?;
    let errno = heap.lock().allocate(errno_layout);
    let Some(errno) = errno else {
        // SAFETY: allocated just above with the same layout.
        unsafe { heap.lock().deallocate(stack, stack_layout) };
        return Err(StartError::NoMem);
    };

    let ctx = TaskCtx {
        stack: stack.as_ptr() as usize as u32,
        stack_size: stack_size as u32,
        errno: errno.as_ptr() as usize as u32,
        task_handle: 0,
    };
    if let Err(err) = sys.task_create(entry, name, param, priority, &ctx) {
        let mut heap = heap.lock();
        // SAFETY: the task was not created, so nothing else references these blocks.
        unsafe {
            heap.deallocate(errno, errno_layout);
            heap.deallocate(stack, stack_layout);
        }
        return Err(StartError::Spawn(err));
    }
    Ok(())
}

/// Brings up the cleanup service, then the callback dispatcher.
///
/// Each task receives its queue handle as the task parameter.
pub fn start_services<T: Trap>(
    sys: &Sys<T>,
    heap: &LockedUserHeap,
    cleanup_entry: TaskEntry,
    dispatcher_entry: TaskEntry,
) -> Result<Services, StartError> {
    let cleanup_queue = sys
        .queue_create(SYSTEM_QUEUE_DEPTH, CleanupItem::WIRE_SIZE, QUEUE_TYPE_CLEANUP)
        .ok_or(StartError::Queue("cleanup"))?;
    spawn(
        sys,
        heap,
        cleanup_entry,
        CLEANUP_TASK_NAME,
        cleanup_queue as usize,
        CLEANUP_TASK_PRIORITY,
        CLEANUP_TASK_STACK_SIZE,
    )?;

    let dispatch_queue = sys
        .queue_create(SYSTEM_QUEUE_DEPTH, DispatchMsg::WIRE_SIZE, QUEUE_TYPE_DISPATCH)
        .ok_or(StartError::Queue("dispatcher"))?;
    spawn(
        sys,
        heap,
        dispatcher_entry,
        DISPATCHER_TASK_NAME,
        dispatch_queue as usize,
        DISPATCHER_TASK_PRIORITY,
        DISPATCHER_TASK_STACK_SIZE,
    )?;

    Ok(Services { cleanup_queue, dispatch_queue })
}
