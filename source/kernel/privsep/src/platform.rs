// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Seams between the privilege-separation core and the protected firmware
//! OWNERS: @kernel-team
//! PUBLIC API: Rtos, Memory, Flash, Platform, TaskName, TaskSpec, EventBase, RtosError
//! DEPENDS_ON: hal::Mmio, privsep_abi
//! INVARIANTS: Kernel objects are identified by their kernel-DRAM address;
//!             user memory is only touched through `Memory`
//! ADR: docs/adr/0001-world-separation.md

use alloc::vec::Vec;
use core::fmt;

use privsep_abi::{EspErr, HeapStats, TimerCmd};

use crate::hal::Mmio;
use crate::image::FlashMapping;
use crate::ota::PartitionTable;

/// Kernel object identifier: the object's address in protected DRAM.
pub type KObj = usize;

/// Failure reported by the underlying RTOS services.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RtosError {
    NoMem,
    InvalidArg,
    InvalidState,
    NotFound,
    Fail,
}

impl RtosError {
    pub const fn esp_err(self) -> EspErr {
        match self {
            RtosError::NoMem => EspErr::NoMem,
            RtosError::InvalidArg => EspErr::InvalidArg,
            RtosError::InvalidState => EspErr::InvalidState,
            RtosError::NotFound => EspErr::NotFound,
            RtosError::Fail => EspErr::Fail,
        }
    }
}

impl fmt::Display for RtosError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            RtosError::NoMem => "out of memory",
            RtosError::InvalidArg => "invalid argument",
            RtosError::InvalidState => "invalid state",
            RtosError::NotFound => "not found",
            RtosError::Fail => "failure",
        };
        f.write_str(msg)
    }
}

/// Maximum task name length, including room for truncation.
pub const TASK_NAME_LEN: usize = 16;

/// Task name copied into protected memory.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TaskName {
    buf: [u8; TASK_NAME_LEN],
    len: u8,
}

impl TaskName {
    pub const EMPTY: TaskName = TaskName { buf: [0; TASK_NAME_LEN], len: 0 };

    /// Copies up to [`TASK_NAME_LEN`] bytes, stopping at the first NUL.
    pub fn from_bytes(raw: &[u8]) -> Self {
        let mut name = Self::EMPTY;
        for (dst, &src) in name.buf.iter_mut().zip(raw.iter().take_while(|b| **b != 0)) {
            *dst = src;
            name.len += 1;
        }
        name
    }

    pub fn new(s: &str) -> Self {
        Self::from_bytes(s.as_bytes())
    }

    pub fn as_str(&self) -> &str {
        let bytes = &self.buf[..self.len as usize];
        match core::str::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => core::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or(""),
        }
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

/// Parameters of a statically allocated task.
#[derive(Clone, Copy, Debug)]
pub struct TaskSpec {
    pub entry: usize,
    pub name: TaskName,
    pub param: usize,
    pub priority: u32,
    /// Stack buffer owned by the caller.
    pub stack: usize,
    pub stack_size: usize,
}

/// Where a queue item is placed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendPos {
    Back,
    Front,
    Overwrite,
}

impl SendPos {
    pub const fn from_raw(raw: usize) -> Option<Self> {
        match raw {
            0 => Some(SendPos::Back),
            1 => Some(SendPos::Front),
            2 => Some(SendPos::Overwrite),
            _ => None,
        }
    }
}

/// Event source understood by the protected event loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventBase {
    Wifi,
    Ip,
    /// Any other base, identified by the user-world address the user registered.
    Other(usize),
}

/// Work the platform runs later from a one-shot timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeferredJob {
    /// Tear down the user world and boot it again.
    RestartUser,
}

/// Scheduler, kernel heap and driver services of the protected firmware.
///
/// Callback-taking services receive a `cookie` and report it back through the
/// matching `PrivSep::on_*` entry point.
pub trait Rtos {
    // Kernel heap.
    fn kalloc(&self, size: usize) -> Option<usize>;
    fn kfree(&self, addr: usize);
    fn heap_stats(&self) -> HeapStats;

    // Scheduler.
    fn suspend_all(&self);
    fn resume_all(&self);
    fn current_task(&self) -> KObj;
    fn task_name(&self, task: KObj) -> TaskName;
    /// Creates a task whose control block lives at `tcb`; the task object is `tcb`.
    fn task_create_static(&self, spec: &TaskSpec, tcb: KObj) -> Result<(), RtosError>;
    /// Deletes a task and releases its control block. User tasks are reported back
    /// through `PrivSep::cleanup_task` once the scheduler no longer references them.
    fn task_delete(&self, task: KObj);
    fn task_suspend(&self, task: KObj);
    fn task_resume(&self, task: KObj);
    fn task_delay(&self, ticks: u32);
    fn task_list(&self) -> Vec<KObj>;

    // Queues (byte items).
    fn queue_create(&self, len: usize, item_size: usize) -> Option<KObj>;
    fn queue_item_size(&self, queue: KObj) -> usize;
    fn queue_send(&self, queue: KObj, item: &[u8], ticks: u32, pos: SendPos) -> bool;
    fn queue_send_from_isr(&self, queue: KObj, item: &[u8]) -> bool;
    fn queue_receive(&self, queue: KObj, out: &mut [u8], ticks: u32) -> bool;
    fn queue_messages_waiting(&self, queue: KObj) -> usize;
    fn queue_delete(&self, queue: KObj);

    // Software timers.
    fn xtimer_create(&self, period: u32, auto_reload: bool, cookie: usize) -> Option<KObj>;
    fn xtimer_command(&self, timer: KObj, cmd: TimerCmd, value: u32, ticks: u32) -> bool;
    fn xtimer_cookie(&self, timer: KObj) -> usize;

    // High-resolution timers.
    fn esp_timer_create(&self, cookie: usize, skip_unhandled: bool) -> Result<KObj, RtosError>;
    fn esp_timer_cookie(&self, timer: KObj) -> usize;
    fn esp_timer_start_once(&self, timer: KObj, timeout_us: u64) -> Result<(), RtosError>;
    fn esp_timer_start_periodic(&self, timer: KObj, period_us: u64) -> Result<(), RtosError>;
    fn esp_timer_stop(&self, timer: KObj) -> Result<(), RtosError>;
    fn esp_timer_delete(&self, timer: KObj) -> Result<(), RtosError>;

    // Event groups.
    fn event_group_create(&self) -> Option<KObj>;
    fn event_group_wait(&self, group: KObj, bits: u32, clear: bool, all: bool, ticks: u32) -> u32;
    fn event_group_set(&self, group: KObj, bits: u32) -> u32;
    fn event_group_clear(&self, group: KObj, bits: u32) -> u32;
    fn event_group_sync(&self, group: KObj, set: u32, wait: u32, ticks: u32) -> u32;
    fn event_group_delete(&self, group: KObj);

    // Default event loop.
    fn event_handler_register(&self, base: EventBase, id: i32, cookie: usize) -> Result<KObj, RtosError>;
    fn event_handler_unregister(&self, base: EventBase, id: i32, instance: KObj) -> Result<(), RtosError>;

    // GPIO soft-ISR service.
    fn gpio_isr_add(&self, gpio: u32, cookie: usize) -> Result<(), RtosError>;
    fn gpio_isr_remove(&self, gpio: u32) -> Result<(), RtosError>;

    // Drivers.
    fn uart_write(&self, port: u32, data: &[u8]) -> i32;
    fn uart_read(&self, port: u32, out: &mut [u8], ticks: u32) -> i32;
    fn socket(&self, domain: i32, ty: i32, protocol: i32) -> i32;
    fn send(&self, sock: i32, data: &[u8], flags: i32) -> isize;
    fn recv(&self, sock: i32, out: &mut [u8], flags: i32) -> isize;
    fn close(&self, sock: i32) -> i32;
    fn netif_create_default_sta(&self) -> Option<KObj>;
    fn netif_destroy(&self, netif: KObj);

    // System.
    fn schedule_oneshot(&self, job: DeferredJob, delay_us: u64);
    fn restart(&self);
    fn abort(&self, reason: &str);
}

/// Byte access to the unified address space.
///
/// Callers validate every user-supplied address against the layout before use.
pub trait Memory {
    fn read(&self, addr: usize, out: &mut [u8]);
    fn write(&self, addr: usize, data: &[u8]);
    fn fill(&self, addr: usize, byte: u8, len: usize);

    fn read_u32(&self, addr: usize) -> u32 {
        let mut raw = [0u8; 4];
        self.read(addr, &mut raw);
        u32::from_le_bytes(raw)
    }

    fn write_u32(&self, addr: usize, value: u32) {
        self.write(addr, &value.to_le_bytes());
    }
}

/// Flash sector size.
pub const SECTOR_SIZE: u32 = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlashError {
    OutOfRange,
    Io,
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlashError::OutOfRange => f.write_str("flash access out of range"),
            FlashError::Io => f.write_str("flash I/O error"),
        }
    }
}

/// Raw partition-level flash I/O.
pub trait Flash {
    fn flash_read(&self, offset: u32, out: &mut [u8]) -> Result<(), FlashError>;
    fn flash_write(&self, offset: u32, data: &[u8]) -> Result<(), FlashError>;
    fn flash_erase_sector(&self, offset: u32) -> Result<(), FlashError>;
}

/// Everything the privilege-separation core needs from the protected firmware.
pub trait Platform: Rtos + Memory + Flash {
    type Regs: Mmio;

    fn regs(&self) -> &Self::Regs;
    /// Base address of the trap vector table.
    fn vector_base(&self) -> u32;
    /// SHA-256 of the running protected image.
    fn app_elf_sha256(&self) -> [u8; 32];
    /// Partitions holding the user images and their otadata.
    fn partitions(&self) -> PartitionTable;
    /// Maps a user flash window into the cache MMU.
    fn map_flash(&self, mapping: FlashMapping);
}
