// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: ABI shared by the protected world (WORLD0) and the user world (WORLD1)
//! OWNERS: @runtime
//! PUBLIC API: World, Perm, Sysno, EspErr, DispatchMsg, CleanupItem, TaskCtx, Layout
//! DEPENDS_ON: bitflags, static_assertions
//! INVARIANTS: Syscall numbers are dense and stable; wire records are little-endian fixed size;
//!             the classifier never dereferences the address it is asked about
//! ADR: docs/adr/0001-world-separation.md

pub mod addr;
pub mod msg;

pub use addr::{Layout, LinkerRegions, SocMap, Window};
pub use msg::{
    CleanupItem, DispatchMsg, EspTimerArgs, HeapStats, TaskCtx, UserAppDesc, UserAppResources,
};

use bitflags::bitflags;

/// One of the two execution worlds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum World {
    /// Protected world: trusted firmware.
    W0 = 0,
    /// User world: untrusted firmware.
    W1 = 1,
}

impl World {
    /// Both worlds, WORLD0 first.
    pub const ALL: [World; 2] = [World::W0, World::W1];

    /// Decodes the hardware world field (1 = WORLD0, 2 = WORLD1 in monitor status registers).
    pub const fn from_monitor(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(World::W0),
            2 => Some(World::W1),
            _ => None,
        }
    }

    /// Index used in register bit arithmetic.
    pub const fn index(self) -> u32 {
        self as u32
    }
}

bitflags! {
    /// Access permission flags understood by the permission controller.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Perm: u32 {
        /// Read access.
        const R = 1 << 0;
        /// Write access.
        const W = 1 << 1;
        /// Execute access.
        const X = 1 << 2;
        /// Read, write and execute.
        const ALL = Self::R.bits() | Self::W.bits() | Self::X.bits();
    }
}

impl Perm {
    /// No access at all.
    pub const NONE: Perm = Perm::empty();
}

/// ESP-style status codes returned across the trap boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum EspErr {
    /// Generic failure.
    Fail = -1,
    /// Out of memory.
    NoMem = 0x101,
    /// Invalid argument.
    InvalidArg = 0x102,
    /// Invalid state.
    InvalidState = 0x103,
    /// Requested resource not found.
    NotFound = 0x105,
}

impl EspErr {
    /// Decodes a non-zero status code; unknown codes collapse to [`EspErr::Fail`].
    pub const fn from_code(code: i32) -> Self {
        match code {
            0x101 => EspErr::NoMem,
            0x102 => EspErr::InvalidArg,
            0x103 => EspErr::InvalidState,
            0x105 => EspErr::NotFound,
            _ => EspErr::Fail,
        }
    }
}

/// Success code for ESP-style calls.
pub const ESP_OK: i32 = 0;
/// FreeRTOS success value.
pub const PD_PASS: isize = 1;
/// FreeRTOS failure value.
pub const PD_FAIL: isize = 0;

/// Queue type selecting the user-world cleanup queue singleton.
pub const QUEUE_TYPE_CLEANUP: u8 = 250;
/// Queue type selecting the user-world dispatch queue singleton.
pub const QUEUE_TYPE_DISPATCH: u8 = 251;
/// Depth of the cleanup and dispatch queues.
pub const SYSTEM_QUEUE_DEPTH: usize = 20;
/// Priority of the user cleanup task.
pub const CLEANUP_TASK_PRIORITY: u32 = 20;
/// Priority of the user dispatcher task.
pub const DISPATCHER_TASK_PRIORITY: u32 = 22;
/// Priority of the first user task.
pub const USER_MAIN_TASK_PRIORITY: u32 = 5;
/// Tick count meaning "block forever".
pub const PORT_MAX_DELAY: u32 = u32::MAX;

macro_rules! sysno {
    ($($(#[$doc:meta])* $name:ident = $value:expr,)+) => {
        /// Dense syscall number space shared by both worlds.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[repr(u32)]
        pub enum Sysno {
            $($(#[$doc])* $name = $value,)+
        }

        impl Sysno {
            /// Every assigned number, in numeric order.
            pub const ALL: &'static [Sysno] = &[$(Sysno::$name,)+];

            /// Decodes a raw syscall number; unassigned numbers yield `None`.
            pub const fn from_raw(raw: u32) -> Option<Self> {
                match raw {
                    $(x if x == $value => Some(Sysno::$name),)+
                    _ => None,
                }
            }

            /// Raw number placed in `a7`.
            pub const fn raw(self) -> u32 {
                self as u32
            }
        }
    };
}

sysno! {
    /// Create a user task.
    TaskCreate = 0,
    /// Delete a task (handle 0 = caller).
    TaskDelete = 1,
    /// Block the caller for a number of ticks.
    TaskDelay = 2,
    /// Suspend a task.
    TaskSuspend = 3,
    /// Resume a task.
    TaskResume = 4,
    /// Handle of the calling task.
    TaskGetCurrent = 5,
    /// Create a queue (or fetch a system queue singleton).
    QueueCreate = 6,
    /// Copy an item into a queue.
    QueueSend = 7,
    /// Copy an item out of a queue.
    QueueReceive = 8,
    /// Number of queued items.
    QueueMessagesWaiting = 9,
    /// Delete a queue.
    QueueDelete = 10,
    /// Create a software timer.
    XTimerCreate = 11,
    /// Start/stop/reset/change-period/delete a software timer.
    XTimerGenericCommand = 12,
    /// User identifier stored with a software timer.
    XTimerGetId = 13,
    /// Create a high-resolution timer.
    EspTimerCreate = 14,
    /// Arm a high-resolution timer once.
    EspTimerStartOnce = 15,
    /// Arm a high-resolution timer periodically.
    EspTimerStartPeriodic = 16,
    /// Disarm a high-resolution timer.
    EspTimerStop = 17,
    /// Delete a high-resolution timer.
    EspTimerDelete = 18,
    /// Create an event group.
    EventGroupCreate = 19,
    /// Wait for event-group bits.
    EventGroupWaitBits = 20,
    /// Set event-group bits.
    EventGroupSetBits = 21,
    /// Clear event-group bits.
    EventGroupClearBits = 22,
    /// Set then wait on event-group bits.
    EventGroupSync = 23,
    /// Delete an event group.
    EventGroupDelete = 24,
    /// Register an event handler instance.
    EventHandlerRegister = 25,
    /// Unregister an event handler instance.
    EventHandlerUnregister = 26,
    /// Add a GPIO soft-ISR.
    GpioIsrHandlerAdd = 27,
    /// Remove a GPIO soft-ISR.
    GpioIsrHandlerRemove = 28,
    /// Create the default station network interface.
    NetifCreateDefaultSta = 29,
    /// Destroy a network interface.
    NetifDestroy = 30,
    /// Open a socket.
    Socket = 31,
    /// Send on a socket.
    Send = 32,
    /// Receive on a socket.
    Recv = 33,
    /// Close a socket.
    Close = 34,
    /// Read from a UART.
    UartRead = 35,
    /// Write to a UART.
    UartWrite = 36,
    /// Protected heap statistics.
    GetProtectedHeapStats = 37,
}

/// Number of slots in the syscall number space (assigned or not).
pub const SYSCALL_SLOTS: u32 = 64;

/// Software-timer commands accepted by [`Sysno::XTimerGenericCommand`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum TimerCmd {
    /// Start the timer.
    Start = 1,
    /// Reset the timer.
    Reset = 2,
    /// Stop the timer.
    Stop = 3,
    /// Change the period.
    ChangePeriod = 4,
    /// Delete the timer.
    Delete = 5,
}

impl TimerCmd {
    /// Decodes a raw command.
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(TimerCmd::Start),
            2 => Some(TimerCmd::Reset),
            3 => Some(TimerCmd::Stop),
            4 => Some(TimerCmd::ChangePeriod),
            5 => Some(TimerCmd::Delete),
            _ => None,
        }
    }
}
