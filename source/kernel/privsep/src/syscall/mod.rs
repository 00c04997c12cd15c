// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Syscall gateway dispatcher and error encoding
//! OWNERS: @kernel-team
//! PUBLIC API: dispatch(ps, nr, args), Args, SysError, SysResult
//! DEPENDS_ON: context::PrivSep, map::HandleMap, privsep_abi::Sysno
//! INVARIANTS: Decode→Check→Execute in every handler; every user pointer is classified before
//!             it is touched; kernel objects leave the gateway only as map handles;
//!             errors are encoded into the per-call failure sentinel exactly once, here
//! ADR: docs/adr/0001-world-separation.md

pub mod event;
pub mod gpio;
pub mod io;
pub mod queue;
pub mod task;
pub mod timer;

use alloc::vec::Vec;
use core::fmt;

use privsep_abi::{EspErr, Sysno};

use crate::context::PrivSep;
use crate::map::{Entry, ObjType};
use crate::platform::{Platform, RtosError};

/// Result type used by syscall handlers.
pub type SysResult<T> = Result<T, SysError>;

/// Syscall arguments passed in registers a0-a5.
#[derive(Default, Clone, Copy, Debug)]
pub struct Args {
    regs: [usize; 6],
}

impl Args {
    pub const fn new(regs: [usize; 6]) -> Self {
        Self { regs }
    }

    /// Returns the raw register at `index`.
    #[inline]
    pub fn get(&self, index: usize) -> usize {
        self.regs[index]
    }

    #[inline]
    pub fn get_u32(&self, index: usize) -> u32 {
        self.regs[index] as u32
    }
}

/// Error returned by the handler stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysError {
    /// Syscall number not assigned.
    InvalidSyscall,
    /// A pointer argument is outside the range the call requires.
    BadAddress,
    /// A handle argument does not resolve to an object of the expected type.
    BadHandle,
    /// The object exists but the user world may not perform this operation on it.
    Forbidden,
    /// Allocation failed; any partial work has been rolled back.
    NoMem,
    /// The underlying service reported an error.
    Rtos(RtosError),
}

impl From<RtosError> for SysError {
    fn from(value: RtosError) -> Self {
        match value {
            RtosError::NoMem => SysError::NoMem,
            other => SysError::Rtos(other),
        }
    }
}

impl SysError {
    /// ESP status code reported by ESP-style calls.
    pub const fn esp_err(self) -> EspErr {
        match self {
            SysError::BadAddress | SysError::BadHandle | SysError::Forbidden => EspErr::InvalidArg,
            SysError::NoMem => EspErr::NoMem,
            SysError::Rtos(e) => e.esp_err(),
            SysError::InvalidSyscall => EspErr::Fail,
        }
    }
}

impl fmt::Display for SysError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SysError::InvalidSyscall => f.write_str("invalid syscall"),
            SysError::BadAddress => f.write_str("bad address"),
            SysError::BadHandle => f.write_str("bad handle"),
            SysError::Forbidden => f.write_str("forbidden"),
            SysError::NoMem => f.write_str("out of memory"),
            SysError::Rtos(e) => write!(f, "rtos: {}", e),
        }
    }
}

/// How a failed call is reported to the user world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    /// `-1`.
    MinusOne,
    /// NULL handle.
    Null,
    /// `pdFALSE` / zero bits.
    False,
    /// `errCOULD_NOT_ALLOCATE_REQUIRED_MEMORY` on allocation failure, `pdFAIL` otherwise.
    PdFail,
    /// ESP error code.
    Esp,
}

impl Failure {
    const ERR_COULD_NOT_ALLOCATE: isize = -1;

    fn encode(self, err: SysError) -> isize {
        match self {
            Failure::MinusOne => -1,
            Failure::Null | Failure::False => 0,
            Failure::PdFail => match err {
                SysError::NoMem => Self::ERR_COULD_NOT_ALLOCATE,
                _ => privsep_abi::PD_FAIL,
            },
            Failure::Esp => err.esp_err() as i32 as isize,
        }
    }

    const fn of(nr: Sysno) -> Self {
        match nr {
            Sysno::TaskCreate => Failure::PdFail,
            Sysno::TaskDelete | Sysno::TaskDelay | Sysno::TaskSuspend | Sysno::TaskResume => {
                Failure::MinusOne
            }
            Sysno::TaskGetCurrent
            | Sysno::QueueCreate
            | Sysno::XTimerCreate
            | Sysno::XTimerGetId
            | Sysno::EventGroupCreate
            | Sysno::NetifCreateDefaultSta => Failure::Null,
            Sysno::QueueSend
            | Sysno::QueueReceive
            | Sysno::QueueMessagesWaiting
            | Sysno::XTimerGenericCommand
            | Sysno::EventGroupWaitBits
            | Sysno::EventGroupSetBits
            | Sysno::EventGroupClearBits
            | Sysno::EventGroupSync => Failure::False,
            Sysno::QueueDelete | Sysno::EventGroupDelete | Sysno::NetifDestroy => Failure::MinusOne,
            Sysno::EspTimerCreate
            | Sysno::EspTimerStartOnce
            | Sysno::EspTimerStartPeriodic
            | Sysno::EspTimerStop
            | Sysno::EspTimerDelete
            | Sysno::EventHandlerRegister
            | Sysno::EventHandlerUnregister
            | Sysno::GpioIsrHandlerAdd
            | Sysno::GpioIsrHandlerRemove
            | Sysno::GetProtectedHeapStats => Failure::Esp,
            Sysno::Socket
            | Sysno::Send
            | Sysno::Recv
            | Sysno::Close
            | Sysno::UartRead
            | Sysno::UartWrite => Failure::MinusOne,
        }
    }
}

/// Calls whose success value is a user-visible object reference.
const fn returns_object(nr: Sysno) -> bool {
    matches!(
        nr,
        Sysno::TaskGetCurrent
            | Sysno::QueueCreate
            | Sysno::XTimerCreate
            | Sysno::EventGroupCreate
            | Sysno::NetifCreateDefaultSta
    )
}

/// Executes syscall `nr` on behalf of the current task and returns the value for `a0`.
pub fn dispatch<P: Platform>(ps: &PrivSep<P>, nr: u32, args: &Args) -> isize {
    let Some(sysno) = Sysno::from_raw(nr) else {
        crate::log_debug!(target: "syscall", "unassigned syscall {}", nr);
        return -1;
    };
    let result = match sysno {
        Sysno::TaskCreate => task::sys_create(ps, args),
        Sysno::TaskDelete => task::sys_delete(ps, args),
        Sysno::TaskDelay => task::sys_delay(ps, args),
        Sysno::TaskSuspend => task::sys_suspend(ps, args),
        Sysno::TaskResume => task::sys_resume(ps, args),
        Sysno::TaskGetCurrent => task::sys_get_current(ps, args),
        Sysno::QueueCreate => queue::sys_create(ps, args),
        Sysno::QueueSend => queue::sys_send(ps, args),
        Sysno::QueueReceive => queue::sys_receive(ps, args),
        Sysno::QueueMessagesWaiting => queue::sys_messages_waiting(ps, args),
        Sysno::QueueDelete => queue::sys_delete(ps, args),
        Sysno::XTimerCreate => timer::sys_xtimer_create(ps, args),
        Sysno::XTimerGenericCommand => timer::sys_xtimer_command(ps, args),
        Sysno::XTimerGetId => timer::sys_xtimer_get_id(ps, args),
        Sysno::EspTimerCreate => timer::sys_esp_timer_create(ps, args),
        Sysno::EspTimerStartOnce => timer::sys_esp_timer_start(ps, args, false),
        Sysno::EspTimerStartPeriodic => timer::sys_esp_timer_start(ps, args, true),
        Sysno::EspTimerStop => timer::sys_esp_timer_stop(ps, args),
        Sysno::EspTimerDelete => timer::sys_esp_timer_delete(ps, args),
        Sysno::EventGroupCreate => event::sys_group_create(ps, args),
        Sysno::EventGroupWaitBits => event::sys_group_wait(ps, args),
        Sysno::EventGroupSetBits => event::sys_group_set(ps, args),
        Sysno::EventGroupClearBits => event::sys_group_clear(ps, args),
        Sysno::EventGroupSync => event::sys_group_sync(ps, args),
        Sysno::EventGroupDelete => event::sys_group_delete(ps, args),
        Sysno::EventHandlerRegister => event::sys_handler_register(ps, args),
        Sysno::EventHandlerUnregister => event::sys_handler_unregister(ps, args),
        Sysno::GpioIsrHandlerAdd => gpio::sys_isr_add(ps, args),
        Sysno::GpioIsrHandlerRemove => gpio::sys_isr_remove(ps, args),
        Sysno::NetifCreateDefaultSta => io::sys_netif_create(ps, args),
        Sysno::NetifDestroy => io::sys_netif_destroy(ps, args),
        Sysno::Socket => io::sys_socket(ps, args),
        Sysno::Send => io::sys_send(ps, args),
        Sysno::Recv => io::sys_recv(ps, args),
        Sysno::Close => io::sys_close(ps, args),
        Sysno::UartRead => io::sys_uart_read(ps, args),
        Sysno::UartWrite => io::sys_uart_write(ps, args),
        Sysno::GetProtectedHeapStats => io::sys_heap_stats(ps, args),
    };
    match result {
        Ok(value) if returns_object(sysno) => verify_returned_ptr(ps, sysno, value),
        Ok(value) => value,
        Err(err) => {
            crate::log_debug!(target: "syscall", "{:?} failed: {}", sysno, err);
            Failure::of(sysno).encode(err)
        }
    }
}

/// Last line of defence: an object-returning call must never hand out a kernel address.
fn verify_returned_ptr<P: Platform>(ps: &PrivSep<P>, nr: Sysno, value: isize) -> isize {
    if value != 0 && ps.layout.is_valid_kdram_addr(value as usize) {
        crate::log_error!(target: "syscall", "{:?} returned kernel pointer {:#x}", nr, value);
        ps.platform.abort("kernel pointer leaked to user world");
        return -1;
    }
    value
}

// ------------------------------------------------------------------ helpers

/// Resolves a handle argument of the expected type.
#[inline]
pub(crate) fn verify<P: Platform>(ps: &PrivSep<P>, raw: usize, ty: ObjType) -> SysResult<Entry> {
    let raw = u32::try_from(raw).map_err(|_| SysError::BadHandle)?;
    ps.map.verify(raw, ty).ok_or(SysError::BadHandle)
}

/// Zeroed bounce buffer for a user copy. Callers classify the user range first;
/// allocation failure is reported, never fatal.
pub(crate) fn bounce(len: usize) -> SysResult<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| SysError::NoMem)?;
    buf.resize(len, 0);
    Ok(buf)
}

/// Writes a word to a user DRAM cell; `0` means "not wanted".
pub(crate) fn put_user_u32<P: Platform>(ps: &PrivSep<P>, addr: usize, value: u32) -> SysResult<()> {
    if !ps.layout.is_valid_udram_range(addr, 4) {
        return Err(SysError::BadAddress);
    }
    ps.platform.write_u32(addr, value);
    Ok(())
}

/// Registers a freshly created object, destroying it if the map is full.
pub(crate) fn publish<P: Platform>(
    ps: &PrivSep<P>,
    obj: usize,
    ty: ObjType,
    destroy: impl FnOnce(&P),
) -> SysResult<isize> {
    match ps.map.add(obj, ty) {
        Some(handle) => Ok(handle.raw() as isize),
        None => {
            crate::log_error!(target: "syscall", "Insufficient memory for shim struct");
            destroy(&ps.platform);
            Err(SysError::NoMem)
        }
    }
}
