// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Typed wrappers over every protected-world syscall
//! OWNERS: @runtime
//! PUBLIC API: Sys, SysError, QueuePos, callback entry types
//! DEPENDS_ON: ecall::Trap, privsep_abi
//! INVARIANTS: Every buffer handed to the protected world lives in the caller's frame or the
//!             user heap; handles are opaque u32 values and never dereferenced here
//! ADR: docs/adr/0001-world-separation.md

use core::fmt;

use privsep_abi::{EspErr, EspTimerArgs, HeapStats, Sysno, TaskCtx, TimerCmd, ESP_OK, PD_PASS};

use crate::ecall::Trap;

/// Entry point of a user task.
pub type TaskEntry = extern "C" fn(usize);
/// Software-timer callback; receives the timer handle.
pub type XTimerCallback = extern "C" fn(u32);
/// High-resolution timer callback and GPIO soft-ISR; receive the registered argument.
pub type ArgCallback = extern "C" fn(usize);
/// Event handler: `(arg, base, id, data)`.
pub type EventHandler = extern "C" fn(usize, usize, i32, usize);

/// Failure reported by a wrapper.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SysError {
    /// The call failed without further detail (`-1`, NULL or `pdFALSE`).
    Failed,
    /// The protected world could not allocate.
    NoMem,
    /// A string argument is not NUL-terminated.
    Unterminated,
    /// ESP-style status code.
    Esp(EspErr),
}

impl fmt::Display for SysError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SysError::Failed => f.write_str("syscall failed"),
            SysError::NoMem => f.write_str("out of memory"),
            SysError::Unterminated => f.write_str("string not NUL-terminated"),
            SysError::Esp(err) => write!(f, "esp error 0x{:x}", *err as i32),
        }
    }
}

/// Where `queue_send` places the item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum QueuePos {
    Back = 0,
    Front = 1,
    Overwrite = 2,
}

const ERR_COULD_NOT_ALLOCATE: isize = -1;

#[inline]
fn esp_result(ret: isize) -> Result<(), SysError> {
    if ret == ESP_OK as isize {
        Ok(())
    } else {
        Err(SysError::Esp(EspErr::from_code(ret as i32)))
    }
}

#[inline]
fn zero_ok(ret: isize) -> Result<(), SysError> {
    if ret == 0 {
        Ok(())
    } else {
        Err(SysError::Failed)
    }
}

#[inline]
fn handle(ret: isize) -> Option<u32> {
    (ret != 0).then_some(ret as u32)
}

#[inline]
fn c_str(name: &[u8]) -> Result<usize, SysError> {
    match name.last() {
        Some(0) => Ok(name.as_ptr() as usize),
        _ => Err(SysError::Unterminated),
    }
}

/// Syscall surface of the user world.
pub struct Sys<T: Trap> {
    trap: T,
}

impl<T: Trap> Sys<T> {
    pub const fn new(trap: T) -> Self {
        Self { trap }
    }

    pub fn trap(&self) -> &T {
        &self.trap
    }

    #[inline]
    fn call(&self, nr: Sysno, args: [usize; 6]) -> isize {
        self.trap.call(nr, args)
    }

    // ---------------------------------------------------------------- tasks

    /// Creates a task on a stack and errno cell the caller allocated.
    ///
    /// `name` must be NUL-terminated. When `ctx.task_handle` is non-zero the
    /// new task's handle is written there.
    pub fn task_create(
        &self,
        entry: TaskEntry,
        name: &[u8],
        param: usize,
        priority: u32,
        ctx: &TaskCtx,
    ) -> Result<(), SysError> {
        let name = c_str(name)?;
        let raw = ctx.encode();
        let ret = self.call(
            Sysno::TaskCreate,
            [entry as usize, name, param, priority as usize, 0, raw.as_ptr() as usize],
        );
        match ret {
            PD_PASS => Ok(()),
            ERR_COULD_NOT_ALLOCATE => Err(SysError::NoMem),
            _ => Err(SysError::Failed),
        }
    }

    /// Deletes `task`, or the caller when `None`.
    pub fn task_delete(&self, task: Option<u32>) -> Result<(), SysError> {
        zero_ok(self.call(Sysno::TaskDelete, [task.unwrap_or(0) as usize, 0, 0, 0, 0, 0]))
    }

    pub fn task_delay(&self, ticks: u32) {
        self.call(Sysno::TaskDelay, [ticks as usize, 0, 0, 0, 0, 0]);
    }

    pub fn task_suspend(&self, task: Option<u32>) -> Result<(), SysError> {
        zero_ok(self.call(Sysno::TaskSuspend, [task.unwrap_or(0) as usize, 0, 0, 0, 0, 0]))
    }

    pub fn task_resume(&self, task: u32) -> Result<(), SysError> {
        zero_ok(self.call(Sysno::TaskResume, [task as usize, 0, 0, 0, 0, 0]))
    }

    pub fn task_current(&self) -> Option<u32> {
        handle(self.call(Sysno::TaskGetCurrent, [0; 6]))
    }

    // --------------------------------------------------------------- queues

    /// Creates a queue; the cleanup and dispatch queue types return their singleton.
    pub fn queue_create(&self, len: usize, item_size: usize, ty: u8) -> Option<u32> {
        handle(self.call(Sysno::QueueCreate, [len, item_size, ty as usize, 0, 0, 0]))
    }

    pub fn queue_send(&self, queue: u32, item: &[u8], ticks: u32, pos: QueuePos) -> bool {
        let args = [queue as usize, item.as_ptr() as usize, ticks as usize, pos as usize, 0, 0];
        self.call(Sysno::QueueSend, args) != 0
    }

    /// Receives one item into `out`, which must be at least the queue's item size.
    pub fn queue_receive(&self, queue: u32, out: &mut [u8], ticks: u32) -> bool {
        let args = [queue as usize, out.as_mut_ptr() as usize, ticks as usize, 0, 0, 0];
        self.call(Sysno::QueueReceive, args) != 0
    }

    pub fn queue_messages_waiting(&self, queue: u32) -> usize {
        self.call(Sysno::QueueMessagesWaiting, [queue as usize, 0, 0, 0, 0, 0]).max(0) as usize
    }

    pub fn queue_delete(&self, queue: u32) -> Result<(), SysError> {
        zero_ok(self.call(Sysno::QueueDelete, [queue as usize, 0, 0, 0, 0, 0]))
    }

    // --------------------------------------------------------------- timers

    pub fn xtimer_create(
        &self,
        name: &[u8],
        period: u32,
        auto_reload: bool,
        id: u32,
        callback: XTimerCallback,
    ) -> Result<u32, SysError> {
        let name = c_str(name)?;
        let args =
            [name, period as usize, auto_reload as usize, id as usize, callback as usize, 0];
        handle(self.call(Sysno::XTimerCreate, args)).ok_or(SysError::Failed)
    }

    /// Issues a software-timer command; `value` is the new period for
    /// [`TimerCmd::ChangePeriod`] and ignored otherwise.
    pub fn xtimer_command(&self, timer: u32, cmd: TimerCmd, value: u32, ticks: u32) -> bool {
        let args = [timer as usize, cmd as usize, value as usize, 0, ticks as usize, 0];
        self.call(Sysno::XTimerGenericCommand, args) != 0
    }

    pub fn xtimer_get_id(&self, timer: u32) -> u32 {
        self.call(Sysno::XTimerGetId, [timer as usize, 0, 0, 0, 0, 0]) as u32
    }

    pub fn esp_timer_create(
        &self,
        callback: ArgCallback,
        arg: u32,
        skip_unhandled: bool,
    ) -> Result<u32, SysError> {
        let raw = EspTimerArgs {
            callback: callback as usize as u32,
            arg,
            dispatch_method: 0,
            name: 0,
            skip_unhandled: skip_unhandled as u32,
        }
        .encode();
        let mut out = 0u32;
        let args = [raw.as_ptr() as usize, &mut out as *mut u32 as usize, 0, 0, 0, 0];
        esp_result(self.call(Sysno::EspTimerCreate, args))?;
        Ok(out)
    }

    pub fn esp_timer_start_once(&self, timer: u32, us: u64) -> Result<(), SysError> {
        self.esp_timer_start(Sysno::EspTimerStartOnce, timer, us)
    }

    pub fn esp_timer_start_periodic(&self, timer: u32, us: u64) -> Result<(), SysError> {
        self.esp_timer_start(Sysno::EspTimerStartPeriodic, timer, us)
    }

    fn esp_timer_start(&self, nr: Sysno, timer: u32, us: u64) -> Result<(), SysError> {
        let args = [timer as usize, us as u32 as usize, (us >> 32) as u32 as usize, 0, 0, 0];
        esp_result(self.call(nr, args))
    }

    pub fn esp_timer_stop(&self, timer: u32) -> Result<(), SysError> {
        esp_result(self.call(Sysno::EspTimerStop, [timer as usize, 0, 0, 0, 0, 0]))
    }

    pub fn esp_timer_delete(&self, timer: u32) -> Result<(), SysError> {
        esp_result(self.call(Sysno::EspTimerDelete, [timer as usize, 0, 0, 0, 0, 0]))
    }

    // --------------------------------------------------------------- events

    pub fn event_group_create(&self) -> Option<u32> {
        handle(self.call(Sysno::EventGroupCreate, [0; 6]))
    }

    pub fn event_group_wait(
        &self,
        group: u32,
        bits: u32,
        clear_on_exit: bool,
        wait_for_all: bool,
        ticks: u32,
    ) -> u32 {
        let args = [
            group as usize,
            bits as usize,
            clear_on_exit as usize,
            wait_for_all as usize,
            ticks as usize,
            0,
        ];
        self.call(Sysno::EventGroupWaitBits, args) as u32
    }

    pub fn event_group_set(&self, group: u32, bits: u32) -> u32 {
        self.call(Sysno::EventGroupSetBits, [group as usize, bits as usize, 0, 0, 0, 0]) as u32
    }

    pub fn event_group_clear(&self, group: u32, bits: u32) -> u32 {
        self.call(Sysno::EventGroupClearBits, [group as usize, bits as usize, 0, 0, 0, 0]) as u32
    }

    pub fn event_group_sync(&self, group: u32, set: u32, wait: u32, ticks: u32) -> u32 {
        let args = [group as usize, set as usize, wait as usize, ticks as usize, 0, 0];
        self.call(Sysno::EventGroupSync, args) as u32
    }

    pub fn event_group_delete(&self, group: u32) -> Result<(), SysError> {
        zero_ok(self.call(Sysno::EventGroupDelete, [group as usize, 0, 0, 0, 0, 0]))
    }

    /// Registers `handler` for `(base, id)`; `base` is a NUL-terminated event base name.
    pub fn event_handler_register(
        &self,
        base: &'static [u8],
        id: i32,
        handler: EventHandler,
        arg: u32,
    ) -> Result<u32, SysError> {
        let base = c_str(base)?;
        let mut out = 0u32;
        let out_ptr = &mut out as *mut u32 as usize;
        let args = [base, id as u32 as usize, handler as usize, arg as usize, out_ptr, 0];
        esp_result(self.call(Sysno::EventHandlerRegister, args))?;
        Ok(out)
    }

    pub fn event_handler_unregister(
        &self,
        base: &'static [u8],
        id: i32,
        instance: u32,
    ) -> Result<(), SysError> {
        let base = c_str(base)?;
        let args = [base, id as u32 as usize, instance as usize, 0, 0, 0];
        esp_result(self.call(Sysno::EventHandlerUnregister, args))
    }

    pub fn gpio_isr_handler_add(
        &self,
        gpio: u32,
        isr: ArgCallback,
        arg: u32,
    ) -> Result<u32, SysError> {
        let mut out = 0u32;
        let args = [gpio as usize, isr as usize, arg as usize, &mut out as *mut u32 as usize, 0, 0];
        esp_result(self.call(Sysno::GpioIsrHandlerAdd, args))?;
        Ok(out)
    }

    pub fn gpio_isr_handler_remove(&self, handle: u32) -> Result<(), SysError> {
        esp_result(self.call(Sysno::GpioIsrHandlerRemove, [handle as usize, 0, 0, 0, 0, 0]))
    }

    // ------------------------------------------------------------ net + io

    pub fn netif_create_default_sta(&self) -> Option<u32> {
        handle(self.call(Sysno::NetifCreateDefaultSta, [0; 6]))
    }

    pub fn netif_destroy(&self, netif: u32) -> Result<(), SysError> {
        zero_ok(self.call(Sysno::NetifDestroy, [netif as usize, 0, 0, 0, 0, 0]))
    }

    pub fn socket(&self, domain: i32, ty: i32, protocol: i32) -> i32 {
        let args = [domain as u32 as usize, ty as u32 as usize, protocol as u32 as usize, 0, 0, 0];
        self.call(Sysno::Socket, args) as i32
    }

    pub fn send(&self, sock: i32, data: &[u8], flags: i32) -> isize {
        let args =
            [sock as u32 as usize, data.as_ptr() as usize, data.len(), flags as u32 as usize, 0, 0];
        self.call(Sysno::Send, args)
    }

    pub fn recv(&self, sock: i32, buf: &mut [u8], flags: i32) -> isize {
        let args = [
            sock as u32 as usize,
            buf.as_mut_ptr() as usize,
            buf.len(),
            flags as u32 as usize,
            0,
            0,
        ];
        self.call(Sysno::Recv, args)
    }

    pub fn close(&self, sock: i32) -> i32 {
        self.call(Sysno::Close, [sock as u32 as usize, 0, 0, 0, 0, 0]) as i32
    }

    pub fn uart_read(&self, port: u32, buf: &mut [u8], ticks: u32) -> isize {
        let args =
            [port as usize, buf.as_mut_ptr() as usize, buf.len(), ticks as usize, 0, 0];
        self.call(Sysno::UartRead, args)
    }

    pub fn uart_write(&self, port: u32, data: &[u8]) -> isize {
        self.call(Sysno::UartWrite, [port as usize, data.as_ptr() as usize, data.len(), 0, 0, 0])
    }

    pub fn protected_heap_stats(&self) -> Result<HeapStats, SysError> {
        let mut raw = [0u8; HeapStats::WIRE_SIZE];
        let args = [raw.as_mut_ptr() as usize, 0, 0, 0, 0, 0];
        esp_result(self.call(Sysno::GetProtectedHeapStats, args))?;
        HeapStats::decode(&raw).ok_or(SysError::Failed)
    }
}
