// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: User-world callback dispatcher task
//! OWNERS: @runtime
//! PUBLIC API: Dispatcher, Invoke, Dispatched
//! DEPENDS_ON: sys::Sys, privsep_abi::{DispatchMsg, Layout}
//! INVARIANTS: A callback runs only in this task's context and only when its entry is
//!             user-executable; malformed records are dropped
//! ADR: docs/adr/0001-world-separation.md

use privsep_abi::{DispatchMsg, Layout, PORT_MAX_DELAY};

use crate::ecall::Trap;
use crate::sys::Sys;

/// Calls a validated callback. The real implementation jumps to the address;
/// tests record it.
pub trait Invoke {
    fn invoke(&mut self, msg: &DispatchMsg);
}

/// Outcome of one received record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatched {
    /// The callback ran.
    Invoked(DispatchMsg),
    /// The entry is not user-executable; nothing ran.
    Rejected(DispatchMsg),
    /// The record did not decode.
    Malformed,
}

/// Entry address the record asks the dispatcher to jump to.
pub fn target(msg: &DispatchMsg) -> u32 {
    match *msg {
        DispatchMsg::Gpio { isr, .. } => isr,
        DispatchMsg::EspTimer { callback, .. } => callback,
        DispatchMsg::XTimer { callback, .. } => callback,
        DispatchMsg::Event { handler, .. } => handler,
    }
}

pub struct Dispatcher<'a, T: Trap> {
    sys: &'a Sys<T>,
    layout: Layout,
    queue: u32,
}

impl<'a, T: Trap> Dispatcher<'a, T> {
    pub fn new(sys: &'a Sys<T>, layout: Layout, queue: u32) -> Self {
        Self { sys, layout, queue }
    }

    /// Validates and runs one decoded record.
    pub fn handle(&self, raw: &[u8], invoker: &mut impl Invoke) -> Dispatched {
        let Some(msg) = DispatchMsg::decode(raw) else {
            return Dispatched::Malformed;
        };
        if !self.layout.is_valid_user_i_addr(target(&msg) as usize) {
            return Dispatched::Rejected(msg);
        }
        invoker.invoke(&msg);
        Dispatched::Invoked(msg)
    }

    /// Waits up to `ticks` for one record; `None` when the queue stayed empty.
    pub fn poll(&self, ticks: u32, invoker: &mut impl Invoke) -> Option<Dispatched> {
        let mut raw = [0u8; DispatchMsg::WIRE_SIZE];
        if !self.sys.queue_receive(self.queue, &mut raw, ticks) {
            return None;
        }
        Some(self.handle(&raw, invoker))
    }

    /// Task body.
    pub fn run(&self, invoker: &mut impl Invoke) -> ! {
        loop {
            let _ = self.poll(PORT_MAX_DELAY, invoker);
        }
    }
}

/// Jumps straight to the callback address.
#[cfg(all(target_arch = "riscv32", target_os = "none"))]
pub struct Direct;

#[cfg(all(target_arch = "riscv32", target_os = "none"))]
impl Invoke for Direct {
    fn invoke(&mut self, msg: &DispatchMsg) {
        use crate::sys::{ArgCallback, EventHandler, XTimerCallback};

        // SAFETY: the dispatcher only passes entries inside user IRAM/IROM, which
        // hold code of the running user image; the types match the registration wrappers.
        unsafe {
            match *msg {
                DispatchMsg::Gpio { isr, arg } => {
                    let f: ArgCallback = core::mem::transmute(isr as usize);
                    f(arg as usize)
                }
                DispatchMsg::EspTimer { callback, arg } => {
                    let f: ArgCallback = core::mem::transmute(callback as usize);
                    f(arg as usize)
                }
                DispatchMsg::XTimer { callback, timer } => {
                    let f: XTimerCallback = core::mem::transmute(callback as usize);
                    f(timer)
                }
                DispatchMsg::Event { handler, arg, base, id, data } => {
                    let f: EventHandler = core::mem::transmute(handler as usize);
                    f(arg as usize, base as usize, id, data as usize)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests_prop;
