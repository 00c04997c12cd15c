// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//! Trap handling: external ASM prologue/epilogue + safe Rust core.
//!
//! `arch/riscv/trap.S` saves the frame on a protected entry stack, asks
//! [`ecall_stack_top`] for the calling task's kernel stack, moves the frame
//! there and calls [`ecall_dispatch`]; the epilogue restores the frame,
//! including the user `sp`, and returns with `mret`. The violation stub saves
//! the same frame and calls [`violation_dispatch`].

use core::fmt::{self, Write};

use privsep_abi::World;

use crate::context::PrivSep;
use crate::diag::log::CallerWorld;
use crate::hal::wcntl::Wcntl;
use crate::platform::Platform;
use crate::syscall::{self, Args};

// ——— include low-level vectors from assembly (SoC target only) ———
#[cfg(all(target_arch = "riscv32", target_os = "none"))]
core::arch::global_asm!(
    include_str!("arch/riscv/trap.S"),
    FRAME_SIZE       = const EXC_FRAME_SIZE,
    FRAME_ALLOC      = const EXC_FRAME_ALLOC,
    ENTRY_STACK_SIZE = const ENTRY_STACK_SIZE,
    OFF_MSTATUS      = const 32 * 4,
    OFF_MTVEC        = const 33 * 4,
    OFF_MCAUSE       = const 34 * 4,
    OFF_MTVAL        = const 35 * 4,
    OFF_MHARTID      = const 36 * 4,
);

#[cfg(all(target_arch = "riscv32", target_os = "none"))]
extern "C" {
    /// Installed by the platform's exception vector for `mcause == 11`.
    pub fn _privsep_ecall_entry();
    /// Installed on the permission-violation interrupt line.
    pub fn _privsep_violation_entry();
}

/// Register file saved on trap entry.
///
/// Slot 0 holds `mepc` (x0 is hard-wired to zero and never saved); slots 1..31
/// hold x1..x31.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExcFrame {
    pub regs: [u32; 32],
    pub mstatus: u32,
    pub mtvec: u32,
    pub mcause: u32,
    pub mtval: u32,
    pub mhartid: u32,
}

pub const REG_MEPC: usize = 0;
pub const REG_RA: usize = 1;
pub const REG_SP: usize = 2;
pub const REG_A0: usize = 10;
pub const REG_A7: usize = 17;

/// Size of [`ExcFrame`] as laid out by the assembly prologue.
pub const EXC_FRAME_SIZE: usize = 37 * 4;
/// Stack bytes reserved per frame; keeps `sp` 16-byte aligned across calls.
pub const EXC_FRAME_ALLOC: usize = (EXC_FRAME_SIZE + 15) & !15;
/// Entry stack: one frame plus the hook calls made before the switch.
pub const ENTRY_STACK_SIZE: usize = 1024;
static_assertions::const_assert_eq!(core::mem::size_of::<ExcFrame>(), EXC_FRAME_SIZE);
static_assertions::const_assert!(EXC_FRAME_ALLOC % 16 == 0);
static_assertions::const_assert!(ENTRY_STACK_SIZE >= 4 * EXC_FRAME_ALLOC);

impl ExcFrame {
    #[inline]
    pub fn mepc(&self) -> u32 {
        self.regs[REG_MEPC]
    }

    #[inline]
    pub fn set_mepc(&mut self, pc: u32) {
        self.regs[REG_MEPC] = pc;
    }

    #[inline]
    pub fn sp(&self) -> u32 {
        self.regs[REG_SP]
    }

    /// Argument register `a<n>`.
    #[inline]
    pub fn a(&self, n: usize) -> u32 {
        self.regs[REG_A0 + n]
    }
}

/// mcause of an environment call from M-mode.
pub const MCAUSE_ECALL_M: u32 = 11;

impl<P: Platform> PrivSep<P> {
    /// Kernel stack top for the task about to enter a syscall, if it is a user task.
    pub fn kernel_stack_top(&self, task: crate::platform::KObj) -> Option<usize> {
        self.tasks.get(task)?.kernel_stack.map(|ks| ks.top())
    }
}

/// Executes the ecall described by `frame` on behalf of the current task.
///
/// a7 carries the syscall number and a0..a5 the arguments; the result goes to
/// a0 and `mepc` is advanced past the `ecall`. Protected tasks may not use the
/// gateway and get `-1`.
pub fn handle_ecall<P: Platform>(ps: &PrivSep<P>, frame: &mut ExcFrame) {
    let current = ps.platform.current_task();
    let user_sp = frame.sp();

    let ret = match ps.tasks.get(current).and_then(|ctx| ctx.kernel_stack) {
        Some(kstack) => {
            let _caller = CallerWorld::enter(World::W1);
            ps.tasks.update(current, |ctx| ctx.saved_user_sp = Some(user_sp as usize));
            frame.regs[REG_SP] = kstack.top() as u32;

            let number = frame.a(7);
            let args = Args::new([
                frame.a(0) as usize,
                frame.a(1) as usize,
                frame.a(2) as usize,
                frame.a(3) as usize,
                frame.a(4) as usize,
                frame.a(5) as usize,
            ]);
            let ret = syscall::dispatch(ps, number, &args);

            // The caller may have deleted itself; its record is gone then.
            ps.tasks.update(current, |ctx| ctx.saved_user_sp = None);
            frame.regs[REG_SP] = user_sp;
            ret
        }
        None => {
            crate::log_warn!(target: "syscall", "ecall from protected task ignored");
            -1
        }
    };
    frame.regs[REG_A0] = ret as u32;
    frame.set_mepc(frame.mepc().wrapping_add(4));
}

impl<P: Platform> PrivSep<P> {
    /// Serves the ecall in `frame` and, for a user caller, arms the return to
    /// WORLD1 at the advanced `mepc`.
    pub fn ecall_trap(&self, frame: &mut ExcFrame) {
        handle_ecall(self, frame);
        if self.tasks.is_user_task(self.platform.current_task()) {
            Wcntl::new(self.platform.regs()).set_w1_entry(frame.mepc());
        }
    }
}

// ——— trap-time environment ———

/// Type-erased context the assembly stubs reach through the `privsep_*` hooks.
struct TrapEnv {
    ctx: *const (),
    stack_top: fn(*const ()) -> usize,
    ecall: fn(*const (), &mut ExcFrame),
    violation: fn(*const (), &mut ExcFrame),
}

// SAFETY: the context is `'static` and only used from the single hart's
// trap path; see `register_trap_env`.
unsafe impl Send for TrapEnv {}
unsafe impl Sync for TrapEnv {}

static TRAP_ENV: spin::Once<TrapEnv> = spin::Once::new();

/// Registers the context served by the trap stubs. The first call wins.
///
/// # Safety
///
/// Single-hart use only: the trap path shares `ps` with task context without
/// further synchronisation beyond the context's own locks.
pub unsafe fn register_trap_env<P: Platform + 'static>(ps: &'static PrivSep<P>) {
    fn context<P: Platform + 'static>(ctx: *const ()) -> &'static PrivSep<P> {
        // SAFETY: `ctx` was produced from a `&'static PrivSep<P>` of this very `P`.
        unsafe { &*ctx.cast::<PrivSep<P>>() }
    }
    fn stack_top<P: Platform + 'static>(ctx: *const ()) -> usize {
        let ps = context::<P>(ctx);
        ps.kernel_stack_top(ps.platform.current_task()).unwrap_or(0)
    }
    fn ecall<P: Platform + 'static>(ctx: *const (), frame: &mut ExcFrame) {
        context::<P>(ctx).ecall_trap(frame);
    }
    fn violation<P: Platform + 'static>(ctx: *const (), frame: &mut ExcFrame) {
        let _ = context::<P>(ctx).on_violation(frame, &mut crate::uart::raw_writer());
    }
    TRAP_ENV.call_once(|| TrapEnv {
        ctx: (ps as *const PrivSep<P>).cast(),
        stack_top: stack_top::<P>,
        ecall: ecall::<P>,
        violation: violation::<P>,
    });
}

/// Kernel stack top for the trapping task; 0 keeps the entry stack.
pub fn ecall_stack_top() -> usize {
    TRAP_ENV.get().map_or(0, |env| (env.stack_top)(env.ctx))
}

/// Serves the ecall saved in `frame`; without a registered context the
/// caller gets `-1` and continues past the `ecall`.
pub fn ecall_dispatch(frame: &mut ExcFrame) {
    match TRAP_ENV.get() {
        Some(env) => (env.ecall)(env.ctx, frame),
        None => {
            frame.regs[REG_A0] = u32::MAX;
            frame.set_mepc(frame.mepc().wrapping_add(4));
        }
    }
}

pub fn violation_dispatch(frame: &mut ExcFrame) {
    if let Some(env) = TRAP_ENV.get() {
        (env.violation)(env.ctx, frame);
    }
}

#[cfg(all(target_arch = "riscv32", target_os = "none"))]
#[no_mangle]
extern "C" fn privsep_ecall_stack_top() -> usize {
    ecall_stack_top()
}

#[cfg(all(target_arch = "riscv32", target_os = "none"))]
#[no_mangle]
extern "C" fn privsep_ecall_dispatch(frame: &mut ExcFrame) {
    ecall_dispatch(frame);
}

#[cfg(all(target_arch = "riscv32", target_os = "none"))]
#[no_mangle]
extern "C" fn privsep_violation_dispatch(frame: &mut ExcFrame) {
    violation_dispatch(frame);
}

/// Writes the a0..a7 window and trap CSRs of `frame`.
pub fn fmt_trap<W: Write>(frame: &ExcFrame, f: &mut W) -> fmt::Result {
    writeln!(f, " mepc=0x{:08x} mcause=0x{:08x} mtval=0x{:08x}", frame.mepc(), frame.mcause, frame.mtval)?;
    writeln!(f, " a0..a7 = {:08x?}", &frame.regs[REG_A0..=REG_A7])
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;

    #[test]
    fn fmt_includes_registers() {
        let mut frame = ExcFrame::default();
        frame.regs[REG_A0..=REG_A7].copy_from_slice(&[1; 8]);
        frame.set_mepc(0x4200_1000);
        frame.mcause = MCAUSE_ECALL_M;
        let mut out = String::new();
        fmt_trap(&frame, &mut out).unwrap();
        assert!(out.contains("mepc=0x42001000"));
        assert!(out.contains("a0..a7"));
    }
}
