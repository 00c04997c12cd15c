// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Violation interrupt, crashed-task reporting and recovery policy
//! OWNERS: @kernel-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below plus the DRAM-fault scenario in `tests.rs`
//! PUBLIC API: FaultKind, probe, fault_addr, mcause_reason, Recovery,
//!             PrivSep::{on_violation, handle_crashed_task, on_task_wdt}, crash_user_app
//! DEPENDS_ON: hal::permc, task::TaskTable (try-lock only), boot::user_reboot
//! INVARIANTS: Runs in interrupt context: never blocks, never allocates on the report
//!             path, never touches the handle map; exactly one policy is applied per fault
//! ADR: docs/adr/0001-world-separation.md

use core::fmt::{self, Write};
use core::sync::atomic::Ordering;

use privsep_abi::Layout;

use crate::config::Policy;
use crate::context::PrivSep;
use crate::cpu::IsrGuard;
use crate::hal::permc::{Monitor, Permc};
use crate::hal::Mmio;
use crate::platform::{KObj, Platform};
use crate::trap::{ExcFrame, REG_SP};

/// Source of a permission violation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultKind {
    Iram,
    Dram,
    FlashIcache,
    FlashDcache,
    Rtc,
    Peripheral,
}

impl FaultKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            FaultKind::Iram => "IRAM",
            FaultKind::Dram => "DRAM",
            FaultKind::FlashIcache => "Flash Icache",
            FaultKind::FlashDcache => "Flash Dcache",
            FaultKind::Rtc => "RTC",
            FaultKind::Peripheral => "Peripheral",
        }
    }

    /// Monitor that reports this kind; RTC and peripherals share the PIF monitor.
    pub const fn monitor(self) -> Monitor {
        match self {
            FaultKind::Iram => Monitor::Iram,
            FaultKind::Dram => Monitor::Dram,
            FaultKind::FlashIcache => Monitor::FlashIcache,
            FaultKind::FlashDcache => Monitor::FlashDcache,
            FaultKind::Rtc | FaultKind::Peripheral => Monitor::Pif,
        }
    }
}

/// Name of an optional fault kind; "Invalid" when nothing is pending.
pub const fn kind_name(kind: Option<FaultKind>) -> &'static str {
    match kind {
        Some(kind) => kind.as_str(),
        None => "Invalid",
    }
}

/// First pending violation in monitor priority order.
pub fn probe<M: Mmio>(permc: &Permc<'_, M>, layout: &Layout) -> Option<FaultKind> {
    let mon = Monitor::PRIORITY.into_iter().find(|mon| permc.int_status(*mon))?;
    Some(match mon {
        Monitor::Iram => FaultKind::Iram,
        Monitor::Dram => FaultKind::Dram,
        Monitor::FlashIcache => FaultKind::FlashIcache,
        Monitor::FlashDcache => FaultKind::FlashDcache,
        Monitor::Pif if layout.is_rtc_addr(permc.fault_addr(Monitor::Pif) as usize) => FaultKind::Rtc,
        Monitor::Pif => FaultKind::Peripheral,
    })
}

/// Faulting address of `kind`; all ones when nothing is pending.
pub fn fault_addr<M: Mmio>(permc: &Permc<'_, M>, kind: Option<FaultKind>) -> u32 {
    kind.map_or(0xFFFF_FFFF, |kind| permc.fault_addr(kind.monitor()))
}

const MCAUSE_REASONS: [Option<&str>; 16] = [
    Some("Instruction address misaligned"),
    Some("Instruction access fault"),
    Some("Illegal instruction"),
    Some("Breakpoint"),
    Some("Load address misaligned"),
    Some("Load access fault"),
    Some("Store address misaligned"),
    Some("Store access fault"),
    Some("Environment call from U-mode"),
    Some("Environment call from S-mode"),
    None,
    Some("Environment call from M-mode"),
    Some("Instruction page fault"),
    Some("Load page fault"),
    None,
    Some("Store page fault"),
];

pub fn mcause_reason(mcause: u32) -> &'static str {
    MCAUSE_REASONS.get(mcause as usize).copied().flatten().unwrap_or("Unknown exception")
}

/// Register labels in frame order.
const REG_NAMES: [&str; 37] = [
    "MEPC    ", "RA      ", "SP      ", "GP      ", "TP      ", "T0      ", "T1      ", "T2      ",
    "S0/FP   ", "S1      ", "A0      ", "A1      ", "A2      ", "A3      ", "A4      ", "A5      ",
    "A6      ", "A7      ", "S2      ", "S3      ", "S4      ", "S5      ", "S6      ", "S7      ",
    "S8      ", "S9      ", "S10     ", "S11     ", "T3      ", "T4      ", "T5      ", "T6      ",
    "MSTATUS ", "MTVEC   ", "MCAUSE  ", "MTVAL   ", "MHARTID ",
];

const STACK_DUMP_BYTES: usize = 1024;
const STACK_WORDS_PER_LINE: usize = 8;
const RULE: &str = "=================================================";

impl ExcFrame {
    fn word(&self, idx: usize) -> u32 {
        match idx {
            0..=31 => self.regs[idx],
            32 => self.mstatus,
            33 => self.mtvec,
            34 => self.mcause,
            35 => self.mtval,
            _ => self.mhartid,
        }
    }
}

/// Action taken after a crashed user task was reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recovery {
    DeleteTask(KObj),
    RestartUser,
    Reboot,
}

/// Target of a user task whose watchdog fired: a store to address zero, which
/// funnels the timeout into the normal fault path.
#[inline(never)]
pub extern "C" fn crash_user_app() -> ! {
    loop {
        #[cfg(target_arch = "riscv32")]
        // SAFETY: the store faults by construction; the task never resumes past it.
        unsafe {
            core::arch::asm!("sw zero, 0(zero)");
        }
        #[cfg(not(target_arch = "riscv32"))]
        core::hint::spin_loop();
    }
}

impl<P: Platform> PrivSep<P> {
    /// Violation interrupt entry.
    ///
    /// Runs the application hook (only if it lives in protected code), then reports
    /// the crashed task and applies the configured policy.
    pub fn on_violation<W: Write>(&self, frame: &mut ExcFrame, out: &mut W) -> Recovery {
        self.on_violation_as(Policy::CONFIGURED, frame, out)
    }

    pub(crate) fn on_violation_as<W: Write>(
        &self,
        policy: Policy,
        frame: &mut ExcFrame,
        out: &mut W,
    ) -> Recovery {
        let _isr = IsrGuard::enter();
        if let Some(handler) = self.app_handler {
            if self.layout.is_valid_kernel_i_addr(handler as usize) {
                handler(frame);
            }
        }
        self.handle_crashed_task_as(policy, frame, out)
    }

    /// Reports the current task's crash and applies the recovery policy once.
    pub fn handle_crashed_task<W: Write>(&self, frame: &mut ExcFrame, out: &mut W) -> Recovery {
        self.handle_crashed_task_as(Policy::CONFIGURED, frame, out)
    }

    pub(crate) fn handle_crashed_task_as<W: Write>(
        &self,
        policy: Policy,
        frame: &mut ExcFrame,
        out: &mut W,
    ) -> Recovery {
        let task = self.platform.current_task();
        let _ = self.report(task, frame, out);
        self.recover(policy, task, out)
    }

    fn report<W: Write>(&self, task: KObj, frame: &mut ExcFrame, out: &mut W) -> fmt::Result {
        let permc = Permc::new(self.platform.regs());
        let kind = probe(&permc, &self.layout);

        writeln!(out, "\n{RULE}")?;
        writeln!(out, "User app exception occurred:")?;
        if self.wdt.pending.swap(false, Ordering::AcqRel) {
            writeln!(out, "Guru Meditation Error: Task WDT timeout")?;
            frame.set_mepc(self.wdt.user_epc.load(Ordering::Acquire));
        } else if let Some(kind) = kind {
            writeln!(
                out,
                "Guru Meditation Error: Illegal {} access: Fault addr: 0x{:x}",
                kind.as_str(),
                fault_addr(&permc, Some(kind))
            )?;
        } else {
            writeln!(out, "Guru Meditation Error: {}", mcause_reason(frame.mcause))?;
        }
        if let Some(kind) = kind {
            permc.clear_and_reenable(kind.monitor());
        }
        writeln!(out, "Troubling task: {}", self.platform.task_name(task))?;
        writeln!(out, "{RULE}")?;

        if self.config.backtrace {
            self.dump_registers(frame, out)?;
            self.dump_stack(frame, out)?;
            write!(out, "\r\n\r\n\r\nELF file SHA256: ")?;
            for byte in self.platform.app_elf_sha256() {
                write!(out, "{byte:02x}")?;
            }
            writeln!(out, "\r\n")?;
            writeln!(out, "{RULE}")?;
        }
        Ok(())
    }

    fn dump_registers<W: Write>(&self, frame: &ExcFrame, out: &mut W) -> fmt::Result {
        write!(out, "Core  {} register dump:", frame.mhartid)?;
        for (i, name) in REG_NAMES.iter().enumerate() {
            if i % 4 == 0 {
                write!(out, "\r\n")?;
            }
            write!(out, "{name}: 0x{:08x}  ", frame.word(i))?;
        }
        Ok(())
    }

    fn dump_stack<W: Write>(&self, frame: &ExcFrame, out: &mut W) -> fmt::Result {
        write!(out, "\r\n\r\nStack memory:\r\n")?;
        let sp = frame.regs[REG_SP] as usize;
        let readable = self.layout.is_valid_udram_range(sp, STACK_DUMP_BYTES)
            || (self.layout.is_valid_kdram_addr(sp)
                && self.layout.is_valid_kdram_addr(sp + STACK_DUMP_BYTES - 1));
        if !readable {
            return write!(out, "sp 0x{sp:08x} outside RAM\r\n");
        }
        let mut line = [0u8; STACK_WORDS_PER_LINE * 4];
        for offset in (0..STACK_DUMP_BYTES).step_by(line.len()) {
            self.platform.read(sp + offset, &mut line);
            write!(out, "{:08x}: ", sp + offset)?;
            for (i, word) in line.chunks_exact(4).enumerate() {
                let word = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
                let sep = if i == STACK_WORDS_PER_LINE - 1 { "\r\n" } else { " " };
                write!(out, "0x{word:08x}{sep}")?;
            }
        }
        Ok(())
    }

    fn recover<W: Write>(&self, policy: Policy, task: KObj, out: &mut W) -> Recovery {
        match policy {
            Policy::DeleteTask => {
                let _ = writeln!(out, "Deleting {}...", self.platform.task_name(task));
                // The platform reports the deletion back through `cleanup_task`.
                self.platform.task_delete(task);
                let _ = writeln!(out, "{RULE}");
                Recovery::DeleteTask(task)
            }
            Policy::RestartUser => {
                self.user_reboot(out);
                let _ = writeln!(out, "Preparing to restart user_app...");
                let _ = writeln!(out, "{RULE}");
                Recovery::RestartUser
            }
            Policy::Reboot => {
                let _ = writeln!(out, "Rebooting...");
                let _ = writeln!(out, "{RULE}");
                self.platform.restart();
                Recovery::Reboot
            }
        }
    }

    /// Task watchdog interrupt.
    ///
    /// A user task is redirected into [`crash_user_app`] and the original pc is kept
    /// for the report; a protected task aborts the system.
    pub fn on_task_wdt(&self, frame: &mut ExcFrame) {
        let _isr = IsrGuard::enter();
        let task = self.platform.current_task();
        // A busy table means a task-context writer was preempted; treat as protected.
        if self.tasks.try_is_user_task(task).unwrap_or(false) {
            if self.config.user_wdt_panic {
                self.wdt.user_epc.store(frame.mepc(), Ordering::Release);
                frame.set_mepc(crash_user_app as usize as u32);
                self.wdt.pending.store(true, Ordering::Release);
            }
        } else if self.config.protected_wdt_panic {
            crate::log_error!(target: "fault", "Aborting.");
            self.platform.abort("task watchdog in protected task");
        }
    }
}
