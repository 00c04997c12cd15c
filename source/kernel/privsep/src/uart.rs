// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Console UART used for logging and fault diagnostics.

use core::fmt::{self, Write};

use crate::sync::{IrqMutex, IrqMutexGuard};

/// UART0 on ESP32-C3.
const UART0_BASE: usize = 0x6000_0000;
const UART_FIFO: usize = 0x0;
const UART_STATUS: usize = 0x1C;
const TXFIFO_CNT_SHIFT: u32 = 16;
const TXFIFO_CNT_MASK: u32 = 0x3FF;
const TXFIFO_DEPTH: u32 = 128;

/// Global console used by task-context logging.
static CONSOLE: IrqMutex<KernelUart> = IrqMutex::new(KernelUart::new(UART0_BASE));

/// UART writer for task context.
#[derive(Clone, Copy)]
pub struct KernelUart {
    #[cfg_attr(not(all(target_arch = "riscv32", target_os = "none")), allow(dead_code))]
    base: usize,
}

impl KernelUart {
    pub const fn new(base: usize) -> Self {
        Self { base }
    }

    /// Returns a guard for the console singleton.
    pub fn lock() -> IrqMutexGuard<'static, KernelUart> {
        CONSOLE.lock()
    }

    fn put(&self, byte: u8) {
        write_fifo(self.base, byte);
    }
}

impl Write for KernelUart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &byte in s.as_bytes() {
            if byte == b'\n' {
                self.put(b'\r');
            }
            self.put(byte);
        }
        Ok(())
    }
}

#[cfg(all(target_arch = "riscv32", target_os = "none"))]
#[inline]
fn write_fifo(base: usize, byte: u8) {
    // SAFETY: UART0 is always mapped on the SoC; the FIFO accepts byte writes.
    unsafe {
        while (core::ptr::read_volatile((base + UART_STATUS) as *const u32) >> TXFIFO_CNT_SHIFT)
            & TXFIFO_CNT_MASK
            >= TXFIFO_DEPTH
        {}
        core::ptr::write_volatile((base + UART_FIFO) as *mut u32, byte as u32);
    }
}

#[cfg(not(all(target_arch = "riscv32", target_os = "none")))]
#[inline]
fn write_fifo(_base: usize, _byte: u8) {
    let _ = (UART_FIFO, UART_STATUS, TXFIFO_CNT_SHIFT, TXFIFO_CNT_MASK, TXFIFO_DEPTH);
}

/// Lock-free writer for the violation interrupt and panic paths.
pub struct RawUart;

impl Write for RawUart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &byte in s.as_bytes() {
            if byte == b'\n' {
                write_fifo(UART0_BASE, b'\r');
            }
            write_fifo(UART0_BASE, byte);
        }
        Ok(())
    }
}

pub fn raw_writer() -> RawUart {
    RawUart
}
