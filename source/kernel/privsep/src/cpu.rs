// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Interrupt-context tracking and machine-interrupt masking.
//!
//! The violation vector and every trusted interrupt wrapper hold an [`IsrGuard`]
//! for their duration; blocking primitives assert `!in_isr()`. A
//! [`CriticalSection`] clears `mstatus.MIE`, which on this single-core part also
//! stops the tick from preempting the holder.

#[cfg(not(test))]
mod nesting {
    use core::sync::atomic::{AtomicU32, Ordering};

    static DEPTH: AtomicU32 = AtomicU32::new(0);

    pub fn enter() {
        DEPTH.fetch_add(1, Ordering::AcqRel);
    }

    pub fn exit() {
        DEPTH.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn depth() -> u32 {
        DEPTH.load(Ordering::Acquire)
    }
}

// Host tests run on many threads; keep the counter per thread.
#[cfg(test)]
mod nesting {
    use std::cell::Cell;

    std::thread_local! {
        static DEPTH: Cell<u32> = const { Cell::new(0) };
    }

    pub fn enter() {
        DEPTH.with(|d| d.set(d.get() + 1));
    }

    pub fn exit() {
        DEPTH.with(|d| d.set(d.get() - 1));
    }

    pub fn depth() -> u32 {
        DEPTH.with(|d| d.get())
    }
}

#[cfg(all(target_arch = "riscv32", target_os = "none", not(test)))]
mod mie {
    use riscv::register::mstatus;

    /// Clears MIE; returns whether it was set.
    pub fn disable() -> bool {
        let was = mstatus::read().mie();
        // SAFETY: masking interrupts has no memory-safety preconditions.
        unsafe { mstatus::clear_mie() };
        was
    }

    pub fn restore(was: bool) {
        if was {
            // SAFETY: re-enables exactly what `disable` found enabled.
            unsafe { mstatus::set_mie() };
        }
    }

    pub fn masked() -> bool {
        !mstatus::read().mie()
    }
}

// Host builds model MIE as a mask depth, per thread under test.
#[cfg(all(not(all(target_arch = "riscv32", target_os = "none")), not(test)))]
mod mie {
    use core::sync::atomic::{AtomicU32, Ordering};

    static MASKED: AtomicU32 = AtomicU32::new(0);

    pub fn disable() -> bool {
        MASKED.fetch_add(1, Ordering::AcqRel) == 0
    }

    pub fn restore(_was: bool) {
        MASKED.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn masked() -> bool {
        MASKED.load(Ordering::Acquire) != 0
    }
}


/// True while machine interrupts are masked.
#[inline]
pub fn irqs_masked() -> bool {
    mie::masked()
}

/// Masks machine interrupts until dropped, restoring the previous state.
#[must_use = "interrupts are unmasked again as soon as the section is dropped"]
pub struct CriticalSection {
    was_enabled: bool,
}

impl CriticalSection {
    pub fn enter() -> Self {
        Self { was_enabled: mie::disable() }
    }
}

impl Drop for CriticalSection {
    fn drop(&mut self) {
        mie::restore(self.was_enabled);
    }
}

/// True while an interrupt handler is running.
#[inline]
pub fn in_isr() -> bool {
    nesting::depth() != 0
}

/// Marks interrupt context until dropped.
pub struct IsrGuard {
    _private: (),
}

impl IsrGuard {
    pub fn enter() -> Self {
        nesting::enter();
        Self { _private: () }
    }
}

impl Drop for IsrGuard {
    fn drop(&mut self) {
        nesting::exit();
    }
}
