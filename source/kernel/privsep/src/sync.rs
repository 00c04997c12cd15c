// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Lock for tables shared between syscalls, the scheduler bracket and the fault path
//! OWNERS: @kernel-team
//! PUBLIC API: IrqMutex::{new, lock, try_lock}, IrqMutexGuard
//! DEPENDS_ON: spin::Mutex, cpu::CriticalSection
//! INVARIANTS: The holder runs with machine interrupts masked, so it can neither be preempted
//!             nor interrupted while holding the lock; callers never allocate or block under it
//! ADR: docs/adr/0001-world-separation.md

use core::ops::{Deref, DerefMut};

use crate::cpu::CriticalSection;

/// Spin lock whose holder runs with interrupts masked.
///
/// On a single core a preempted holder would leave every other task spinning
/// forever; masking makes the critical section run to completion instead.
pub struct IrqMutex<T> {
    inner: spin::Mutex<T>,
}

impl<T> IrqMutex<T> {
    pub const fn new(value: T) -> Self {
        Self { inner: spin::Mutex::new(value) }
    }

    pub fn lock(&self) -> IrqMutexGuard<'_, T> {
        let section = CriticalSection::enter();
        IrqMutexGuard { guard: self.inner.lock(), _section: section }
    }

    /// Non-blocking lock for interrupt context.
    pub fn try_lock(&self) -> Option<IrqMutexGuard<'_, T>> {
        let section = CriticalSection::enter();
        let guard = self.inner.try_lock()?;
        Some(IrqMutexGuard { guard, _section: section })
    }
}

impl<T: Default> Default for IrqMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Field order matters: the lock is released before interrupts are unmasked.
pub struct IrqMutexGuard<'a, T> {
    guard: spin::MutexGuard<'a, T>,
    _section: CriticalSection,
}

impl<T> Deref for IrqMutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for IrqMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
