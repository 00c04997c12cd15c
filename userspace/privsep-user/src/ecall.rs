// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Trap instruction used to enter the protected world.

use privsep_abi::Sysno;

/// Something that can carry a syscall into the protected world.
///
/// Arguments travel in `a0..a5`, the number in `a7`; the result comes back in `a0`.
pub trait Trap {
    fn call(&self, nr: Sysno, args: [usize; 6]) -> isize;
}

/// The real gateway: a single `ecall` from WORLD1.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ecall;

impl Trap for Ecall {
    #[inline(always)]
    fn call(&self, nr: Sysno, args: [usize; 6]) -> isize {
        #[cfg(all(target_arch = "riscv32", target_os = "none"))]
        {
            // SAFETY: the protected world validates every argument before use.
            unsafe { ecall6(nr.raw() as usize, args) as isize }
        }
        #[cfg(not(all(target_arch = "riscv32", target_os = "none")))]
        {
            let _ = (nr, args);
            -1
        }
    }
}

#[cfg(all(target_arch = "riscv32", target_os = "none"))]
#[allow(unused_assignments)]
#[inline(always)]
unsafe fn ecall6(n: usize, args: [usize; 6]) -> usize {
    let mut r0 = args[0];
    let mut r1 = args[1];
    let mut r2 = args[2];
    let mut r3 = args[3];
    let mut r4 = args[4];
    let mut r5 = args[5];
    let mut r7 = n;
    unsafe {
        core::arch::asm!(
            "ecall",
            inout("a0") r0,
            inout("a1") r1,
            inout("a2") r2,
            inout("a3") r3,
            inout("a4") r4,
            inout("a5") r5,
            inout("a7") r7,
            clobber_abi("C"),
            options(nostack)
        );
    }
    r0
}
