// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]

//! CONTEXT: Protected-world (WORLD0) side of ESP dual-world privilege separation
//! OWNERS: @kernel-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests per module, scenario tests in `tests.rs`, proptests for the
//!                handle map; all run on the host against `sim::SimPlatform`
//! PUBLIC API: PrivSep (bring-up, fault handling, syscall gateway, user boot), Platform
//!             seams, HandleMap, OtaSelector, hal::{Permc, Wcntl, Intc}
//! DEPENDS_ON: privsep-abi, spin, crc32fast, static_assertions, riscv (SoC target only)
//! INVARIANTS: WORLD1 never receives a protected-DRAM address; interrupt-context paths
//!             never block; the permission registers are configured exactly once
//! ADR: docs/adr/0001-world-separation.md

extern crate alloc;

pub mod diag;

pub mod boot;
pub mod bringup;
pub mod callback;
pub mod config;
pub mod context;
pub mod cpu;
pub mod fault;
pub mod hal;
pub mod image;
pub mod map;
pub mod ota;
pub mod platform;
pub mod syscall;
pub mod sync;
pub mod task;
pub mod trap;
pub mod uart;

pub use boot::BootError;
pub use bringup::BringUpError;
pub use config::{Config, Policy};
pub use context::{AppHandler, ContextError, PrivSep};
pub use fault::{FaultKind, Recovery};
pub use map::{Handle, HandleMap, ObjType};
pub use ota::{OtaError, OtaSelector, Partition, PartitionTable, UserSlot};
pub use platform::{DeferredJob, Flash, KObj, Memory, Platform, Rtos};
pub use trap::ExcFrame;

#[cfg(test)]
mod sim;
#[cfg(test)]
mod tests;
