// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]

//! CONTEXT: User-world (WORLD1) runtime for ESP dual-world privilege separation
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests per module against a scripted trap (`fake::FakeTrap`);
//!                proptests for the dispatcher's entry check
//! PUBLIC API: Sys (syscall wrappers), Dispatcher, Cleanup, LockedUserHeap, start_services
//! DEPENDS_ON: privsep-abi, linked_list_allocator, spin
//! INVARIANTS: Callbacks registered with the protected world run only from the dispatcher
//!             task; the protected world never frees user memory, the cleanup task does
//! ADR: docs/adr/0001-world-separation.md

pub mod cleanup;
pub mod dispatcher;
pub mod ecall;
pub mod heap;
pub mod start;
pub mod sys;

pub use cleanup::{Cleanup, Reclaim};
pub use dispatcher::{Dispatched, Dispatcher, Invoke};
pub use ecall::{Ecall, Trap};
pub use heap::{LockedUserHeap, UserHeap};
pub use start::{start_services, Services, StartError};
pub use sys::{QueuePos, Sys, SysError};

#[cfg(test)]
mod fake;
