// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Build-time configuration snapshot.
//!
//! The recovery policy is fixed by a Cargo feature and never stored at runtime:
//! [`Policy::CONFIGURED`] is a constant and the fault path matches on it directly.
//! `Config::DEFAULT` captures the hardening options together with the numeric knobs.

#[cfg(any(
    all(feature = "policy-delete-task", feature = "policy-restart-user"),
    all(feature = "policy-delete-task", feature = "policy-reboot"),
    all(feature = "policy-restart-user", feature = "policy-reboot"),
))]
compile_error!("exactly one of policy-delete-task, policy-restart-user, policy-reboot must be enabled");

/// Recovery applied after a user-world violation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Policy {
    /// Delete only the faulting task.
    DeleteTask,
    /// Suspend every user task and relaunch the user image.
    RestartUser,
    /// Reset the chip.
    Reboot,
}

impl Policy {
    /// Policy selected by the enabled Cargo feature (restart-user when none is set).
    /// Only this value is reachable from the violation path of a firmware build.
    pub const CONFIGURED: Policy = if cfg!(feature = "policy-delete-task") {
        Policy::DeleteTask
    } else if cfg!(feature = "policy-reboot") {
        Policy::Reboot
    } else {
        Policy::RestartUser
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// Register dump, stack dump and firmware hash on faults.
    pub backtrace: bool,
    /// CRC check on handle-map entries.
    pub handle_crc: bool,
    /// Try-partition rollback in the OTA selector.
    pub ota_rollback: bool,
    /// Convert a watchdog timeout in a user task into a fault.
    pub user_wdt_panic: bool,
    /// Abort on a watchdog timeout in a protected task.
    pub protected_wdt_panic: bool,
    /// Bytes of kernel stack allocated per user task.
    pub kernel_stack_size: usize,
    /// Stack size of the first user task.
    pub user_main_stack_size: usize,
    /// Initial handle-map slot count.
    pub map_capacity: usize,
    /// Depth of the dispatch and cleanup queues.
    pub queue_depth: usize,
}

impl Config {
    pub const DEFAULT: Config = Config {
        backtrace: cfg!(feature = "backtrace-info"),
        handle_crc: cfg!(feature = "handle-crc"),
        ota_rollback: cfg!(feature = "ota-rollback"),
        user_wdt_panic: cfg!(feature = "user-wdt-panic"),
        protected_wdt_panic: cfg!(feature = "protected-wdt-panic"),
        kernel_stack_size: 3072,
        user_main_stack_size: 4096,
        map_capacity: 64,
        queue_depth: privsep_abi::SYSTEM_QUEUE_DEPTH,
    };
}

impl Default for Config {
    fn default() -> Self {
        Self::DEFAULT
    }
}
