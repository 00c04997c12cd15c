// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Boot and restart of the user world
//! OWNERS: @kernel-team
//! PUBLIC API: PrivSep::{user_boot, user_reboot, run_deferred, set_user_entry, app_desc}, BootError
//! DEPENDS_ON: ota::OtaSelector, image, syscall::task::spawn_user_task, hal::wcntl
//! INVARIANTS: The WORLD1 entry is programmed before the first user task exists;
//!             a descriptor that disagrees with the linker reservation never boots;
//!             startup resources outside user DRAM are refused before WORLD0 writes them
//! ADR: docs/adr/0001-world-separation.md

use core::fmt;

use privsep_abi::{UserAppDesc, USER_MAIN_TASK_PRIORITY};

use crate::context::PrivSep;
use crate::hal::wcntl::Wcntl;
use crate::image::{self, ImageError};
use crate::ota::OtaError;
use crate::platform::{DeferredJob, KObj, Platform, TaskName, TaskSpec};
use crate::syscall::task::{check_user_resources, spawn_user_task};
use crate::syscall::SysError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootError {
    /// No bootable user partition.
    Ota(OtaError),
    Image(ImageError),
    /// The entry point is not user-executable.
    BadEntry(u32),
    /// The image was linked against a different WORLD1 DRAM reservation.
    StaleImage { expected: u32, found: u32 },
    /// The descriptor places the startup stack or errno cell outside user DRAM.
    BadResources { stack: u32, errno: u32 },
    /// The main user task could not be created.
    Spawn(SysError),
}

impl From<OtaError> for BootError {
    fn from(err: OtaError) -> Self {
        BootError::Ota(err)
    }
}

impl From<ImageError> for BootError {
    fn from(err: ImageError) -> Self {
        BootError::Image(err)
    }
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootError::Ota(err) => write!(f, "user partition: {err}"),
            BootError::Image(err) => write!(f, "user image: {err}"),
            BootError::BadEntry(entry) => write!(f, "entry 0x{entry:08x} not user-executable"),
            BootError::StaleImage { expected, found } => {
                write!(f, "user dram start 0x{found:08x}, expected 0x{expected:08x} (stale build?)")
            }
            BootError::BadResources { stack, errno } => {
                write!(f, "startup stack 0x{stack:08x} or errno 0x{errno:08x} outside user dram")
            }
            BootError::Spawn(err) => write!(f, "spawning user main task: {err}"),
        }
    }
}

const MAIN_TASK_NAME: &str = "User main task";

impl<P: Platform> PrivSep<P> {
    /// Programs the address WORLD1 starts executing at.
    pub fn set_user_entry(&self, entry: u32) -> Result<(), BootError> {
        if !self.layout.is_valid_user_i_addr(entry as usize) {
            return Err(BootError::BadEntry(entry));
        }
        Wcntl::new(self.platform.regs()).set_w1_entry(entry);
        Ok(())
    }

    /// Descriptor of the running user image, once booted.
    pub fn app_desc(&self) -> Option<UserAppDesc> {
        *self.app_desc.lock()
    }

    /// Loads the selected user image and starts its main task.
    pub fn user_boot(&self) -> Result<KObj, BootError> {
        let (slot, part) = self.ota.get_boot_partition(&self.platform).map_err(|err| {
            crate::log_warn!(target: "boot", "User code partition not found");
            err
        })?;
        crate::log_debug!(
            target: "boot",
            "User code partition {:?} @ 0x{:x} (0x{:x})",
            slot,
            part.offset,
            part.size
        );

        let info = image::parse(&self.platform, &part)?;
        if !self.layout.is_valid_user_i_addr(info.entry as usize) {
            return Err(BootError::BadEntry(info.entry));
        }
        info.load_ram_segments(&self.platform, &part, &self.layout, |addr, data| {
            self.platform.write(addr, data)
        })?;
        for mapping in info.flash_mappings(&self.layout, &part) {
            self.platform.map_flash(mapping);
        }
        self.set_user_entry(info.entry)?;

        let desc = image::read_user_desc(&self.platform, &part)?;
        let expected = self.layout.linker.w1_dram.start as u32;
        if desc.user_app_dram_start != expected {
            crate::log_error!(
                target: "boot",
                "user_app_dram_start 0x{:08x} != 0x{:08x}",
                desc.user_app_dram_start,
                expected
            );
            return Err(BootError::StaleImage { expected, found: desc.user_app_dram_start });
        }
        *self.app_desc.lock() = Some(desc);

        crate::log_info!(target: "boot", "User entry point: 0x{:08x}", info.entry);
        let res = desc.resources(self.config.user_main_stack_size as u32);
        let (stack, size, errno) =
            (res.startup_stack as usize, res.startup_stack_size as usize, res.startup_errno as usize);
        if check_user_resources(self, stack, size, errno).is_err() {
            crate::log_error!(target: "boot", "user_app_resources 0x{:08x} not in user dram", res.startup_stack);
            return Err(BootError::BadResources { stack: res.startup_stack, errno: res.startup_errno });
        }
        let spec = TaskSpec {
            entry: info.entry as usize,
            name: TaskName::new(MAIN_TASK_NAME),
            param: 0,
            priority: USER_MAIN_TASK_PRIORITY,
            stack,
            stack_size: size,
        };
        let (task, _) = spawn_user_task(self, &spec, errno).map_err(BootError::Spawn)?;
        Ok(task)
    }

    /// Suspends every user task and schedules a fresh boot of the user world.
    ///
    /// Safe from interrupt context: the task table is only try-locked, walked in
    /// place without allocating, and the restart itself runs later from
    /// [`PrivSep::run_deferred`].
    pub fn user_reboot<W: fmt::Write>(&self, out: &mut W) {
        let _ = writeln!(out, "Suspending user tasks");
        let walked = self.tasks.try_for_each_user_task(|task| {
            let _ = writeln!(out, "Suspending user task: {}", self.platform.task_name(task));
            self.platform.task_suspend(task);
        });
        if !walked {
            let _ = writeln!(out, "Task table busy, user tasks left running");
        }
        self.platform.schedule_oneshot(DeferredJob::RestartUser, 0);
    }

    /// Entry point for jobs scheduled through `Rtos::schedule_oneshot`.
    pub fn run_deferred(&self, job: DeferredJob) -> Result<(), BootError> {
        match job {
            DeferredJob::RestartUser => {
                self.clear_user_resources();
                self.user_boot().map(|_| ())
            }
        }
    }
}
