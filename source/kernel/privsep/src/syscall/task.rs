// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Task syscalls and the user-task spawn protocol
//! OWNERS: @kernel-team
//! PUBLIC API: sys_create, sys_delete, sys_delay, sys_suspend, sys_resume, sys_get_current, spawn_user_task
//! DEPENDS_ON: task::TaskTable, map::HandleMap, platform::Rtos
//! INVARIANTS: A user task's record is published with the scheduler suspended, so the task can
//!             never run (or trap) before its kernel stack is known; nothing under the bracket
//!             allocates or waits on a lock; the user stack and errno cell lie in user DRAM
//!             before WORLD0 writes either; every failure path releases exactly what was
//!             allocated before it
//! ADR: docs/adr/0001-world-separation.md

use core::sync::atomic::Ordering;

use privsep_abi::{TaskCtx, World, PD_PASS};

use super::{put_user_u32, verify, Args, SysError, SysResult};
use crate::context::PrivSep;
use crate::map::ObjType;
use crate::platform::{KObj, Platform, TaskName, TaskSpec, TASK_NAME_LEN};
use crate::task::{KernelStack, TaskContext, STACK_FILL_BYTE, TCB_SIZE};

#[derive(Copy, Clone)]
struct CreateArgsTyped {
    entry: usize,
    name: usize,
    param: usize,
    priority: u32,
    task_ctx: usize,
}

impl CreateArgsTyped {
    #[inline]
    fn decode(args: &Args) -> Self {
        // a4 carries the core id; this SoC has one core.
        Self {
            entry: args.get(0),
            name: args.get(1),
            param: args.get(2),
            priority: args.get_u32(3),
            task_ctx: args.get(5),
        }
    }

    #[inline]
    fn check<P: Platform>(&self, ps: &PrivSep<P>) -> SysResult<TaskCtx> {
        if !ps.layout.is_valid_user_i_addr(self.entry) {
            return Err(SysError::BadAddress);
        }
        if !ps.layout.is_valid_udram_range(self.task_ctx, TaskCtx::WIRE_SIZE) {
            return Err(SysError::BadAddress);
        }
        let mut raw = [0u8; TaskCtx::WIRE_SIZE];
        ps.platform.read(self.task_ctx, &mut raw);
        TaskCtx::decode(&raw).ok_or(SysError::BadAddress)
    }
}

/// A user task's stack and errno cell must both be writable user DRAM.
pub(crate) fn check_user_resources<P: Platform>(
    ps: &PrivSep<P>,
    stack: usize,
    stack_size: usize,
    errno: usize,
) -> SysResult<()> {
    if stack_size == 0 || !ps.layout.is_valid_udram_range(stack, stack_size) {
        return Err(SysError::BadAddress);
    }
    if !ps.layout.is_valid_udram_range(errno, 4) {
        return Err(SysError::BadAddress);
    }
    Ok(())
}

/// Copies a NUL-terminated user string of at most [`TASK_NAME_LEN`] bytes.
pub(crate) fn read_user_name<P: Platform>(ps: &PrivSep<P>, addr: usize) -> TaskName {
    let mut len = TASK_NAME_LEN;
    while len > 0 && !ps.layout.is_valid_user_d_range(addr, len) {
        len -= 1;
    }
    let mut buf = [0u8; TASK_NAME_LEN];
    ps.platform.read(addr, &mut buf[..len]);
    TaskName::from_bytes(&buf[..len])
}

/// Creates a WORLD1 task on a user stack, with its own protected kernel stack.
///
/// Returns the task object and its handle.
pub fn spawn_user_task<P: Platform>(
    ps: &PrivSep<P>,
    spec: &TaskSpec,
    errno: usize,
) -> SysResult<(KObj, u32)> {
    check_user_resources(ps, spec.stack, spec.stack_size, errno)?;
    let p = &ps.platform;
    let tcb = p.kalloc(TCB_SIZE).ok_or(SysError::NoMem)?;
    let kstack_size = ps.config.kernel_stack_size;
    let Some(kstack_base) = p.kalloc(kstack_size) else {
        p.kfree(tcb);
        return Err(SysError::NoMem);
    };
    p.fill(kstack_base, STACK_FILL_BYTE, kstack_size);
    p.write_u32(errno, 0);

    let rollback = |p: &P| {
        p.kfree(kstack_base);
        p.kfree(tcb);
    };

    let Some(handle) = ps.map.add(tcb, ObjType::Task) else {
        crate::log_error!(target: "syscall", "Insufficient memory for shim struct");
        rollback(p);
        return Err(SysError::NoMem);
    };
    let Some(room) = ps.tasks.reserve() else {
        crate::log_error!(target: "syscall", "Insufficient memory for task record");
        ps.map.remove(handle.raw());
        rollback(p);
        return Err(SysError::NoMem);
    };

    let ctx = TaskContext {
        world: World::W1,
        kernel_stack: Some(KernelStack { base: kstack_base, size: kstack_size }),
        errno,
        self_handle: handle.raw(),
        pthread: 0,
        user_stack: spec.stack,
        user_stack_size: spec.stack_size,
        saved_user_sp: None,
    };

    p.suspend_all();
    let created = p.task_create_static(spec, tcb);
    if created.is_ok() {
        room.publish(tcb, ctx);
    } else {
        drop(room);
    }
    p.resume_all();

    if let Err(err) = created {
        crate::log_error!(target: "syscall", "task {} creation failed: {}", spec.name, err);
        ps.map.remove(handle.raw());
        rollback(p);
        return Err(err.into());
    }
    ps.user_app_running.store(true, Ordering::Release);
    Ok((tcb, handle.raw()))
}

pub(super) fn sys_create<P: Platform>(ps: &PrivSep<P>, args: &Args) -> SysResult<isize> {
    let typed = CreateArgsTyped::decode(args);
    let ctx = typed.check(ps)?;

    let spec = TaskSpec {
        entry: typed.entry,
        name: read_user_name(ps, typed.name),
        param: typed.param,
        priority: typed.priority,
        stack: ctx.stack as usize,
        stack_size: ctx.stack_size as usize,
    };
    let (_, handle) = spawn_user_task(ps, &spec, ctx.errno as usize)?;
    if ctx.task_handle != 0 {
        // The task exists either way; a bad out-cell only loses the handle.
        let _ = put_user_u32(ps, ctx.task_handle as usize, handle);
    }
    Ok(PD_PASS)
}

/// Resolves a task argument; 0 names the caller, which must itself be a user task.
fn resolve_task<P: Platform>(ps: &PrivSep<P>, raw: usize) -> SysResult<KObj> {
    if raw == 0 {
        let current = ps.platform.current_task();
        return if ps.tasks.is_user_task(current) { Ok(current) } else { Err(SysError::Forbidden) };
    }
    let entry = verify(ps, raw, ObjType::Task)?;
    Ok(entry.ptr)
}

pub(super) fn sys_delete<P: Platform>(ps: &PrivSep<P>, args: &Args) -> SysResult<isize> {
    let task = resolve_task(ps, args.get(0))?;
    ps.platform.task_delete(task);
    // Self-deletion does not return here on target; the platform's
    // delete hook runs the cleanup from the idle task instead.
    ps.cleanup_task(task);
    Ok(0)
}

pub(super) fn sys_delay<P: Platform>(ps: &PrivSep<P>, args: &Args) -> SysResult<isize> {
    ps.platform.task_delay(args.get_u32(0));
    Ok(0)
}

pub(super) fn sys_suspend<P: Platform>(ps: &PrivSep<P>, args: &Args) -> SysResult<isize> {
    let task = resolve_task(ps, args.get(0))?;
    ps.platform.task_suspend(task);
    Ok(0)
}

pub(super) fn sys_resume<P: Platform>(ps: &PrivSep<P>, args: &Args) -> SysResult<isize> {
    if args.get(0) == 0 {
        return Err(SysError::BadHandle);
    }
    let task = resolve_task(ps, args.get(0))?;
    ps.platform.task_resume(task);
    Ok(0)
}

pub(super) fn sys_get_current<P: Platform>(ps: &PrivSep<P>, _args: &Args) -> SysResult<isize> {
    let current = ps.platform.current_task();
    match ps.tasks.get(current) {
        Some(ctx) if ctx.is_user() => Ok(ctx.self_handle as isize),
        _ => Err(SysError::Forbidden),
    }
}
