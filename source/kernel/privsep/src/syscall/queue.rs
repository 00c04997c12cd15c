// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Queue syscalls, including the dispatch and cleanup singletons.

use privsep_abi::{CleanupItem, DispatchMsg, QUEUE_TYPE_CLEANUP, QUEUE_TYPE_DISPATCH};

use super::{bounce, publish, verify, Args, SysError, SysResult};
use crate::context::{PrivSep, SystemQueue};
use crate::map::ObjType;
use crate::platform::{Platform, SendPos};

/// Largest item the gateway copies through a kernel buffer.
const MAX_ITEM_SIZE: usize = 1024;

fn system_queue<P: Platform>(ps: &PrivSep<P>, queue: &SystemQueue, item_size: usize) -> SysResult<isize> {
    if queue.handle() != 0 {
        return Ok(queue.handle() as isize);
    }
    let obj = ps.platform.queue_create(ps.config.queue_depth, item_size).ok_or(SysError::NoMem)?;
    let handle = publish(ps, obj, ObjType::Queue, |p| p.queue_delete(obj))?;
    queue.publish(handle as u32, obj);
    Ok(handle)
}

pub(super) fn sys_create<P: Platform>(ps: &PrivSep<P>, args: &Args) -> SysResult<isize> {
    let (len, item_size, ty) = (args.get(0), args.get(1), args.get(2) as u8);
    match ty {
        QUEUE_TYPE_CLEANUP => return system_queue(ps, &ps.cleanup_queue, CleanupItem::WIRE_SIZE),
        QUEUE_TYPE_DISPATCH => return system_queue(ps, &ps.dispatch_queue, DispatchMsg::WIRE_SIZE),
        _ => {}
    }
    if len == 0 || item_size > MAX_ITEM_SIZE {
        return Err(SysError::BadAddress);
    }
    let obj = ps.platform.queue_create(len, item_size).ok_or(SysError::NoMem)?;
    publish(ps, obj, ObjType::Queue, |p| p.queue_delete(obj))
}

pub(super) fn sys_send<P: Platform>(ps: &PrivSep<P>, args: &Args) -> SysResult<isize> {
    let queue = verify(ps, args.get(0), ObjType::Queue)?.ptr;
    let (item, ticks) = (args.get(1), args.get_u32(2));
    let pos = SendPos::from_raw(args.get(3)).ok_or(SysError::BadAddress)?;

    let size = ps.platform.queue_item_size(queue);
    if size > 0 && !ps.layout.is_valid_user_d_range(item, size) {
        return Err(SysError::BadAddress);
    }
    let mut buf = bounce(size)?;
    if size > 0 {
        ps.platform.read(item, &mut buf);
    }
    Ok(ps.platform.queue_send(queue, &buf, ticks, pos) as isize)
}

pub(super) fn sys_receive<P: Platform>(ps: &PrivSep<P>, args: &Args) -> SysResult<isize> {
    let queue = verify(ps, args.get(0), ObjType::Queue)?.ptr;
    let (out, ticks) = (args.get(1), args.get_u32(2));

    let size = ps.platform.queue_item_size(queue);
    if size > 0 && !ps.layout.is_valid_udram_range(out, size) {
        return Err(SysError::BadAddress);
    }
    let mut buf = bounce(size)?;
    if !ps.platform.queue_receive(queue, &mut buf, ticks) {
        return Ok(0);
    }
    if size > 0 {
        ps.platform.write(out, &buf);
    }
    Ok(1)
}

pub(super) fn sys_messages_waiting<P: Platform>(ps: &PrivSep<P>, args: &Args) -> SysResult<isize> {
    let queue = verify(ps, args.get(0), ObjType::Queue)?.ptr;
    Ok(ps.platform.queue_messages_waiting(queue) as isize)
}

pub(super) fn sys_delete<P: Platform>(ps: &PrivSep<P>, args: &Args) -> SysResult<isize> {
    let raw = args.get(0);
    if raw != 0 && raw == ps.cleanup_queue.handle() as usize {
        crate::log_error!(target: "syscall", "User mem cleanup queue deletion forbidden");
        return Err(SysError::Forbidden);
    }
    if raw != 0 && raw == ps.dispatch_queue.handle() as usize {
        crate::log_error!(target: "syscall", "User dispatcher queue deletion forbidden");
        return Err(SysError::Forbidden);
    }
    let queue = verify(ps, raw, ObjType::Queue)?.ptr;
    ps.platform.queue_delete(queue);
    ps.map.remove(raw as u32);
    Ok(0)
}
