// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Network interface, socket, UART and heap-statistics syscalls.
//!
//! Buffers are bounced through protected memory: the user range is classified,
//! copied in (or out) once, and the driver only ever sees the kernel copy.

use alloc::vec::Vec;

use privsep_abi::{HeapStats, ESP_OK};

use super::{bounce, publish, verify, Args, SysError, SysResult};
use crate::context::PrivSep;
use crate::map::ObjType;
use crate::platform::Platform;

/// Copies `[addr, addr + len)` out of readable user memory.
fn copy_in<P: Platform>(ps: &PrivSep<P>, addr: usize, len: usize) -> SysResult<Vec<u8>> {
    if len > 0 && !ps.layout.is_valid_user_d_range(addr, len) {
        return Err(SysError::BadAddress);
    }
    let mut buf = bounce(len)?;
    if len > 0 {
        ps.platform.read(addr, &mut buf);
    }
    Ok(buf)
}

fn check_out<P: Platform>(ps: &PrivSep<P>, addr: usize, len: usize) -> SysResult<()> {
    if len > 0 && !ps.layout.is_valid_udram_range(addr, len) {
        return Err(SysError::BadAddress);
    }
    Ok(())
}

pub(super) fn sys_netif_create<P: Platform>(ps: &PrivSep<P>, _args: &Args) -> SysResult<isize> {
    let netif = ps.platform.netif_create_default_sta().ok_or(SysError::NoMem)?;
    publish(ps, netif, ObjType::Netif, |p| p.netif_destroy(netif))
}

pub(super) fn sys_netif_destroy<P: Platform>(ps: &PrivSep<P>, args: &Args) -> SysResult<isize> {
    let raw = args.get(0);
    let netif = verify(ps, raw, ObjType::Netif)?.ptr;
    ps.platform.netif_destroy(netif);
    ps.map.remove(raw as u32);
    Ok(0)
}

pub(super) fn sys_socket<P: Platform>(ps: &PrivSep<P>, args: &Args) -> SysResult<isize> {
    let sock = ps.platform.socket(args.get_u32(0) as i32, args.get_u32(1) as i32, args.get_u32(2) as i32);
    Ok(sock as isize)
}

pub(super) fn sys_send<P: Platform>(ps: &PrivSep<P>, args: &Args) -> SysResult<isize> {
    let (sock, ptr, len, flags) =
        (args.get_u32(0) as i32, args.get(1), args.get(2), args.get_u32(3) as i32);
    let data = copy_in(ps, ptr, len)?;
    Ok(ps.platform.send(sock, &data, flags))
}

pub(super) fn sys_recv<P: Platform>(ps: &PrivSep<P>, args: &Args) -> SysResult<isize> {
    let (sock, ptr, len, flags) =
        (args.get_u32(0) as i32, args.get(1), args.get(2), args.get_u32(3) as i32);
    check_out(ps, ptr, len)?;
    let mut buf = bounce(len)?;
    let n = ps.platform.recv(sock, &mut buf, flags);
    if n > 0 {
        ps.platform.write(ptr, &buf[..(n as usize).min(len)]);
    }
    Ok(n)
}

pub(super) fn sys_close<P: Platform>(ps: &PrivSep<P>, args: &Args) -> SysResult<isize> {
    Ok(ps.platform.close(args.get_u32(0) as i32) as isize)
}

pub(super) fn sys_uart_read<P: Platform>(ps: &PrivSep<P>, args: &Args) -> SysResult<isize> {
    let (port, ptr, len, ticks) = (args.get_u32(0), args.get(1), args.get(2), args.get_u32(3));
    check_out(ps, ptr, len)?;
    let mut buf = bounce(len)?;
    let n = ps.platform.uart_read(port, &mut buf, ticks);
    if n > 0 {
        ps.platform.write(ptr, &buf[..(n as usize).min(len)]);
    }
    Ok(n as isize)
}

pub(super) fn sys_uart_write<P: Platform>(ps: &PrivSep<P>, args: &Args) -> SysResult<isize> {
    let (port, ptr, len) = (args.get_u32(0), args.get(1), args.get(2));
    let data = copy_in(ps, ptr, len)?;
    Ok(ps.platform.uart_write(port, &data) as isize)
}

pub(super) fn sys_heap_stats<P: Platform>(ps: &PrivSep<P>, args: &Args) -> SysResult<isize> {
    let out = args.get(0);
    if !ps.layout.is_valid_udram_range(out, HeapStats::WIRE_SIZE) {
        return Err(SysError::BadAddress);
    }
    ps.platform.write(out, &ps.platform.heap_stats().encode());
    Ok(ESP_OK as isize)
}
