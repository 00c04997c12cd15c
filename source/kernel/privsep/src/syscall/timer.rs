// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Software-timer and high-resolution timer syscalls.
//!
//! Expiry never calls user code directly: the timer's cookie is a protected
//! [`Callback`] record and expiry is forwarded to the dispatch queue.

use privsep_abi::{EspTimerArgs, TimerCmd, ESP_OK};

use super::{publish, put_user_u32, verify, Args, SysError, SysResult};
use crate::callback::Callback;
use crate::context::PrivSep;
use crate::map::ObjType;
use crate::platform::Platform;

fn store_callback<P: Platform>(ps: &PrivSep<P>, record: Callback) -> SysResult<usize> {
    record.store(&ps.platform).ok_or_else(|| {
        crate::log_error!(target: "syscall", "Insufficient memory for callback record");
        SysError::NoMem
    })
}

pub(super) fn sys_xtimer_create<P: Platform>(ps: &PrivSep<P>, args: &Args) -> SysResult<isize> {
    // a0 is the timer name; protected timers are named by the kernel.
    let (period, auto_reload, id, callback) =
        (args.get_u32(1), args.get(2) != 0, args.get_u32(3), args.get(4));
    if !ps.layout.is_valid_user_i_addr(callback) {
        return Err(SysError::BadAddress);
    }

    let record = Callback::XTimer { callback: callback as u32, id, timer: 0 };
    let cookie = store_callback(ps, record)?;
    let Some(timer) = ps.platform.xtimer_create(period, auto_reload, cookie) else {
        Callback::release(&ps.platform, cookie);
        return Err(SysError::NoMem);
    };
    let handle = publish(ps, timer, ObjType::XTimer, |p| {
        p.xtimer_command(timer, TimerCmd::Delete, 0, 0);
        Callback::release(p, cookie);
    })?;
    Callback::XTimer { callback: callback as u32, id, timer: handle as u32 }.update(&ps.platform, cookie);
    Ok(handle)
}

pub(super) fn sys_xtimer_command<P: Platform>(ps: &PrivSep<P>, args: &Args) -> SysResult<isize> {
    let raw = args.get(0);
    let timer = verify(ps, raw, ObjType::XTimer)?.ptr;
    let cmd = TimerCmd::from_raw(args.get_u32(1)).ok_or(SysError::BadAddress)?;
    let (value, woken, ticks) = (args.get_u32(2), args.get(3), args.get_u32(4));
    if woken != 0 && !ps.layout.is_valid_udram_range(woken, 4) {
        return Err(SysError::BadAddress);
    }

    let cookie = ps.platform.xtimer_cookie(timer);
    let done = ps.platform.xtimer_command(timer, cmd, value, ticks);
    if woken != 0 {
        // Commands are issued from task context, so no task is ever woken by an ISR here.
        put_user_u32(ps, woken, 0)?;
    }
    if done && cmd == TimerCmd::Delete {
        Callback::release(&ps.platform, cookie);
        ps.map.remove(raw as u32);
    }
    Ok(done as isize)
}

pub(super) fn sys_xtimer_get_id<P: Platform>(ps: &PrivSep<P>, args: &Args) -> SysResult<isize> {
    let timer = verify(ps, args.get(0), ObjType::XTimer)?.ptr;
    match Callback::load(&ps.platform, ps.platform.xtimer_cookie(timer)) {
        Some(Callback::XTimer { id, .. }) => Ok(id as isize),
        _ => Err(SysError::BadHandle),
    }
}

#[derive(Copy, Clone)]
struct EspTimerCreateTyped {
    args: EspTimerArgs,
    out: usize,
}

impl EspTimerCreateTyped {
    fn decode<P: Platform>(ps: &PrivSep<P>, args: &Args) -> SysResult<Self> {
        let (ptr, out) = (args.get(0), args.get(1));
        if !ps.layout.is_valid_user_d_range(ptr, EspTimerArgs::WIRE_SIZE) {
            return Err(SysError::BadAddress);
        }
        let mut raw = [0u8; EspTimerArgs::WIRE_SIZE];
        ps.platform.read(ptr, &mut raw);
        let args = EspTimerArgs::decode(&raw).ok_or(SysError::BadAddress)?;
        Ok(Self { args, out })
    }

    fn check<P: Platform>(&self, ps: &PrivSep<P>) -> SysResult<()> {
        if !ps.layout.is_valid_user_i_addr(self.args.callback as usize) {
            return Err(SysError::BadAddress);
        }
        if !ps.layout.is_valid_udram_range(self.out, 4) {
            return Err(SysError::BadAddress);
        }
        Ok(())
    }
}

pub(super) fn sys_esp_timer_create<P: Platform>(ps: &PrivSep<P>, args: &Args) -> SysResult<isize> {
    let typed = EspTimerCreateTyped::decode(ps, args)?;
    typed.check(ps)?;

    let record = Callback::EspTimer { callback: typed.args.callback, arg: typed.args.arg };
    let cookie = store_callback(ps, record)?;
    let timer = match ps.platform.esp_timer_create(cookie, typed.args.skip_unhandled != 0) {
        Ok(timer) => timer,
        Err(err) => {
            Callback::release(&ps.platform, cookie);
            return Err(err.into());
        }
    };
    let handle = publish(ps, timer, ObjType::EspTimer, |p| {
        let _ = p.esp_timer_delete(timer);
        Callback::release(p, cookie);
    })?;
    put_user_u32(ps, typed.out, handle as u32)?;
    Ok(ESP_OK as isize)
}

pub(super) fn sys_esp_timer_start<P: Platform>(
    ps: &PrivSep<P>,
    args: &Args,
    periodic: bool,
) -> SysResult<isize> {
    let timer = verify(ps, args.get(0), ObjType::EspTimer)?.ptr;
    let us = u64::from(args.get_u32(1)) | (u64::from(args.get_u32(2)) << 32);
    if periodic {
        ps.platform.esp_timer_start_periodic(timer, us)?;
    } else {
        ps.platform.esp_timer_start_once(timer, us)?;
    }
    Ok(ESP_OK as isize)
}

pub(super) fn sys_esp_timer_stop<P: Platform>(ps: &PrivSep<P>, args: &Args) -> SysResult<isize> {
    let timer = verify(ps, args.get(0), ObjType::EspTimer)?.ptr;
    ps.platform.esp_timer_stop(timer)?;
    Ok(ESP_OK as isize)
}

pub(super) fn sys_esp_timer_delete<P: Platform>(ps: &PrivSep<P>, args: &Args) -> SysResult<isize> {
    let raw = args.get(0);
    let timer = verify(ps, raw, ObjType::EspTimer)?.ptr;
    let cookie = ps.platform.esp_timer_cookie(timer);
    ps.platform.esp_timer_delete(timer)?;
    Callback::release(&ps.platform, cookie);
    ps.map.remove(raw as u32);
    Ok(ESP_OK as isize)
}
