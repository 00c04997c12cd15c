// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! GPIO soft-ISR syscalls.

use privsep_abi::ESP_OK;

use super::{publish, put_user_u32, verify, Args, SysError, SysResult};
use crate::callback::Callback;
use crate::context::PrivSep;
use crate::map::ObjType;
use crate::platform::Platform;

/// Highest GPIO number on this SoC.
const GPIO_MAX: u32 = 21;

pub(super) fn sys_isr_add<P: Platform>(ps: &PrivSep<P>, args: &Args) -> SysResult<isize> {
    let (gpio, isr, arg, out) = (args.get_u32(0), args.get(1), args.get_u32(2), args.get(3));
    if gpio > GPIO_MAX {
        return Err(SysError::BadAddress);
    }
    if !ps.layout.is_valid_user_i_addr(isr) || !ps.layout.is_valid_udram_range(out, 4) {
        return Err(SysError::BadAddress);
    }

    let p = &ps.platform;
    let cookie = Callback::Gpio { gpio, isr: isr as u32, arg }.store(p).ok_or(SysError::NoMem)?;
    if let Err(err) = p.gpio_isr_add(gpio, cookie) {
        Callback::release(p, cookie);
        return Err(err.into());
    }
    let handle = publish(ps, cookie, ObjType::Gpio, |p| {
        let _ = p.gpio_isr_remove(gpio);
        Callback::release(p, cookie);
    })?;
    put_user_u32(ps, out, handle as u32)?;
    Ok(ESP_OK as isize)
}

pub(super) fn sys_isr_remove<P: Platform>(ps: &PrivSep<P>, args: &Args) -> SysResult<isize> {
    let raw = args.get(0);
    let cookie = verify(ps, raw, ObjType::Gpio)?.ptr;
    let Some(Callback::Gpio { gpio, .. }) = Callback::load(&ps.platform, cookie) else {
        return Err(SysError::BadHandle);
    };
    ps.platform.gpio_isr_remove(gpio)?;
    Callback::release(&ps.platform, cookie);
    ps.map.remove(raw as u32);
    Ok(ESP_OK as isize)
}
