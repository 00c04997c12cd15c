// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Event-group and event-loop handler syscalls.

use privsep_abi::ESP_OK;

use super::{publish, put_user_u32, verify, Args, SysError, SysResult};
use crate::callback::Callback;
use crate::context::PrivSep;
use crate::map::ObjType;
use crate::platform::{EventBase, KObj, Platform};

const WIFI_EVENT: &[u8] = b"WIFI_EVENT\0";
const IP_EVENT: &[u8] = b"IP_EVENT\0";

/// Maps a user-world event base string onto the protected event base it names.
pub(crate) fn event_base<P: Platform>(ps: &PrivSep<P>, user_base: usize) -> EventBase {
    let mut raw = [0u8; WIFI_EVENT.len()];
    let mut len = raw.len();
    while len > 0 && !ps.layout.is_valid_user_d_range(user_base, len) {
        len -= 1;
    }
    ps.platform.read(user_base, &mut raw[..len]);
    if raw[..len].starts_with(WIFI_EVENT) {
        EventBase::Wifi
    } else if raw[..len].starts_with(IP_EVENT) {
        EventBase::Ip
    } else {
        EventBase::Other(user_base)
    }
}

pub(super) fn sys_group_create<P: Platform>(ps: &PrivSep<P>, _args: &Args) -> SysResult<isize> {
    let group = ps.platform.event_group_create().ok_or(SysError::NoMem)?;
    publish(ps, group, ObjType::EventGroup, |p| p.event_group_delete(group))
}

pub(super) fn sys_group_wait<P: Platform>(ps: &PrivSep<P>, args: &Args) -> SysResult<isize> {
    let group = verify(ps, args.get(0), ObjType::EventGroup)?.ptr;
    let bits = ps.platform.event_group_wait(
        group,
        args.get_u32(1),
        args.get(2) != 0,
        args.get(3) != 0,
        args.get_u32(4),
    );
    Ok(bits as isize)
}

pub(super) fn sys_group_set<P: Platform>(ps: &PrivSep<P>, args: &Args) -> SysResult<isize> {
    let group = verify(ps, args.get(0), ObjType::EventGroup)?.ptr;
    Ok(ps.platform.event_group_set(group, args.get_u32(1)) as isize)
}

pub(super) fn sys_group_clear<P: Platform>(ps: &PrivSep<P>, args: &Args) -> SysResult<isize> {
    let group = verify(ps, args.get(0), ObjType::EventGroup)?.ptr;
    Ok(ps.platform.event_group_clear(group, args.get_u32(1)) as isize)
}

pub(super) fn sys_group_sync<P: Platform>(ps: &PrivSep<P>, args: &Args) -> SysResult<isize> {
    let group = verify(ps, args.get(0), ObjType::EventGroup)?.ptr;
    let bits =
        ps.platform.event_group_sync(group, args.get_u32(1), args.get_u32(2), args.get_u32(3));
    Ok(bits as isize)
}

pub(super) fn sys_group_delete<P: Platform>(ps: &PrivSep<P>, args: &Args) -> SysResult<isize> {
    let raw = args.get(0);
    let group = verify(ps, raw, ObjType::EventGroup)?.ptr;
    ps.platform.event_group_delete(group);
    ps.map.remove(raw as u32);
    Ok(0)
}

#[derive(Copy, Clone)]
struct RegisterArgsTyped {
    base: usize,
    id: i32,
    handler: usize,
    arg: u32,
    out: usize,
}

impl RegisterArgsTyped {
    #[inline]
    fn decode(args: &Args) -> Self {
        Self {
            base: args.get(0),
            id: args.get_u32(1) as i32,
            handler: args.get(2),
            arg: args.get_u32(3),
            out: args.get(4),
        }
    }

    #[inline]
    fn check<P: Platform>(&self, ps: &PrivSep<P>) -> SysResult<()> {
        if !ps.layout.is_valid_user_d_addr(self.base) {
            return Err(SysError::BadAddress);
        }
        if !ps.layout.is_valid_user_i_addr(self.handler) {
            return Err(SysError::BadAddress);
        }
        if !ps.layout.is_valid_udram_range(self.out, 4) {
            return Err(SysError::BadAddress);
        }
        Ok(())
    }
}

pub(super) fn sys_handler_register<P: Platform>(ps: &PrivSep<P>, args: &Args) -> SysResult<isize> {
    let typed = RegisterArgsTyped::decode(args);
    typed.check(ps)?;

    let p = &ps.platform;
    let mut record = Callback::Event {
        handler: typed.handler as u32,
        arg: typed.arg,
        user_base: typed.base as u32,
        id: typed.id,
        instance: 0,
    };
    let cookie = record.store(p).ok_or(SysError::NoMem)?;
    let base = event_base(ps, typed.base);
    let instance = match p.event_handler_register(base, typed.id, cookie) {
        Ok(instance) => instance,
        Err(err) => {
            Callback::release(p, cookie);
            return Err(err.into());
        }
    };
    if let Callback::Event { instance: slot, .. } = &mut record {
        *slot = instance as u32;
    }
    record.update(p, cookie);

    let handle = publish(ps, cookie, ObjType::EventHandler, |p| {
        let _ = p.event_handler_unregister(base, typed.id, instance);
        Callback::release(p, cookie);
    })?;
    put_user_u32(ps, typed.out, handle as u32)?;
    Ok(ESP_OK as isize)
}

pub(super) fn sys_handler_unregister<P: Platform>(ps: &PrivSep<P>, args: &Args) -> SysResult<isize> {
    let (base_ptr, id, raw) = (args.get(0), args.get_u32(1) as i32, args.get(2));
    if !ps.layout.is_valid_user_d_addr(base_ptr) {
        return Err(SysError::BadAddress);
    }
    let cookie = verify(ps, raw, ObjType::EventHandler)?.ptr;
    let Some(Callback::Event { instance, .. }) = Callback::load(&ps.platform, cookie) else {
        return Err(SysError::BadHandle);
    };
    ps.platform.event_handler_unregister(event_base(ps, base_ptr), id, instance as KObj)?;
    Callback::release(&ps.platform, cookie);
    ps.map.remove(raw as u32);
    Ok(ESP_OK as isize)
}
