// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: World-tagged single-line logging for the protected world
//! OWNERS: @kernel-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Record layout, caller-world scoping and level gating unit tests
//! PUBLIC API: log_* macros, emit(level,target,args), write_record, CallerWorld, caller_world
//! DEPENDS_ON: uart::KernelUart, privsep_abi::World
//! INVARIANTS: Every record names the world it was emitted for: `W1` while a syscall of a
//!             user task is being served, `W0` otherwise; Debug/Trace only in debug builds;
//!             never called from the violation interrupt (it writes through `RawUart`)
//! ADR: docs/adr/0001-world-separation.md

use core::fmt::{self, Arguments, Write};

use privsep_abi::World;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Level {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Level {
    const fn tag(self) -> char {
        match self {
            Level::Error => 'E',
            Level::Warn => 'W',
            Level::Info => 'I',
            Level::Debug => 'D',
            Level::Trace => 'V',
        }
    }

    pub const fn enabled(self) -> bool {
        match self {
            Level::Debug | Level::Trace => cfg!(debug_assertions),
            _ => true,
        }
    }
}

const fn world_tag(world: World) -> &'static str {
    match world {
        World::W0 => "W0",
        World::W1 => "W1",
    }
}

#[cfg(not(test))]
mod caller {
    use core::sync::atomic::{AtomicBool, Ordering};

    static IN_USER_CALL: AtomicBool = AtomicBool::new(false);

    pub(super) fn get() -> bool {
        IN_USER_CALL.load(Ordering::Relaxed)
    }

    pub(super) fn set(on: bool) -> bool {
        IN_USER_CALL.swap(on, Ordering::Relaxed)
    }
}


/// World the current record is attributed to.
pub fn caller_world() -> World {
    if caller::get() {
        World::W1
    } else {
        World::W0
    }
}

/// Attributes records to WORLD1 while a user task's syscall is served.
///
/// Restores the previous attribution on drop, so a nested protected callback
/// inside the call keeps the outer tag.
pub struct CallerWorld {
    previous: bool,
}

impl CallerWorld {
    pub fn enter(world: World) -> Self {
        Self { previous: caller::set(world == World::W1) }
    }
}

impl Drop for CallerWorld {
    fn drop(&mut self) {
        caller::set(self.previous);
    }
}

/// Writes `"<L> [<world>] (<target>) <message>\n"`.
pub fn write_record<W: Write>(
    out: &mut W,
    level: Level,
    world: World,
    target: &str,
    args: Arguments<'_>,
) -> fmt::Result {
    write!(out, "{} [{}] ({}) ", level.tag(), world_tag(world), target)?;
    out.write_fmt(args)?;
    out.write_char('\n')
}

/// Emits one record on the console if the level is enabled.
pub fn emit(level: Level, target: &'static str, args: Arguments<'_>) {
    if !level.enabled() {
        return;
    }
    let mut uart = crate::uart::KernelUart::lock();
    let _ = write_record(&mut *uart, level, caller_world(), target, args);
}

#[doc(hidden)]
#[macro_export]
macro_rules! __privsep_log {
    ($level:ident, target: $target:expr, $($arg:tt)+) => {
        $crate::diag::log::emit($crate::diag::log::Level::$level, $target, format_args!($($arg)+))
    };
    ($level:ident, $($arg:tt)+) => {
        $crate::diag::log::emit($crate::diag::log::Level::$level, module_path!(), format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)+) => { $crate::__privsep_log!(Error, $($arg)+) };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)+) => { $crate::__privsep_log!(Warn, $($arg)+) };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)+) => { $crate::__privsep_log!(Info, $($arg)+) };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)+) => { $crate::__privsep_log!(Debug, $($arg)+) };
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)+) => { $crate::__privsep_log!(Trace, $($arg)+) };
}
