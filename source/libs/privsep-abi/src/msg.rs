// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Fixed-size little-endian records exchanged across the world boundary
//! OWNERS: @runtime
//! PUBLIC API: DispatchMsg, CleanupItem, TaskCtx, EspTimerArgs, HeapStats, UserAppDesc, UserAppResources
//! DEPENDS_ON: static_assertions
//! INVARIANTS: Every record encodes to a whole number of 32-bit LE words; decode rejects unknown tags
//! ADR: docs/adr/0001-world-separation.md

use static_assertions::const_assert_eq;

#[inline]
fn put(buf: &mut [u8], word: usize, value: u32) {
    buf[word * 4..word * 4 + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
fn get(buf: &[u8], word: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[word * 4..word * 4 + 4]);
    u32::from_le_bytes(raw)
}

const TAG_GPIO: u32 = 1;
const TAG_ESP_TIMER: u32 = 2;
const TAG_XTIMER: u32 = 3;
const TAG_ESP_EVENT: u32 = 4;

/// Callback delivery record sent by WORLD0 on the dispatch queue.
///
/// Each variant carries exactly what the user dispatcher needs to re-invoke the
/// callback the user registered; function addresses are re-validated on the user side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchMsg {
    /// A GPIO soft-ISR fired.
    Gpio {
        /// User ISR entry.
        isr: u32,
        /// Argument registered with the ISR.
        arg: u32,
    },
    /// A high-resolution timer expired.
    EspTimer {
        /// User callback entry.
        callback: u32,
        /// Argument registered with the timer.
        arg: u32,
    },
    /// A software timer expired.
    XTimer {
        /// User callback entry.
        callback: u32,
        /// Opaque handle of the expired timer.
        timer: u32,
    },
    /// A registered event was posted.
    Event {
        /// User handler entry.
        handler: u32,
        /// Argument registered with the handler.
        arg: u32,
        /// Event base as the user registered it (user-world address).
        base: u32,
        /// Event identifier.
        id: i32,
        /// Event payload when it lives in user memory, otherwise 0.
        data: u32,
    },
}

impl DispatchMsg {
    /// Encoded size in bytes (tag + five words).
    pub const WIRE_SIZE: usize = 24;

    /// Encodes into the queue item layout.
    pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        let words: [u32; 6] = match *self {
            DispatchMsg::Gpio { isr, arg } => [TAG_GPIO, isr, arg, 0, 0, 0],
            DispatchMsg::EspTimer { callback, arg } => [TAG_ESP_TIMER, callback, arg, 0, 0, 0],
            DispatchMsg::XTimer { callback, timer } => [TAG_XTIMER, callback, timer, 0, 0, 0],
            DispatchMsg::Event { handler, arg, base, id, data } => {
                [TAG_ESP_EVENT, handler, arg, base, id as u32, data]
            }
        };
        for (idx, word) in words.iter().enumerate() {
            put(&mut buf, idx, *word);
        }
        buf
    }

    /// Decodes a queue item; unknown tags and short buffers yield `None`.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::WIRE_SIZE {
            return None;
        }
        let w = |idx| get(buf, idx);
        match w(0) {
            TAG_GPIO => Some(DispatchMsg::Gpio { isr: w(1), arg: w(2) }),
            TAG_ESP_TIMER => Some(DispatchMsg::EspTimer { callback: w(1), arg: w(2) }),
            TAG_XTIMER => Some(DispatchMsg::XTimer { callback: w(1), timer: w(2) }),
            TAG_ESP_EVENT => Some(DispatchMsg::Event {
                handler: w(1),
                arg: w(2),
                base: w(3),
                id: w(4) as i32,
                data: w(5),
            }),
            _ => None,
        }
    }
}

/// User-owned buffer handed back to WORLD1 for reclamation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CleanupItem {
    /// Buffer address in user DRAM.
    pub ptr: u32,
    /// Buffer length in bytes.
    pub len: u32,
}

impl CleanupItem {
    /// Encoded size in bytes.
    pub const WIRE_SIZE: usize = 8;

    /// Encodes into the queue item layout.
    pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        put(&mut buf, 0, self.ptr);
        put(&mut buf, 1, self.len);
        buf
    }

    /// Decodes a queue item.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::WIRE_SIZE {
            return None;
        }
        Some(Self { ptr: get(buf, 0), len: get(buf, 1) })
    }
}

/// User-side description of a task to create, read by WORLD0 from user DRAM.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TaskCtx {
    /// Base of the user-allocated stack.
    pub stack: u32,
    /// Stack size in bytes.
    pub stack_size: u32,
    /// User cell that receives the task's errno.
    pub errno: u32,
    /// User cell that receives the created task's handle (0 = not wanted).
    pub task_handle: u32,
}

impl TaskCtx {
    /// Encoded size in bytes.
    pub const WIRE_SIZE: usize = 16;

    /// Encodes to wire form.
    pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        put(&mut buf, 0, self.stack);
        put(&mut buf, 1, self.stack_size);
        put(&mut buf, 2, self.errno);
        put(&mut buf, 3, self.task_handle);
        buf
    }

    /// Decodes from wire form.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::WIRE_SIZE {
            return None;
        }
        Some(Self {
            stack: get(buf, 0),
            stack_size: get(buf, 1),
            errno: get(buf, 2),
            task_handle: get(buf, 3),
        })
    }
}

/// High-resolution timer creation arguments as laid out in user memory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EspTimerArgs {
    /// User callback entry.
    pub callback: u32,
    /// Callback argument.
    pub arg: u32,
    /// Dispatch method (task or ISR); WORLD0 always dispatches from task.
    pub dispatch_method: u32,
    /// User-side name pointer (ignored; WORLD0 names the timer itself).
    pub name: u32,
    /// Skip unhandled events flag.
    pub skip_unhandled: u32,
}

impl EspTimerArgs {
    /// Encoded size in bytes.
    pub const WIRE_SIZE: usize = 20;

    /// Encodes to wire form.
    pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        put(&mut buf, 0, self.callback);
        put(&mut buf, 1, self.arg);
        put(&mut buf, 2, self.dispatch_method);
        put(&mut buf, 3, self.name);
        put(&mut buf, 4, self.skip_unhandled);
        buf
    }

    /// Decodes from wire form.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::WIRE_SIZE {
            return None;
        }
        Some(Self {
            callback: get(buf, 0),
            arg: get(buf, 1),
            dispatch_method: get(buf, 2),
            name: get(buf, 3),
            skip_unhandled: get(buf, 4),
        })
    }
}

/// Protected heap statistics returned to WORLD1.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Free bytes.
    pub free: u32,
    /// Largest free block.
    pub largest_free_block: u32,
    /// Low-water mark of free bytes.
    pub min_free: u32,
}

impl HeapStats {
    /// Encoded size in bytes.
    pub const WIRE_SIZE: usize = 12;

    /// Encodes to wire form.
    pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        put(&mut buf, 0, self.free);
        put(&mut buf, 1, self.largest_free_block);
        put(&mut buf, 2, self.min_free);
        buf
    }

    /// Decodes from wire form.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::WIRE_SIZE {
            return None;
        }
        Some(Self { free: get(buf, 0), largest_free_block: get(buf, 1), min_free: get(buf, 2) })
    }
}

/// Descriptor embedded in the user image right after the standard headers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UserAppDesc {
    /// Start of the user data segment; must equal the protected app's WORLD1 DRAM reservation.
    pub user_app_dram_start: u32,
    /// Start of the user heap.
    pub user_app_heap_start: u32,
    /// Address of the pre-reserved startup resources block.
    pub user_app_resources: u32,
}

impl UserAppDesc {
    /// Encoded size in bytes.
    pub const WIRE_SIZE: usize = 12;

    /// Encodes to wire form.
    pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        put(&mut buf, 0, self.user_app_dram_start);
        put(&mut buf, 1, self.user_app_heap_start);
        put(&mut buf, 2, self.user_app_resources);
        buf
    }

    /// Decodes from wire form.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::WIRE_SIZE {
            return None;
        }
        Some(Self {
            user_app_dram_start: get(buf, 0),
            user_app_heap_start: get(buf, 1),
            user_app_resources: get(buf, 2),
        })
    }

    /// Resolves the startup resources block for a given main-task stack size.
    pub const fn resources(&self, stack_size: u32) -> UserAppResources {
        UserAppResources {
            startup_stack: self.user_app_resources,
            startup_stack_size: stack_size,
            startup_errno: self.user_app_resources.wrapping_add(stack_size),
        }
    }
}

/// Stack and errno cell reserved in the user image for the first user task.
///
/// Layout in user DRAM: `startup_stack[stack_size]` immediately followed by the errno word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UserAppResources {
    /// Base of the startup stack.
    pub startup_stack: u32,
    /// Startup stack size.
    pub startup_stack_size: u32,
    /// Errno cell of the first task.
    pub startup_errno: u32,
}

const_assert_eq!(DispatchMsg::WIRE_SIZE, 6 * 4);
const_assert_eq!(CleanupItem::WIRE_SIZE, 2 * 4);
const_assert_eq!(TaskCtx::WIRE_SIZE, 4 * 4);
const_assert_eq!(EspTimerArgs::WIRE_SIZE, 5 * 4);
const_assert_eq!(HeapStats::WIRE_SIZE, 3 * 4);
const_assert_eq!(UserAppDesc::WIRE_SIZE, 3 * 4);
