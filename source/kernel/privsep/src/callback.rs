// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! User callback records kept in protected DRAM.
//!
//! A record is stored in a small kernel allocation whose address doubles as the
//! cookie handed to the RTOS service. Loading a record is a plain memory read, so
//! interrupt-context callbacks never take a lock.

use crate::platform::{Memory, Rtos};

const TAG_XTIMER: u32 = 0xCB01;
const TAG_ESP_TIMER: u32 = 0xCB02;
const TAG_GPIO: u32 = 0xCB03;
const TAG_EVENT: u32 = 0xCB04;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Callback {
    XTimer { callback: u32, id: u32, timer: u32 },
    EspTimer { callback: u32, arg: u32 },
    Gpio { gpio: u32, isr: u32, arg: u32 },
    /// `instance` is the event-loop registration, filled in once known.
    Event { handler: u32, arg: u32, user_base: u32, id: i32, instance: u32 },
}

impl Callback {
    pub const SIZE: usize = 24;

    fn encode(&self) -> [u8; Self::SIZE] {
        let words = match *self {
            Callback::XTimer { callback, id, timer } => [TAG_XTIMER, callback, id, timer, 0, 0],
            Callback::EspTimer { callback, arg } => [TAG_ESP_TIMER, callback, arg, 0, 0, 0],
            Callback::Gpio { gpio, isr, arg } => [TAG_GPIO, gpio, isr, arg, 0, 0],
            Callback::Event { handler, arg, user_base, id, instance } => {
                [TAG_EVENT, handler, arg, user_base, id as u32, instance]
            }
        };
        let mut buf = [0u8; Self::SIZE];
        for (chunk, word) in buf.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        buf
    }

    fn decode(buf: &[u8; Self::SIZE]) -> Option<Self> {
        let mut w = [0u32; 6];
        for (word, chunk) in w.iter_mut().zip(buf.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        match w[0] {
            TAG_XTIMER => Some(Callback::XTimer { callback: w[1], id: w[2], timer: w[3] }),
            TAG_ESP_TIMER => Some(Callback::EspTimer { callback: w[1], arg: w[2] }),
            TAG_GPIO => Some(Callback::Gpio { gpio: w[1], isr: w[2], arg: w[3] }),
            TAG_EVENT => Some(Callback::Event {
                handler: w[1],
                arg: w[2],
                user_base: w[3],
                id: w[4] as i32,
                instance: w[5],
            }),
            _ => None,
        }
    }

    /// Allocates a record and returns its cookie.
    pub fn store<P: Rtos + Memory>(&self, platform: &P) -> Option<usize> {
        let cookie = platform.kalloc(Self::SIZE)?;
        platform.write(cookie, &self.encode());
        Some(cookie)
    }

    pub fn update<P: Memory>(&self, platform: &P, cookie: usize) {
        platform.write(cookie, &self.encode());
    }

    pub fn load<P: Memory>(platform: &P, cookie: usize) -> Option<Self> {
        let mut buf = [0u8; Self::SIZE];
        platform.read(cookie, &mut buf);
        Self::decode(&buf)
    }

    /// Scrubs and frees a record.
    pub fn release<P: Rtos + Memory>(platform: &P, cookie: usize) {
        platform.fill(cookie, 0, Self::SIZE);
        platform.kfree(cookie);
    }
}
