// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Address-range classifier for WORLD0/WORLD1 pointer validation
//! OWNERS: @kernel-team
//! PUBLIC API: Window, SocMap, LinkerRegions, Layout::{is_valid_*}, Layout::classify
//! DEPENDS_ON: none
//! INVARIANTS: O(1) comparisons only; never dereferences; windows are half-open [start, end)
//! ADR: docs/adr/0001-world-separation.md

/// Half-open address window `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    /// First address inside the window.
    pub start: usize,
    /// First address past the window.
    pub end: usize,
}

impl Window {
    /// Creates a window; `end` is exclusive.
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Returns true when `addr` lies inside the window.
    #[inline]
    pub const fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.end
    }

    /// Returns true when every byte of `[addr, addr + len)` lies inside the window.
    #[inline]
    pub const fn contains_range(&self, addr: usize, len: usize) -> bool {
        if !self.contains(addr) {
            return false;
        }
        if len == 0 {
            return true;
        }
        match addr.checked_add(len - 1) {
            Some(last) => last < self.end,
            None => false,
        }
    }

    /// Window size in bytes.
    pub const fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// True for an empty window.
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fixed SoC memory map.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SocMap {
    /// Flash-mapped instruction window.
    pub irom: Window,
    /// Flash-mapped data window.
    pub drom: Window,
    /// Internal SRAM, instruction bus view.
    pub iram: Window,
    /// Internal SRAM, data bus view.
    pub dram: Window,
    /// RTC fast memory, instruction bus view.
    pub rtc_iram: Window,
    /// RTC fast memory, data bus view.
    pub rtc_dram: Window,
    /// WORLD1 slice of the instruction flash window.
    pub uirom: Window,
    /// WORLD1 slice of the data flash window.
    pub udrom: Window,
}

impl SocMap {
    /// ESP32-C3 memory map.
    pub const ESP32C3: SocMap = SocMap {
        irom: Window::new(0x4200_0000, 0x4280_0000),
        drom: Window::new(0x3C00_0000, 0x3C80_0000),
        iram: Window::new(0x4037_C000, 0x403E_0000),
        dram: Window::new(0x3FC8_0000, 0x3FCE_0000),
        rtc_iram: Window::new(0x5000_0000, 0x5000_2000),
        rtc_dram: Window::new(0x5000_0000, 0x5000_2000),
        uirom: Window::new(0x4240_0000, 0x4280_0000),
        udrom: Window::new(0x3C40_0000, 0x3C80_0000),
    };
}

/// Region boundaries provided by the protected app's linker script.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkerRegions {
    /// `[_reserve_w1_iram_start, _reserve_w1_iram_end)`.
    pub w1_iram: Window,
    /// `[_reserve_w1_dram_start, _reserve_w1_dram_end)`.
    pub w1_dram: Window,
    /// `_iram_end`: end of the protected app's IRAM text, used as the I/D split line.
    pub iram_end: usize,
    /// Start of the DRAM block reserved for ROM functions.
    pub rom_reserve_start: usize,
}

/// Classification of an address against the two worlds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddrClass {
    /// Executable by WORLD1.
    UserInstruction,
    /// Data owned by WORLD1.
    UserData,
    /// Executable by WORLD0 only.
    KernelInstruction,
    /// Data owned by WORLD0.
    KernelData,
    /// Not in any classified window.
    Neither,
}

/// SoC map plus linker-provided WORLD1 reservations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout {
    /// SoC windows.
    pub soc: SocMap,
    /// Linker reservations.
    pub linker: LinkerRegions,
}

impl Layout {
    /// Builds an ESP32-C3 layout around the given linker reservations.
    pub const fn esp32c3(linker: LinkerRegions) -> Self {
        Self { soc: SocMap::ESP32C3, linker }
    }

    /// Writable WORLD1 instruction RAM.
    #[inline]
    pub const fn is_valid_uiram_addr(&self, addr: usize) -> bool {
        self.linker.w1_iram.contains(addr)
    }

    /// Writable WORLD1 data RAM.
    #[inline]
    pub const fn is_valid_udram_addr(&self, addr: usize) -> bool {
        self.linker.w1_dram.contains(addr)
    }

    /// Code WORLD1 may execute: its flash window or its IRAM.
    #[inline]
    pub const fn is_valid_user_i_addr(&self, addr: usize) -> bool {
        self.soc.uirom.contains(addr) || self.is_valid_uiram_addr(addr)
    }

    /// Data WORLD1 may read: its flash window or its DRAM.
    #[inline]
    pub const fn is_valid_user_d_addr(&self, addr: usize) -> bool {
        self.soc.udrom.contains(addr) || self.is_valid_udram_addr(addr)
    }

    /// Code belonging to WORLD0.
    #[inline]
    pub const fn is_valid_kernel_i_addr(&self, addr: usize) -> bool {
        !self.is_valid_user_i_addr(addr)
            && (self.soc.irom.contains(addr) || self.soc.iram.contains(addr))
    }

    /// Data belonging to WORLD0.
    #[inline]
    pub const fn is_valid_kernel_d_addr(&self, addr: usize) -> bool {
        !self.is_valid_user_d_addr(addr)
            && (self.soc.drom.contains(addr)
                || self.soc.dram.contains(addr)
                || self.soc.rtc_dram.contains(addr))
    }

    /// Writable WORLD0 data RAM (where kernel objects live).
    #[inline]
    pub const fn is_valid_kdram_addr(&self, addr: usize) -> bool {
        !self.is_valid_udram_addr(addr)
            && (self.soc.dram.contains(addr) || self.soc.rtc_dram.contains(addr))
    }

    /// `[addr, addr + len)` lies entirely in WORLD1 DRAM.
    #[inline]
    pub const fn is_valid_udram_range(&self, addr: usize, len: usize) -> bool {
        self.linker.w1_dram.contains_range(addr, len)
    }

    /// `[addr, addr + len)` lies entirely in readable WORLD1 data (DRAM or flash window).
    #[inline]
    pub const fn is_valid_user_d_range(&self, addr: usize, len: usize) -> bool {
        self.linker.w1_dram.contains_range(addr, len) || self.soc.udrom.contains_range(addr, len)
    }

    /// Address falls in the RTC fast-memory instruction window.
    #[inline]
    pub const fn is_rtc_addr(&self, addr: usize) -> bool {
        self.soc.rtc_iram.contains(addr)
    }

    /// Exactly one class holds for every address.
    pub const fn classify(&self, addr: usize) -> AddrClass {
        if self.is_valid_user_i_addr(addr) {
            AddrClass::UserInstruction
        } else if self.is_valid_user_d_addr(addr) {
            AddrClass::UserData
        } else if self.is_valid_kernel_i_addr(addr) {
            AddrClass::KernelInstruction
        } else if self.is_valid_kernel_d_addr(addr) {
            AddrClass::KernelData
        } else {
            AddrClass::Neither
        }
    }
}


#[cfg(test)]
mod tests_prop;
