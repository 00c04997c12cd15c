// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Permission-controller register layer (split lines, per-world area flags, violation monitors)
//! OWNERS: @kernel-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests against an in-memory register bank
//! PUBLIC API: Permc, MemClass, Area, SplitLine, Monitor, Peripheral
//! DEPENDS_ON: hal::Mmio, hal::regs, privsep_abi::{World, Perm}
//! INVARIANTS: Each class accepts only its own flag subset and area range (assert on misuse);
//!             peripheral field = reg base + 4*(id/16), shift 30 - 2*(id%16)
//! ADR: docs/adr/0001-world-separation.md

use privsep_abi::{Perm, World};

use super::regs::*;
use super::Mmio;

/// Area delimited by split lines within a memory class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum Area {
    A0 = 0,
    A1 = 1,
    A2 = 2,
    A3 = 3,
}

/// Split-line selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SplitLine {
    L0,
    L1,
    L2,
}

/// Memory classes with split lines and per-area permissions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemClass {
    Iram,
    Dram,
    Rtc,
    FlashIcache,
    FlashDcache,
}

/// Violation monitors, one per interrupt status source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Monitor {
    Iram,
    Dram,
    FlashIcache,
    FlashDcache,
    /// Peripheral bus; also reports RTC fast-memory violations.
    Pif,
}

impl Monitor {
    /// Priority order in which monitors are polled on a fault.
    pub const PRIORITY: [Monitor; 5] = [
        Monitor::Iram,
        Monitor::Dram,
        Monitor::FlashIcache,
        Monitor::FlashDcache,
        Monitor::Pif,
    ];

    /// Interrupt-matrix source routed for this monitor.
    pub const fn source(self) -> u32 {
        match self {
            Monitor::Iram => INTR_SOURCE_CORE0_IRAM0_PMS,
            Monitor::Dram => INTR_SOURCE_CORE0_DRAM0_PMS,
            Monitor::FlashIcache | Monitor::FlashDcache => INTR_SOURCE_CACHE_CORE0_ACS,
            Monitor::Pif => INTR_SOURCE_CORE0_PIF_PMS,
        }
    }
}

macro_rules! peripherals {
    ($($name:ident = $id:expr,)+) => {
        /// Peripheral identifiers, numbered by their field position in the PIF permission table.
        #[allow(non_camel_case_types)]
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        #[repr(u32)]
        pub enum Peripheral {
            $($name = $id,)+
        }

        impl Peripheral {
            /// Every peripheral in the table.
            pub const ALL: &'static [Peripheral] = &[$(Peripheral::$name,)+];
        }
    };
}

peripherals! {
    UART1 = 0,
    I2C = 2,
    MISC = 3,
    WDG = 6,
    IO_MUX = 7,
    RTC = 8,
    TIMER = 9,
    FE = 10,
    FE2 = 11,
    GPIO = 12,
    G0SPI_0 = 13,
    G0SPI_1 = 14,
    UART = 15,
    SYSTIMER = 16,
    TIMERGROUP1 = 17,
    TIMERGROUP = 18,
    BB = 20,
    LEDC = 23,
    RMT = 26,
    UHCI0 = 28,
    I2C_EXT0 = 29,
    BT = 31,
    PWR = 33,
    WIFIMAC = 34,
    RWBT = 36,
    I2S1 = 40,
    CAN = 42,
    APB_CTRL = 45,
    SPI_2 = 47,
    WORLD_CONTROLLER = 48,
    DIO = 49,
    AD = 50,
    CACHE_CONFIG = 51,
    DMA_COPY = 52,
    INTERRUPT = 53,
    SENSITIVE = 54,
    SYSTEM = 55,
    USB_DEVICE = 56,
    BT_PWR = 57,
    APB_ADC = 59,
    CRYPTO_DMA = 60,
    CRYPTO_PERI = 61,
    USB_WRAP = 62,
}

/// Upper bound (exclusive) of peripheral identifiers.
pub const PERIPHERAL_MAX: u32 = 63;

impl Peripheral {
    /// Register and shift of this peripheral's 2-bit field for `world`.
    pub const fn field(self, world: World) -> (usize, u32) {
        let id = self as u32;
        let base = match world {
            World::W0 => PIF_PMS_CONSTRAIN_1,
            World::W1 => PIF_PMS_CONSTRAIN_5,
        };
        let reg = base + 4 * (id / PIF_PMS_MAX_REG_ENTRY) as usize;
        let shift = 30 - 2 * (id % PIF_PMS_MAX_REG_ENTRY);
        (reg, shift)
    }
}

/// Fault-status snapshot of a single monitor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MonitorStatus {
    /// Faulting address.
    pub addr: u32,
    /// Faulting world, if decodable.
    pub world: Option<World>,
    /// Write (true) or read/execute (false); for caches, the raw attribute bits.
    pub wr: u32,
    /// Load/store (1) or instruction fetch (0); cache monitors report 0.
    pub loadstore: u32,
}

/// Permission-controller view over a register bank.
pub struct Permc<'a, M: Mmio> {
    regs: &'a M,
}

impl<'a, M: Mmio> Permc<'a, M> {
    pub const fn new(regs: &'a M) -> Self {
        Self { regs }
    }

    /// True when any PMS lock bit is set (registers frozen until reset).
    pub fn is_locked(&self) -> bool {
        [
            SPLIT_LINE_LOCK,
            IRAM0_PMS_LOCK,
            IRAM0_PMS_MONITOR_LOCK,
            DRAM0_PMS_LOCK,
            DRAM0_PMS_MONITOR_LOCK,
            PIF_PMS_LOCK,
            PIF_PMS_MONITOR_LOCK,
            IBUS_PMS_TBL_LOCK,
            DBUS_PMS_TBL_LOCK,
        ]
        .iter()
        .any(|reg| self.regs.read32(*reg) & 1 != 0)
    }

    // ---------------------------------------------------------------- SRAM

    /// Main instruction/data split of internal SRAM.
    pub fn sram_set_split_line(&self, addr: usize) {
        self.regs.write32(SPLIT_LINE_MAIN_I_D, sram_split_value(addr));
    }

    /// Permission of the flash-mapped instruction window.
    pub fn irom_set_perm(&self, world: World, flags: Perm) {
        self.regs.set_field(iram_constrain(world), IRAM_ROM_S, IRAM_ROM_V, flags.bits());
    }

    /// Permission of the flash-mapped data window.
    pub fn drom_set_perm(&self, world: World, flags: Perm) {
        let shift = match world {
            World::W0 => DRAM_ROM_W0_S,
            World::W1 => DRAM_ROM_W1_S,
        };
        self.regs.set_field(DRAM0_PMS_CONSTRAIN_1, shift, DRAM_ROM_V, flags.bits());
    }

    /// Permission of the SRAM blocks used as instruction-cache data array.
    pub fn icache_set_perm(&self, world: World, flags: Perm) {
        self.regs.set_field(
            iram_constrain(world),
            IRAM_CACHEDATAARRAY_S,
            IRAM_CACHEDATAARRAY_V,
            flags.bits(),
        );
    }

    pub fn iram_set_split_line(&self, line: SplitLine, addr: usize) {
        let reg = match line {
            SplitLine::L0 => SPLIT_LINE_IRAM0_0,
            SplitLine::L1 => SPLIT_LINE_IRAM0_1,
            SplitLine::L2 => panic!("IRAM has two split lines"),
        };
        self.regs.write32(reg, sram_split_value(addr));
    }

    pub fn iram_set_perm(&self, area: Area, world: World, flags: Perm) {
        let base = match world {
            World::W0 => IRAM_PMS_W0_BASE,
            World::W1 => IRAM_PMS_W1_BASE,
        };
        let shift = base + area as u32 * IRAM_PMS_S;
        self.regs.set_field(iram_constrain(world), shift, IRAM_PMS_V, flags.bits());
    }

    pub fn dram_set_split_line(&self, line: SplitLine, addr: usize) {
        let reg = match line {
            SplitLine::L0 => SPLIT_LINE_DRAM0_0,
            SplitLine::L1 => SPLIT_LINE_DRAM0_1,
            SplitLine::L2 => panic!("DRAM has two split lines"),
        };
        self.regs.write32(reg, sram_split_value(addr));
    }

    /// Two bits per area (R, W); execute is not representable and is dropped.
    pub fn dram_set_perm(&self, area: Area, world: World, flags: Perm) {
        let base = match world {
            World::W0 => DRAM_PMS_W0_BASE,
            World::W1 => DRAM_PMS_W1_BASE,
        };
        let shift = base + area as u32 * DRAM_PMS_S;
        self.regs.set_field(DRAM0_PMS_CONSTRAIN_1, shift, DRAM_PMS_V, flags.bits());
    }

    // ----------------------------------------------------------------- RTC

    /// RTC fast memory has one split line per world; written as `addr >> 2`.
    pub fn rtc_set_split_line(&self, world: World, addr: usize) {
        let shift = match world {
            World::W0 => RTC_SPLTADDR_W0_S,
            World::W1 => RTC_SPLTADDR_W1_S,
        };
        self.regs.set_field(PIF_PMS_CONSTRAIN_9, shift, RTC_SPLTADDR_V, (addr >> 2) as u32);
    }

    /// Only areas 0 (below the split) and 1 (above) exist.
    pub fn rtc_set_perm(&self, area: Area, world: World, flags: Perm) {
        assert!((area as u32) < 2, "RTC memory has two areas");
        let base = match world {
            World::W0 => RTC_PMS_W0_BASE,
            World::W1 => RTC_PMS_W1_BASE,
        };
        let shift = base + area as u32 * RTC_PMS_S;
        self.regs.set_field(PIF_PMS_CONSTRAIN_10, shift, RTC_PMS_V, rtc_encode(flags));
    }

    // ---------------------------------------------------------- flash cache

    /// Instruction-bus boundary; written as `addr >> 12`.
    pub fn flash_icache_set_split_line(&self, line: SplitLine, addr: usize) {
        let reg = match line {
            SplitLine::L0 => IBUS_PMS_TBL_BOUNDARY0,
            SplitLine::L1 => IBUS_PMS_TBL_BOUNDARY1,
            SplitLine::L2 => IBUS_PMS_TBL_BOUNDARY2,
        };
        self.regs.set_field(reg, 0, CACHE_BOUNDARY_V, (addr >> CACHE_PAGE_SHIFT) as u32);
    }

    /// Only SCT1 (area 0) and SCT2 (area 1) are programmable.
    pub fn flash_icache_set_perm(&self, area: Area, world: World, flags: Perm) {
        let sct = match area {
            Area::A0 => IBUS_SCT1_ATTR_S,
            Area::A1 => IBUS_SCT2_ATTR_S,
            _ => panic!("flash icache has two programmable sections"),
        };
        let shift = sct + 2 * world.index();
        self.regs.set_field(IBUS_PMS_TBL_ATTR, shift, FLASH_ICACHE_V, icache_encode(flags));
    }

    /// Data-bus boundary; written as `addr >> 12`.
    pub fn flash_dcache_set_split_line(&self, line: SplitLine, addr: usize) {
        let reg = match line {
            SplitLine::L0 => DBUS_PMS_TBL_BOUNDARY0,
            SplitLine::L1 => DBUS_PMS_TBL_BOUNDARY1,
            SplitLine::L2 => DBUS_PMS_TBL_BOUNDARY2,
        };
        self.regs.set_field(reg, 0, CACHE_BOUNDARY_V, (addr >> CACHE_PAGE_SHIFT) as u32);
    }

    pub fn flash_dcache_set_perm(&self, area: Area, world: World, flags: Perm) {
        let sct = match area {
            Area::A0 => DBUS_SCT1_ATTR_S,
            Area::A1 => DBUS_SCT2_ATTR_S,
            _ => panic!("flash dcache has two programmable sections"),
        };
        let shift = sct + world.index();
        self.regs.set_field(DBUS_PMS_TBL_ATTR, shift, FLASH_DCACHE_V, dcache_encode(flags));
    }

    /// Invalidates the instruction cache; returns false if the sync did not complete.
    pub fn flash_icache_invalidate(&self) -> bool {
        self.regs.write32(ICACHE_SYNC_CTRL, ICACHE_INVALIDATE_ENA);
        for _ in 0..ICACHE_SYNC_POLLS {
            if self.regs.read32(ICACHE_SYNC_CTRL) & ICACHE_SYNC_DONE != 0 {
                return true;
            }
            core::hint::spin_loop();
        }
        false
    }

    // ------------------------------------------------------ class dispatch

    /// Programs a split line of `class`. RTC lines are per world: `L0` = WORLD0, `L1` = WORLD1.
    pub fn set_split_line(&self, class: MemClass, line: SplitLine, addr: usize) {
        match class {
            MemClass::Iram => self.iram_set_split_line(line, addr),
            MemClass::Dram => self.dram_set_split_line(line, addr),
            MemClass::Rtc => match line {
                SplitLine::L0 => self.rtc_set_split_line(World::W0, addr),
                SplitLine::L1 => self.rtc_set_split_line(World::W1, addr),
                SplitLine::L2 => panic!("RTC memory has one split line per world"),
            },
            MemClass::FlashIcache => self.flash_icache_set_split_line(line, addr),
            MemClass::FlashDcache => self.flash_dcache_set_split_line(line, addr),
        }
    }

    /// Programs the permission of one area of `class` for `world`.
    pub fn set_area_perm(&self, class: MemClass, area: Area, world: World, flags: Perm) {
        match class {
            MemClass::Iram => self.iram_set_perm(area, world, flags),
            MemClass::Dram => self.dram_set_perm(area, world, flags),
            MemClass::Rtc => self.rtc_set_perm(area, world, flags),
            MemClass::FlashIcache => self.flash_icache_set_perm(area, world, flags),
            MemClass::FlashDcache => self.flash_dcache_set_perm(area, world, flags),
        }
    }

    // ---------------------------------------------------------- peripherals

    pub fn pif_set_perm(&self, periph: Peripheral, world: World, flags: Perm) {
        let (reg, shift) = periph.field(world);
        self.regs.set_field(reg, shift, PIF_PMS_V, flags.bits());
    }

    pub fn pif_get_perm(&self, periph: Peripheral, world: World) -> Perm {
        let (reg, shift) = periph.field(world);
        Perm::from_bits_truncate(self.regs.get_field(reg, shift, PIF_PMS_V))
    }

    // ------------------------------------------------------------ monitors

    /// Arms a monitor: clear bit low, then enable bit high.
    pub fn enable_int(&self, mon: Monitor) {
        match mon {
            Monitor::Iram | Monitor::Dram | Monitor::Pif => {
                let ctrl = monitor_ctrl(mon);
                self.regs.write32(ctrl, self.regs.read32(ctrl) & !MONITOR_VIOLATE_CLR);
                self.regs.write32(ctrl, self.regs.read32(ctrl) | MONITOR_VIOLATE_EN);
            }
            Monitor::FlashIcache | Monitor::FlashDcache => {
                let bit = cache_bit(mon);
                self.regs.set_field(CACHE_INT_CLR, bit, 1, 0);
                self.regs.set_field(CACHE_INT_ENA, bit, 1, 1);
            }
        }
    }

    /// Acknowledges a pending violation.
    pub fn clear_int(&self, mon: Monitor) {
        match mon {
            Monitor::Iram | Monitor::Dram | Monitor::Pif => {
                let ctrl = monitor_ctrl(mon);
                self.regs.write32(ctrl, self.regs.read32(ctrl) | MONITOR_VIOLATE_CLR);
            }
            Monitor::FlashIcache | Monitor::FlashDcache => {
                self.regs.set_field(CACHE_INT_CLR, cache_bit(mon), 1, 1);
            }
        }
    }

    pub fn disable_int(&self, mon: Monitor) {
        match mon {
            Monitor::Iram | Monitor::Dram | Monitor::Pif => {
                let ctrl = monitor_ctrl(mon);
                self.regs.write32(ctrl, self.regs.read32(ctrl) & !MONITOR_VIOLATE_EN);
            }
            Monitor::FlashIcache | Monitor::FlashDcache => {
                self.regs.set_field(CACHE_INT_ENA, cache_bit(mon), 1, 0);
            }
        }
    }

    /// Clear followed by enable.
    pub fn clear_and_reenable(&self, mon: Monitor) {
        self.clear_int(mon);
        self.enable_int(mon);
    }

    pub fn int_status(&self, mon: Monitor) -> bool {
        match mon {
            Monitor::Iram | Monitor::Dram | Monitor::Pif => {
                self.regs.get_field(monitor_status(mon), MONITOR_STATUS_INTR_S, 1) != 0
            }
            Monitor::FlashIcache | Monitor::FlashDcache => {
                self.regs.get_field(CACHE_INT_ST, cache_bit(mon), 1) != 0
            }
        }
    }

    pub fn fault_addr(&self, mon: Monitor) -> u32 {
        match mon {
            Monitor::Iram => self.regs.read32(IRAM0_PMS_MONITOR_3),
            Monitor::Dram => self.regs.read32(DRAM0_PMS_MONITOR_3),
            Monitor::Pif => self.regs.read32(PIF_PMS_MONITOR_3),
            Monitor::FlashIcache => self.regs.read32(IBUS_REJECT_VADDR),
            Monitor::FlashDcache => self.regs.read32(DBUS_REJECT_VADDR),
        }
    }

    /// Full status snapshot of one monitor.
    pub fn fault_status(&self, mon: Monitor) -> MonitorStatus {
        let addr = self.fault_addr(mon);
        match mon {
            Monitor::Iram | Monitor::Dram | Monitor::Pif => {
                let st = monitor_status(mon);
                MonitorStatus {
                    addr,
                    world: World::from_monitor(self.regs.get_field(
                        st,
                        MONITOR_STATUS_WORLD_S,
                        MONITOR_STATUS_WORLD_V,
                    )),
                    wr: self.regs.get_field(st, MONITOR_STATUS_WR_S, 1),
                    loadstore: self.regs.get_field(st, MONITOR_STATUS_LOADSTORE_S, 1),
                }
            }
            Monitor::FlashIcache | Monitor::FlashDcache => {
                let st = if mon == Monitor::FlashIcache { IBUS_REJECT_ST } else { DBUS_REJECT_ST };
                MonitorStatus {
                    addr,
                    world: World::from_monitor(self.regs.get_field(
                        st,
                        REJECT_WORLD_S,
                        REJECT_WORLD_V,
                    )),
                    wr: self.regs.get_field(st, REJECT_ATTR_S, REJECT_ATTR_V),
                    loadstore: 0,
                }
            }
        }
    }
}

const ICACHE_SYNC_POLLS: usize = 10_000;

fn sram_split_value(addr: usize) -> u32 {
    assert!(addr % SRAM_SPLIT_GRANULE == 0, "SRAM split line must be 256-byte aligned");
    ((addr >> 8) as u32) & SPLIT_LINE_V
}

const fn iram_constrain(world: World) -> usize {
    match world {
        World::W0 => IRAM0_PMS_CONSTRAIN_2,
        World::W1 => IRAM0_PMS_CONSTRAIN_1,
    }
}

const fn monitor_ctrl(mon: Monitor) -> usize {
    match mon {
        Monitor::Iram => IRAM0_PMS_MONITOR_1,
        Monitor::Dram => DRAM0_PMS_MONITOR_1,
        _ => PIF_PMS_MONITOR_1,
    }
}

const fn monitor_status(mon: Monitor) -> usize {
    match mon {
        Monitor::Iram => IRAM0_PMS_MONITOR_2,
        Monitor::Dram => DRAM0_PMS_MONITOR_2,
        _ => PIF_PMS_MONITOR_2,
    }
}

const fn cache_bit(mon: Monitor) -> u32 {
    match mon {
        Monitor::FlashDcache => DBUS_REJECT_BIT,
        _ => IBUS_REJECT_BIT,
    }
}

/// RTC memory orders the bits W=1, R=2, X=4.
pub(crate) fn rtc_encode(flags: Perm) -> u32 {
    let mut perm = 0;
    if flags.contains(Perm::R) {
        perm |= 2;
    }
    if flags.contains(Perm::W) {
        perm |= 1;
    }
    if flags.contains(Perm::X) {
        perm |= 4;
    }
    perm
}

/// Instruction-bus attribute: bit0 = execute, bit1 = read; writes are not representable.
pub(crate) fn icache_encode(flags: Perm) -> u32 {
    if flags == Perm::ALL {
        return 0b11;
    }
    assert!(!flags.contains(Perm::W), "flash icache cannot grant write");
    let mut attr = 0;
    if flags.contains(Perm::X) {
        attr |= 0b01;
    }
    if flags.contains(Perm::R) {
        attr |= 0b10;
    }
    attr
}

/// Data-bus attribute: read only.
pub(crate) fn dcache_encode(flags: Perm) -> u32 {
    if flags == Perm::ALL {
        return 1;
    }
    assert!(flags.bits() <= Perm::R.bits(), "flash dcache only grants read");
    flags.bits()
}
