// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: One-shot bring-up of the world controller and permission controller
//! OWNERS: @kernel-team
//! PUBLIC API: PrivSep::init, PrivSep::grant_user_peripheral, BringUpError
//! DEPENDS_ON: hal::{permc, wcntl, intc}, privsep_abi::Layout
//! INVARIANTS: Interrupt plumbing is armed before any permission is narrowed;
//!             WORLD1 ends with no peripheral access unless granted afterwards
//! ADR: docs/adr/0001-world-separation.md

use core::fmt;

use privsep_abi::{Perm, World};

use crate::context::{AppHandler, PrivSep};
use crate::hal::intc::{Intc, VIOLATION_CPU_INT, VIOLATION_PRIORITY};
use crate::hal::permc::{Area, Monitor, Peripheral, Permc, SplitLine};
use crate::hal::regs::SRAM_SPLIT_GRANULE;
use crate::hal::wcntl::Wcntl;
use crate::platform::Platform;

/// Flash cache split points: protected window start, user window start, window end.
const FLASH_ICACHE_LINES: [usize; 3] = [0x4200_0000, 0x4240_0000, 0x4280_0000];
const FLASH_DCACHE_LINES: [usize; 3] = [0x3C00_0000, 0x3C40_0000, 0x3C80_0000];

/// Bring-up failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BringUpError {
    /// PMS registers are locked from an earlier boot stage.
    AlreadyLocked,
}

impl fmt::Display for BringUpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BringUpError::AlreadyLocked => f.write_str("permission registers already locked"),
        }
    }
}

const fn align_down(addr: usize, align: usize) -> usize {
    addr & !(align - 1)
}

impl<P: Platform> PrivSep<P> {
    /// Configures the world controller and every permission window.
    ///
    /// Must run once, from WORLD0, before the user image is booted.
    pub fn init(&mut self, handler: Option<AppHandler>) -> Result<(), BringUpError> {
        let regs = self.platform.regs();
        let permc = Permc::new(regs);
        if permc.is_locked() {
            crate::log_error!(target: "bringup", "Permission registers already configured");
            return Err(BringUpError::AlreadyLocked);
        }

        self.app_handler = handler;
        self.int_init();
        self.configure_sram();
        self.configure_rtc();
        self.configure_flash_cache();

        let permc = Permc::new(self.platform.regs());
        for &periph in Peripheral::ALL {
            permc.pif_set_perm(periph, World::W1, Perm::NONE);
        }
        crate::log_info!(target: "bringup", "world separation configured");
        Ok(())
    }

    /// Opens one peripheral to WORLD1.
    pub fn grant_user_peripheral(&self, periph: Peripheral, perm: Perm) {
        Permc::new(self.platform.regs()).pif_set_perm(periph, World::W1, perm);
    }

    fn int_init(&self) {
        let regs = self.platform.regs();
        let wcntl = Wcntl::new(regs);
        wcntl.set_mtvec_base(self.platform.vector_base());
        // Every interrupt entry switches back to WORLD0.
        wcntl.set_entry_check(0xFFFF_FFFF);

        let intc = Intc::new(regs);
        intc.enable(VIOLATION_CPU_INT);
        intc.set_type(VIOLATION_CPU_INT, false);
        intc.set_priority(VIOLATION_CPU_INT, VIOLATION_PRIORITY);

        let permc = Permc::new(regs);
        for mon in Monitor::PRIORITY {
            permc.enable_int(mon);
            intc.route(mon.source(), VIOLATION_CPU_INT);
        }
    }

    fn configure_sram(&self) {
        let permc = Permc::new(self.platform.regs());
        let linker = &self.layout.linker;

        permc.sram_set_split_line(linker.iram_end);
        for world in World::ALL {
            let flags = if world == World::W0 { Perm::ALL } else { Perm::NONE };
            permc.irom_set_perm(world, flags);
            permc.drom_set_perm(world, flags);
            permc.icache_set_perm(world, flags);
        }

        // IRAM: area0 below the user reservation, area1 is the reservation.
        permc.iram_set_split_line(SplitLine::L0, linker.w1_iram.end);
        permc.iram_set_split_line(SplitLine::L1, linker.w1_iram.end);
        for area in [Area::A0, Area::A1, Area::A2] {
            permc.iram_set_perm(area, World::W0, Perm::ALL);
        }
        permc.iram_set_perm(Area::A0, World::W1, Perm::ALL);
        permc.iram_set_perm(Area::A1, World::W1, Perm::NONE);
        permc.iram_set_perm(Area::A2, World::W1, Perm::NONE);
        permc.iram_set_perm(Area::A3, World::W0, Perm::NONE);
        permc.iram_set_perm(Area::A3, World::W1, Perm::NONE);

        // DRAM: area2 is the user reservation up to the ROM-reserved tail.
        permc.dram_set_split_line(SplitLine::L0, linker.w1_dram.start);
        permc.dram_set_split_line(
            SplitLine::L1,
            align_down(linker.rom_reserve_start, SRAM_SPLIT_GRANULE),
        );
        for area in [Area::A1, Area::A2, Area::A3] {
            permc.dram_set_perm(area, World::W0, Perm::ALL);
        }
        permc.dram_set_perm(Area::A1, World::W1, Perm::NONE);
        permc.dram_set_perm(Area::A2, World::W1, Perm::ALL);
        permc.dram_set_perm(Area::A3, World::W1, Perm::NONE);
        permc.dram_set_perm(Area::A0, World::W0, Perm::NONE);
        permc.dram_set_perm(Area::A0, World::W1, Perm::NONE);
    }

    fn configure_rtc(&self) {
        let permc = Permc::new(self.platform.regs());
        let split = self.layout.soc.rtc_iram.start;
        for world in World::ALL {
            permc.rtc_set_split_line(world, split);
            let flags = if world == World::W0 { Perm::ALL } else { Perm::NONE };
            permc.rtc_set_perm(Area::A0, world, flags);
            permc.rtc_set_perm(Area::A1, world, flags);
        }
    }

    fn configure_flash_cache(&self) {
        let permc = Permc::new(self.platform.regs());
        if !permc.flash_icache_invalidate() {
            crate::log_warn!(target: "bringup", "icache invalidate did not complete");
        }

        let lines = [SplitLine::L0, SplitLine::L1, SplitLine::L2];
        for (line, addr) in lines.into_iter().zip(FLASH_ICACHE_LINES) {
            permc.flash_icache_set_split_line(line, addr);
        }
        for (line, addr) in lines.into_iter().zip(FLASH_DCACHE_LINES) {
            permc.flash_dcache_set_split_line(line, addr);
        }

        for (area, w1) in [(Area::A0, Perm::NONE), (Area::A1, Perm::ALL)] {
            permc.flash_icache_set_perm(area, World::W0, Perm::ALL);
            permc.flash_icache_set_perm(area, World::W1, w1);
            permc.flash_dcache_set_perm(area, World::W0, Perm::ALL);
            permc.flash_dcache_set_perm(area, World::W1, w1);
        }
    }
}
