// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! ESP32-C3 register map for the sensitive (PMS), external-memory (cache PMS),
//! world-controller and interrupt-matrix blocks.

#![allow(missing_docs)]

pub const SENSITIVE_BASE: usize = 0x600C_1000;
pub const EXTMEM_BASE: usize = 0x600C_4000;
pub const INTERRUPT_BASE: usize = 0x600C_2000;
pub const WCL_BASE: usize = 0x600D_0000;

// SRAM split lines (value = addr >> 8).
pub const SPLIT_LINE_LOCK: usize = SENSITIVE_BASE + 0x0C0;
pub const SPLIT_LINE_MAIN_I_D: usize = SENSITIVE_BASE + 0x0C4;
pub const SPLIT_LINE_IRAM0_0: usize = SENSITIVE_BASE + 0x0C8;
pub const SPLIT_LINE_IRAM0_1: usize = SENSITIVE_BASE + 0x0CC;
pub const SPLIT_LINE_DRAM0_0: usize = SENSITIVE_BASE + 0x0D0;
pub const SPLIT_LINE_DRAM0_1: usize = SENSITIVE_BASE + 0x0D4;
pub const SPLIT_LINE_S: u32 = 0;
pub const SPLIT_LINE_V: u32 = 0x00FF_FFFF;
pub const SRAM_SPLIT_GRANULE: usize = 256;

// IRAM0 permissions: CONSTRAIN_1 = WORLD1, CONSTRAIN_2 = WORLD0.
pub const IRAM0_PMS_LOCK: usize = SENSITIVE_BASE + 0x0D8;
pub const IRAM0_PMS_CONSTRAIN_1: usize = SENSITIVE_BASE + 0x0DC;
pub const IRAM0_PMS_CONSTRAIN_2: usize = SENSITIVE_BASE + 0x0E0;
pub const IRAM0_PMS_MONITOR_LOCK: usize = SENSITIVE_BASE + 0x0E4;
pub const IRAM0_PMS_MONITOR_1: usize = SENSITIVE_BASE + 0x0E8;
pub const IRAM0_PMS_MONITOR_2: usize = SENSITIVE_BASE + 0x0EC;
pub const IRAM0_PMS_MONITOR_3: usize = SENSITIVE_BASE + 0x0F0;
pub const IRAM_PMS_W0_BASE: u32 = 0;
pub const IRAM_PMS_W1_BASE: u32 = 0;
pub const IRAM_PMS_S: u32 = 3;
pub const IRAM_PMS_V: u32 = 7;
pub const IRAM_CACHEDATAARRAY_S: u32 = 12;
pub const IRAM_CACHEDATAARRAY_V: u32 = 7;
pub const IRAM_ROM_S: u32 = 18;
pub const IRAM_ROM_V: u32 = 7;

// DRAM0 permissions: both worlds share CONSTRAIN_1.
pub const DRAM0_PMS_LOCK: usize = SENSITIVE_BASE + 0x0F4;
pub const DRAM0_PMS_CONSTRAIN_1: usize = SENSITIVE_BASE + 0x0F8;
pub const DRAM0_PMS_MONITOR_LOCK: usize = SENSITIVE_BASE + 0x0FC;
pub const DRAM0_PMS_MONITOR_1: usize = SENSITIVE_BASE + 0x100;
pub const DRAM0_PMS_MONITOR_2: usize = SENSITIVE_BASE + 0x104;
pub const DRAM0_PMS_MONITOR_3: usize = SENSITIVE_BASE + 0x108;
pub const DRAM_PMS_W0_BASE: u32 = 0;
pub const DRAM_PMS_W1_BASE: u32 = 12;
pub const DRAM_PMS_S: u32 = 2;
pub const DRAM_PMS_V: u32 = 3;
pub const DRAM_ROM_W0_S: u32 = 24;
pub const DRAM_ROM_W1_S: u32 = 26;
pub const DRAM_ROM_V: u32 = 3;

// Peripheral bus (PIF) and RTC fast memory.
pub const PIF_PMS_LOCK: usize = SENSITIVE_BASE + 0x10C;
pub const PIF_PMS_CONSTRAIN_1: usize = SENSITIVE_BASE + 0x110;
pub const PIF_PMS_CONSTRAIN_5: usize = SENSITIVE_BASE + 0x120;
pub const PIF_PMS_CONSTRAIN_9: usize = SENSITIVE_BASE + 0x130;
pub const PIF_PMS_CONSTRAIN_10: usize = SENSITIVE_BASE + 0x134;
pub const PIF_PMS_MONITOR_LOCK: usize = SENSITIVE_BASE + 0x138;
pub const PIF_PMS_MONITOR_1: usize = SENSITIVE_BASE + 0x13C;
pub const PIF_PMS_MONITOR_2: usize = SENSITIVE_BASE + 0x140;
pub const PIF_PMS_MONITOR_3: usize = SENSITIVE_BASE + 0x144;
pub const PIF_PMS_MAX_REG_ENTRY: u32 = 16;
pub const PIF_PMS_V: u32 = 3;
pub const RTC_SPLTADDR_W0_S: u32 = 0;
pub const RTC_SPLTADDR_W1_S: u32 = 11;
pub const RTC_SPLTADDR_V: u32 = 0x7FF;
pub const RTC_PMS_W0_BASE: u32 = 0;
pub const RTC_PMS_W1_BASE: u32 = 6;
pub const RTC_PMS_S: u32 = 3;
pub const RTC_PMS_V: u32 = 7;

// Monitor control and status layout shared by IRAM0, DRAM0 and PIF.
pub const MONITOR_VIOLATE_CLR: u32 = 1 << 0;
pub const MONITOR_VIOLATE_EN: u32 = 1 << 1;
pub const MONITOR_STATUS_INTR_S: u32 = 0;
pub const MONITOR_STATUS_WR_S: u32 = 1;
pub const MONITOR_STATUS_LOADSTORE_S: u32 = 2;
pub const MONITOR_STATUS_WORLD_S: u32 = 3;
pub const MONITOR_STATUS_WORLD_V: u32 = 3;

// Flash cache PMS.
pub const IBUS_PMS_TBL_LOCK: usize = EXTMEM_BASE + 0x0D0;
pub const IBUS_PMS_TBL_BOUNDARY0: usize = EXTMEM_BASE + 0x0D4;
pub const IBUS_PMS_TBL_BOUNDARY1: usize = EXTMEM_BASE + 0x0D8;
pub const IBUS_PMS_TBL_BOUNDARY2: usize = EXTMEM_BASE + 0x0DC;
pub const IBUS_PMS_TBL_ATTR: usize = EXTMEM_BASE + 0x0E0;
pub const DBUS_PMS_TBL_LOCK: usize = EXTMEM_BASE + 0x0E4;
pub const DBUS_PMS_TBL_BOUNDARY0: usize = EXTMEM_BASE + 0x0E8;
pub const DBUS_PMS_TBL_BOUNDARY1: usize = EXTMEM_BASE + 0x0EC;
pub const DBUS_PMS_TBL_BOUNDARY2: usize = EXTMEM_BASE + 0x0F0;
pub const DBUS_PMS_TBL_ATTR: usize = EXTMEM_BASE + 0x0F4;
pub const CACHE_BOUNDARY_V: u32 = 0xFFF;
pub const CACHE_PAGE_SHIFT: u32 = 12;
pub const IBUS_SCT1_ATTR_S: u32 = 0;
pub const IBUS_SCT2_ATTR_S: u32 = 4;
pub const IBUS_SCT_ATTR_V: u32 = 0xF;
pub const FLASH_ICACHE_V: u32 = 3;
pub const DBUS_SCT1_ATTR_S: u32 = 0;
pub const DBUS_SCT2_ATTR_S: u32 = 2;
pub const DBUS_SCT_ATTR_V: u32 = 0x3;
pub const FLASH_DCACHE_V: u32 = 1;
pub const CACHE_INT_ENA: usize = EXTMEM_BASE + 0x0F8;
pub const CACHE_INT_CLR: usize = EXTMEM_BASE + 0x0FC;
pub const CACHE_INT_ST: usize = EXTMEM_BASE + 0x100;
pub const IBUS_REJECT_BIT: u32 = 0;
pub const DBUS_REJECT_BIT: u32 = 1;
pub const IBUS_REJECT_ST: usize = EXTMEM_BASE + 0x104;
pub const IBUS_REJECT_VADDR: usize = EXTMEM_BASE + 0x108;
pub const DBUS_REJECT_ST: usize = EXTMEM_BASE + 0x10C;
pub const DBUS_REJECT_VADDR: usize = EXTMEM_BASE + 0x110;
pub const REJECT_ATTR_S: u32 = 0;
pub const REJECT_ATTR_V: u32 = 7;
pub const REJECT_WORLD_S: u32 = 3;
pub const REJECT_WORLD_V: u32 = 3;
pub const ICACHE_SYNC_CTRL: usize = EXTMEM_BASE + 0x114;
pub const ICACHE_INVALIDATE_ENA: u32 = 1 << 0;
pub const ICACHE_SYNC_DONE: u32 = 1 << 1;

// World controller.
pub const WCL_WORLD_TRIGGER_ADDR: usize = WCL_BASE + 0x000;
pub const WCL_WORLD_PREPARE: usize = WCL_BASE + 0x004;
pub const WCL_WORLD_UPDATE: usize = WCL_BASE + 0x008;
pub const WCL_MTVEC_BASE: usize = WCL_BASE + 0x020;
pub const WCL_STATUSTABLE_BASE: usize = WCL_BASE + 0x040;
pub const WCL_STATUSTABLE_CURRENT: usize = WCL_BASE + 0x0C0;
pub const WCL_MSTATUS_MIE: usize = WCL_BASE + 0x0C4;
pub const WCL_ENTRY_CHECK: usize = WCL_BASE + 0x0C8;
pub const WCL_STATUSTABLE_ENTRIES: u8 = 32;

// Interrupt matrix and CPU interrupt controller.
pub const INTR_SOURCE_CACHE_CORE0_ACS: u32 = 50;
pub const INTR_SOURCE_CORE0_IRAM0_PMS: u32 = 52;
pub const INTR_SOURCE_CORE0_DRAM0_PMS: u32 = 53;
pub const INTR_SOURCE_CORE0_PIF_PMS: u32 = 54;
pub const CPU_INT_ENABLE: usize = INTERRUPT_BASE + 0x104;
pub const CPU_INT_TYPE: usize = INTERRUPT_BASE + 0x108;
pub const CPU_INT_PRI_0: usize = INTERRUPT_BASE + 0x114;
pub const CPU_INT_PRI_V: u32 = 0xF;
