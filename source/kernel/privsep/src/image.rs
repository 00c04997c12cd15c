// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! User image parsing and loading.
//!
//! Layout: a 24-byte image header (magic, segment count, entry), then per segment an
//! 8-byte `{load_addr, data_len}` header followed by its data. The first segment
//! starts with the 256-byte application descriptor; the user descriptor follows it.

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use privsep_abi::{Layout, UserAppDesc};

use crate::ota::Partition;
use crate::platform::{Flash, FlashError};

pub const IMAGE_MAGIC: u8 = 0xE9;
pub const HEADER_SIZE: u32 = 24;
pub const SEGMENT_HEADER_SIZE: u32 = 8;
pub const APP_DESC_SIZE: u32 = 256;
/// Offset of [`UserAppDesc`] from the start of the partition.
pub const USER_DESC_OFFSET: u32 = HEADER_SIZE + SEGMENT_HEADER_SIZE + APP_DESC_SIZE;
pub const MAX_SEGMENTS: u8 = 16;

/// Flash MMU page size.
pub const MMU_PAGE_SIZE: u32 = 0x1_0000;
const MMU_PAGE_MASK: u32 = !(MMU_PAGE_SIZE - 1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageError {
    BadMagic(u8),
    TooManySegments(u8),
    /// A segment runs past the end of the partition.
    Truncated,
    /// Entry point is not user-executable.
    BadEntry(u32),
    /// A RAM segment starts in user memory but does not fit in it.
    SegmentOutOfRange(u32),
    Flash(FlashError),
}

impl From<FlashError> for ImageError {
    fn from(err: FlashError) -> Self {
        ImageError::Flash(err)
    }
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageError::BadMagic(m) => write!(f, "bad image magic 0x{m:02x}"),
            ImageError::TooManySegments(n) => write!(f, "{n} segments"),
            ImageError::Truncated => f.write_str("segment exceeds partition"),
            ImageError::BadEntry(e) => write!(f, "entry 0x{e:08x} not user-executable"),
            ImageError::SegmentOutOfRange(a) => write!(f, "segment at 0x{a:08x} leaves user memory"),
            ImageError::Flash(err) => write!(f, "{err}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Segment {
    pub load_addr: u32,
    pub data_len: u32,
    /// Data offset from the partition start.
    pub data_offset: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageInfo {
    pub entry: u32,
    pub segments: Vec<Segment>,
}

/// Cache bus a flash window is mapped through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlashBus {
    Ibus,
    Dbus,
}

/// One flash-to-cache mapping request, page aligned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlashMapping {
    pub bus: FlashBus,
    pub vaddr: u32,
    pub paddr: u32,
    pub pages: u32,
}

impl FlashMapping {
    fn for_segment(bus: FlashBus, seg: &Segment, part: &Partition) -> Self {
        let vaddr = seg.load_addr;
        let pages = (seg.data_len + (vaddr - (vaddr & MMU_PAGE_MASK)) + MMU_PAGE_SIZE - 1) / MMU_PAGE_SIZE;
        Self {
            bus,
            vaddr: vaddr & MMU_PAGE_MASK,
            paddr: (part.offset + seg.data_offset) & MMU_PAGE_MASK,
            pages,
        }
    }
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// Parses the image header and segment table of `part`.
pub fn parse<F: Flash>(flash: &F, part: &Partition) -> Result<ImageInfo, ImageError> {
    let mut header = [0u8; HEADER_SIZE as usize];
    flash.flash_read(part.offset, &mut header)?;
    if header[0] != IMAGE_MAGIC {
        return Err(ImageError::BadMagic(header[0]));
    }
    let count = header[1];
    if count > MAX_SEGMENTS {
        return Err(ImageError::TooManySegments(count));
    }

    let mut segments = Vec::with_capacity(count as usize);
    let mut next = HEADER_SIZE;
    for _ in 0..count {
        if next.checked_add(SEGMENT_HEADER_SIZE).map_or(true, |end| end > part.size) {
            return Err(ImageError::Truncated);
        }
        let mut raw = [0u8; SEGMENT_HEADER_SIZE as usize];
        flash.flash_read(part.offset + next, &mut raw)?;
        let data_offset = next + SEGMENT_HEADER_SIZE;
        let data_len = read_u32(&raw, 4);
        next = data_offset.checked_add(data_len).ok_or(ImageError::Truncated)?;
        if next > part.size {
            return Err(ImageError::Truncated);
        }
        segments.push(Segment { load_addr: read_u32(&raw, 0), data_len, data_offset });
    }
    Ok(ImageInfo { entry: read_u32(&header, 4), segments })
}

/// Structural validation used before an image is selected for boot.
pub fn validate<F: Flash>(flash: &F, part: &Partition) -> Result<(), ImageError> {
    parse(flash, part).map(|_| ())
}

/// Reads the user descriptor embedded after the application descriptor.
pub fn read_user_desc<F: Flash>(flash: &F, part: &Partition) -> Result<UserAppDesc, ImageError> {
    let mut raw = [0u8; UserAppDesc::WIRE_SIZE];
    flash.flash_read(part.offset + USER_DESC_OFFSET, &mut raw)?;
    UserAppDesc::decode(&raw).ok_or(ImageError::Truncated)
}

impl ImageInfo {
    /// Copies every user IRAM/DRAM segment into place with `write`.
    pub fn load_ram_segments<F: Flash>(
        &self,
        flash: &F,
        part: &Partition,
        layout: &Layout,
        mut write: impl FnMut(usize, &[u8]),
    ) -> Result<(), ImageError> {
        for seg in &self.segments {
            let addr = seg.load_addr as usize;
            let len = seg.data_len as usize;
            let fits = if layout.is_valid_uiram_addr(addr) {
                layout.linker.w1_iram.contains_range(addr, len)
            } else if layout.is_valid_udram_addr(addr) {
                layout.is_valid_udram_range(addr, len)
            } else {
                continue;
            };
            if !fits {
                return Err(ImageError::SegmentOutOfRange(seg.load_addr));
            }
            crate::log_info!(
                target: "image",
                "Section loading at vaddr:0x{:08x} paddr:0x{:x} ({})",
                seg.load_addr,
                part.offset + seg.data_offset,
                seg.data_len
            );
            let mut buf = vec![0u8; len];
            flash.flash_read(part.offset + seg.data_offset, &mut buf)?;
            write(addr, &buf);
        }
        Ok(())
    }

    /// Cache mappings for the user flash windows. Only the last segment of each
    /// window is mapped.
    pub fn flash_mappings(&self, layout: &Layout, part: &Partition) -> Vec<FlashMapping> {
        let mut drom = None;
        let mut irom = None;
        for (i, seg) in self.segments.iter().enumerate() {
            let addr = seg.load_addr as usize;
            let (slot, bus, name) = if layout.soc.udrom.contains(addr) {
                (&mut drom, FlashBus::Dbus, "DROM")
            } else if layout.soc.uirom.contains(addr) {
                (&mut irom, FlashBus::Ibus, "IROM")
            } else {
                continue;
            };
            if slot.is_some() {
                crate::log_error!(
                    target: "image",
                    "Image contains multiple {} segments. Only the last one will be mapped.",
                    name
                );
            } else {
                crate::log_info!(target: "image", "Mapping segment {} as {}", i, name);
            }
            *slot = Some(FlashMapping::for_segment(bus, seg, part));
        }
        drom.into_iter().chain(irom).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::sim::SimPlatform;

    const PART: Partition = Partition { offset: 0x10_0000, size: 0x4_0000 };

    #[test]
    fn parses_fixture_image() {
        let sim = SimPlatform::new();
        sim.flash_image(PART.offset, &fixtures::user_image());
        let info = parse(&sim, &PART).unwrap();
        assert_eq!(info.entry, fixtures::USER_ENTRY);
        assert_eq!(info.segments.len(), 3);
        assert_eq!(info.segments[0].data_offset, HEADER_SIZE + SEGMENT_HEADER_SIZE);

        let desc = read_user_desc(&sim, &PART).unwrap();
        assert_eq!(desc.user_app_dram_start as usize, fixtures::LINKER.w1_dram.start);
    }

    #[test]
    fn rejects_bad_magic_and_truncation() {
        let sim = SimPlatform::new();
        assert_eq!(parse(&sim, &PART), Err(ImageError::BadMagic(0xFF)));

        let mut image = fixtures::user_image();
        image[1] = 1;
        // Claim a segment longer than the partition.
        image[28..32].copy_from_slice(&0x10_0000u32.to_le_bytes());
        sim.flash_image(PART.offset, &image);
        assert_eq!(parse(&sim, &PART), Err(ImageError::Truncated));
    }

    #[test]
    fn ram_segment_must_fit_user_memory() {
        let layout = fixtures::layout();
        let sim = SimPlatform::new();
        let info = ImageInfo {
            entry: fixtures::USER_ENTRY,
            segments: alloc::vec![Segment {
                load_addr: (fixtures::LINKER.w1_dram.end - 4) as u32,
                data_len: 16,
                data_offset: HEADER_SIZE + SEGMENT_HEADER_SIZE,
            }],
        };
        let res = info.load_ram_segments(&sim, &PART, &layout, |_, _| panic!("must not write"));
        assert_eq!(res, Err(ImageError::SegmentOutOfRange((fixtures::LINKER.w1_dram.end - 4) as u32)));
    }

    #[test]
    fn flash_mapping_rounds_to_pages() {
        let seg = Segment { load_addr: 0x4240_8000, data_len: 0x1_0000, data_offset: 0x20 };
        let map = FlashMapping::for_segment(FlashBus::Ibus, &seg, &PART);
        assert_eq!(map.vaddr, 0x4240_0000);
        assert_eq!(map.paddr, 0x10_0000);
        assert_eq!(map.pages, 2);
    }
}
